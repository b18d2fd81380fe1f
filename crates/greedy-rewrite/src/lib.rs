//! Greedy worklist pattern rewriting over a small SSA IR of buffers and
//! tensors, with a copy-to-kernel lowering and slice/reshape canonicalization.

pub mod driver;
mod env;
pub mod eval;
pub mod ir;
pub mod pass;
pub mod passes;
pub mod pattern;
pub mod pipeline;
pub mod registry;
pub mod rewriter;

pub use driver::{
    apply_patterns_and_fold_greedily, apply_patterns_greedily, GreedyConfig, GreedyRewriteStats,
    RewriteError,
};
pub use ir::{Module, OpId, ValueId};
pub use pass::{ModulePass, PassError, PassResult};
pub use passes::{CanonicalizeExtPass, MemrefCopyToKernelPass};
pub use pattern::{FrozenPatternSet, OpRewritePattern, Pattern, PatternSet, RewriteResult};
pub use pipeline::{Pipeline, PipelineOptions};
pub use registry::OpRegistry;
pub use rewriter::PatternRewriter;
