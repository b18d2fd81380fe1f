//! Lowers strided `memref.copy` operations into calls to a synthesized
//! element-wise kernel.
//!
//! The kernel receives the root buffers of both copy operands, replays the
//! view chains that produced the copied views, and copies with an identity
//! `linalg.generic`. The copy itself becomes a `func.call` whose first
//! operand is marked read-only.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::{apply_patterns_greedily, GreedyConfig};
use crate::ir::{
    names, AffineMap, Attribute, BlockId, FunctionType, InsertPoint, IrError, IrMapping,
    IteratorType, Module, OpBuilder, OpId, OpKind, ValueId,
};
use crate::pass::{ModulePass, PassError, PassResult};
use crate::pattern::{CopyOpView, OpRewritePattern, PatternSet, RewriteResult};
use crate::rewriter::PatternRewriter;

/// Base name of synthesized copy kernels; collisions get a `_N` suffix.
pub const COPY_KERNEL_NAME: &str = "memref_copy_kernel";
/// Call attribute giving the number of leading read-only operands.
pub const READONLY_OPERAND_NUM_ATTR: &str = "readonly_operand_num";

/// Pass options; an empty string disables the corresponding behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyToKernelOptions {
    /// Only copies inside functions carrying this attribute are lowered.
    pub anchor_tag: String,
    /// Unit attribute attached to every synthesized kernel.
    pub attach_attr: String,
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Rewrites `memref.copy` with a non-identity operand layout into a call.
#[derive(Debug, Clone, Default)]
pub struct MemrefCopyToKernel {
    anchor_tag: Option<String>,
    attach_attr: Option<String>,
}

impl MemrefCopyToKernel {
    pub fn new(anchor_tag: &str, attach_attr: &str) -> Self {
        Self {
            anchor_tag: non_empty(anchor_tag),
            attach_attr: non_empty(attach_attr),
        }
    }
}

/// Follows view-like producers back to the underlying buffer, appending each
/// visited view op to `chain`.
fn view_source(module: &Module, mut value: ValueId, chain: &mut Vec<OpId>) -> Option<ValueId> {
    while let Some(def) = module.defining_op(value) {
        if !module.kind(def).is_view_like() {
            break;
        }
        chain.push(def);
        value = module.op(def).operand(0)?;
    }
    Some(value)
}

/// Clones `op` at the end of `entry` unless its result is already mapped.
/// Views and constants shared by both operands are replayed once.
fn replay(
    module: &mut Module,
    op: OpId,
    mapping: &mut IrMapping,
    entry: BlockId,
) -> Result<(), IrError> {
    let cloned = module
        .op(op)
        .result(0)
        .map(|result| mapping.contains(result))
        .unwrap_or(false);
    if !cloned {
        module.clone_op(op, mapping, InsertPoint::BlockEnd(entry))?;
    }
    Ok(())
}

impl OpRewritePattern<CopyOpView> for MemrefCopyToKernel {
    fn match_and_rewrite(
        &self,
        view: CopyOpView,
        rewriter: &mut PatternRewriter<'_>,
    ) -> RewriteResult {
        let module = rewriter.module();
        let Some(parent) = module.parent_of_kind(view.root, OpKind::Func) else {
            return Ok(false);
        };
        if let Some(anchor) = &self.anchor_tag {
            if !module.op(parent).has_attr(anchor) {
                return Ok(false);
            }
        }
        if view.source_type.has_identity_layout() && view.target_type.has_identity_layout() {
            return Ok(false);
        }

        let mut chain = Vec::new();
        let (Some(call_src), Some(call_dst)) = (
            view_source(module, view.source, &mut chain),
            view_source(module, view.target, &mut chain),
        ) else {
            return Ok(false);
        };
        // Dynamic offsets, sizes and strides must be rebuildable in the kernel.
        let mut constants = Vec::new();
        for op in &chain {
            for operand in module.op(*op).operands().iter().skip(1) {
                match module.defining_op(*operand) {
                    Some(def) if module.kind(def) == OpKind::Constant => constants.push(def),
                    _ => return Ok(false),
                }
            }
        }
        let copy_attrs = module.op(view.root).attrs().clone();
        let func_type = FunctionType::new(
            vec![
                module.value_type(call_src).clone(),
                module.value_type(call_dst).clone(),
            ],
            Vec::new(),
        );
        let rank = view.target_type.rank();

        let mut symbols = rewriter.symbol_table(view.root)?;
        let (kernel, entry) = rewriter
            .builder(InsertPoint::Before(parent))
            .func(COPY_KERNEL_NAME, func_type)?;
        let kernel_name = symbols.insert(rewriter.module_mut(), kernel)?;
        rewriter.set_attr(
            kernel,
            names::SYM_VISIBILITY,
            Attribute::Str("private".to_string()),
        )?;

        let module = rewriter.module_mut();
        let params = module.block(entry).args().to_vec();
        let mut mapping = IrMapping::new();
        mapping.map(call_src, params[0]);
        mapping.map(call_dst, params[1]);
        for op in constants.iter().chain(chain.iter().rev()) {
            replay(module, *op, &mut mapping, entry)?;
        }

        let mut body = OpBuilder::new(module, InsertPoint::BlockEnd(entry));
        body.generic(
            vec![mapping.lookup_or_default(view.source)],
            vec![mapping.lookup_or_default(view.target)],
            vec![AffineMap::identity(rank), AffineMap::identity(rank)],
            vec![IteratorType::Parallel; rank],
            copy_attrs,
            |b, args| {
                b.yield_values(vec![args[0]])?;
                Ok(())
            },
        )?;
        body.ret(Vec::new())?;

        if let Some(attr) = &self.attach_attr {
            rewriter.set_attr(kernel, attr.as_str(), Attribute::Unit)?;
        }

        let call = rewriter.builder(InsertPoint::Before(view.root)).call(
            &kernel_name,
            vec![call_src, call_dst],
            Vec::new(),
        )?;
        rewriter.set_attr(call, READONLY_OPERAND_NUM_ATTR, Attribute::Index(1))?;
        rewriter.erase_op(view.root)?;
        debug!(
            kernel = %kernel_name,
            views = chain.len(),
            constants = constants.len(),
            "lowered memref.copy to kernel call"
        );
        Ok(true)
    }
}

/// Module pass applying [`MemrefCopyToKernel`] greedily.
pub struct MemrefCopyToKernelPass {
    options: CopyToKernelOptions,
    config: GreedyConfig,
}

impl MemrefCopyToKernelPass {
    pub const NAME: &'static str = "memref-copy-to-kernel";

    pub fn new(anchor_tag: impl Into<String>, attach_attr: impl Into<String>) -> Self {
        Self::from_options(CopyToKernelOptions {
            anchor_tag: anchor_tag.into(),
            attach_attr: attach_attr.into(),
        })
    }

    pub fn from_options(options: CopyToKernelOptions) -> Self {
        Self {
            options,
            config: GreedyConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GreedyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn options(&self) -> &CopyToKernelOptions {
        &self.options
    }
}

impl Default for MemrefCopyToKernelPass {
    fn default() -> Self {
        Self::from_options(CopyToKernelOptions::default())
    }
}

impl ModulePass for MemrefCopyToKernelPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, module: &mut Module) -> Result<PassResult, PassError> {
        let mut patterns = PatternSet::new();
        patterns.insert_view::<CopyOpView, _>(MemrefCopyToKernel::new(
            &self.options.anchor_tag,
            &self.options.attach_attr,
        ));
        let frozen = patterns.freeze();
        let stats = apply_patterns_greedily(module, &frozen, &self.config)
            .map_err(|source| PassError::new(Self::NAME, source))?;
        Ok(PassResult::from(stats))
    }
}

/// Runs [`MemrefCopyToKernelPass`] with the given anchor and marker attributes.
pub fn lower_copies_to_kernels(
    module: &mut Module,
    anchor_tag: &str,
    attach_attr: &str,
) -> Result<PassResult, PassError> {
    MemrefCopyToKernelPass::new(anchor_tag, attach_attr).run(module)
}

