use thiserror::Error;

use crate::driver::{GreedyRewriteStats, RewriteError};
use crate::ir::Module;

/// Result returned by a [`ModulePass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the IR.
    pub changed: bool,
    /// Number of worklist sweeps executed while applying the pass.
    pub iterations: usize,
    /// Total number of patterns applied by the pass.
    pub rewrites_applied: usize,
    /// Operations removed as trivially dead.
    pub erased_ops: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_ops: self.erased_ops + other.erased_ops,
        }
    }
}

impl From<GreedyRewriteStats> for PassResult {
    fn from(stats: GreedyRewriteStats) -> Self {
        PassResult {
            changed: stats.changed(),
            iterations: stats.iterations,
            rewrites_applied: stats.applied,
            erased_ops: stats.dce_removed,
        }
    }
}

/// A pass failed; the module may hold partial rewrites.
#[derive(Debug, Error)]
#[error("pass `{pass}` failed: {source}")]
pub struct PassError {
    pub pass: &'static str,
    #[source]
    pub source: RewriteError,
}

impl PassError {
    pub fn new(pass: &'static str, source: RewriteError) -> Self {
        Self { pass, source }
    }

    pub fn is_non_convergence(&self) -> bool {
        matches!(self.source, RewriteError::NonConvergence { .. })
    }
}

/// Interface implemented by passes that rewrite a whole module.
pub trait ModulePass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, module: &mut Module) -> Result<PassResult, PassError>;
}
