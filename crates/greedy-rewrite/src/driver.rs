use std::collections::{HashSet, VecDeque};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::ir::{verify, ChangeJournal, IrError, Module, OpId, VerifyError};
use crate::pattern::FrozenPatternSet;
use crate::rewriter::PatternRewriter;

#[derive(Debug, Clone)]
pub struct GreedyConfig {
    /// Maximum number of sweeps over the region.
    pub max_iterations: usize,
    /// Maximum number of successful rewrites per invocation.
    pub max_rewrites: usize,
    pub enable_dce: bool,
    pub verify: bool,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            max_iterations: crate::env::max_iterations(),
            max_rewrites: crate::env::max_rewrites(),
            enable_dce: true,
            verify: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GreedyRewriteStats {
    pub iterations: usize,
    pub applied: usize,
    pub dce_removed: usize,
}

impl GreedyRewriteStats {
    pub fn changed(&self) -> bool {
        self.applied > 0 || self.dce_removed > 0
    }
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(
        "greedy rewrite did not converge after {iterations} sweep(s) and {rewrites} rewrite(s)"
    )]
    NonConvergence { iterations: usize, rewrites: usize },
    #[error("verification failed after rewriting: {0}")]
    Verification(#[from] VerifyError),
    #[error(transparent)]
    Ir(#[from] IrError),
}

/// Insertion-ordered queue that holds each operation at most once.
#[derive(Debug, Default)]
pub struct Worklist {
    queue: VecDeque<OpId>,
    queued: HashSet<OpId>,
}

impl Worklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `op` unless it is already pending. Returns whether it was added.
    pub fn push(&mut self, op: OpId) -> bool {
        if !self.queued.insert(op) {
            return false;
        }
        self.queue.push_back(op);
        true
    }

    pub fn pop(&mut self) -> Option<OpId> {
        let op = self.queue.pop_front()?;
        self.queued.remove(&op);
        Some(op)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Applies `patterns` to every operation nested under the top-level module.
pub fn apply_patterns_greedily(
    module: &mut Module,
    patterns: &FrozenPatternSet,
    cfg: &GreedyConfig,
) -> Result<GreedyRewriteStats, RewriteError> {
    let top = module.top();
    apply_patterns_and_fold_greedily(module, top, patterns, cfg)
}

/// Rewrites the operations nested under `root` until no pattern applies.
///
/// Each sweep seeds the worklist in post-order and pops operations until it
/// drains; a sweep that changed nothing ends the run. Operations created or
/// modified by a rewrite are re-enqueued, as are producers whose results lost
/// a use. `root` itself is never rewritten.
pub fn apply_patterns_and_fold_greedily(
    module: &mut Module,
    root: OpId,
    patterns: &FrozenPatternSet,
    cfg: &GreedyConfig,
) -> Result<GreedyRewriteStats, RewriteError> {
    if !module.is_live(root) {
        return Err(IrError::StaleOp(root).into());
    }
    let mut stats = GreedyRewriteStats::default();
    if patterns.is_empty() && !cfg.enable_dce {
        return finish(module, cfg, stats);
    }

    loop {
        if stats.iterations >= cfg.max_iterations {
            warn!(
                iterations = stats.iterations,
                rewrites = stats.applied,
                "greedy rewrite hit the sweep limit"
            );
            return Err(RewriteError::NonConvergence {
                iterations: stats.iterations,
                rewrites: stats.applied,
            });
        }
        stats.iterations += 1;
        if !run_sweep(module, root, patterns, cfg, &mut stats)? {
            break;
        }
    }

    debug!(
        iterations = stats.iterations,
        applied = stats.applied,
        dce_removed = stats.dce_removed,
        "greedy rewrite converged"
    );
    finish(module, cfg, stats)
}

fn finish(
    module: &Module,
    cfg: &GreedyConfig,
    stats: GreedyRewriteStats,
) -> Result<GreedyRewriteStats, RewriteError> {
    if cfg.verify {
        verify(module)?;
    }
    Ok(stats)
}

/// One worklist pass; returns whether anything changed.
fn run_sweep(
    module: &mut Module,
    root: OpId,
    patterns: &FrozenPatternSet,
    cfg: &GreedyConfig,
    stats: &mut GreedyRewriteStats,
) -> Result<bool, RewriteError> {
    let mut worklist = Worklist::new();
    for op in module.walk(root) {
        if op != root {
            worklist.push(op);
        }
    }

    let mut rewriter = PatternRewriter::new(module);
    let mut changed = false;
    while let Some(op) = worklist.pop() {
        if !rewriter.contains(op) {
            continue;
        }
        if cfg.enable_dce && is_trivially_dead(rewriter.module(), op) {
            trace!(op = %rewriter.kind(op), "erasing trivially dead op");
            rewriter.erase_op(op)?;
            stats.dce_removed += 1;
            changed = true;
            let changes = rewriter.take_changes();
            enqueue_changes(rewriter.module(), root, &changes, &mut worklist);
            continue;
        }

        let kind = rewriter.kind(op);
        for (_, pattern) in patterns.matching(kind) {
            trace!(pattern = pattern.name(), op = %kind, "trying pattern");
            let applied = pattern.match_and_rewrite(op, &mut rewriter)?;
            let changes = rewriter.take_changes();
            if !applied {
                continue;
            }
            debug!(pattern = pattern.name(), op = %kind, "pattern applied");
            stats.applied += 1;
            changed = true;
            if stats.applied > cfg.max_rewrites {
                warn!(
                    rewrites = stats.applied,
                    limit = cfg.max_rewrites,
                    "greedy rewrite hit the rewrite limit"
                );
                return Err(RewriteError::NonConvergence {
                    iterations: stats.iterations,
                    rewrites: stats.applied,
                });
            }
            enqueue_changes(rewriter.module(), root, &changes, &mut worklist);
            break;
        }
    }
    Ok(changed)
}

fn is_trivially_dead(module: &Module, op: OpId) -> bool {
    let operation = module.op(op);
    operation.kind().is_pure()
        && operation
            .results()
            .iter()
            .all(|value| !module.value(*value).has_uses())
}

fn enqueue_changes(module: &Module, root: OpId, changes: &ChangeJournal, worklist: &mut Worklist) {
    let mut enqueue = |op: OpId| {
        if module.is_live(op) && module.is_proper_ancestor(root, op) {
            worklist.push(op);
        }
    };
    for op in changes.created.iter().chain(&changes.modified) {
        enqueue(*op);
    }
    for value in &changes.released {
        if !module.is_value_live(*value) {
            continue;
        }
        if let Some(producer) = module.defining_op(*value) {
            enqueue(producer);
        }
    }
}
