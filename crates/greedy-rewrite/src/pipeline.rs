use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ir::Module;
use crate::pass::{ModulePass, PassError, PassResult};
use crate::passes::{
    CanonicalizeExtOptions, CanonicalizeExtPass, CopyToKernelOptions, MemrefCopyToKernelPass,
};

pub enum Step {
    Pass(Arc<dyn ModulePass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn ModulePass>) {
        self.steps.push(Step::Pass(pass));
    }

    /// Repeats the steps built by `build` until none of them changes the
    /// module, at most `max_iters` times.
    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Pipeline {
        Pipeline {
            steps: self.steps,
            log_stats: crate::env::pass_stats_enabled(),
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline configuration, typically read from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Lower strided copies first; `None` skips the pass.
    pub copy_to_kernel: Option<CopyToKernelOptions>,
    /// Canonicalize afterwards; `None` skips the group.
    pub canonicalize: Option<CanonicalizeExtOptions>,
    pub fixed_point_iters: usize,
    /// Log per-pass statistics regardless of `GREEDY_REWRITE_PASS_STATS`.
    pub log_stats: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            copy_to_kernel: Some(CopyToKernelOptions::default()),
            canonicalize: Some(CanonicalizeExtOptions::default()),
            fixed_point_iters: 4,
            log_stats: false,
        }
    }
}

impl PipelineOptions {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let options: Self =
            serde_json::from_str(text).context("failed to parse pipeline options")?;
        if options.fixed_point_iters == 0 {
            anyhow::bail!("fixed_point_iters must be at least 1");
        }
        Ok(options)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize pipeline options")
    }
}

/// Ordered passes with bounded fixed-point groups.
pub struct Pipeline {
    steps: Vec<Step>,
    log_stats: bool,
}

impl Pipeline {
    pub fn from_options(options: &PipelineOptions) -> Self {
        let mut builder = PipelineBuilder::new();
        if let Some(copy) = &options.copy_to_kernel {
            builder.pass(Arc::new(MemrefCopyToKernelPass::from_options(copy.clone())));
        }
        if let Some(canonicalize) = &options.canonicalize {
            builder.fixed_point(options.fixed_point_iters, |p| {
                p.pass(Arc::new(CanonicalizeExtPass::from_options(
                    canonicalize.clone(),
                )));
            });
        }
        let mut pipeline = builder.finish();
        pipeline.log_stats |= options.log_stats;
        pipeline
    }

    pub fn run(&self, module: &mut Module) -> Result<PassResult, PassError> {
        let mut totals = PassResult::default();
        run_steps(&self.steps, module, &mut totals, self.log_stats)?;
        Ok(totals)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::from_options(&PipelineOptions::default())
    }
}

fn run_steps(
    steps: &[Step],
    module: &mut Module,
    totals: &mut PassResult,
    log_stats: bool,
) -> Result<bool, PassError> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let stats = pass.run(module)?;
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
                if log_stats {
                    info!(
                        pass = pass.name(),
                        changed = stats.changed,
                        iterations = stats.iterations,
                        rewrites = stats.rewrites_applied,
                        erased = stats.erased_ops,
                        "pass stats"
                    );
                }
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, module, &mut local, log_stats)?;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    Ok(changed_any)
}
