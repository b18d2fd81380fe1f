mod ir_support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use greedy_rewrite::ir::{verify, ElementType, MixedSliceParams, Module, OpKind};
use greedy_rewrite::passes::{CanonicalizeExtOptions, CopyToKernelOptions, COPY_KERNEL_NAME};
use greedy_rewrite::pipeline::PipelineBuilder;
use greedy_rewrite::{ModulePass, PassError, PassResult, Pipeline, PipelineOptions, RewriteError};
use ir_support::{
    add_copy_func, add_tensor_func, func_names, init_tracing, ops_of_kind, run_copy_func, slice,
    tensor,
};

fn mixed_module() -> Module {
    let mut module = Module::new();
    let window = slice(&[1, 2], &[4, 4], &[1, 1]);
    add_copy_func(&mut module, "copy", &[8, 8], &[4, 4], Some(&window), None)
        .expect("build copy function");
    add_tensor_func(
        &mut module,
        "squeeze",
        tensor(&[19, 1024, 1], ElementType::I32),
        tensor(&[1024], ElementType::I32),
        |b, arg| {
            let params = MixedSliceParams::from_static(&[0, 0, 0], &[1, 1024, 1], &[1, 1, 1]);
            let sliced = b.extract_slice(arg, &params, None)?;
            Ok(b.collapse_shape(
                sliced,
                vec![vec![0, 1, 2]],
                tensor(&[1024], ElementType::I32),
            )?)
        },
    )
    .expect("build tensor function");
    module
}

#[test]
fn options_parse_from_partial_json() {
    let options = PipelineOptions::from_json(
        r#"{
            "copy_to_kernel": { "attach_attr": "copy_kernel" },
            "canonicalize": { "blind_fold": true },
            "fixed_point_iters": 2
        }"#,
    )
    .expect("valid options");
    assert_eq!(
        options.copy_to_kernel,
        Some(CopyToKernelOptions {
            anchor_tag: String::new(),
            attach_attr: "copy_kernel".to_string(),
        })
    );
    assert_eq!(
        options.canonicalize,
        Some(CanonicalizeExtOptions { blind_fold: true })
    );
    assert_eq!(options.fixed_point_iters, 2);
    assert!(!options.log_stats);

    let defaults = PipelineOptions::from_json("{}").expect("defaults");
    assert_eq!(defaults, PipelineOptions::default());

    let disabled = PipelineOptions::from_json(r#"{ "canonicalize": null }"#).expect("valid");
    assert!(disabled.canonicalize.is_none());
    assert!(disabled.copy_to_kernel.is_some());
}

#[test]
fn options_reject_bad_input() {
    let zero = PipelineOptions::from_json(r#"{ "fixed_point_iters": 0 }"#)
        .expect_err("zero iterations");
    assert!(zero.to_string().contains("fixed_point_iters"));

    let malformed = PipelineOptions::from_json("{ not json").expect_err("malformed");
    assert!(format!("{malformed:#}").contains("failed to parse pipeline options"));
}

#[test]
fn serialized_options_read_back_unchanged() {
    let options = PipelineOptions {
        fixed_point_iters: 7,
        log_stats: true,
        ..PipelineOptions::default()
    };
    let text = options.to_json().expect("serialize");
    assert!(text.contains("\"fixed_point_iters\": 7"));
    assert_eq!(PipelineOptions::from_json(&text).expect("parse"), options);
}

#[test]
fn default_pipeline_lowers_copies_and_canonicalizes_tensors() {
    init_tracing();
    let mut module = mixed_module();
    let expected = run_copy_func(&module, "copy", &[8, 8], &[4, 4]).expect("evaluate input");

    let result = Pipeline::default().run(&mut module).expect("pipeline runs");
    assert!(result.changed);
    assert_eq!(result.rewrites_applied, 2);
    verify(&module).expect("output verifies");

    assert!(ops_of_kind(&module, OpKind::Copy).is_empty());
    assert!(ops_of_kind(&module, OpKind::CollapseShape).is_empty());
    assert_eq!(ops_of_kind(&module, OpKind::Call).len(), 1);
    assert_eq!(func_names(&module), vec![COPY_KERNEL_NAME, "copy", "squeeze"]);
    assert_eq!(
        run_copy_func(&module, "copy", &[8, 8], &[4, 4]).expect("evaluate output"),
        expected
    );

    let again = Pipeline::default().run(&mut module).expect("second run");
    assert!(!again.changed);
    assert_eq!(again.rewrites_applied, 0);
}

#[test]
fn disabled_steps_are_skipped() {
    let mut module = mixed_module();
    let options = PipelineOptions {
        copy_to_kernel: None,
        ..PipelineOptions::default()
    };
    let result = Pipeline::from_options(&options)
        .run(&mut module)
        .expect("pipeline runs");
    assert_eq!(result.rewrites_applied, 1);
    assert_eq!(ops_of_kind(&module, OpKind::Copy).len(), 1);
    assert!(ops_of_kind(&module, OpKind::CollapseShape).is_empty());

    let options = PipelineOptions {
        canonicalize: None,
        ..PipelineOptions::default()
    };
    let mut module = mixed_module();
    Pipeline::from_options(&options)
        .run(&mut module)
        .expect("pipeline runs");
    assert!(ops_of_kind(&module, OpKind::Copy).is_empty());
    assert_eq!(ops_of_kind(&module, OpKind::CollapseShape).len(), 1);
}

/// Reports a change on each of its first `changes` runs.
struct Settling {
    runs: Arc<AtomicUsize>,
    changes: usize,
}

impl ModulePass for Settling {
    fn name(&self) -> &'static str {
        "settling"
    }

    fn run(&self, _module: &mut Module) -> Result<PassResult, PassError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        let changed = run < self.changes;
        Ok(PassResult {
            changed,
            iterations: 1,
            rewrites_applied: usize::from(changed),
            erased_ops: 0,
        })
    }
}

fn settling_pipeline(changes: usize, max_iters: usize) -> (Pipeline, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut builder = PipelineBuilder::new();
    let pass = Arc::new(Settling {
        runs: Arc::clone(&runs),
        changes,
    });
    builder.fixed_point(max_iters, |p| p.pass(pass));
    (builder.finish(), runs)
}

#[test]
fn fixed_point_group_repeats_until_unchanged() {
    let (pipeline, runs) = settling_pipeline(3, 10);
    let result = pipeline.run(&mut Module::new()).expect("pipeline runs");
    assert_eq!(runs.load(Ordering::SeqCst), 4);
    assert_eq!(result.iterations, 4);
    assert_eq!(result.rewrites_applied, 3);
    assert!(result.changed);
}

#[test]
fn fixed_point_group_is_bounded() {
    let (pipeline, runs) = settling_pipeline(usize::MAX, 2);
    let result = pipeline.run(&mut Module::new()).expect("pipeline runs");
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(result.rewrites_applied, 2);

    let (pipeline, runs) = settling_pipeline(usize::MAX, 0);
    pipeline.run(&mut Module::new()).expect("pipeline runs");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

struct Failing;

impl ModulePass for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn run(&self, _module: &mut Module) -> Result<PassResult, PassError> {
        Err(PassError::new(
            "failing",
            RewriteError::NonConvergence {
                iterations: 1,
                rewrites: 2,
            },
        ))
    }
}

#[test]
fn pass_errors_stop_the_pipeline() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut builder = PipelineBuilder::new();
    builder.pass(Arc::new(Failing));
    builder.pass(Arc::new(Settling {
        runs: Arc::clone(&runs),
        changes: 0,
    }));

    let err = builder
        .finish()
        .run(&mut Module::new())
        .expect_err("first pass fails");
    assert_eq!(err.pass, "failing");
    assert!(err.is_non_convergence());
    assert!(err.to_string().contains("did not converge"));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}
