mod ir_support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use greedy_rewrite::driver::{
    apply_patterns_and_fold_greedily, apply_patterns_greedily, GreedyConfig, RewriteError,
};
use greedy_rewrite::ir::{
    names, verify, Attribute, FunctionType, InsertPoint, IrError, Module, OpBuilder, OpId, OpKind,
    Type, VerifyError,
};
use greedy_rewrite::pattern::{Pattern, PatternSet, RewriteResult};
use greedy_rewrite::PatternRewriter;
use ir_support::{init_tracing, memref, ops_of_kind};

fn config(max_iterations: usize, max_rewrites: usize) -> GreedyConfig {
    GreedyConfig {
        max_iterations,
        max_rewrites,
        enable_dce: true,
        verify: true,
    }
}

/// `func @name() -> memref<4xf32>` returning a fresh allocation.
fn add_alloc_func(module: &mut Module, name: &str) -> (OpId, OpId) {
    let ty = FunctionType::new(Vec::new(), vec![Type::MemRef(memref(&[4]))]);
    let body = module.body();
    let (func, entry) = OpBuilder::new(module, InsertPoint::BlockEnd(body))
        .func(name, ty)
        .expect("build func");
    let mut builder = OpBuilder::new(module, InsertPoint::BlockEnd(entry));
    let buffer = builder.alloc(memref(&[4])).expect("alloc");
    builder.ret(vec![buffer]).expect("return");
    let alloc = module.defining_op(buffer).expect("alloc op");
    (func, alloc)
}

/// Flips a boolean attribute on allocations; two instances undo each other.
struct Toggle {
    from: bool,
}

impl Pattern for Toggle {
    fn name(&self) -> &str {
        if self.from {
            "toggle-off"
        } else {
            "toggle-on"
        }
    }

    fn matches_operation(&self, kind: OpKind) -> bool {
        kind == OpKind::Alloc
    }

    fn match_and_rewrite(&self, root: OpId, rewriter: &mut PatternRewriter<'_>) -> RewriteResult {
        if rewriter.op(root).attr("flag") != Some(&Attribute::Bool(self.from)) {
            return Ok(false);
        }
        rewriter.set_attr(root, "flag", Attribute::Bool(!self.from))?;
        Ok(true)
    }
}

/// Bumps a counter attribute until it reaches `limit`.
struct CountUp {
    limit: i64,
}

impl Pattern for CountUp {
    fn matches_operation(&self, kind: OpKind) -> bool {
        kind == OpKind::Alloc
    }

    fn match_and_rewrite(&self, root: OpId, rewriter: &mut PatternRewriter<'_>) -> RewriteResult {
        let current = rewriter
            .op(root)
            .attr("count")
            .and_then(Attribute::as_int)
            .unwrap_or(0);
        if current >= self.limit {
            return Ok(false);
        }
        rewriter.set_attr(root, "count", Attribute::Int(current + 1))?;
        Ok(true)
    }
}

/// Claims success without touching the IR.
struct Liar;

impl Pattern for Liar {
    fn matches_operation(&self, kind: OpKind) -> bool {
        kind == OpKind::Alloc
    }

    fn match_and_rewrite(&self, _: OpId, _: &mut PatternRewriter<'_>) -> RewriteResult {
        Ok(true)
    }
}

/// Records which allocation attribute was set first.
struct Claim {
    label: &'static str,
    benefit: u16,
    attempts: Arc<AtomicUsize>,
}

impl Pattern for Claim {
    fn benefit(&self) -> u16 {
        self.benefit
    }

    fn matches_operation(&self, kind: OpKind) -> bool {
        kind == OpKind::Alloc
    }

    fn match_and_rewrite(&self, root: OpId, rewriter: &mut PatternRewriter<'_>) -> RewriteResult {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if rewriter.op(root).has_attr("winner") {
            return Ok(false);
        }
        rewriter.set_attr(root, "winner", Attribute::Str(self.label.to_string()))?;
        Ok(true)
    }
}

#[test]
fn oscillating_patterns_fail_with_non_convergence() {
    init_tracing();
    let mut module = Module::new();
    let (_, alloc) = add_alloc_func(&mut module, "main");
    module
        .set_attr(alloc, "flag", Attribute::Bool(false))
        .expect("seed flag");

    let mut set = PatternSet::new();
    set.add(Toggle { from: false }).add(Toggle { from: true });
    let frozen = set.freeze();

    let err = apply_patterns_greedily(&mut module, &frozen, &config(10, 16))
        .expect_err("toggling never converges");
    match err {
        RewriteError::NonConvergence { rewrites, .. } => assert_eq!(rewrites, 17),
        other => panic!("unexpected error: {other}"),
    }
    // No rollback: the module keeps the last state and stays well formed.
    assert!(module.is_live(alloc));
    verify(&module).expect("module still verifies");
}

#[test]
fn sweep_cap_bounds_patterns_that_report_spurious_changes() {
    let mut module = Module::new();
    add_alloc_func(&mut module, "main");
    let mut set = PatternSet::new();
    set.add(Liar);
    let frozen = set.freeze();

    let err = apply_patterns_greedily(&mut module, &frozen, &config(3, 1_000))
        .expect_err("every sweep reports a change");
    assert!(matches!(
        err,
        RewriteError::NonConvergence {
            iterations: 3,
            rewrites: 3
        }
    ));
}

#[test]
fn modified_ops_are_revisited_within_a_sweep() {
    let mut module = Module::new();
    let (_, alloc) = add_alloc_func(&mut module, "main");
    let mut set = PatternSet::new();
    set.add(CountUp { limit: 5 });
    let frozen = set.freeze();

    let stats = apply_patterns_greedily(&mut module, &frozen, &config(10, 1_000))
        .expect("converges");
    assert_eq!(stats.applied, 5);
    assert_eq!(stats.iterations, 2);
    assert_eq!(
        module.op(alloc).attr("count"),
        Some(&Attribute::Int(5))
    );

    let again = apply_patterns_greedily(&mut module, &frozen, &config(10, 1_000))
        .expect("converges");
    assert_eq!(again.applied, 0);
    assert_eq!(again.iterations, 1);
    assert!(!again.changed());
}

#[test]
fn higher_benefit_patterns_are_tried_first() {
    let mut module = Module::new();
    let (_, alloc) = add_alloc_func(&mut module, "main");
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut set = PatternSet::new();
    set.add(Claim {
        label: "low",
        benefit: 1,
        attempts: Arc::clone(&attempts),
    });
    set.add(Claim {
        label: "high",
        benefit: 5,
        attempts: Arc::clone(&attempts),
    });
    let frozen = set.freeze();

    let stats =
        apply_patterns_greedily(&mut module, &frozen, &config(10, 100)).expect("converges");
    assert_eq!(stats.applied, 1);
    assert_eq!(
        module.op(alloc).attr("winner"),
        Some(&Attribute::Str("high".to_string()))
    );
    assert!(attempts.load(Ordering::Relaxed) >= 3);
}

#[test]
fn dead_pure_ops_are_erased_transitively() {
    let mut module = Module::new();
    let body = module.body();
    let (_, entry) = OpBuilder::new(&mut module, InsertPoint::BlockEnd(body))
        .func("main", FunctionType::new(Vec::new(), Vec::new()))
        .expect("build func");
    let mut builder = OpBuilder::new(&mut module, InsertPoint::BlockEnd(entry));
    let buffer = builder.alloc(memref(&[8, 8])).expect("alloc");
    let view = builder.subview(buffer, &[0, 0], &[4, 4], &[2, 2]).expect("subview");
    builder.ret(Vec::new()).expect("return");
    let alloc = module.defining_op(buffer).expect("alloc op");
    let subview = module.defining_op(view).expect("subview op");

    let stats = apply_patterns_greedily(&mut module, &PatternSet::new().freeze(), &config(10, 10))
        .expect("dce converges");
    assert_eq!(stats.dce_removed, 2);
    assert_eq!(stats.applied, 0);
    assert_eq!(stats.iterations, 2);
    assert!(!module.is_live(alloc));
    assert!(!module.is_live(subview));
    assert!(module.get(subview).is_none());
    assert!(!module.is_value_live(view));
}

#[test]
fn dce_can_be_disabled() {
    let mut module = Module::new();
    let body = module.body();
    let (_, entry) = OpBuilder::new(&mut module, InsertPoint::BlockEnd(body))
        .func("main", FunctionType::new(Vec::new(), Vec::new()))
        .expect("build func");
    let mut builder = OpBuilder::new(&mut module, InsertPoint::BlockEnd(entry));
    builder.alloc(memref(&[2])).expect("alloc");
    builder.ret(Vec::new()).expect("return");

    let cfg = GreedyConfig {
        enable_dce: false,
        ..config(10, 10)
    };
    let stats = apply_patterns_greedily(&mut module, &PatternSet::new().freeze(), &cfg)
        .expect("nothing to do");
    assert_eq!(stats, Default::default());
    assert_eq!(ops_of_kind(&module, OpKind::Alloc).len(), 1);
}

#[test]
fn rewriting_is_scoped_to_the_root() {
    let mut module = Module::new();
    let mut dead_allocs = Vec::new();
    let mut funcs = Vec::new();
    for name in ["first", "second"] {
        let body = module.body();
        let (func, entry) = OpBuilder::new(&mut module, InsertPoint::BlockEnd(body))
            .func(name, FunctionType::new(Vec::new(), Vec::new()))
            .expect("build func");
        let mut builder = OpBuilder::new(&mut module, InsertPoint::BlockEnd(entry));
        let buffer = builder.alloc(memref(&[2])).expect("alloc");
        builder.ret(Vec::new()).expect("return");
        dead_allocs.push(module.defining_op(buffer).expect("alloc op"));
        funcs.push(func);
    }

    let stats = apply_patterns_and_fold_greedily(
        &mut module,
        funcs[0],
        &PatternSet::new().freeze(),
        &config(10, 10),
    )
    .expect("dce converges");
    assert_eq!(stats.dce_removed, 1);
    assert!(!module.is_live(dead_allocs[0]));
    assert!(module.is_live(dead_allocs[1]));
    assert!(module.is_live(funcs[0]));
}

#[test]
fn stale_roots_are_rejected() {
    let mut module = Module::new();
    let (func, _) = add_alloc_func(&mut module, "main");
    module.erase_op(func).expect("erase function");
    let err = apply_patterns_and_fold_greedily(
        &mut module,
        func,
        &PatternSet::new().freeze(),
        &config(10, 10),
    )
    .expect_err("root is gone");
    assert!(matches!(err, RewriteError::Ir(IrError::StaleOp(op)) if op == func));
}

/// Rewrites subview offsets without retyping the result.
struct CorruptOffsets;

impl Pattern for CorruptOffsets {
    fn matches_operation(&self, kind: OpKind) -> bool {
        kind == OpKind::SubView
    }

    fn match_and_rewrite(&self, root: OpId, rewriter: &mut PatternRewriter<'_>) -> RewriteResult {
        let corrupted = Attribute::IntArray(vec![1, 1]);
        if rewriter.op(root).attr(names::STATIC_OFFSETS) == Some(&corrupted) {
            return Ok(false);
        }
        rewriter.set_attr(root, names::STATIC_OFFSETS, corrupted)?;
        Ok(true)
    }
}

fn module_with_live_subview() -> Module {
    let mut module = Module::new();
    let ty = FunctionType::new(vec![Type::MemRef(memref(&[4, 4]))], Vec::new());
    let body = module.body();
    let (_, entry) = OpBuilder::new(&mut module, InsertPoint::BlockEnd(body))
        .func("main", ty)
        .expect("build func");
    let arg = module.block(entry).args()[0];
    let mut builder = OpBuilder::new(&mut module, InsertPoint::BlockEnd(entry));
    let view = builder.subview(arg, &[0, 0], &[2, 2], &[1, 1]).expect("subview");
    let target = builder.alloc(memref(&[2, 2])).expect("alloc");
    builder.copy(view, target).expect("copy");
    builder.ret(Vec::new()).expect("return");
    module
}

#[test]
fn verification_failures_are_fatal() {
    let mut module = module_with_live_subview();
    let mut set = PatternSet::new();
    set.add(CorruptOffsets);
    let frozen = set.freeze();

    let err = apply_patterns_greedily(&mut module, &frozen, &config(10, 10))
        .expect_err("result type no longer matches");
    assert!(matches!(
        err,
        RewriteError::Verification(VerifyError::Invalid {
            kind: OpKind::SubView,
            ..
        })
    ));

    let mut unchecked = module_with_live_subview();
    let cfg = GreedyConfig {
        verify: false,
        ..config(10, 10)
    };
    let stats = apply_patterns_greedily(&mut unchecked, &frozen, &cfg).expect("no verification");
    assert_eq!(stats.applied, 1);
}

#[test]
fn empty_pattern_sets_still_verify() {
    let mut module = Module::new();
    add_alloc_func(&mut module, "main");
    add_alloc_func(&mut module, "main");
    let frozen = PatternSet::new().freeze();
    let cfg = GreedyConfig {
        enable_dce: false,
        ..config(10, 10)
    };

    let err = apply_patterns_greedily(&mut module, &frozen, &cfg).expect_err("names collide");
    assert!(matches!(
        err,
        RewriteError::Verification(VerifyError::DuplicateSymbol(ref name)) if name == "main"
    ));

    let unchecked = GreedyConfig {
        verify: false,
        ..cfg
    };
    let stats = apply_patterns_greedily(&mut module, &frozen, &unchecked).expect("no verification");
    assert_eq!(stats.iterations, 0);
    assert_eq!(stats.applied, 0);
}
