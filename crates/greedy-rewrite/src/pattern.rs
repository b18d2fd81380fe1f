use crate::ir::{IrError, OpId, OpKind};
use crate::rewriter::PatternRewriter;

/// Predicate used to restrict which operations a pattern should consider.
pub type OperationMatcher = fn(OpKind) -> bool;

/// Outcome of one match attempt: `Ok(false)` means the pattern did not apply
/// and left the IR untouched.
pub type RewriteResult = Result<bool, IrError>;

pub trait OperationView: Clone {
    const MATCHER: OperationMatcher;
    fn extract(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self>;
}

mod pattern_views;
pub use pattern_views::*;

/// Base trait for rewrite patterns.
pub trait Pattern: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
    fn matches_operation(&self, kind: OpKind) -> bool {
        let _ = kind;
        true
    }
    fn benefit(&self) -> u16 {
        1
    }
    fn match_and_rewrite(&self, root: OpId, rewriter: &mut PatternRewriter<'_>) -> RewriteResult;
}

/// Typed convenience trait mirroring MLIR's `OpRewritePattern`.
pub trait OpRewritePattern<T> {
    fn benefit(&self) -> u16 {
        1
    }
    fn may_match(&self, _op: &T, _rewriter: &PatternRewriter<'_>) -> bool {
        true
    }
    fn match_and_rewrite(&self, op: T, rewriter: &mut PatternRewriter<'_>) -> RewriteResult;
}

type Extractor<T> = fn(OpId, &PatternRewriter<'_>) -> Option<T>;

/// Adapter converting a typed pattern into a `Pattern`.
pub struct TypedPattern<P, T> {
    pattern: P,
    matcher: OperationMatcher,
    extractor: Extractor<T>,
}

impl<P, T> TypedPattern<P, T> {
    pub fn with_operation_matcher(
        pattern: P,
        matcher: OperationMatcher,
        extractor: Extractor<T>,
    ) -> Self {
        Self {
            pattern,
            matcher,
            extractor,
        }
    }
}

impl<P, V> TypedPattern<P, V>
where
    V: OperationView,
{
    pub fn from_view(pattern: P) -> Self {
        Self::with_operation_matcher(pattern, V::MATCHER, V::extract)
    }
}

impl<P, T> Pattern for TypedPattern<P, T>
where
    P: OpRewritePattern<T> + Send + Sync,
    T: Send,
{
    fn name(&self) -> &str {
        std::any::type_name::<P>()
    }

    fn matches_operation(&self, kind: OpKind) -> bool {
        (self.matcher)(kind)
    }

    fn benefit(&self) -> u16 {
        self.pattern.benefit()
    }

    fn match_and_rewrite(&self, root: OpId, rewriter: &mut PatternRewriter<'_>) -> RewriteResult {
        let Some(view) = (self.extractor)(root, rewriter) else {
            return Ok(false);
        };
        if !self.pattern.may_match(&view, rewriter) {
            return Ok(false);
        }
        self.pattern.match_and_rewrite(view, rewriter)
    }
}

/// Mutable set that collects rewrite patterns prior to freezing.
pub struct PatternSet {
    patterns: Vec<Box<dyn Pattern>>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Names of the collected patterns in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn add<P>(&mut self, pattern: P) -> &mut Self
    where
        P: Pattern + 'static,
    {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn add_typed<P, T>(&mut self, pattern: TypedPattern<P, T>) -> &mut Self
    where
        P: OpRewritePattern<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn insert_view<V, P>(&mut self, pattern: P) -> &mut Self
    where
        V: OperationView + Send + 'static,
        P: OpRewritePattern<V> + Send + Sync + 'static,
    {
        self.add_typed(TypedPattern::<P, V>::from_view(pattern))
    }

    /// Orders patterns by decreasing benefit; ties keep insertion order.
    pub fn freeze(mut self) -> FrozenPatternSet {
        self.patterns
            .sort_by_key(|pattern| std::cmp::Reverse(pattern.benefit()));
        FrozenPatternSet {
            patterns: self.patterns,
        }
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable collection of rewrite patterns ready for use by the driver.
pub struct FrozenPatternSet {
    patterns: Vec<Box<dyn Pattern>>,
}

impl FrozenPatternSet {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &dyn Pattern)> {
        self.patterns.iter().enumerate().map(|(idx, p)| (idx, &**p))
    }

    pub fn matching(&self, kind: OpKind) -> impl Iterator<Item = (usize, &dyn Pattern)> + '_ {
        self.patterns
            .iter()
            .enumerate()
            .filter(move |(_, pattern)| pattern.matches_operation(kind))
            .map(|(idx, pattern)| (idx, &**pattern))
    }
}

/// Common operation matchers.
pub mod filters {
    use crate::ir::OpKind;

    pub fn copy(kind: OpKind) -> bool {
        kind == OpKind::Copy
    }

    pub fn extract_slice(kind: OpKind) -> bool {
        kind == OpKind::ExtractSlice
    }

    pub fn collapse_shape(kind: OpKind) -> bool {
        kind == OpKind::CollapseShape
    }

    pub fn expand_shape(kind: OpKind) -> bool {
        kind == OpKind::ExpandShape
    }

    pub fn constant(kind: OpKind) -> bool {
        kind == OpKind::Constant
    }
}

#[macro_export]
macro_rules! register_patterns_for_view {
    ($set:expr, $view:ty, $($pattern:expr),+ $(,)?) => {{
        $( $set.insert_view::<$view, _>($pattern); )+
    }};
}
