//! Extended tensor canonicalization: the registered tensor canonicalizations
//! plus folds that drop unit dimensions through rank-reducing slices.

use serde::{Deserialize, Serialize};

use crate::driver::{apply_patterns_greedily, GreedyConfig};
use crate::ir::{
    infer_canonical_rank_reduced_type, Dialect, InsertPoint, Module, OpFoldResult, Reassociation,
};
use crate::pass::{ModulePass, PassError, PassResult};
use crate::pattern::{
    CollapseShapeOpView, ExtractSliceOpView, OpRewritePattern, PatternSet, RewriteResult,
};
use crate::registry::OpRegistry;
use crate::rewriter::PatternRewriter;

use super::constant_slice_fold::{fold_always, populate_fold_constant_extract_slice_patterns};

/// Groups slice dimensions so that each group ends at a non-unit size.
///
/// Trailing unit dimensions join the last group. When every size is a static
/// 1 the grouping is empty, describing a rank-0 result.
pub fn reassociation_for_folding_unit_dims(sizes: &[OpFoldResult]) -> Reassociation {
    let mut groups: Reassociation = Vec::new();
    let mut current = Vec::new();
    for (dim, size) in sizes.iter().enumerate() {
        current.push(dim);
        if size.is_constant(1) {
            continue;
        }
        groups.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        if let Some(last) = groups.last_mut() {
            last.extend(current);
        }
    }
    groups
}

/// Folds `collapse_shape(extract_slice(x))` into one rank-reducing slice of `x`
/// when the collapse only removes unit dimensions of the slice.
///
/// ```text
/// %0 = tensor.extract_slice %arg0[0, 0, 0][1, 1024, 1][1, 1, 1]
///        : tensor<19x1024x1xi32> to tensor<1x1024x1xi32>
/// %1 = tensor.collapse_shape %0 [[0, 1, 2]]
///        : tensor<1x1024x1xi32> into tensor<1024xi32>
/// ```
///
/// becomes a single slice producing `tensor<1024xi32>`.
pub struct RankReducedExtractSliceCollapseShape;

impl OpRewritePattern<CollapseShapeOpView> for RankReducedExtractSliceCollapseShape {
    fn match_and_rewrite(
        &self,
        view: CollapseShapeOpView,
        rewriter: &mut PatternRewriter<'_>,
    ) -> RewriteResult {
        let Some(slice) = rewriter
            .defining_op(view.source)
            .and_then(|op| ExtractSliceOpView::new(op, rewriter))
        else {
            return Ok(false);
        };
        let grouping = reassociation_for_folding_unit_dims(&slice.params.sizes);
        if grouping.len() >= slice.result_type.rank() || grouping != view.reassociation {
            return Ok(false);
        }
        let reduced =
            infer_canonical_rank_reduced_type(grouping.len(), &slice.source_type, &slice.params);
        if reduced.as_ref() != Some(&view.result_type) {
            return Ok(false);
        }
        let folded = rewriter.builder(InsertPoint::Before(view.root)).extract_slice(
            slice.source,
            &slice.params,
            Some(view.result_type.clone()),
        )?;
        rewriter.replace_op(view.root, &[folded])?;
        Ok(true)
    }
}

/// Adds the extension patterns only; constant slices are folded when
/// `blind_fold` is set.
pub fn populate_canonicalize_ext_patterns(patterns: &mut PatternSet, blind_fold: bool) {
    if blind_fold {
        populate_fold_constant_extract_slice_patterns(patterns, fold_always());
    }
    patterns.insert_view::<CollapseShapeOpView, _>(RankReducedExtractSliceCollapseShape);
}

/// Collects the tensor dialect canonicalizations known to `registry`, then
/// the extension patterns.
pub fn get_canonicalization_ext_patterns(
    patterns: &mut PatternSet,
    registry: &OpRegistry,
    blind_fold: bool,
) {
    if registry.is_dialect_loaded(Dialect::Tensor) {
        registry.get_dialect_canonicalization_patterns(Dialect::Tensor, patterns);
    }
    for op in registry.registered_operations() {
        if op.dialect() == Dialect::Tensor {
            op.get_canonicalization_patterns(patterns);
        }
    }
    populate_canonicalize_ext_patterns(patterns, blind_fold);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalizeExtOptions {
    pub blind_fold: bool,
}

/// Runs the extended canonicalization set to a fixpoint.
pub struct CanonicalizeExtPass {
    pub blind_fold: bool,
    registry: OpRegistry,
    config: GreedyConfig,
}

impl CanonicalizeExtPass {
    pub const NAME: &'static str = "canonicalize-ext";

    pub fn new(blind_fold: bool) -> Self {
        Self {
            blind_fold,
            registry: OpRegistry::with_builtin_ops(),
            config: GreedyConfig::default(),
        }
    }

    pub fn from_options(options: CanonicalizeExtOptions) -> Self {
        Self::new(options.blind_fold)
    }

    pub fn with_registry(mut self, registry: OpRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: GreedyConfig) -> Self {
        self.config = config;
        self
    }
}

impl Default for CanonicalizeExtPass {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ModulePass for CanonicalizeExtPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, module: &mut Module) -> Result<PassResult, PassError> {
        let mut patterns = PatternSet::new();
        get_canonicalization_ext_patterns(&mut patterns, &self.registry, self.blind_fold);
        let frozen = patterns.freeze();
        let stats = apply_patterns_greedily(module, &frozen, &self.config)
            .map_err(|source| PassError::new(Self::NAME, source))?;
        Ok(PassResult::from(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(values: &[i64]) -> Vec<OpFoldResult> {
        values.iter().copied().map(OpFoldResult::Attr).collect()
    }

    #[test]
    fn grouping_closes_at_non_unit_dims() {
        assert_eq!(
            reassociation_for_folding_unit_dims(&sizes(&[1, 1024, 1])),
            vec![vec![0, 1, 2]]
        );
        assert_eq!(
            reassociation_for_folding_unit_dims(&sizes(&[4, 1, 8])),
            vec![vec![0], vec![1, 2]]
        );
    }

    #[test]
    fn all_unit_sizes_give_empty_grouping() {
        assert!(reassociation_for_folding_unit_dims(&sizes(&[1, 1, 1])).is_empty());
        assert!(reassociation_for_folding_unit_dims(&[]).is_empty());
    }

    #[test]
    fn dynamic_sizes_close_groups() {
        use crate::ir::ValueId;
        let mixed = vec![OpFoldResult::Attr(1), OpFoldResult::Value(ValueId(7))];
        assert_eq!(reassociation_for_folding_unit_dims(&mixed), vec![vec![0, 1]]);
    }
}
