//! Canonicalizations of the tensor slicing and reshaping operations,
//! registered with their operation kinds in the operation registry.

use crate::ir::{InsertPoint, MixedSliceParams, OpKind, Reassociation};
use crate::pattern::{
    CollapseShapeOpView, ExpandShapeOpView, ExtractSliceOpView, OpRewritePattern, PatternSet,
    RewriteResult,
};
use crate::register_patterns_for_view;
use crate::rewriter::PatternRewriter;

pub fn populate_extract_slice_canonicalizations(patterns: &mut PatternSet) {
    register_patterns_for_view!(
        patterns,
        ExtractSliceOpView,
        EliminateIdentityExtractSlice,
        ComposeExtractSlices,
    );
}

pub fn populate_collapse_shape_canonicalizations(patterns: &mut PatternSet) {
    register_patterns_for_view!(
        patterns,
        CollapseShapeOpView,
        EliminateIdentityCollapseShape,
        ComposeCollapseShapes,
        FoldCollapseOfExpand,
    );
}

pub fn populate_expand_shape_canonicalizations(patterns: &mut PatternSet) {
    register_patterns_for_view!(patterns, ExpandShapeOpView, FoldExpandOfCollapse);
}

/// Removes a slice that selects its whole source unchanged.
pub struct EliminateIdentityExtractSlice;

impl OpRewritePattern<ExtractSliceOpView> for EliminateIdentityExtractSlice {
    fn match_and_rewrite(
        &self,
        view: ExtractSliceOpView,
        rewriter: &mut PatternRewriter<'_>,
    ) -> RewriteResult {
        if view.result_type != view.source_type {
            return Ok(false);
        }
        let Some((offsets, sizes, strides)) = view.params.static_values() else {
            return Ok(false);
        };
        let Some(dims) = view.source_type.static_shape() else {
            return Ok(false);
        };
        let is_identity = offsets.iter().all(|o| *o == 0)
            && strides.iter().all(|s| *s == 1)
            && sizes.len() == dims.len()
            && sizes.iter().zip(&dims).all(|(s, d)| *s == *d as i64);
        if !is_identity {
            return Ok(false);
        }
        rewriter.replace_op(view.root, &[view.source])?;
        Ok(true)
    }
}

/// Offsets and sizes of `outer` applied to the result of `inner`, expressed
/// against `inner`'s source. Both slices must be static with unit strides.
fn compose_slice_specs(
    inner: &MixedSliceParams,
    outer: &MixedSliceParams,
) -> Option<MixedSliceParams> {
    let (inner_offsets, inner_sizes, inner_strides) = inner.static_values()?;
    let (outer_offsets, outer_sizes, outer_strides) = outer.static_values()?;
    if inner_sizes.len() != outer_sizes.len()
        || inner_strides.iter().chain(&outer_strides).any(|s| *s != 1)
    {
        return None;
    }

    let mut offsets = Vec::with_capacity(inner_offsets.len());
    for ((i_start, i_size), (o_start, o_size)) in inner_offsets
        .iter()
        .zip(&inner_sizes)
        .zip(outer_offsets.iter().zip(&outer_sizes))
    {
        if *o_start < 0 || *o_size < 0 || o_start.checked_add(*o_size)? > *i_size {
            return None;
        }
        offsets.push(i_start.checked_add(*o_start)?);
    }
    let strides = vec![1; offsets.len()];
    Some(MixedSliceParams::from_static(&offsets, &outer_sizes, &strides))
}

/// Folds a slice of a slice into one slice of the original source.
pub struct ComposeExtractSlices;

impl OpRewritePattern<ExtractSliceOpView> for ComposeExtractSlices {
    fn match_and_rewrite(
        &self,
        view: ExtractSliceOpView,
        rewriter: &mut PatternRewriter<'_>,
    ) -> RewriteResult {
        let Some(inner) = rewriter
            .defining_op(view.source)
            .and_then(|op| ExtractSliceOpView::new(op, rewriter))
        else {
            return Ok(false);
        };
        // Rank-reducing slices drop dims the composed offsets would refer to.
        if inner.result_type.rank() != inner.source_type.rank()
            || view.result_type.rank() != view.source_type.rank()
        {
            return Ok(false);
        }
        let Some(composed) = compose_slice_specs(&inner.params, &view.params) else {
            return Ok(false);
        };
        let sliced = rewriter.builder(InsertPoint::Before(view.root)).extract_slice(
            inner.source,
            &composed,
            Some(view.result_type.clone()),
        )?;
        rewriter.replace_op(view.root, &[sliced])?;
        Ok(true)
    }
}

fn is_trivial_reassociation(groups: &Reassociation) -> bool {
    groups
        .iter()
        .enumerate()
        .all(|(idx, group)| group.as_slice() == [idx])
}

/// Removes a collapse whose groups are all singletons.
pub struct EliminateIdentityCollapseShape;

impl OpRewritePattern<CollapseShapeOpView> for EliminateIdentityCollapseShape {
    fn match_and_rewrite(
        &self,
        view: CollapseShapeOpView,
        rewriter: &mut PatternRewriter<'_>,
    ) -> RewriteResult {
        if !is_trivial_reassociation(&view.reassociation) || view.source_type != view.result_type
        {
            return Ok(false);
        }
        rewriter.replace_op(view.root, &[view.source])?;
        Ok(true)
    }
}

/// Merges `collapse(collapse(x))` into a single collapse of `x`.
pub struct ComposeCollapseShapes;

impl OpRewritePattern<CollapseShapeOpView> for ComposeCollapseShapes {
    fn match_and_rewrite(
        &self,
        view: CollapseShapeOpView,
        rewriter: &mut PatternRewriter<'_>,
    ) -> RewriteResult {
        let Some(producer) = rewriter.defining_op(view.source) else {
            return Ok(false);
        };
        if rewriter.kind(producer) != OpKind::CollapseShape {
            return Ok(false);
        }
        let Some(inner) = CollapseShapeOpView::new(producer, rewriter) else {
            return Ok(false);
        };
        let mut composed: Reassociation = Vec::with_capacity(view.reassociation.len());
        for group in &view.reassociation {
            let mut merged = Vec::new();
            for dim in group {
                let Some(inner_group) = inner.reassociation.get(*dim) else {
                    return Ok(false);
                };
                merged.extend(inner_group.iter().copied());
            }
            composed.push(merged);
        }
        let collapsed = rewriter.builder(InsertPoint::Before(view.root)).collapse_shape(
            inner.source,
            composed,
            view.result_type.clone(),
        )?;
        rewriter.replace_op(view.root, &[collapsed])?;
        Ok(true)
    }
}

/// `collapse(expand(x))` with matching groups is `x`.
pub struct FoldCollapseOfExpand;

impl OpRewritePattern<CollapseShapeOpView> for FoldCollapseOfExpand {
    fn match_and_rewrite(
        &self,
        view: CollapseShapeOpView,
        rewriter: &mut PatternRewriter<'_>,
    ) -> RewriteResult {
        let Some(expand) = rewriter
            .defining_op(view.source)
            .and_then(|op| ExpandShapeOpView::new(op, rewriter))
        else {
            return Ok(false);
        };
        if expand.reassociation != view.reassociation || expand.source_type != view.result_type {
            return Ok(false);
        }
        rewriter.replace_op(view.root, &[expand.source])?;
        Ok(true)
    }
}

/// `expand(collapse(x))` with matching groups is `x`.
pub struct FoldExpandOfCollapse;

impl OpRewritePattern<ExpandShapeOpView> for FoldExpandOfCollapse {
    fn match_and_rewrite(
        &self,
        view: ExpandShapeOpView,
        rewriter: &mut PatternRewriter<'_>,
    ) -> RewriteResult {
        let Some(collapse) = rewriter
            .defining_op(view.source)
            .and_then(|op| CollapseShapeOpView::new(op, rewriter))
        else {
            return Ok(false);
        };
        if collapse.reassociation != view.reassociation || collapse.source_type != view.result_type
        {
            return Ok(false);
        }
        rewriter.replace_op(view.root, &[collapse.source])?;
        Ok(true)
    }
}
