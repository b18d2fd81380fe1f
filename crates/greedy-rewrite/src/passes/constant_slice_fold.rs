use std::sync::Arc;

use crate::ir::{DenseElements, InsertPoint, Module, OpId};
use crate::pattern::{
    ConstantOpView, ExtractSliceOpView, OpRewritePattern, PatternSet, RewriteResult,
};
use crate::rewriter::PatternRewriter;

/// Decides whether a given `tensor.extract_slice` may be folded.
pub type ControlFn = Arc<dyn Fn(&Module, OpId) -> bool + Send + Sync>;

/// Control accepting every candidate.
pub fn fold_always() -> ControlFn {
    Arc::new(|_, _| true)
}

/// Replaces a static slice of a dense constant with a constant holding the
/// selected elements.
pub struct FoldConstantExtractSlice {
    control: ControlFn,
}

impl FoldConstantExtractSlice {
    pub fn new(control: ControlFn) -> Self {
        Self { control }
    }
}

/// Row-major linear source positions selected by a static slice, or `None`
/// when an access falls outside the source.
fn slice_positions(
    source_dims: &[usize],
    offsets: &[i64],
    sizes: &[i64],
    strides: &[i64],
) -> Option<Vec<usize>> {
    let rank = source_dims.len();
    if offsets.len() != rank || sizes.len() != rank || strides.len() != rank {
        return None;
    }
    let mut source_strides = vec![1usize; rank];
    for dim in (0..rank.saturating_sub(1)).rev() {
        source_strides[dim] = source_strides[dim + 1].checked_mul(source_dims[dim + 1])?;
    }
    for dim in 0..rank {
        if offsets[dim] < 0 || sizes[dim] < 0 || strides[dim] < 1 {
            return None;
        }
        if sizes[dim] > 0 {
            let last = offsets[dim].checked_add((sizes[dim] - 1).checked_mul(strides[dim])?)?;
            if last as usize >= source_dims[dim] {
                return None;
            }
        }
    }

    let count = sizes.iter().try_fold(1usize, |acc, s| acc.checked_mul(*s as usize))?;
    let mut positions = Vec::with_capacity(count);
    let mut index = vec![0i64; rank];
    for _ in 0..count {
        let linear = (0..rank)
            .map(|dim| (offsets[dim] + index[dim] * strides[dim]) as usize * source_strides[dim])
            .sum();
        positions.push(linear);
        for dim in (0..rank).rev() {
            index[dim] += 1;
            if index[dim] < sizes[dim] {
                break;
            }
            index[dim] = 0;
        }
    }
    Some(positions)
}

impl OpRewritePattern<ExtractSliceOpView> for FoldConstantExtractSlice {
    fn match_and_rewrite(
        &self,
        view: ExtractSliceOpView,
        rewriter: &mut PatternRewriter<'_>,
    ) -> RewriteResult {
        let Some(constant) = rewriter
            .defining_op(view.source)
            .and_then(|op| ConstantOpView::new(op, rewriter))
        else {
            return Ok(false);
        };
        if !(self.control)(rewriter.module(), view.root) {
            return Ok(false);
        }
        let Some((offsets, sizes, strides)) = view.params.static_values() else {
            return Ok(false);
        };
        let Some(source_dims) = constant.value.ty().static_shape() else {
            return Ok(false);
        };
        let Some(positions) = slice_positions(&source_dims, &offsets, &sizes, &strides) else {
            return Ok(false);
        };
        let folded = constant
            .value
            .data()
            .gather(&positions)
            .and_then(|data| DenseElements::new(view.result_type.clone(), data));
        let Some(folded) = folded else {
            return Ok(false);
        };
        let value = rewriter
            .builder(InsertPoint::Before(view.root))
            .constant(folded)?;
        rewriter.replace_op(view.root, &[value])?;
        Ok(true)
    }
}

pub fn populate_fold_constant_extract_slice_patterns(
    patterns: &mut PatternSet,
    control: ControlFn,
) {
    patterns.insert_view::<ExtractSliceOpView, _>(FoldConstantExtractSlice::new(control));
}

#[cfg(test)]
mod tests {
    use super::slice_positions;

    #[test]
    fn strided_positions_follow_row_major_order() {
        let positions = slice_positions(&[4, 6], &[1, 1], &[2, 2], &[2, 3]);
        assert_eq!(positions, Some(vec![7, 10, 19, 22]));
    }

    #[test]
    fn out_of_bounds_slice_is_rejected() {
        assert_eq!(slice_positions(&[4], &[2], &[3], &[1]), None);
        assert_eq!(slice_positions(&[4], &[0], &[0], &[1]), Some(Vec::new()));
    }
}
