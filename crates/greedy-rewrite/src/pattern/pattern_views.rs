use super::{filters, OperationView};
use crate::ir::{
    names, Attribute, DenseElements, MemRefType, MixedSliceParams, OpId, OpKind, Reassociation,
    TensorType, ValueId,
};
use crate::rewriter::PatternRewriter;

#[derive(Clone)]
pub struct CopyOpView {
    pub root: OpId,
    pub source: ValueId,
    pub target: ValueId,
    pub source_type: MemRefType,
    pub target_type: MemRefType,
}

impl CopyOpView {
    pub fn new(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        let operation = rewriter.module().get(root)?;
        if operation.kind() != OpKind::Copy {
            return None;
        }
        let source = operation.operand(0)?;
        let target = operation.operand(1)?;
        Some(Self {
            root,
            source,
            target,
            source_type: rewriter.type_of(source).as_memref()?.clone(),
            target_type: rewriter.type_of(target).as_memref()?.clone(),
        })
    }
}

impl OperationView for CopyOpView {
    const MATCHER: super::OperationMatcher = filters::copy;

    fn extract(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        Self::new(root, rewriter)
    }
}

#[derive(Clone)]
pub struct ExtractSliceOpView {
    pub root: OpId,
    pub source: ValueId,
    pub result: ValueId,
    pub source_type: TensorType,
    pub result_type: TensorType,
    pub params: MixedSliceParams,
}

impl ExtractSliceOpView {
    pub fn new(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        let operation = rewriter.module().get(root)?;
        if operation.kind() != OpKind::ExtractSlice {
            return None;
        }
        let source = operation.operand(0)?;
        let result = operation.result(0)?;
        Some(Self {
            root,
            source,
            result,
            source_type: rewriter.type_of(source).as_tensor()?.clone(),
            result_type: rewriter.type_of(result).as_tensor()?.clone(),
            params: MixedSliceParams::from_op(rewriter.module(), root)?,
        })
    }
}

impl OperationView for ExtractSliceOpView {
    const MATCHER: super::OperationMatcher = filters::extract_slice;

    fn extract(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        Self::new(root, rewriter)
    }
}

/// Shared shape of `tensor.collapse_shape` and `tensor.expand_shape`.
#[derive(Clone)]
pub struct ReshapeParts {
    pub root: OpId,
    pub source: ValueId,
    pub result: ValueId,
    pub source_type: TensorType,
    pub result_type: TensorType,
    pub reassociation: Reassociation,
}

impl ReshapeParts {
    fn new(root: OpId, kind: OpKind, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        let operation = rewriter.module().get(root)?;
        if operation.kind() != kind {
            return None;
        }
        let source = operation.operand(0)?;
        let result = operation.result(0)?;
        Some(Self {
            root,
            source,
            result,
            source_type: rewriter.type_of(source).as_tensor()?.clone(),
            result_type: rewriter.type_of(result).as_tensor()?.clone(),
            reassociation: operation
                .attr(names::REASSOCIATION)?
                .as_reassociation()?
                .clone(),
        })
    }
}

#[derive(Clone)]
pub struct CollapseShapeOpView(pub ReshapeParts);

impl CollapseShapeOpView {
    pub fn new(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        ReshapeParts::new(root, OpKind::CollapseShape, rewriter).map(Self)
    }
}

impl std::ops::Deref for CollapseShapeOpView {
    type Target = ReshapeParts;

    fn deref(&self) -> &ReshapeParts {
        &self.0
    }
}

impl OperationView for CollapseShapeOpView {
    const MATCHER: super::OperationMatcher = filters::collapse_shape;

    fn extract(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        Self::new(root, rewriter)
    }
}

#[derive(Clone)]
pub struct ExpandShapeOpView(pub ReshapeParts);

impl ExpandShapeOpView {
    pub fn new(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        ReshapeParts::new(root, OpKind::ExpandShape, rewriter).map(Self)
    }
}

impl std::ops::Deref for ExpandShapeOpView {
    type Target = ReshapeParts;

    fn deref(&self) -> &ReshapeParts {
        &self.0
    }
}

impl OperationView for ExpandShapeOpView {
    const MATCHER: super::OperationMatcher = filters::expand_shape;

    fn extract(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        Self::new(root, rewriter)
    }
}

/// Dense tensor `arith.constant`; index constants do not produce a view.
#[derive(Clone)]
pub struct ConstantOpView {
    pub root: OpId,
    pub result: ValueId,
    pub value: DenseElements,
}

impl ConstantOpView {
    pub fn new(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        let operation = rewriter.module().get(root)?;
        if operation.kind() != OpKind::Constant {
            return None;
        }
        match operation.attr(names::VALUE)? {
            Attribute::Dense(value) => Some(Self {
                root,
                result: operation.result(0)?,
                value: value.clone(),
            }),
            _ => None,
        }
    }
}

impl OperationView for ConstantOpView {
    const MATCHER: super::OperationMatcher = filters::constant;

    fn extract(root: OpId, rewriter: &PatternRewriter<'_>) -> Option<Self> {
        Self::new(root, rewriter)
    }
}
