use super::attr::{names, AffineMap, Attribute, DenseElements, IteratorType, Reassociation};
use super::module::{BlockId, InsertPoint, IrError, Module, OpId, ValueId};
use super::op::{OpKind, OperationState};
use super::slice::{infer_extract_slice_type, MixedSliceParams};
use super::types::{Dimension, FunctionType, MemRefType, TensorType, Type};

/// Creates operations at a moving insertion point.
///
/// Consecutive creations appear in creation order: inserting at a block start
/// or after an op advances the point past the newly created op.
pub struct OpBuilder<'m> {
    module: &'m mut Module,
    at: InsertPoint,
}

impl<'m> OpBuilder<'m> {
    pub fn new(module: &'m mut Module, at: InsertPoint) -> Self {
        Self { module, at }
    }

    pub fn module(&mut self) -> &mut Module {
        &mut *self.module
    }

    pub fn create(&mut self, state: OperationState) -> Result<OpId, IrError> {
        let op = self.module.create_op(state, self.at)?;
        if matches!(self.at, InsertPoint::BlockStart(_) | InsertPoint::After(_)) {
            self.at = InsertPoint::After(op);
        }
        Ok(op)
    }

    fn create_value(&mut self, state: OperationState) -> Result<ValueId, IrError> {
        let op = self.create(state)?;
        Ok(self.module.op(op).results()[0])
    }

    /// Creates a `func.func` with an entry block whose arguments follow `ty`.
    pub fn func(&mut self, name: &str, ty: FunctionType) -> Result<(OpId, BlockId), IrError> {
        let inputs = ty.inputs.clone();
        let op = self.create(
            OperationState::new(OpKind::Func)
                .attr(names::SYM_NAME, Attribute::Str(name.to_string()))
                .attr(names::FUNCTION_TYPE, Attribute::Type(Type::Function(ty)))
                .regions(1),
        )?;
        let region = self.module.op(op).regions()[0];
        let entry = self.module.add_block(region, &inputs)?;
        Ok((op, entry))
    }

    pub fn ret(&mut self, values: Vec<ValueId>) -> Result<OpId, IrError> {
        self.create(OperationState::new(OpKind::Return).operands(values))
    }

    pub fn call(
        &mut self,
        callee: &str,
        args: Vec<ValueId>,
        result_types: Vec<Type>,
    ) -> Result<OpId, IrError> {
        self.create(
            OperationState::new(OpKind::Call)
                .operands(args)
                .results(result_types)
                .attr(names::CALLEE, Attribute::SymbolRef(callee.to_string())),
        )
    }

    pub fn alloc(&mut self, ty: MemRefType) -> Result<ValueId, IrError> {
        self.create_value(OperationState::new(OpKind::Alloc).results([Type::MemRef(ty)]))
    }

    /// Creates a static `memref.subview`, inferring its strided result type.
    pub fn subview(
        &mut self,
        source: ValueId,
        offsets: &[i64],
        sizes: &[i64],
        strides: &[i64],
    ) -> Result<ValueId, IrError> {
        let params = MixedSliceParams::from_static(offsets, sizes, strides);
        let source_ty = self
            .module
            .value_type(source)
            .as_memref()
            .cloned()
            .ok_or_else(|| IrError::Invalid {
                kind: OpKind::SubView,
                reason: "source is not a memref".to_string(),
            })?;
        let result = infer_subview_type(&source_ty, &params).ok_or_else(|| IrError::Invalid {
            kind: OpKind::SubView,
            reason: format!("cannot infer a static strided type from {source_ty}"),
        })?;
        self.create_value(
            OperationState::new(OpKind::SubView)
                .operands([source])
                .results([Type::MemRef(result)])
                .attrs(params.static_attrs()),
        )
    }

    pub fn memref_cast(&mut self, source: ValueId, ty: MemRefType) -> Result<ValueId, IrError> {
        self.create_value(
            OperationState::new(OpKind::Cast)
                .operands([source])
                .results([Type::MemRef(ty)]),
        )
    }

    pub fn copy(&mut self, source: ValueId, target: ValueId) -> Result<OpId, IrError> {
        self.create(OperationState::new(OpKind::Copy).operands([source, target]))
    }

    /// Creates a `linalg.generic` and fills its body through `body`, which
    /// receives a builder positioned in the body block and the block arguments
    /// (one scalar per input, then one per output).
    #[allow(clippy::too_many_arguments)]
    pub fn generic<F>(
        &mut self,
        inputs: Vec<ValueId>,
        outputs: Vec<ValueId>,
        indexing_maps: Vec<AffineMap>,
        iterator_types: Vec<IteratorType>,
        extra_attrs: impl IntoIterator<Item = (String, Attribute)>,
        body: F,
    ) -> Result<OpId, IrError>
    where
        F: FnOnce(&mut OpBuilder<'_>, &[ValueId]) -> Result<(), IrError>,
    {
        let mut arg_types = Vec::with_capacity(inputs.len() + outputs.len());
        for value in inputs.iter().chain(outputs.iter()) {
            let element = self
                .module
                .value_type(*value)
                .element_type()
                .ok_or_else(|| IrError::Invalid {
                    kind: OpKind::Generic,
                    reason: "operand has no element type".to_string(),
                })?;
            arg_types.push(Type::Scalar(element));
        }
        let segments = vec![inputs.len() as i64, outputs.len() as i64];
        let op = self.create(
            OperationState::new(OpKind::Generic)
                .operands(inputs.into_iter().chain(outputs))
                .attrs(extra_attrs)
                .attr(names::INDEXING_MAPS, Attribute::AffineMaps(indexing_maps))
                .attr(names::ITERATOR_TYPES, Attribute::Iterators(iterator_types))
                .attr(names::OPERAND_SEGMENT_SIZES, Attribute::IntArray(segments))
                .regions(1),
        )?;
        let region = self.module.op(op).regions()[0];
        let block = self.module.add_block(region, &arg_types)?;
        let args = self.module.block(block).args().to_vec();
        let mut nested = OpBuilder::new(&mut *self.module, InsertPoint::BlockEnd(block));
        body(&mut nested, &args)?;
        Ok(op)
    }

    pub fn yield_values(&mut self, values: Vec<ValueId>) -> Result<OpId, IrError> {
        self.create(OperationState::new(OpKind::Yield).operands(values))
    }

    /// Creates a `tensor.extract_slice`. Without `result`, the full-rank type
    /// is inferred from the sizes.
    pub fn extract_slice(
        &mut self,
        source: ValueId,
        params: &MixedSliceParams,
        result: Option<TensorType>,
    ) -> Result<ValueId, IrError> {
        let source_ty = self
            .module
            .value_type(source)
            .as_tensor()
            .cloned()
            .ok_or_else(|| IrError::Invalid {
                kind: OpKind::ExtractSlice,
                reason: "source is not a tensor".to_string(),
            })?;
        let result = result.unwrap_or_else(|| infer_extract_slice_type(&source_ty, params));
        let (_, _, _, dynamic) = params.split();
        self.create_value(
            OperationState::new(OpKind::ExtractSlice)
                .operands(std::iter::once(source).chain(dynamic))
                .results([Type::Tensor(result)])
                .attrs(params.static_attrs()),
        )
    }

    pub fn collapse_shape(
        &mut self,
        source: ValueId,
        reassociation: Reassociation,
        result: TensorType,
    ) -> Result<ValueId, IrError> {
        self.create_value(
            OperationState::new(OpKind::CollapseShape)
                .operands([source])
                .results([Type::Tensor(result)])
                .attr(names::REASSOCIATION, Attribute::Reassociation(reassociation)),
        )
    }

    pub fn expand_shape(
        &mut self,
        source: ValueId,
        reassociation: Reassociation,
        result: TensorType,
    ) -> Result<ValueId, IrError> {
        self.create_value(
            OperationState::new(OpKind::ExpandShape)
                .operands([source])
                .results([Type::Tensor(result)])
                .attr(names::REASSOCIATION, Attribute::Reassociation(reassociation)),
        )
    }

    pub fn constant(&mut self, value: DenseElements) -> Result<ValueId, IrError> {
        let ty = Type::Tensor(value.ty().clone());
        self.create_value(
            OperationState::new(OpKind::Constant)
                .results([ty])
                .attr(names::VALUE, Attribute::Dense(value)),
        )
    }

    pub fn index_constant(&mut self, value: i64) -> Result<ValueId, IrError> {
        self.create_value(
            OperationState::new(OpKind::Constant)
                .results([Type::index()])
                .attr(names::VALUE, Attribute::Index(value)),
        )
    }
}

/// Strided type of a static subview: sizes become the shape, strides scale
/// the source strides, offsets shift the source offset.
pub fn infer_subview_type(source: &MemRefType, params: &MixedSliceParams) -> Option<MemRefType> {
    let (offsets, sizes, strides) = params.static_values()?;
    if sizes.len() != source.rank() || !params.is_well_formed() {
        return None;
    }
    let (source_strides, source_offset) = source.strides_and_offset()?;
    let mut offset = source_offset;
    let mut result_strides = Vec::with_capacity(sizes.len());
    for ((off, stride), source_stride) in offsets.iter().zip(&strides).zip(&source_strides) {
        offset = offset.checked_add(off.checked_mul(*source_stride)?)?;
        result_strides.push(stride.checked_mul(*source_stride)?);
    }
    let shape: Vec<Dimension> = sizes
        .iter()
        .map(|size| usize::try_from(*size).ok().map(Dimension::Static))
        .collect::<Option<_>>()?;
    Some(MemRefType::strided(
        shape,
        source.element(),
        offset,
        result_strides,
    ))
}
