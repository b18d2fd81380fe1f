use std::collections::HashSet;

use thiserror::Error;

use super::attr::{names, Attribute, IteratorType};
use super::module::{Module, OpId, Use, ValueDef, ValueId};
use super::op::OpKind;
use super::slice::{infer_extract_slice_type, is_rank_reduction_of, MixedSliceParams};
use super::builder::infer_subview_type;
use super::symbol::{lookup_nearest_symbol, symbol_name};
use super::types::{Dimension, FunctionType, Type};

/// Structural violations found by [`verify`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("`{kind}` uses dead value {value:?}")]
    DeadOperand { kind: OpKind, value: ValueId },
    #[error("use list of {value:?} is out of sync with `{kind}`")]
    UseListMismatch { kind: OpKind, value: ValueId },
    #[error("`{kind}` operand #{index} does not dominate its use")]
    Dominance { kind: OpKind, index: usize },
    #[error("`{kind}`: {reason}")]
    Invalid { kind: OpKind, reason: String },
    #[error("duplicate symbol `{0}`")]
    DuplicateSymbol(String),
}

fn invalid(kind: OpKind, reason: impl Into<String>) -> VerifyError {
    VerifyError::Invalid {
        kind,
        reason: reason.into(),
    }
}

/// Checks use-def consistency, dominance, symbol uniqueness and per-kind
/// structural rules for every operation nested in the module.
pub fn verify(module: &Module) -> Result<(), VerifyError> {
    let mut symbols = HashSet::new();
    for op in module.block(module.body()).ops() {
        if let Some(name) = symbol_name(module, *op) {
            if !symbols.insert(name.to_string()) {
                return Err(VerifyError::DuplicateSymbol(name.to_string()));
            }
        }
    }
    for op in module.walk(module.top()) {
        verify_use_def(module, op)?;
        verify_op(module, op)?;
    }
    Ok(())
}

fn verify_use_def(module: &Module, op: OpId) -> Result<(), VerifyError> {
    let operation = module.op(op);
    let kind = operation.kind();
    for (index, value) in operation.operands().iter().enumerate() {
        if !module.is_value_live(*value) {
            return Err(VerifyError::DeadOperand {
                kind,
                value: *value,
            });
        }
        let slot = Use {
            op,
            operand: index as u32,
        };
        if !module.value(*value).uses().contains(&slot) {
            return Err(VerifyError::UseListMismatch {
                kind,
                value: *value,
            });
        }
        if !dominates(module, *value, op) {
            return Err(VerifyError::Dominance { kind, index });
        }
    }
    for value in operation.results() {
        for slot in module.value(*value).uses() {
            let consistent = module
                .get(slot.op)
                .and_then(|user| user.operand(slot.operand as usize))
                == Some(*value);
            if !consistent {
                return Err(VerifyError::UseListMismatch {
                    kind,
                    value: *value,
                });
            }
        }
    }
    if kind.is_terminator() {
        let last = operation
            .parent_block()
            .and_then(|block| module.block(block).terminator());
        if last != Some(op) {
            return Err(invalid(kind, "terminator must be the last operation of its block"));
        }
    }
    Ok(())
}

/// Whether the definition of `value` is visible at `user`.
fn dominates(module: &Module, value: ValueId, user: OpId) -> bool {
    let mut current = Some(user);
    match module.value(value).def() {
        ValueDef::OpResult { op: def_op, .. } => {
            let Some(def_block) = module.get(def_op).and_then(|op| op.parent_block()) else {
                return false;
            };
            while let Some(candidate) = current {
                if module.op(candidate).parent_block() == Some(def_block) {
                    return match (module.position(def_op), module.position(candidate)) {
                        (Some(def_pos), Some(user_pos)) => def_pos < user_pos,
                        _ => false,
                    };
                }
                current = module.parent_op(candidate);
            }
            false
        }
        ValueDef::BlockArg { block, .. } => {
            while let Some(candidate) = current {
                if module.op(candidate).parent_block() == Some(block) {
                    return true;
                }
                current = module.parent_op(candidate);
            }
            false
        }
    }
}

fn operand_type(module: &Module, op: OpId, index: usize) -> Option<&Type> {
    module
        .op(op)
        .operand(index)
        .map(|value| module.value_type(value))
}

fn result_type(module: &Module, op: OpId, index: usize) -> Option<&Type> {
    module
        .op(op)
        .result(index)
        .map(|value| module.value_type(value))
}

fn expect_counts(
    module: &Module,
    op: OpId,
    operands: usize,
    results: usize,
) -> Result<(), VerifyError> {
    let operation = module.op(op);
    if operation.operands().len() != operands || operation.results().len() != results {
        return Err(invalid(
            operation.kind(),
            format!(
                "expected {operands} operand(s) and {results} result(s), found {} and {}",
                operation.operands().len(),
                operation.results().len()
            ),
        ));
    }
    Ok(())
}

fn function_type(module: &Module, func: OpId) -> Option<&FunctionType> {
    match module.op(func).attr(names::FUNCTION_TYPE)?.as_type()? {
        Type::Function(ty) => Some(ty),
        _ => None,
    }
}

fn shapes_compatible(lhs: &[Dimension], rhs: &[Dimension]) -> bool {
    lhs.len() == rhs.len()
        && lhs.iter().zip(rhs).all(|(a, b)| match (a, b) {
            (Dimension::Static(x), Dimension::Static(y)) => x == y,
            _ => true,
        })
}

fn verify_op(module: &Module, op: OpId) -> Result<(), VerifyError> {
    let kind = module.kind(op);
    match kind {
        OpKind::Module => {
            expect_counts(module, op, 0, 0)?;
            if module.op(op).regions().len() != 1 {
                return Err(invalid(kind, "expected a single body region"));
            }
            Ok(())
        }
        OpKind::Func => verify_func(module, op),
        OpKind::Return => verify_return(module, op),
        OpKind::Call => verify_call(module, op),
        OpKind::Alloc => {
            expect_counts(module, op, 0, 1)?;
            match result_type(module, op, 0) {
                Some(Type::MemRef(_)) => Ok(()),
                _ => Err(invalid(kind, "result must be a memref")),
            }
        }
        OpKind::SubView => verify_subview(module, op),
        OpKind::Cast => {
            expect_counts(module, op, 1, 1)?;
            let (Some(Type::MemRef(src)), Some(Type::MemRef(dst))) =
                (operand_type(module, op, 0), result_type(module, op, 0))
            else {
                return Err(invalid(kind, "operand and result must be memrefs"));
            };
            if src.element() != dst.element() || !shapes_compatible(src.shape(), dst.shape()) {
                return Err(invalid(kind, format!("incompatible cast {src} to {dst}")));
            }
            Ok(())
        }
        OpKind::Copy => {
            expect_counts(module, op, 2, 0)?;
            let (Some(Type::MemRef(src)), Some(Type::MemRef(dst))) =
                (operand_type(module, op, 0), operand_type(module, op, 1))
            else {
                return Err(invalid(kind, "operands must be memrefs"));
            };
            if src.element() != dst.element() || !shapes_compatible(src.shape(), dst.shape()) {
                return Err(invalid(kind, format!("cannot copy {src} into {dst}")));
            }
            Ok(())
        }
        OpKind::Generic => verify_generic(module, op),
        OpKind::Yield => {
            let parent = module.parent_op(op).map(|p| module.kind(p));
            if parent != Some(OpKind::Generic) {
                return Err(invalid(kind, "must be nested in linalg.generic"));
            }
            Ok(())
        }
        OpKind::ExtractSlice => verify_extract_slice(module, op),
        OpKind::CollapseShape | OpKind::ExpandShape => verify_reshape(module, op),
        OpKind::Constant => {
            expect_counts(module, op, 0, 1)?;
            let ty = result_type(module, op, 0);
            match module.op(op).attr(names::VALUE) {
                Some(Attribute::Dense(dense)) if ty == Some(&Type::Tensor(dense.ty().clone())) => {
                    Ok(())
                }
                Some(Attribute::Index(_)) if ty.map(Type::is_index).unwrap_or(false) => Ok(()),
                _ => Err(invalid(kind, "value attribute does not match result type")),
            }
        }
    }
}

fn verify_func(module: &Module, op: OpId) -> Result<(), VerifyError> {
    let kind = OpKind::Func;
    expect_counts(module, op, 0, 0)?;
    if symbol_name(module, op).is_none() {
        return Err(invalid(kind, "missing symbol name"));
    }
    let ty = function_type(module, op).ok_or_else(|| invalid(kind, "missing function type"))?;
    let entry = module
        .entry_block(op, 0)
        .ok_or_else(|| invalid(kind, "missing entry block"))?;
    let arg_types: Vec<&Type> = module
        .block(entry)
        .args()
        .iter()
        .map(|arg| module.value_type(*arg))
        .collect();
    if arg_types.len() != ty.inputs.len() || arg_types.iter().zip(&ty.inputs).any(|(a, b)| *a != b)
    {
        return Err(invalid(kind, "entry block arguments do not match the signature"));
    }
    match module.block(entry).terminator() {
        Some(last) if module.kind(last) == OpKind::Return => Ok(()),
        _ => Err(invalid(kind, "body must end with func.return")),
    }
}

fn verify_return(module: &Module, op: OpId) -> Result<(), VerifyError> {
    let kind = OpKind::Return;
    let func = module
        .parent_op(op)
        .filter(|parent| module.kind(*parent) == OpKind::Func)
        .ok_or_else(|| invalid(kind, "must be nested directly in func.func"))?;
    let ty = function_type(module, func).ok_or_else(|| invalid(kind, "parent has no type"))?;
    let returned: Vec<&Type> = module
        .op(op)
        .operands()
        .iter()
        .map(|value| module.value_type(*value))
        .collect();
    if returned.len() != ty.results.len() || returned.iter().zip(&ty.results).any(|(a, b)| *a != b)
    {
        return Err(invalid(kind, "returned values do not match the signature"));
    }
    Ok(())
}

fn verify_call(module: &Module, op: OpId) -> Result<(), VerifyError> {
    let kind = OpKind::Call;
    let callee = module
        .op(op)
        .attr(names::CALLEE)
        .and_then(Attribute::as_str)
        .ok_or_else(|| invalid(kind, "missing callee"))?;
    let target = lookup_nearest_symbol(module, op, callee)
        .filter(|target| module.kind(*target) == OpKind::Func)
        .ok_or_else(|| invalid(kind, format!("unknown callee @{callee}")))?;
    let ty = function_type(module, target).ok_or_else(|| invalid(kind, "callee has no type"))?;
    let operation = module.op(op);
    let args: Vec<&Type> = operation
        .operands()
        .iter()
        .map(|value| module.value_type(*value))
        .collect();
    let results: Vec<&Type> = operation
        .results()
        .iter()
        .map(|value| module.value_type(*value))
        .collect();
    if args.len() != ty.inputs.len() || args.iter().zip(&ty.inputs).any(|(a, b)| *a != b) {
        return Err(invalid(kind, format!("arguments do not match @{callee}")));
    }
    if results.len() != ty.results.len() || results.iter().zip(&ty.results).any(|(a, b)| *a != b)
    {
        return Err(invalid(kind, format!("results do not match @{callee}")));
    }
    Ok(())
}

fn verify_subview(module: &Module, op: OpId) -> Result<(), VerifyError> {
    let kind = OpKind::SubView;
    let (Some(Type::MemRef(source)), Some(Type::MemRef(result))) =
        (operand_type(module, op, 0), result_type(module, op, 0))
    else {
        return Err(invalid(kind, "source and result must be memrefs"));
    };
    let params = MixedSliceParams::from_op(module, op)
        .ok_or_else(|| invalid(kind, "malformed slice lists"))?;
    if params.rank() != source.rank() {
        return Err(invalid(kind, "slice lists must match the source rank"));
    }
    if let Some(inferred) = infer_subview_type(source, &params) {
        if inferred != *result {
            return Err(invalid(
                kind,
                format!("result {result} does not match inferred {inferred}"),
            ));
        }
    }
    Ok(())
}

fn verify_generic(module: &Module, op: OpId) -> Result<(), VerifyError> {
    let kind = OpKind::Generic;
    let operation = module.op(op);
    let segments = operation
        .attr(names::OPERAND_SEGMENT_SIZES)
        .and_then(Attribute::as_int_array)
        .ok_or_else(|| invalid(kind, "missing operand segments"))?;
    let [inputs, outputs] = segments else {
        return Err(invalid(kind, "expected two operand segments"));
    };
    let (inputs, outputs) = (*inputs as usize, *outputs as usize);
    if inputs + outputs != operation.operands().len() {
        return Err(invalid(kind, "operand segments do not cover the operands"));
    }
    let Some(Attribute::AffineMaps(maps)) = operation.attr(names::INDEXING_MAPS) else {
        return Err(invalid(kind, "missing indexing maps"));
    };
    let Some(Attribute::Iterators(iterators)) = operation.attr(names::ITERATOR_TYPES) else {
        return Err(invalid(kind, "missing iterator types"));
    };
    if maps.len() != operation.operands().len() {
        return Err(invalid(kind, "expected one indexing map per operand"));
    }
    for (map, value) in maps.iter().zip(operation.operands()) {
        let rank = module.value_type(*value).rank().unwrap_or(0);
        if map.num_dims() != iterators.len() || map.results().len() != rank {
            return Err(invalid(kind, format!("indexing map {map} does not fit its operand")));
        }
    }
    if iterators.iter().any(|it| *it == IteratorType::Reduction) && outputs == 0 {
        return Err(invalid(kind, "reductions need an output"));
    }
    let body = module
        .entry_block(op, 0)
        .ok_or_else(|| invalid(kind, "missing body block"))?;
    let args = module.block(body).args();
    if args.len() != operation.operands().len() {
        return Err(invalid(kind, "expected one block argument per operand"));
    }
    for (arg, value) in args.iter().zip(operation.operands()) {
        let expected = module.value_type(*value).element_type().map(Type::Scalar);
        if Some(module.value_type(*arg)) != expected.as_ref() {
            return Err(invalid(kind, "block argument types must be operand element types"));
        }
    }
    let terminator = module
        .block(body)
        .terminator()
        .filter(|last| module.kind(*last) == OpKind::Yield)
        .ok_or_else(|| invalid(kind, "body must end with linalg.yield"))?;
    let yielded = module.op(terminator).operands();
    if yielded.len() != outputs {
        return Err(invalid(kind, "expected one yielded value per output"));
    }
    for (value, output) in yielded.iter().zip(&operation.operands()[inputs..]) {
        let expected = module.value_type(*output).element_type().map(Type::Scalar);
        if Some(module.value_type(*value)) != expected.as_ref() {
            return Err(invalid(kind, "yielded value type must match the output element type"));
        }
    }
    Ok(())
}

fn verify_extract_slice(module: &Module, op: OpId) -> Result<(), VerifyError> {
    let kind = OpKind::ExtractSlice;
    let (Some(Type::Tensor(source)), Some(Type::Tensor(result))) =
        (operand_type(module, op, 0), result_type(module, op, 0))
    else {
        return Err(invalid(kind, "source and result must be tensors"));
    };
    let params = MixedSliceParams::from_op(module, op)
        .ok_or_else(|| invalid(kind, "malformed slice lists"))?;
    if params.rank() != source.rank() {
        return Err(invalid(kind, "slice lists must match the source rank"));
    }
    for value in &module.op(op).operands()[1..] {
        if !module.value_type(*value).is_index() {
            return Err(invalid(kind, "dynamic slice entries must be index values"));
        }
    }
    let inferred = infer_extract_slice_type(source, &params);
    if result.element() != source.element()
        || !is_rank_reduction_of(inferred.shape(), result.shape())
    {
        return Err(invalid(
            kind,
            format!("result {result} is not a rank reduction of {inferred}"),
        ));
    }
    Ok(())
}

/// Shared reassociation checks; `collapsed` is the lower-rank side.
fn verify_reshape(module: &Module, op: OpId) -> Result<(), VerifyError> {
    let kind = module.kind(op);
    expect_counts(module, op, 1, 1)?;
    let (Some(Type::Tensor(source)), Some(Type::Tensor(result))) =
        (operand_type(module, op, 0), result_type(module, op, 0))
    else {
        return Err(invalid(kind, "source and result must be tensors"));
    };
    let groups = module
        .op(op)
        .attr(names::REASSOCIATION)
        .and_then(Attribute::as_reassociation)
        .ok_or_else(|| invalid(kind, "missing reassociation"))?;
    let (expanded, collapsed) = if kind == OpKind::CollapseShape {
        (source, result)
    } else {
        (result, source)
    };
    if source.element() != result.element() {
        return Err(invalid(kind, "element types differ"));
    }
    if groups.len() != collapsed.rank() {
        return Err(invalid(kind, "one reassociation group per collapsed dimension expected"));
    }
    let mut next = 0usize;
    for group in groups {
        if group.is_empty() {
            return Err(invalid(kind, "empty reassociation group"));
        }
        for dim in group {
            if *dim != next {
                return Err(invalid(
                    kind,
                    "reassociation must list contiguous dimensions in order",
                ));
            }
            next += 1;
        }
    }
    if groups.is_empty() {
        if !expanded.shape().iter().all(|dim| dim.is_unit()) {
            return Err(invalid(kind, "rank-0 reshape requires unit dimensions"));
        }
        return Ok(());
    }
    if next != expanded.rank() {
        return Err(invalid(kind, "reassociation does not cover the expanded rank"));
    }
    for (group, collapsed_dim) in groups.iter().zip(collapsed.shape()) {
        let product = group
            .iter()
            .map(|dim| expanded.shape()[*dim].static_value())
            .try_fold(1usize, |acc, dim| dim.map(|d| acc * d));
        if let (Some(product), Dimension::Static(expected)) = (product, collapsed_dim) {
            if product != *expected {
                return Err(invalid(
                    kind,
                    format!("group {group:?} folds to {product}, expected {expected}"),
                ));
            }
        }
    }
    Ok(())
}
