//! Reference interpreter for buffer programs.
//!
//! Executes `memref` allocation, views and copies, `linalg.generic` with
//! scalar bodies, and `func` calls over shared `f64` storage, so that a
//! module can be compared before and after a rewrite.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::ir::{
    lookup_nearest_symbol, names, symbol_name, AffineMap, Attribute, BlockId, MixedSliceParams,
    Module, OpFoldResult, OpId, OpKind, Type, ValueId,
};

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("function @{0} not found")]
    UnknownFunction(String),
    #[error("expected {expected} argument(s), got {found}")]
    Arity { expected: usize, found: usize },
    #[error("unsupported operation `{0}`")]
    Unsupported(OpKind),
    #[error("value {0:?} has not been computed")]
    Undefined(ValueId),
    #[error("value {0:?} is not a buffer")]
    NotABuffer(ValueId),
    #[error("value {0:?} is not a scalar")]
    NotAScalar(ValueId),
    #[error("`{kind}`: {reason}")]
    Invalid { kind: OpKind, reason: String },
    #[error("element {index} is outside storage of {len} element(s)")]
    OutOfBounds { index: i64, len: usize },
    #[error("call depth limit of {0} exceeded")]
    CallDepth(usize),
}

/// Strided view over shared storage.
#[derive(Debug, Clone)]
pub struct Buffer {
    storage: Rc<RefCell<Vec<f64>>>,
    offset: i64,
    shape: Vec<usize>,
    strides: Vec<i64>,
}

fn row_major_strides(shape: &[usize]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    for dim in (0..shape.len().saturating_sub(1)).rev() {
        strides[dim] = strides[dim + 1] * shape[dim + 1] as i64;
    }
    strides
}

impl Buffer {
    fn contiguous(shape: &[usize], data: Vec<f64>) -> Self {
        Self {
            storage: Rc::new(RefCell::new(data)),
            offset: 0,
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
        }
    }

    /// Zero-filled contiguous buffer.
    pub fn new(shape: &[usize]) -> Self {
        Self::contiguous(shape, vec![0.0; shape.iter().product()])
    }

    /// Contiguous buffer over `data`; `None` when the length does not match.
    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self::contiguous(shape, data))
    }

    /// Buffer whose contents are `0, 1, 2, ...`.
    pub fn iota(shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self::contiguous(shape, (0..len).map(|v| v as f64).collect())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn shares_storage(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.storage, &other.storage)
    }

    /// Copy of the whole underlying storage.
    pub fn storage(&self) -> Vec<f64> {
        self.storage.borrow().clone()
    }

    /// Elements of the view in row-major order.
    pub fn to_vec(&self) -> Result<Vec<f64>, EvalError> {
        let mut out = Vec::new();
        for_each_index(&self.shape, |index| {
            out.push(self.get(index)?);
            Ok(())
        })?;
        Ok(out)
    }

    fn linear(&self, index: &[usize]) -> i64 {
        index
            .iter()
            .zip(&self.strides)
            .fold(self.offset, |acc, (i, s)| acc + *i as i64 * s)
    }

    fn checked_slot(&self, index: &[usize]) -> Result<usize, EvalError> {
        let linear = self.linear(index);
        let len = self.storage.borrow().len();
        if linear < 0 || linear as usize >= len {
            return Err(EvalError::OutOfBounds { index: linear, len });
        }
        Ok(linear as usize)
    }

    pub fn get(&self, index: &[usize]) -> Result<f64, EvalError> {
        let slot = self.checked_slot(index)?;
        Ok(self.storage.borrow()[slot])
    }

    pub fn set(&self, index: &[usize], value: f64) -> Result<(), EvalError> {
        let slot = self.checked_slot(index)?;
        self.storage.borrow_mut()[slot] = value;
        Ok(())
    }

    fn subview(&self, offsets: &[i64], sizes: &[i64], strides: &[i64]) -> Buffer {
        let offset = offsets
            .iter()
            .zip(&self.strides)
            .fold(self.offset, |acc, (o, s)| acc + o * s);
        Buffer {
            storage: Rc::clone(&self.storage),
            offset,
            shape: sizes.iter().map(|s| (*s).max(0) as usize).collect(),
            strides: strides.iter().zip(&self.strides).map(|(a, b)| a * b).collect(),
        }
    }
}

/// Visits every index of `shape` in row-major order.
fn for_each_index<F>(shape: &[usize], mut visit: F) -> Result<(), EvalError>
where
    F: FnMut(&[usize]) -> Result<(), EvalError>,
{
    if shape.iter().any(|d| *d == 0) {
        return Ok(());
    }
    let mut index = vec![0usize; shape.len()];
    loop {
        visit(&index)?;
        let mut dim = shape.len();
        loop {
            if dim == 0 {
                return Ok(());
            }
            dim -= 1;
            index[dim] += 1;
            if index[dim] < shape[dim] {
                break;
            }
            index[dim] = 0;
        }
    }
}

#[derive(Debug, Clone)]
pub enum RuntimeValue {
    Buffer(Buffer),
    Scalar(f64),
}

impl RuntimeValue {
    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            RuntimeValue::Buffer(buffer) => Some(buffer),
            RuntimeValue::Scalar(_) => None,
        }
    }
}

type Env = HashMap<ValueId, RuntimeValue>;

pub struct Interpreter<'m> {
    module: &'m Module,
    max_call_depth: usize,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            max_call_depth: 64,
        }
    }

    /// Runs the function named `name` in the module body.
    pub fn call(
        &self,
        name: &str,
        args: Vec<RuntimeValue>,
    ) -> Result<Vec<RuntimeValue>, EvalError> {
        let func = self
            .module
            .block(self.module.body())
            .ops()
            .iter()
            .copied()
            .find(|op| symbol_name(self.module, *op) == Some(name))
            .filter(|op| self.module.kind(*op) == OpKind::Func)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        self.run_func(func, args, 0)
    }

    fn run_func(
        &self,
        func: OpId,
        args: Vec<RuntimeValue>,
        depth: usize,
    ) -> Result<Vec<RuntimeValue>, EvalError> {
        if depth > self.max_call_depth {
            return Err(EvalError::CallDepth(self.max_call_depth));
        }
        let entry = self.module.entry_block(func, 0).ok_or(EvalError::Invalid {
            kind: OpKind::Func,
            reason: "function has no body".to_string(),
        })?;
        let params = self.module.block(entry).args();
        if params.len() != args.len() {
            return Err(EvalError::Arity {
                expected: params.len(),
                found: args.len(),
            });
        }
        let mut env: Env = params.iter().copied().zip(args).collect();
        Ok(self.exec_block(entry, &mut env, depth)?.unwrap_or_default())
    }

    fn lookup(&self, env: &Env, value: ValueId) -> Result<RuntimeValue, EvalError> {
        env.get(&value).cloned().ok_or(EvalError::Undefined(value))
    }

    fn buffer(&self, env: &Env, value: ValueId) -> Result<Buffer, EvalError> {
        match self.lookup(env, value)? {
            RuntimeValue::Buffer(buffer) => Ok(buffer),
            RuntimeValue::Scalar(_) => Err(EvalError::NotABuffer(value)),
        }
    }

    fn scalar(&self, env: &Env, value: ValueId) -> Result<f64, EvalError> {
        match self.lookup(env, value)? {
            RuntimeValue::Scalar(scalar) => Ok(scalar),
            RuntimeValue::Buffer(_) => Err(EvalError::NotAScalar(value)),
        }
    }

    /// Executes a block; returns the operands of a terminator, if reached.
    fn exec_block(
        &self,
        block: BlockId,
        env: &mut Env,
        depth: usize,
    ) -> Result<Option<Vec<RuntimeValue>>, EvalError> {
        for op in self.module.block(block).ops() {
            let operation = self.module.op(*op);
            let kind = operation.kind();
            let missing = |what: &str, index: usize| EvalError::Invalid {
                kind,
                reason: format!("missing {what} {index}"),
            };
            let operand_at = |index| {
                operation
                    .operand(index)
                    .ok_or_else(|| missing("operand", index))
            };
            let result_at = |index| {
                operation
                    .result(index)
                    .ok_or_else(|| missing("result", index))
            };
            match kind {
                OpKind::Return | OpKind::Yield => {
                    let values = operation
                        .operands()
                        .iter()
                        .map(|value| self.lookup(env, *value))
                        .collect::<Result<Vec<_>, _>>()?;
                    return Ok(Some(values));
                }
                OpKind::Alloc => {
                    let result = result_at(0)?;
                    let buffer = self.alloc(result)?;
                    env.insert(result, RuntimeValue::Buffer(buffer));
                }
                OpKind::SubView => {
                    let source = self.buffer(env, operand_at(0)?)?;
                    let params = MixedSliceParams::from_op(self.module, *op).ok_or(
                        EvalError::Invalid {
                            kind,
                            reason: "malformed slice lists".to_string(),
                        },
                    )?;
                    let resolve = |entries: &[OpFoldResult]| {
                        entries
                            .iter()
                            .map(|entry| match entry {
                                OpFoldResult::Attr(value) => Ok(*value),
                                OpFoldResult::Value(value) => {
                                    self.scalar(env, *value).map(|v| v as i64)
                                }
                            })
                            .collect::<Result<Vec<_>, _>>()
                    };
                    let view = source.subview(
                        &resolve(&params.offsets)?,
                        &resolve(&params.sizes)?,
                        &resolve(&params.strides)?,
                    );
                    env.insert(result_at(0)?, RuntimeValue::Buffer(view));
                }
                OpKind::Cast => {
                    let source = self.buffer(env, operand_at(0)?)?;
                    env.insert(result_at(0)?, RuntimeValue::Buffer(source));
                }
                OpKind::Copy => {
                    let source = self.buffer(env, operand_at(0)?)?;
                    let target = self.buffer(env, operand_at(1)?)?;
                    for_each_index(&target.shape.clone(), |index| {
                        target.set(index, source.get(index)?)
                    })?;
                }
                OpKind::Generic => self.exec_generic(*op, env)?,
                OpKind::Call => {
                    let callee = operation
                        .attr(names::CALLEE)
                        .and_then(Attribute::as_str)
                        .unwrap_or_default();
                    let target = lookup_nearest_symbol(self.module, *op, callee)
                        .ok_or_else(|| EvalError::UnknownFunction(callee.to_string()))?;
                    let args = operation
                        .operands()
                        .iter()
                        .map(|value| self.lookup(env, *value))
                        .collect::<Result<Vec<_>, _>>()?;
                    let results = self.run_func(target, args, depth + 1)?;
                    for (value, result) in operation.results().iter().zip(results) {
                        env.insert(*value, result);
                    }
                }
                OpKind::Constant => match operation.attr(names::VALUE) {
                    Some(Attribute::Index(value)) | Some(Attribute::Int(value)) => {
                        env.insert(result_at(0)?, RuntimeValue::Scalar(*value as f64));
                    }
                    _ => return Err(EvalError::Unsupported(kind)),
                },
                _ => return Err(EvalError::Unsupported(kind)),
            }
        }
        Ok(None)
    }

    fn alloc(&self, result: ValueId) -> Result<Buffer, EvalError> {
        let invalid = |reason: &str| EvalError::Invalid {
            kind: OpKind::Alloc,
            reason: reason.to_string(),
        };
        let Type::MemRef(ty) = self.module.value_type(result) else {
            return Err(invalid("result is not a memref"));
        };
        let shape = ty.static_shape().ok_or_else(|| invalid("dynamic shape"))?;
        let (strides, offset) = ty
            .strides_and_offset()
            .ok_or_else(|| invalid("unknown layout"))?;
        let extent = shape
            .iter()
            .zip(&strides)
            .map(|(d, s)| (*d as i64 - 1).max(0) * s)
            .sum::<i64>();
        let len = (offset + extent + 1).max(0) as usize;
        Ok(Buffer {
            storage: Rc::new(RefCell::new(vec![0.0; len])),
            offset,
            shape,
            strides,
        })
    }

    fn exec_generic(&self, op: OpId, env: &mut Env) -> Result<(), EvalError> {
        let kind = OpKind::Generic;
        let invalid = |reason: &str| EvalError::Invalid {
            kind,
            reason: reason.to_string(),
        };
        let operation = self.module.op(op);
        let Some(Attribute::AffineMaps(maps)) = operation.attr(names::INDEXING_MAPS) else {
            return Err(invalid("missing indexing maps"));
        };
        let inputs = operation
            .attr(names::OPERAND_SEGMENT_SIZES)
            .and_then(Attribute::as_int_array)
            .and_then(|segments| segments.first().copied())
            .ok_or_else(|| invalid("missing operand segments"))? as usize;
        let buffers = operation
            .operands()
            .iter()
            .map(|value| self.buffer(env, *value))
            .collect::<Result<Vec<_>, _>>()?;
        let bounds =
            loop_bounds(maps, &buffers).ok_or_else(|| invalid("inconsistent loop bounds"))?;
        let body = self
            .module
            .entry_block(op, 0)
            .ok_or_else(|| invalid("missing body"))?;
        let args = self.module.block(body).args().to_vec();

        for_each_index(&bounds, |point| {
            let mut local = env.clone();
            for ((arg, buffer), map) in args.iter().zip(&buffers).zip(maps) {
                local.insert(*arg, RuntimeValue::Scalar(buffer.get(&map.apply(point))?));
            }
            let yielded = self
                .exec_block(body, &mut local, 0)?
                .ok_or_else(|| invalid("body did not yield"))?;
            let outputs = buffers[inputs..].iter().zip(&maps[inputs..]);
            for (value, (buffer, map)) in yielded.iter().zip(outputs) {
                let RuntimeValue::Scalar(scalar) = value else {
                    return Err(invalid("yielded a buffer"));
                };
                buffer.set(&map.apply(point), *scalar)?;
            }
            Ok(())
        })
    }
}

/// Iteration-space extents inferred from operand shapes through the maps.
fn loop_bounds(maps: &[AffineMap], buffers: &[Buffer]) -> Option<Vec<usize>> {
    let num_dims = maps.first()?.num_dims();
    let mut bounds: Vec<Option<usize>> = vec![None; num_dims];
    for (map, buffer) in maps.iter().zip(buffers) {
        for (position, dim) in map.results().iter().enumerate() {
            let extent = *buffer.shape().get(position)?;
            match bounds[*dim] {
                Some(existing) if existing != extent => return None,
                _ => bounds[*dim] = Some(extent),
            }
        }
    }
    bounds.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subview_addresses_shared_storage() {
        let base = Buffer::iota(&[4, 4]);
        let view = base.subview(&[1, 2], &[2, 2], &[1, 1]);
        assert!(view.shares_storage(&base));
        assert_eq!(view.to_vec().unwrap(), vec![6.0, 7.0, 10.0, 11.0]);
        view.set(&[0, 0], -1.0).unwrap();
        assert_eq!(base.get(&[1, 2]).unwrap(), -1.0);
    }

    #[test]
    fn from_vec_checks_the_element_count() {
        assert!(Buffer::from_vec(&[2, 2], vec![1.0; 3]).is_none());
        let buffer = Buffer::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let value = RuntimeValue::Buffer(buffer);
        assert_eq!(value.as_buffer().map(|b| b.get(&[1, 0])), Some(Ok(3.0)));
        assert!(RuntimeValue::Scalar(1.0).as_buffer().is_none());
    }

    #[test]
    fn malformed_operations_are_reported() {
        use crate::ir::{
            static_shape, ElementType, FunctionType, InsertPoint, MemRefType, OpBuilder,
            OperationState, Type,
        };

        let ty = Type::MemRef(MemRefType::new(static_shape(&[2]), ElementType::F32));
        let mut module = Module::new();
        let body = module.body();
        let (_, entry) = OpBuilder::new(&mut module, InsertPoint::BlockEnd(body))
            .func("main", FunctionType::new(vec![ty], Vec::new()))
            .unwrap();
        let arg = module.block(entry).args()[0];
        let mut builder = OpBuilder::new(&mut module, InsertPoint::BlockEnd(entry));
        builder
            .create(OperationState::new(OpKind::Copy).operands([arg]))
            .unwrap();
        builder.ret(Vec::new()).unwrap();

        let err = Interpreter::new(&module)
            .call("main", vec![RuntimeValue::Buffer(Buffer::new(&[2]))])
            .unwrap_err();
        match err {
            EvalError::Invalid { kind, reason } => {
                assert_eq!(kind, OpKind::Copy);
                assert_eq!(reason, "missing operand 1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rank_zero_buffers_hold_one_element() {
        let scalar = Buffer::iota(&[]);
        assert_eq!(scalar.to_vec().unwrap(), vec![0.0]);
    }
}
