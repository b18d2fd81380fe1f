#![allow(dead_code)]

use anyhow::{anyhow, Result};
use greedy_rewrite::eval::{Buffer, Interpreter, RuntimeValue};
use greedy_rewrite::ir::{
    static_shape, symbol_name, Attribute, ElementType, FunctionType, InsertPoint, MemRefType,
    Module, OpBuilder, OpId, OpKind, TensorType, Type, ValueId,
};
use tracing_subscriber::EnvFilter;

/// Static `(offsets, sizes, strides)` of a subview or slice.
pub type SliceSpec = (Vec<i64>, Vec<i64>, Vec<i64>);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn memref(dims: &[usize]) -> MemRefType {
    MemRefType::new(static_shape(dims), ElementType::F32)
}

pub fn tensor(dims: &[usize], element: ElementType) -> TensorType {
    TensorType::new(static_shape(dims), element)
}

pub fn slice(offsets: &[i64], sizes: &[i64], strides: &[i64]) -> SliceSpec {
    (offsets.to_vec(), sizes.to_vec(), strides.to_vec())
}

fn view_of(
    builder: &mut OpBuilder<'_>,
    root: ValueId,
    view: Option<&SliceSpec>,
) -> Result<ValueId> {
    Ok(match view {
        Some((offsets, sizes, strides)) => builder.subview(root, offsets, sizes, strides)?,
        None => root,
    })
}

/// Appends `func @name(%src, %dst)` copying an optional subview of `src` into
/// an optional subview of `dst`. Returns the function and the copy.
pub fn add_copy_func(
    module: &mut Module,
    name: &str,
    src_dims: &[usize],
    dst_dims: &[usize],
    src_view: Option<&SliceSpec>,
    dst_view: Option<&SliceSpec>,
) -> Result<(OpId, OpId)> {
    let ty = FunctionType::new(
        vec![
            Type::MemRef(memref(src_dims)),
            Type::MemRef(memref(dst_dims)),
        ],
        Vec::new(),
    );
    let body = module.body();
    let (func, entry) = OpBuilder::new(module, InsertPoint::BlockEnd(body)).func(name, ty)?;
    let args = module.block(entry).args().to_vec();
    let mut builder = OpBuilder::new(module, InsertPoint::BlockEnd(entry));
    let source = view_of(&mut builder, args[0], src_view)?;
    let target = view_of(&mut builder, args[1], dst_view)?;
    let copy = builder.copy(source, target)?;
    builder.ret(Vec::new())?;
    Ok((func, copy))
}

/// Appends `func @name(%arg: source) -> result` with a body built by `body`,
/// which returns the value to return.
pub fn add_tensor_func<F>(
    module: &mut Module,
    name: &str,
    source: TensorType,
    result: TensorType,
    body: F,
) -> Result<OpId>
where
    F: FnOnce(&mut OpBuilder<'_>, ValueId) -> Result<ValueId>,
{
    let ty = FunctionType::new(vec![Type::Tensor(source)], vec![Type::Tensor(result)]);
    let block = module.body();
    let (func, entry) = OpBuilder::new(module, InsertPoint::BlockEnd(block)).func(name, ty)?;
    let arg = module.block(entry).args()[0];
    let mut builder = OpBuilder::new(module, InsertPoint::BlockEnd(entry));
    let value = body(&mut builder, arg)?;
    builder.ret(vec![value])?;
    Ok(func)
}

pub fn ops_of_kind(module: &Module, kind: OpKind) -> Vec<OpId> {
    module
        .walk(module.top())
        .into_iter()
        .filter(|op| module.kind(*op) == kind)
        .collect()
}

pub fn ops_in(module: &Module, func: OpId, kind: OpKind) -> Vec<OpId> {
    module
        .walk(func)
        .into_iter()
        .filter(|op| module.kind(*op) == kind)
        .collect()
}

pub fn func_named(module: &Module, name: &str) -> Option<OpId> {
    module
        .block(module.body())
        .ops()
        .iter()
        .copied()
        .find(|op| module.kind(*op) == OpKind::Func && symbol_name(module, *op) == Some(name))
}

pub fn func_names(module: &Module) -> Vec<String> {
    module
        .block(module.body())
        .ops()
        .iter()
        .filter_map(|op| symbol_name(module, *op).map(str::to_string))
        .collect()
}

/// Kinds of the operations directly in the entry block of `func`.
pub fn body_kinds(module: &Module, func: OpId) -> Vec<OpKind> {
    let Some(entry) = module.entry_block(func, 0) else {
        return Vec::new();
    };
    module
        .block(entry)
        .ops()
        .iter()
        .map(|op| module.kind(*op))
        .collect()
}

pub fn callee(module: &Module, call: OpId) -> Option<&str> {
    module.op(call).attr("callee").and_then(Attribute::as_str)
}

/// Runs `func @name(src, dst)` on an iota source and a zero destination and
/// returns the destination storage.
pub fn run_copy_func(
    module: &Module,
    name: &str,
    src_dims: &[usize],
    dst_dims: &[usize],
) -> Result<Vec<f64>> {
    let source = Buffer::iota(src_dims);
    let target = Buffer::new(dst_dims);
    Interpreter::new(module)
        .call(
            name,
            vec![
                RuntimeValue::Buffer(source),
                RuntimeValue::Buffer(target.clone()),
            ],
        )
        .map_err(|err| anyhow!("evaluating @{name}: {err}"))?;
    Ok(target.storage())
}
