//! Mixed static/dynamic offset, size and stride lists shared by
//! `tensor.extract_slice` and `memref.subview`.
//!
//! Static entries live in the `static_*` integer-array attributes; dynamic
//! entries hold [`DYNAMIC`] there and are supplied as trailing index operands,
//! offsets first, then sizes, then strides.

use super::attr::{names, Attribute, DYNAMIC};
use super::module::{Module, OpId, ValueId};
use super::types::{Dimension, TensorType};

/// Either a compile-time integer or an SSA index value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpFoldResult {
    Attr(i64),
    Value(ValueId),
}

impl OpFoldResult {
    pub fn constant(self) -> Option<i64> {
        match self {
            OpFoldResult::Attr(value) => Some(value),
            OpFoldResult::Value(_) => None,
        }
    }

    pub fn is_constant(self, expected: i64) -> bool {
        self.constant() == Some(expected)
    }
}

impl From<i64> for OpFoldResult {
    fn from(value: i64) -> Self {
        OpFoldResult::Attr(value)
    }
}

impl From<ValueId> for OpFoldResult {
    fn from(value: ValueId) -> Self {
        OpFoldResult::Value(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MixedSliceParams {
    pub offsets: Vec<OpFoldResult>,
    pub sizes: Vec<OpFoldResult>,
    pub strides: Vec<OpFoldResult>,
}

impl MixedSliceParams {
    pub fn from_static(offsets: &[i64], sizes: &[i64], strides: &[i64]) -> Self {
        let wrap = |values: &[i64]| values.iter().copied().map(OpFoldResult::Attr).collect();
        Self {
            offsets: wrap(offsets),
            sizes: wrap(sizes),
            strides: wrap(strides),
        }
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_well_formed(&self) -> bool {
        self.offsets.len() == self.sizes.len() && self.strides.len() == self.sizes.len()
    }

    /// Returns `(offsets, sizes, strides)` when every entry is static.
    pub fn static_values(&self) -> Option<(Vec<i64>, Vec<i64>, Vec<i64>)> {
        let collect = |entries: &[OpFoldResult]| {
            entries
                .iter()
                .map(|entry| entry.constant())
                .collect::<Option<Vec<_>>>()
        };
        Some((
            collect(&self.offsets)?,
            collect(&self.sizes)?,
            collect(&self.strides)?,
        ))
    }

    /// Splits into the three static arrays and the ordered dynamic operands.
    pub fn split(&self) -> (Vec<i64>, Vec<i64>, Vec<i64>, Vec<ValueId>) {
        let mut dynamic = Vec::new();
        let mut lower = |entries: &[OpFoldResult]| {
            entries
                .iter()
                .map(|entry| match entry {
                    OpFoldResult::Attr(value) => *value,
                    OpFoldResult::Value(value) => {
                        dynamic.push(*value);
                        DYNAMIC
                    }
                })
                .collect::<Vec<_>>()
        };
        let offsets = lower(&self.offsets);
        let sizes = lower(&self.sizes);
        let strides = lower(&self.strides);
        (offsets, sizes, strides, dynamic)
    }

    /// Attributes encoding the static parts of the lists.
    pub fn static_attrs(&self) -> [(String, Attribute); 3] {
        let (offsets, sizes, strides, _) = self.split();
        [
            (names::STATIC_OFFSETS.to_string(), Attribute::IntArray(offsets)),
            (names::STATIC_SIZES.to_string(), Attribute::IntArray(sizes)),
            (names::STATIC_STRIDES.to_string(), Attribute::IntArray(strides)),
        ]
    }

    /// Reads the lists back from a slice-like operation whose operand 0 is the
    /// sliced source.
    pub fn from_op(module: &Module, op: OpId) -> Option<Self> {
        let operation = module.get(op)?;
        let offsets = operation.attr(names::STATIC_OFFSETS)?.as_int_array()?;
        let sizes = operation.attr(names::STATIC_SIZES)?.as_int_array()?;
        let strides = operation.attr(names::STATIC_STRIDES)?.as_int_array()?;
        let mut dynamic = operation.operands().iter().skip(1).copied();
        let mut lift = |values: &[i64]| {
            values
                .iter()
                .map(|value| {
                    if *value == DYNAMIC {
                        dynamic.next().map(OpFoldResult::Value)
                    } else {
                        Some(OpFoldResult::Attr(*value))
                    }
                })
                .collect::<Option<Vec<_>>>()
        };
        let params = Self {
            offsets: lift(offsets)?,
            sizes: lift(sizes)?,
            strides: lift(strides)?,
        };
        if dynamic.next().is_some() || !params.is_well_formed() {
            return None;
        }
        Some(params)
    }

    /// Shape of the non-rank-reduced slice result.
    pub fn result_shape(&self) -> Vec<Dimension> {
        self.sizes
            .iter()
            .map(|size| match size.constant() {
                Some(value) if value >= 0 => Dimension::Static(value as usize),
                _ => Dimension::Dynamic,
            })
            .collect()
    }
}

/// Type produced by slicing `source` without dropping any dimension.
pub fn infer_extract_slice_type(source: &TensorType, params: &MixedSliceParams) -> TensorType {
    TensorType::new(params.result_shape(), source.element())
}

/// Slice result type reduced to `result_rank` by dropping the leading
/// statically-unit dimensions, as a canonical rank-reducing slice would.
pub fn infer_canonical_rank_reduced_type(
    result_rank: usize,
    source: &TensorType,
    params: &MixedSliceParams,
) -> Option<TensorType> {
    let inferred = infer_extract_slice_type(source, params);
    let shape = inferred.shape();
    if result_rank > shape.len() {
        return None;
    }
    let mut to_drop = shape.len() - result_rank;
    let mut reduced = Vec::with_capacity(result_rank);
    for dim in shape {
        if to_drop > 0 && dim.is_unit() {
            to_drop -= 1;
            continue;
        }
        reduced.push(*dim);
    }
    if to_drop > 0 {
        return None;
    }
    Some(TensorType::new(reduced, source.element()))
}

/// Whether `result` equals `full` with some statically-unit dims removed.
pub fn is_rank_reduction_of(full: &[Dimension], result: &[Dimension]) -> bool {
    let mut remaining = result.iter().peekable();
    for dim in full {
        match remaining.peek() {
            Some(next) if *next == dim => {
                remaining.next();
            }
            _ if dim.is_unit() => {}
            _ => return false,
        }
    }
    remaining.next().is_none()
}
