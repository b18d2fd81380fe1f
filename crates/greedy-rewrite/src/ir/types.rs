use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar element types carried by buffers, tensors and block arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    I1,
    I8,
    I32,
    I64,
    F16,
    F32,
    F64,
    Index,
}

impl ElementType {
    pub fn is_float(self) -> bool {
        matches!(self, ElementType::F16 | ElementType::F32 | ElementType::F64)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::I1 => "i1",
            ElementType::I8 => "i8",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::F16 => "f16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::Index => "index",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a single axis extent in a shaped type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic,
}

impl Dimension {
    pub fn static_value(self) -> Option<usize> {
        match self {
            Dimension::Static(value) => Some(value),
            Dimension::Dynamic => None,
        }
    }

    /// Returns `true` only when the extent is statically known to be 1.
    pub fn is_unit(self) -> bool {
        matches!(self, Dimension::Static(1))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(value) => write!(f, "{value}"),
            Dimension::Dynamic => f.write_str("?"),
        }
    }
}

/// Builds a fully static shape from explicit extents.
pub fn static_shape(dims: &[usize]) -> Vec<Dimension> {
    dims.iter().copied().map(Dimension::Static).collect()
}

/// Returns the static extents when every dimension is static.
pub fn static_dims(shape: &[Dimension]) -> Option<Vec<usize>> {
    shape.iter().map(|dim| dim.static_value()).collect()
}

/// Row-major strides of a contiguous buffer with the given extents.
pub fn canonical_strides(dims: &[usize]) -> Vec<i64> {
    let mut strides = vec![1i64; dims.len()];
    let mut running = 1i64;
    for (idx, dim) in dims.iter().enumerate().rev() {
        strides[idx] = running;
        running = running.saturating_mul(*dim as i64);
    }
    strides
}

/// Static strided addressing: `offset + sum(index[i] * strides[i])`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StridedLayout {
    pub offset: i64,
    pub strides: Vec<i64>,
}

/// Buffer access layout. `Identity` is flat contiguous row-major addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    Identity,
    Strided(StridedLayout),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemRefType {
    shape: Vec<Dimension>,
    element: ElementType,
    layout: Layout,
}

impl MemRefType {
    /// Contiguous buffer type with the identity layout.
    pub fn new(shape: impl Into<Vec<Dimension>>, element: ElementType) -> Self {
        Self {
            shape: shape.into(),
            element,
            layout: Layout::Identity,
        }
    }

    /// Strided buffer type. A layout equal to the contiguous row-major one is
    /// normalized to `Layout::Identity`.
    pub fn strided(
        shape: impl Into<Vec<Dimension>>,
        element: ElementType,
        offset: i64,
        strides: Vec<i64>,
    ) -> Self {
        let shape = shape.into();
        let is_contiguous = offset == 0
            && static_dims(&shape)
                .map(|dims| canonical_strides(&dims) == strides)
                .unwrap_or(false);
        let layout = if is_contiguous {
            Layout::Identity
        } else {
            Layout::Strided(StridedLayout { offset, strides })
        };
        Self {
            shape,
            element,
            layout,
        }
    }

    pub fn shape(&self) -> &[Dimension] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn has_identity_layout(&self) -> bool {
        matches!(self.layout, Layout::Identity)
    }

    pub fn static_shape(&self) -> Option<Vec<usize>> {
        static_dims(&self.shape)
    }

    /// Returns `(strides, offset)` for the layout. Identity layouts need a
    /// static shape to derive their strides.
    pub fn strides_and_offset(&self) -> Option<(Vec<i64>, i64)> {
        match &self.layout {
            Layout::Identity => Some((canonical_strides(&self.static_shape()?), 0)),
            Layout::Strided(layout) => Some((layout.strides.clone(), layout.offset)),
        }
    }
}

impl fmt::Display for MemRefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("memref<")?;
        write_shape_prefix(f, &self.shape)?;
        write!(f, "{}", self.element)?;
        if let Layout::Strided(layout) = &self.layout {
            write!(f, ", strided<{:?}, offset: {}>", layout.strides, layout.offset)?;
        }
        f.write_str(">")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    shape: Vec<Dimension>,
    element: ElementType,
}

impl TensorType {
    pub fn new(shape: impl Into<Vec<Dimension>>, element: ElementType) -> Self {
        Self {
            shape: shape.into(),
            element,
        }
    }

    pub fn shape(&self) -> &[Dimension] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn static_shape(&self) -> Option<Vec<usize>> {
        static_dims(&self.shape)
    }

    /// Returns element count when all dims are static.
    pub fn element_count(&self) -> Option<usize> {
        let dims = self.static_shape()?;
        dims.into_iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(dim))
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("tensor<")?;
        write_shape_prefix(f, &self.shape)?;
        write!(f, "{}>", self.element)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    pub inputs: Vec<Type>,
    pub results: Vec<Type>,
}

impl FunctionType {
    pub fn new(inputs: Vec<Type>, results: Vec<Type>) -> Self {
        Self { inputs, results }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        write_type_list(f, &self.inputs)?;
        f.write_str(") -> (")?;
        write_type_list(f, &self.results)?;
        f.write_str(")")
    }
}

/// Typing information for SSA values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    MemRef(MemRefType),
    Tensor(TensorType),
    Scalar(ElementType),
    Function(FunctionType),
}

impl Type {
    pub fn index() -> Self {
        Type::Scalar(ElementType::Index)
    }

    pub fn as_memref(&self) -> Option<&MemRefType> {
        match self {
            Type::MemRef(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            Type::Tensor(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Type::Scalar(ElementType::Index))
    }

    /// Element type of shaped types, or the scalar itself.
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            Type::MemRef(ty) => Some(ty.element()),
            Type::Tensor(ty) => Some(ty.element()),
            Type::Scalar(elem) => Some(*elem),
            Type::Function(_) => None,
        }
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            Type::MemRef(ty) => Some(ty.rank()),
            Type::Tensor(ty) => Some(ty.rank()),
            _ => None,
        }
    }
}

impl From<MemRefType> for Type {
    fn from(value: MemRefType) -> Self {
        Type::MemRef(value)
    }
}

impl From<TensorType> for Type {
    fn from(value: TensorType) -> Self {
        Type::Tensor(value)
    }
}

impl From<ElementType> for Type {
    fn from(value: ElementType) -> Self {
        Type::Scalar(value)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::MemRef(ty) => write!(f, "{ty}"),
            Type::Tensor(ty) => write!(f, "{ty}"),
            Type::Scalar(elem) => write!(f, "{elem}"),
            Type::Function(ty) => write!(f, "{ty}"),
        }
    }
}

fn write_shape_prefix(f: &mut fmt::Formatter<'_>, shape: &[Dimension]) -> fmt::Result {
    for dim in shape {
        write!(f, "{dim}x")?;
    }
    Ok(())
}

pub(crate) fn write_type_list(f: &mut fmt::Formatter<'_>, types: &[Type]) -> fmt::Result {
    for (idx, ty) in types.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{ty}")?;
    }
    Ok(())
}
