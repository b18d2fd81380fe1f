use std::fmt;

use super::types::{Type, TensorType};

/// Sentinel stored in static offset/size/stride arrays for dynamic entries.
pub const DYNAMIC: i64 = i64::MIN;

/// Well-known attribute names.
pub mod names {
    pub const SYM_NAME: &str = "sym_name";
    pub const SYM_VISIBILITY: &str = "sym_visibility";
    pub const FUNCTION_TYPE: &str = "function_type";
    pub const CALLEE: &str = "callee";
    pub const STATIC_OFFSETS: &str = "static_offsets";
    pub const STATIC_SIZES: &str = "static_sizes";
    pub const STATIC_STRIDES: &str = "static_strides";
    pub const REASSOCIATION: &str = "reassociation";
    pub const INDEXING_MAPS: &str = "indexing_maps";
    pub const ITERATOR_TYPES: &str = "iterator_types";
    pub const OPERAND_SEGMENT_SIZES: &str = "operand_segment_sizes";
    pub const VALUE: &str = "value";
}

/// Partition of source dimensions into contiguous groups, one per result dimension.
pub type Reassociation = Vec<Vec<usize>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IteratorType {
    Parallel,
    Reduction,
}

impl fmt::Display for IteratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IteratorType::Parallel => f.write_str("parallel"),
            IteratorType::Reduction => f.write_str("reduction"),
        }
    }
}

/// Projected-permutation affine map `(d0, .., dn) -> (d_r0, .., d_rk)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AffineMap {
    num_dims: usize,
    results: Vec<usize>,
}

impl AffineMap {
    /// Returns `None` when a result refers to a dimension outside the domain.
    pub fn new(num_dims: usize, results: Vec<usize>) -> Option<Self> {
        if results.iter().any(|dim| *dim >= num_dims) {
            return None;
        }
        Some(Self { num_dims, results })
    }

    pub fn identity(rank: usize) -> Self {
        Self {
            num_dims: rank,
            results: (0..rank).collect(),
        }
    }

    pub fn num_dims(&self) -> usize {
        self.num_dims
    }

    pub fn results(&self) -> &[usize] {
        &self.results
    }

    pub fn is_identity(&self) -> bool {
        self.results.len() == self.num_dims
            && self.results.iter().enumerate().all(|(idx, dim)| idx == *dim)
    }

    /// Maps an iteration-space point to an operand index.
    pub fn apply(&self, point: &[usize]) -> Vec<usize> {
        self.results.iter().map(|dim| point[*dim]).collect()
    }
}

impl fmt::Display for AffineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = (0..self.num_dims).map(|d| format!("d{d}")).collect();
        let results: Vec<String> = self.results.iter().map(|d| format!("d{d}")).collect();
        write!(
            f,
            "affine_map<({}) -> ({})>",
            dims.join(", "),
            results.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DenseData {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl DenseData {
    pub fn len(&self) -> usize {
        match self {
            DenseData::Int(values) => values.len(),
            DenseData::Float(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gathers the elements at the given linear positions.
    pub fn gather(&self, positions: &[usize]) -> Option<DenseData> {
        match self {
            DenseData::Int(values) => positions
                .iter()
                .map(|pos| values.get(*pos).copied())
                .collect::<Option<Vec<_>>>()
                .map(DenseData::Int),
            DenseData::Float(values) => positions
                .iter()
                .map(|pos| values.get(*pos).copied())
                .collect::<Option<Vec<_>>>()
                .map(DenseData::Float),
        }
    }
}

/// Dense constant payload with its statically shaped tensor type.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseElements {
    ty: TensorType,
    data: DenseData,
}

impl DenseElements {
    /// Returns `None` unless the type is static and the payload length matches.
    pub fn new(ty: TensorType, data: DenseData) -> Option<Self> {
        if ty.element_count()? != data.len() {
            return None;
        }
        if ty.element().is_float() != matches!(data, DenseData::Float(_)) {
            return None;
        }
        Some(Self { ty, data })
    }

    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    pub fn data(&self) -> &DenseData {
        &self.data
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Unit,
    Bool(bool),
    Int(i64),
    Index(i64),
    Str(String),
    SymbolRef(String),
    Type(Type),
    IntArray(Vec<i64>),
    Reassociation(Reassociation),
    AffineMaps(Vec<AffineMap>),
    Iterators(Vec<IteratorType>),
    Dense(DenseElements),
}

impl Attribute {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(value) | Attribute::Index(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(value) | Attribute::SymbolRef(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i64]> {
        match self {
            Attribute::IntArray(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_reassociation(&self) -> Option<&Reassociation> {
        match self {
            Attribute::Reassociation(groups) => Some(groups),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Type> {
        match self {
            Attribute::Type(ty) => Some(ty),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Unit => f.write_str("unit"),
            Attribute::Bool(value) => write!(f, "{value}"),
            Attribute::Int(value) => write!(f, "{value} : i64"),
            Attribute::Index(value) => write!(f, "{value} : index"),
            Attribute::Str(value) => write!(f, "{value:?}"),
            Attribute::SymbolRef(value) => write!(f, "@{value}"),
            Attribute::Type(ty) => write!(f, "{ty}"),
            Attribute::IntArray(values) => {
                let rendered: Vec<String> = values
                    .iter()
                    .map(|v| {
                        if *v == DYNAMIC {
                            "?".to_string()
                        } else {
                            v.to_string()
                        }
                    })
                    .collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Attribute::Reassociation(groups) => write!(f, "{groups:?}"),
            Attribute::AffineMaps(maps) => {
                let rendered: Vec<String> = maps.iter().map(|m| m.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Attribute::Iterators(iterators) => {
                let rendered: Vec<String> =
                    iterators.iter().map(|it| format!("\"{it}\"")).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Attribute::Dense(dense) => match dense.data() {
                DenseData::Int(values) => write!(f, "dense<{values:?}> : {}", dense.ty()),
                DenseData::Float(values) => write!(f, "dense<{values:?}> : {}", dense.ty()),
            },
        }
    }
}
