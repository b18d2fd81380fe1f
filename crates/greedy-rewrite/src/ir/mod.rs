//! Arena-backed SSA IR with nested regions, symbol tables and the memref,
//! tensor, linalg, func and arith operations the rewrites operate on.

pub mod attr;
pub mod builder;
pub mod mapping;
pub mod module;
pub mod op;
pub mod print;
pub mod slice;
pub mod symbol;
pub mod types;
pub mod verify;

pub use attr::{
    names, AffineMap, Attribute, DenseData, DenseElements, IteratorType, Reassociation, DYNAMIC,
};
pub use builder::{infer_subview_type, OpBuilder};
pub use mapping::IrMapping;
pub use module::{
    Block, BlockId, ChangeJournal, InsertPoint, IrError, Module, OpId, Region, RegionId, Use,
    Value, ValueDef, ValueId,
};
pub use op::{Dialect, OpKind, Operation, OperationState};
pub use print::print_op;
pub use slice::{
    infer_canonical_rank_reduced_type, infer_extract_slice_type, is_rank_reduction_of,
    MixedSliceParams, OpFoldResult,
};
pub use symbol::{lookup_nearest_symbol, symbol_name, SymbolTable};
pub use types::{
    canonical_strides, static_dims, static_shape, Dimension, ElementType, FunctionType, Layout,
    MemRefType, StridedLayout, TensorType, Type,
};
pub use verify::{verify, VerifyError};
