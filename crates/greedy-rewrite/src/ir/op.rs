use std::collections::BTreeMap;
use std::fmt;

use super::attr::Attribute;
use super::module::{BlockId, RegionId, ValueId};
use super::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Builtin,
    Func,
    MemRef,
    Linalg,
    Tensor,
    Arith,
}

/// Operation kinds understood by the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Module,
    Func,
    Return,
    Call,
    Alloc,
    SubView,
    Cast,
    Copy,
    Generic,
    Yield,
    ExtractSlice,
    CollapseShape,
    ExpandShape,
    Constant,
}

impl OpKind {
    pub const ALL: [OpKind; 14] = [
        OpKind::Module,
        OpKind::Func,
        OpKind::Return,
        OpKind::Call,
        OpKind::Alloc,
        OpKind::SubView,
        OpKind::Cast,
        OpKind::Copy,
        OpKind::Generic,
        OpKind::Yield,
        OpKind::ExtractSlice,
        OpKind::CollapseShape,
        OpKind::ExpandShape,
        OpKind::Constant,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Module => "builtin.module",
            OpKind::Func => "func.func",
            OpKind::Return => "func.return",
            OpKind::Call => "func.call",
            OpKind::Alloc => "memref.alloc",
            OpKind::SubView => "memref.subview",
            OpKind::Cast => "memref.cast",
            OpKind::Copy => "memref.copy",
            OpKind::Generic => "linalg.generic",
            OpKind::Yield => "linalg.yield",
            OpKind::ExtractSlice => "tensor.extract_slice",
            OpKind::CollapseShape => "tensor.collapse_shape",
            OpKind::ExpandShape => "tensor.expand_shape",
            OpKind::Constant => "arith.constant",
        }
    }

    pub fn dialect(self) -> Dialect {
        match self {
            OpKind::Module => Dialect::Builtin,
            OpKind::Func | OpKind::Return | OpKind::Call => Dialect::Func,
            OpKind::Alloc | OpKind::SubView | OpKind::Cast | OpKind::Copy => Dialect::MemRef,
            OpKind::Generic | OpKind::Yield => Dialect::Linalg,
            OpKind::ExtractSlice | OpKind::CollapseShape | OpKind::ExpandShape => {
                Dialect::Tensor
            }
            OpKind::Constant => Dialect::Arith,
        }
    }

    /// Ops whose single result is a view over operand 0 without copying data.
    pub fn is_view_like(self) -> bool {
        matches!(self, OpKind::SubView | OpKind::Cast)
    }

    /// Ops without side effects; erasable once their results are unused.
    pub fn is_pure(self) -> bool {
        matches!(
            self,
            OpKind::Alloc
                | OpKind::SubView
                | OpKind::Cast
                | OpKind::ExtractSlice
                | OpKind::CollapseShape
                | OpKind::ExpandShape
                | OpKind::Constant
        )
    }

    pub fn is_terminator(self) -> bool {
        matches!(self, OpKind::Return | OpKind::Yield)
    }

    pub fn is_symbol_table(self) -> bool {
        matches!(self, OpKind::Module)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything needed to create an operation.
#[derive(Debug, Clone)]
pub struct OperationState {
    pub kind: OpKind,
    pub operands: Vec<ValueId>,
    pub result_types: Vec<Type>,
    pub attrs: BTreeMap<String, Attribute>,
    pub num_regions: usize,
}

impl OperationState {
    pub fn new(kind: OpKind) -> Self {
        Self {
            kind,
            operands: Vec::new(),
            result_types: Vec::new(),
            attrs: BTreeMap::new(),
            num_regions: 0,
        }
    }

    pub fn operands(mut self, operands: impl IntoIterator<Item = ValueId>) -> Self {
        self.operands.extend(operands);
        self
    }

    pub fn results(mut self, types: impl IntoIterator<Item = Type>) -> Self {
        self.result_types.extend(types);
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn attrs(mut self, attrs: impl IntoIterator<Item = (String, Attribute)>) -> Self {
        self.attrs.extend(attrs);
        self
    }

    pub fn regions(mut self, count: usize) -> Self {
        self.num_regions = count;
        self
    }
}

/// A live operation stored in the module arena.
#[derive(Debug, Clone)]
pub struct Operation {
    pub(crate) kind: OpKind,
    pub(crate) operands: Vec<ValueId>,
    pub(crate) results: Vec<ValueId>,
    pub(crate) attrs: BTreeMap<String, Attribute>,
    pub(crate) regions: Vec<RegionId>,
    pub(crate) parent: Option<BlockId>,
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn operands(&self) -> &[ValueId] {
        &self.operands
    }

    pub fn operand(&self, index: usize) -> Option<ValueId> {
        self.operands.get(index).copied()
    }

    pub fn results(&self) -> &[ValueId] {
        &self.results
    }

    pub fn result(&self, index: usize) -> Option<ValueId> {
        self.results.get(index).copied()
    }

    pub fn attrs(&self) -> &BTreeMap<String, Attribute> {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn regions(&self) -> &[RegionId] {
        &self.regions
    }

    pub fn parent_block(&self) -> Option<BlockId> {
        self.parent
    }
}
