use std::collections::{BTreeMap, HashSet};

use smallvec::SmallVec;
use thiserror::Error;

use super::attr::Attribute;
use super::mapping::IrMapping;
use super::op::{OpKind, Operation, OperationState};
use super::types::Type;

/// Generation-checked handle to an operation slot.
///
/// Erasing an operation bumps the slot generation, so handles held across a
/// rewrite can be checked with [`Module::is_live`] instead of dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId {
    index: u32,
    generation: u32,
}

impl OpId {
    pub fn index(self) -> u32 {
        self.index
    }
}

/// Unique identifier for SSA values in a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

/// Total "definition" of a value (`BlockArgument | OpResult`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueDef {
    OpResult { op: OpId, index: u32 },
    BlockArg { block: BlockId, index: u32 },
}

/// One operand slot referencing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub op: OpId,
    pub operand: u32,
}

#[derive(Debug, Clone)]
pub struct Value {
    ty: Type,
    def: ValueDef,
    uses: SmallVec<[Use; 4]>,
    live: bool,
}

impl Value {
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn def(&self) -> ValueDef {
        self.def
    }

    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    pub fn has_uses(&self) -> bool {
        !self.uses.is_empty()
    }

    pub fn is_live(&self) -> bool {
        self.live
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    args: Vec<ValueId>,
    ops: Vec<OpId>,
    parent: RegionId,
    live: bool,
}

impl Block {
    pub fn args(&self) -> &[ValueId] {
        &self.args
    }

    pub fn ops(&self) -> &[OpId] {
        &self.ops
    }

    pub fn parent(&self) -> RegionId {
        self.parent
    }

    pub fn terminator(&self) -> Option<OpId> {
        self.ops.last().copied()
    }
}

#[derive(Debug, Clone)]
pub struct Region {
    blocks: Vec<BlockId>,
    parent: OpId,
    live: bool,
}

impl Region {
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn parent(&self) -> OpId {
        self.parent
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }
}

#[derive(Debug, Clone)]
struct OpSlot {
    generation: u32,
    op: Option<Operation>,
}

/// Where the next created operation lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    Before(OpId),
    After(OpId),
    BlockStart(BlockId),
    BlockEnd(BlockId),
}

/// Record of mutations performed while journaling is enabled.
#[derive(Debug, Default, Clone)]
pub struct ChangeJournal {
    pub created: Vec<OpId>,
    pub modified: Vec<OpId>,
    pub erased: Vec<OpId>,
    /// Values that lost at least one use; their producers may now be dead.
    pub released: Vec<ValueId>,
}

impl ChangeJournal {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.modified.is_empty()
            && self.erased.is_empty()
            && self.released.is_empty()
    }
}

/// Errors surfaced by graph mutation and lookup misuse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("operation handle {0:?} is stale or was erased")]
    StaleOp(OpId),
    #[error("value {0:?} is not live")]
    DeadValue(ValueId),
    #[error("block {0:?} is not live")]
    DeadBlock(BlockId),
    #[error("region {0:?} is not live")]
    DeadRegion(RegionId),
    #[error("cannot erase `{kind}`: value %{value} still has {uses} use(s)")]
    LiveUses { kind: OpKind, value: u32, uses: usize },
    #[error("operand index {index} out of range for `{kind}`")]
    OperandOutOfRange { kind: OpKind, index: usize },
    #[error("insertion anchor {0:?} is not attached to a block")]
    DetachedAnchor(OpId),
    #[error("`{0}` is not nested in a symbol table")]
    NoSymbolTable(OpKind),
    #[error("`{0}` cannot act as a symbol table")]
    NotSymbolTable(OpKind),
    #[error("`{0}` does not define a symbol name")]
    MissingSymbolName(OpKind),
    #[error("`{0}` is not placed directly in the symbol table body")]
    SymbolOutsideScope(OpKind),
    #[error("invalid `{kind}`: {reason}")]
    Invalid { kind: OpKind, reason: String },
}

/// Arena owning every operation, value, block and region of one IR module.
#[derive(Debug, Clone)]
pub struct Module {
    ops: Vec<OpSlot>,
    values: Vec<Value>,
    blocks: Vec<Block>,
    regions: Vec<Region>,
    top: OpId,
    journal: Option<ChangeJournal>,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module {
    /// Creates an empty `builtin.module` with a single body block.
    pub fn new() -> Self {
        let mut module = Self {
            ops: Vec::new(),
            values: Vec::new(),
            blocks: Vec::new(),
            regions: Vec::new(),
            top: OpId {
                index: 0,
                generation: 0,
            },
            journal: None,
        };
        let top = module.alloc_op(Operation {
            kind: OpKind::Module,
            operands: Vec::new(),
            results: Vec::new(),
            attrs: BTreeMap::new(),
            regions: Vec::new(),
            parent: None,
        });
        let region = module.alloc_region(top);
        module.op_mut(top).regions.push(region);
        module.alloc_block(region, &[]);
        module.top = top;
        module
    }

    pub fn top(&self) -> OpId {
        self.top
    }

    /// Body block of the top-level module op.
    pub fn body(&self) -> BlockId {
        let region = self.op(self.top).regions[0];
        self.regions[region.0 as usize].blocks[0]
    }

    pub fn get(&self, op: OpId) -> Option<&Operation> {
        let slot = self.ops.get(op.index as usize)?;
        if slot.generation != op.generation {
            return None;
        }
        slot.op.as_ref()
    }

    /// Returns the operation referenced by `op`.
    ///
    /// Panics on stale handles; use [`Module::get`] when the handle may have
    /// been erased.
    pub fn op(&self, op: OpId) -> &Operation {
        self.get(op)
            .unwrap_or_else(|| panic!("stale operation handle {op:?}"))
    }

    pub fn is_live(&self, op: OpId) -> bool {
        self.get(op).is_some()
    }

    pub fn kind(&self, op: OpId) -> OpKind {
        self.op(op).kind
    }

    pub fn value(&self, value: ValueId) -> &Value {
        &self.values[value.0 as usize]
    }

    pub fn value_type(&self, value: ValueId) -> &Type {
        &self.value(value).ty
    }

    pub fn is_value_live(&self, value: ValueId) -> bool {
        self.values
            .get(value.0 as usize)
            .map(|v| v.live)
            .unwrap_or(false)
    }

    /// Returns the operation producing `value`, or `None` for block arguments.
    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        match self.value(value).def {
            ValueDef::OpResult { op, .. } => Some(op),
            ValueDef::BlockArg { .. } => None,
        }
    }

    /// Distinct operations using `value`, in use-list order.
    pub fn users(&self, value: ValueId) -> Vec<OpId> {
        let mut seen = HashSet::new();
        self.value(value)
            .uses
            .iter()
            .filter(|u| seen.insert(u.op))
            .map(|u| u.op)
            .collect()
    }

    pub fn block(&self, block: BlockId) -> &Block {
        &self.blocks[block.0 as usize]
    }

    pub fn region(&self, region: RegionId) -> &Region {
        &self.regions[region.0 as usize]
    }

    pub fn is_block_live(&self, block: BlockId) -> bool {
        self.blocks
            .get(block.0 as usize)
            .map(|b| b.live)
            .unwrap_or(false)
    }

    /// Entry block of the `index`-th region of `op`.
    pub fn entry_block(&self, op: OpId, index: usize) -> Option<BlockId> {
        let region = *self.get(op)?.regions.get(index)?;
        self.region(region).entry()
    }

    /// Operation that owns the region containing `block`.
    pub fn block_parent_op(&self, block: BlockId) -> OpId {
        self.region(self.block(block).parent).parent
    }

    pub fn parent_op(&self, op: OpId) -> Option<OpId> {
        let block = self.get(op)?.parent?;
        Some(self.block_parent_op(block))
    }

    /// Closest strict ancestor of `op` with the given kind.
    pub fn parent_of_kind(&self, op: OpId, kind: OpKind) -> Option<OpId> {
        let mut current = self.parent_op(op);
        while let Some(candidate) = current {
            if self.kind(candidate) == kind {
                return Some(candidate);
            }
            current = self.parent_op(candidate);
        }
        None
    }

    /// Closest strict ancestor of `op` acting as a symbol table.
    pub fn nearest_symbol_table(&self, op: OpId) -> Option<OpId> {
        let mut current = self.parent_op(op);
        while let Some(candidate) = current {
            if self.kind(candidate).is_symbol_table() {
                return Some(candidate);
            }
            current = self.parent_op(candidate);
        }
        None
    }

    pub fn is_proper_ancestor(&self, ancestor: OpId, op: OpId) -> bool {
        let mut current = self.parent_op(op);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.parent_op(candidate);
        }
        false
    }

    /// Index of `op` inside its parent block.
    pub fn position(&self, op: OpId) -> Option<usize> {
        let block = self.get(op)?.parent?;
        self.block(block).ops.iter().position(|candidate| *candidate == op)
    }

    /// Nested operations of `root` in post-order, ending with `root` itself.
    pub fn walk(&self, root: OpId) -> Vec<OpId> {
        let mut out = Vec::new();
        self.walk_into(root, &mut out);
        out
    }

    fn walk_into(&self, op: OpId, out: &mut Vec<OpId>) {
        let Some(operation) = self.get(op) else {
            return;
        };
        for region in &operation.regions {
            for block in &self.region(*region).blocks {
                for nested in &self.block(*block).ops {
                    self.walk_into(*nested, out);
                }
            }
        }
        out.push(op);
    }

    /// Enables change journaling, discarding any previous journal.
    pub fn begin_journal(&mut self) {
        self.journal = Some(ChangeJournal::default());
    }

    /// Returns the changes recorded so far and starts a fresh journal.
    pub fn take_journal(&mut self) -> ChangeJournal {
        match self.journal.as_mut() {
            Some(journal) => std::mem::take(journal),
            None => ChangeJournal::default(),
        }
    }

    pub fn end_journal(&mut self) {
        self.journal = None;
    }

    /// Creates an operation at `at`, wiring operand uses and fresh results.
    pub fn create_op(&mut self, state: OperationState, at: InsertPoint) -> Result<OpId, IrError> {
        let (block, pos) = self.resolve_insert_point(at)?;
        for operand in &state.operands {
            if !self.is_value_live(*operand) {
                return Err(IrError::DeadValue(*operand));
            }
        }

        let op = self.alloc_op(Operation {
            kind: state.kind,
            operands: state.operands,
            results: Vec::new(),
            attrs: state.attrs,
            regions: Vec::new(),
            parent: Some(block),
        });
        let results: Vec<ValueId> = state
            .result_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                self.alloc_value(
                    ty,
                    ValueDef::OpResult {
                        op,
                        index: index as u32,
                    },
                )
            })
            .collect();
        let regions: Vec<RegionId> = (0..state.num_regions)
            .map(|_| self.alloc_region(op))
            .collect();
        {
            let operation = self.op_mut(op);
            operation.results = results;
            operation.regions = regions;
        }
        let operands = self.op(op).operands.clone();
        for (index, operand) in operands.into_iter().enumerate() {
            self.values[operand.0 as usize].uses.push(Use {
                op,
                operand: index as u32,
            });
        }
        self.blocks[block.0 as usize].ops.insert(pos, op);
        if let Some(journal) = self.journal.as_mut() {
            journal.created.push(op);
        }
        Ok(op)
    }

    /// Appends a block with the given argument types to `region`.
    pub fn add_block(&mut self, region: RegionId, arg_types: &[Type]) -> Result<BlockId, IrError> {
        let live = self
            .regions
            .get(region.0 as usize)
            .map(|r| r.live)
            .unwrap_or(false);
        if !live {
            return Err(IrError::DeadRegion(region));
        }
        Ok(self.alloc_block(region, arg_types))
    }

    /// Erases `op` and everything nested in it.
    ///
    /// Fails without mutating anything when a result of the erased subtree is
    /// still used from outside of it.
    pub fn erase_op(&mut self, op: OpId) -> Result<(), IrError> {
        if !self.is_live(op) {
            return Err(IrError::StaleOp(op));
        }
        let subtree = self.walk(op);
        let members: HashSet<OpId> = subtree.iter().copied().collect();
        for nested in &subtree {
            let operation = self.op(*nested);
            for result in &operation.results {
                let value = self.value(*result);
                let outside = value.uses.iter().filter(|u| !members.contains(&u.op)).count();
                if outside > 0 {
                    return Err(IrError::LiveUses {
                        kind: operation.kind,
                        value: result.0,
                        uses: outside,
                    });
                }
            }
        }

        for nested in &subtree {
            let operands = self.op(*nested).operands.clone();
            for operand in operands {
                self.values[operand.0 as usize]
                    .uses
                    .retain(|u| u.op != *nested);
                let external = match self.value(operand).def {
                    ValueDef::OpResult { op: producer, .. } => !members.contains(&producer),
                    ValueDef::BlockArg { block, .. } => {
                        !members.contains(&self.block_parent_op(block))
                    }
                };
                if external {
                    if let Some(journal) = self.journal.as_mut() {
                        journal.released.push(operand);
                    }
                }
            }
        }

        if let Some(parent) = self.op(op).parent {
            self.blocks[parent.0 as usize]
                .ops
                .retain(|candidate| *candidate != op);
        }

        for nested in subtree {
            let Some(operation) = self.ops[nested.index as usize].op.take() else {
                continue;
            };
            self.ops[nested.index as usize].generation += 1;
            for result in &operation.results {
                self.values[result.0 as usize].live = false;
            }
            for region in &operation.regions {
                self.regions[region.0 as usize].live = false;
                let blocks = self.regions[region.0 as usize].blocks.clone();
                for block in blocks {
                    self.blocks[block.0 as usize].live = false;
                    let args = self.blocks[block.0 as usize].args.clone();
                    for arg in args {
                        self.values[arg.0 as usize].live = false;
                    }
                }
            }
            if let Some(journal) = self.journal.as_mut() {
                journal.erased.push(nested);
            }
        }
        Ok(())
    }

    /// Points operand `index` of `op` at `value`.
    pub fn set_operand(&mut self, op: OpId, index: usize, value: ValueId) -> Result<(), IrError> {
        let operation = self.get(op).ok_or(IrError::StaleOp(op))?;
        let Some(old) = operation.operands.get(index).copied() else {
            return Err(IrError::OperandOutOfRange {
                kind: operation.kind,
                index,
            });
        };
        if !self.is_value_live(value) {
            return Err(IrError::DeadValue(value));
        }
        if old == value {
            return Ok(());
        }
        let slot = Use {
            op,
            operand: index as u32,
        };
        self.values[old.0 as usize].uses.retain(|u| *u != slot);
        self.values[value.0 as usize].uses.push(slot);
        self.op_mut(op).operands[index] = value;
        if let Some(journal) = self.journal.as_mut() {
            journal.modified.push(op);
            journal.released.push(old);
        }
        Ok(())
    }

    /// Replaces all uses of `from` with `to`, returning the affected users.
    pub fn replace_all_uses_with(
        &mut self,
        from: ValueId,
        to: ValueId,
    ) -> Result<Vec<OpId>, IrError> {
        if from == to {
            return Ok(Vec::new());
        }
        if !self.is_value_live(to) {
            return Err(IrError::DeadValue(to));
        }
        let users = self.users(from);
        let uses = std::mem::take(&mut self.values[from.0 as usize].uses);
        for slot in uses {
            self.op_mut(slot.op).operands[slot.operand as usize] = to;
            self.values[to.0 as usize].uses.push(slot);
        }
        if let Some(journal) = self.journal.as_mut() {
            journal.modified.extend(users.iter().copied());
            journal.released.push(from);
        }
        Ok(users)
    }

    pub fn set_attr(
        &mut self,
        op: OpId,
        name: impl Into<String>,
        value: Attribute,
    ) -> Result<(), IrError> {
        if !self.is_live(op) {
            return Err(IrError::StaleOp(op));
        }
        self.op_mut(op).attrs.insert(name.into(), value);
        if let Some(journal) = self.journal.as_mut() {
            journal.modified.push(op);
        }
        Ok(())
    }

    pub fn remove_attr(&mut self, op: OpId, name: &str) -> Result<Option<Attribute>, IrError> {
        if !self.is_live(op) {
            return Err(IrError::StaleOp(op));
        }
        let removed = self.op_mut(op).attrs.remove(name);
        if removed.is_some() {
            if let Some(journal) = self.journal.as_mut() {
                journal.modified.push(op);
            }
        }
        Ok(removed)
    }

    /// Deep-copies `op` (regions included) at `at`, remapping operands through
    /// `mapping` and recording every cloned result in it.
    pub fn clone_op(
        &mut self,
        op: OpId,
        mapping: &mut IrMapping,
        at: InsertPoint,
    ) -> Result<OpId, IrError> {
        let source = self.get(op).ok_or(IrError::StaleOp(op))?.clone();
        let result_types = source
            .results
            .iter()
            .map(|value| self.value_type(*value).clone())
            .collect::<Vec<_>>();
        let state = OperationState {
            kind: source.kind,
            operands: source
                .operands
                .iter()
                .map(|value| mapping.lookup_or_default(*value))
                .collect(),
            result_types,
            attrs: source.attrs.clone(),
            num_regions: source.regions.len(),
        };
        let cloned = self.create_op(state, at)?;
        let cloned_results = self.op(cloned).results.clone();
        for (old, new) in source.results.iter().zip(cloned_results) {
            mapping.map(*old, new);
        }

        let new_regions = self.op(cloned).regions.clone();
        for (old_region, new_region) in source.regions.iter().zip(new_regions) {
            let old_blocks = self.region(*old_region).blocks.clone();
            for old_block in old_blocks {
                let old_args = self.block(old_block).args.clone();
                let arg_types: Vec<Type> = old_args
                    .iter()
                    .map(|arg| self.value_type(*arg).clone())
                    .collect();
                let new_block = self.add_block(new_region, &arg_types)?;
                let new_args = self.block(new_block).args.clone();
                for (old_arg, new_arg) in old_args.iter().zip(new_args) {
                    mapping.map(*old_arg, new_arg);
                }
                let nested = self.block(old_block).ops.clone();
                for nested_op in nested {
                    self.clone_op(nested_op, mapping, InsertPoint::BlockEnd(new_block))?;
                }
            }
        }
        Ok(cloned)
    }

    fn resolve_insert_point(&self, at: InsertPoint) -> Result<(BlockId, usize), IrError> {
        match at {
            InsertPoint::Before(anchor) | InsertPoint::After(anchor) => {
                let operation = self.get(anchor).ok_or(IrError::StaleOp(anchor))?;
                let block = operation.parent.ok_or(IrError::DetachedAnchor(anchor))?;
                let pos = self
                    .position(anchor)
                    .ok_or(IrError::DetachedAnchor(anchor))?;
                let pos = if matches!(at, InsertPoint::After(_)) {
                    pos + 1
                } else {
                    pos
                };
                Ok((block, pos))
            }
            InsertPoint::BlockStart(block) => {
                if !self.is_block_live(block) {
                    return Err(IrError::DeadBlock(block));
                }
                Ok((block, 0))
            }
            InsertPoint::BlockEnd(block) => {
                if !self.is_block_live(block) {
                    return Err(IrError::DeadBlock(block));
                }
                Ok((block, self.block(block).ops.len()))
            }
        }
    }

    fn op_mut(&mut self, op: OpId) -> &mut Operation {
        self.ops[op.index as usize]
            .op
            .as_mut()
            .unwrap_or_else(|| panic!("stale operation handle {op:?}"))
    }

    fn alloc_op(&mut self, operation: Operation) -> OpId {
        let index = self.ops.len() as u32;
        self.ops.push(OpSlot {
            generation: 0,
            op: Some(operation),
        });
        OpId {
            index,
            generation: 0,
        }
    }

    fn alloc_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value {
            ty,
            def,
            uses: SmallVec::new(),
            live: true,
        });
        id
    }

    fn alloc_region(&mut self, parent: OpId) -> RegionId {
        let id = RegionId(self.regions.len() as u32);
        self.regions.push(Region {
            blocks: Vec::new(),
            parent,
            live: true,
        });
        id
    }

    fn alloc_block(&mut self, region: RegionId, arg_types: &[Type]) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            args: Vec::new(),
            ops: Vec::new(),
            parent: region,
            live: true,
        });
        let args = arg_types
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                self.alloc_value(
                    ty.clone(),
                    ValueDef::BlockArg {
                        block: id,
                        index: index as u32,
                    },
                )
            })
            .collect();
        self.blocks[id.0 as usize].args = args;
        self.regions[region.0 as usize].blocks.push(id);
        id
    }
}
