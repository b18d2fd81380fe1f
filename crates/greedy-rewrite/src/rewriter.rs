use crate::ir::{
    Attribute, ChangeJournal, InsertPoint, IrError, Module, OpBuilder, OpId, OpKind, Operation,
    SymbolTable, Type, ValueId,
};

/// Mutation context handed to patterns.
///
/// Every mutation goes through the wrapped module, which journals created,
/// modified and erased operations for the driver to re-enqueue.
pub struct PatternRewriter<'a> {
    module: &'a mut Module,
}

impl<'a> PatternRewriter<'a> {
    /// Starts journaling changes made to `module`.
    pub fn new(module: &'a mut Module) -> Self {
        module.begin_journal();
        Self { module }
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        self.module
    }

    /// Returns the operation referenced by `op`.
    pub fn op(&self, op: OpId) -> &Operation {
        self.module.op(op)
    }

    pub fn kind(&self, op: OpId) -> OpKind {
        self.module.kind(op)
    }

    pub fn contains(&self, op: OpId) -> bool {
        self.module.is_live(op)
    }

    pub fn type_of(&self, value: ValueId) -> &Type {
        self.module.value_type(value)
    }

    /// Returns the operation defining the provided value.
    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        self.module.defining_op(value)
    }

    /// Builder creating operations at `at`.
    pub fn builder(&mut self, at: InsertPoint) -> OpBuilder<'_> {
        OpBuilder::new(&mut *self.module, at)
    }

    /// Redirects every result of `op` to `values` and erases `op`.
    pub fn replace_op(&mut self, op: OpId, values: &[ValueId]) -> Result<(), IrError> {
        let operation = self.module.get(op).ok_or(IrError::StaleOp(op))?;
        let results = operation.results().to_vec();
        if results.len() != values.len() {
            return Err(IrError::Invalid {
                kind: operation.kind(),
                reason: format!(
                    "replacing {} result(s) with {} value(s)",
                    results.len(),
                    values.len()
                ),
            });
        }
        for (from, to) in results.into_iter().zip(values) {
            self.module.replace_all_uses_with(from, *to)?;
        }
        self.module.erase_op(op)
    }

    /// Erases `op`; fails while any of its results is still used.
    pub fn erase_op(&mut self, op: OpId) -> Result<(), IrError> {
        self.module.erase_op(op)
    }

    pub fn set_attr(
        &mut self,
        op: OpId,
        name: impl Into<String>,
        value: Attribute,
    ) -> Result<(), IrError> {
        self.module.set_attr(op, name, value)
    }

    /// Builds the symbol table of the scope enclosing `op`.
    pub fn symbol_table(&self, op: OpId) -> Result<SymbolTable, IrError> {
        SymbolTable::nearest(self.module, op)
    }

    /// Drains the journal of changes recorded since the previous call.
    pub fn take_changes(&mut self) -> ChangeJournal {
        self.module.take_journal()
    }
}

impl Drop for PatternRewriter<'_> {
    fn drop(&mut self) {
        self.module.end_journal();
    }
}
