use std::collections::HashMap;

use super::attr::{names, Attribute};
use super::module::{IrError, Module, OpId};

/// Returns the symbol name declared by `op`, if any.
pub fn symbol_name(module: &Module, op: OpId) -> Option<&str> {
    module.get(op)?.attr(names::SYM_NAME)?.as_str()
}

/// Name-to-operation index over the body of one symbol-table operation.
///
/// The table is a snapshot built on demand; insertions made through it keep
/// the snapshot and the module in sync.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    scope: OpId,
    symbols: HashMap<String, OpId>,
    uniquing_counter: usize,
}

impl SymbolTable {
    pub fn new(module: &Module, scope: OpId) -> Result<Self, IrError> {
        let operation = module.get(scope).ok_or(IrError::StaleOp(scope))?;
        if !operation.kind().is_symbol_table() {
            return Err(IrError::NotSymbolTable(operation.kind()));
        }
        let mut symbols = HashMap::new();
        if let Some(body) = module.entry_block(scope, 0) {
            for op in module.block(body).ops() {
                if let Some(name) = symbol_name(module, *op) {
                    symbols.entry(name.to_string()).or_insert(*op);
                }
            }
        }
        Ok(Self {
            scope,
            symbols,
            uniquing_counter: 0,
        })
    }

    /// Builds the table of the nearest symbol scope enclosing `op`.
    pub fn nearest(module: &Module, op: OpId) -> Result<Self, IrError> {
        let scope = module
            .nearest_symbol_table(op)
            .ok_or_else(|| IrError::NoSymbolTable(module.kind(op)))?;
        Self::new(module, scope)
    }

    pub fn scope(&self) -> OpId {
        self.scope
    }

    pub fn lookup(&self, name: &str) -> Option<OpId> {
        self.symbols.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Registers `op`, which must already sit in the scope body, renaming it
    /// to `name_N` when its name collides with an existing symbol. Returns the
    /// final name.
    pub fn insert(&mut self, module: &mut Module, op: OpId) -> Result<String, IrError> {
        let operation = module.get(op).ok_or(IrError::StaleOp(op))?;
        let kind = operation.kind();
        let body = module.entry_block(self.scope, 0);
        if operation.parent_block().is_none() || operation.parent_block() != body {
            return Err(IrError::SymbolOutsideScope(kind));
        }
        let name = symbol_name(module, op)
            .ok_or(IrError::MissingSymbolName(kind))?
            .to_string();

        let final_name = match self.symbols.get(&name) {
            None => name,
            Some(existing) if *existing == op => name,
            Some(_) => loop {
                let candidate = format!("{name}_{}", self.uniquing_counter);
                self.uniquing_counter += 1;
                if !self.symbols.contains_key(&candidate) {
                    break candidate;
                }
            },
        };
        if symbol_name(module, op) != Some(final_name.as_str()) {
            module.set_attr(op, names::SYM_NAME, Attribute::Str(final_name.clone()))?;
        }
        self.symbols.insert(final_name.clone(), op);
        Ok(final_name)
    }
}

/// Resolves `name` in the symbol scope enclosing `from`.
pub fn lookup_nearest_symbol(module: &Module, from: OpId, name: &str) -> Option<OpId> {
    let scope = module.nearest_symbol_table(from)?;
    let body = module.entry_block(scope, 0)?;
    module
        .block(body)
        .ops()
        .iter()
        .copied()
        .find(|op| symbol_name(module, *op) == Some(name))
}
