use std::collections::HashMap;

use super::module::ValueId;

/// Value remapping used when cloning operations into a new scope.
#[derive(Debug, Default, Clone)]
pub struct IrMapping {
    values: HashMap<ValueId, ValueId>,
}

impl IrMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `from` to `to`; a later mapping of the same key wins.
    pub fn map(&mut self, from: ValueId, to: ValueId) {
        self.values.insert(from, to);
    }

    pub fn lookup(&self, from: ValueId) -> Option<ValueId> {
        self.values.get(&from).copied()
    }

    pub fn lookup_or_default(&self, from: ValueId) -> ValueId {
        self.lookup(from).unwrap_or(from)
    }

    pub fn contains(&self, from: ValueId) -> bool {
        self.values.contains_key(&from)
    }
}
