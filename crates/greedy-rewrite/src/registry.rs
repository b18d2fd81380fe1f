//! Registered operation kinds and their canonicalization hooks.
//!
//! Canonicalization patterns live with the operations they simplify. Callers
//! collect them per operation or per dialect instead of naming individual
//! patterns, so new canonicalizations reach every aggregator automatically.

use std::collections::HashMap;

use crate::ir::{Dialect, OpKind};
use crate::passes::tensor_canonicalization;
use crate::pattern::PatternSet;

/// Adds canonicalization patterns to a set.
pub type CanonicalizationHook = fn(&mut PatternSet);

#[derive(Clone, Copy)]
pub struct RegisteredOperation {
    kind: OpKind,
    canonicalization: Option<CanonicalizationHook>,
}

impl RegisteredOperation {
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn dialect(&self) -> Dialect {
        self.kind.dialect()
    }

    pub fn has_canonicalization_patterns(&self) -> bool {
        self.canonicalization.is_some()
    }

    pub fn get_canonicalization_patterns(&self, patterns: &mut PatternSet) {
        if let Some(hook) = self.canonicalization {
            hook(patterns);
        }
    }
}

/// Operation kinds known to a compilation session, in registration order.
#[derive(Clone, Default)]
pub struct OpRegistry {
    operations: Vec<RegisteredOperation>,
    dialect_hooks: HashMap<Dialect, Vec<CanonicalizationHook>>,
}

impl OpRegistry {
    /// Registry without any operation.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind and the tensor canonicalizations.
    pub fn with_builtin_ops() -> Self {
        let mut registry = Self::empty();
        for kind in OpKind::ALL {
            let hook: Option<CanonicalizationHook> = match kind {
                OpKind::ExtractSlice => {
                    Some(tensor_canonicalization::populate_extract_slice_canonicalizations)
                }
                OpKind::CollapseShape => {
                    Some(tensor_canonicalization::populate_collapse_shape_canonicalizations)
                }
                OpKind::ExpandShape => {
                    Some(tensor_canonicalization::populate_expand_shape_canonicalizations)
                }
                _ => None,
            };
            registry.register(kind, hook);
        }
        registry
    }

    /// Registers `kind`, replacing the hook of an earlier registration.
    pub fn register(&mut self, kind: OpKind, canonicalization: Option<CanonicalizationHook>) {
        match self.operations.iter_mut().find(|op| op.kind == kind) {
            Some(existing) => existing.canonicalization = canonicalization,
            None => self.operations.push(RegisteredOperation {
                kind,
                canonicalization,
            }),
        }
    }

    pub fn register_dialect_canonicalization(
        &mut self,
        dialect: Dialect,
        hook: CanonicalizationHook,
    ) {
        self.dialect_hooks.entry(dialect).or_default().push(hook);
    }

    pub fn lookup(&self, kind: OpKind) -> Option<&RegisteredOperation> {
        self.operations.iter().find(|op| op.kind == kind)
    }

    pub fn registered_operations(&self) -> &[RegisteredOperation] {
        &self.operations
    }

    pub fn is_dialect_loaded(&self, dialect: Dialect) -> bool {
        self.operations.iter().any(|op| op.dialect() == dialect)
    }

    /// Dialect-level patterns, which apply across the dialect's operations.
    pub fn get_dialect_canonicalization_patterns(
        &self,
        dialect: Dialect,
        patterns: &mut PatternSet,
    ) {
        if let Some(hooks) = self.dialect_hooks.get(&dialect) {
            for hook in hooks {
                hook(patterns);
            }
        }
    }
}
