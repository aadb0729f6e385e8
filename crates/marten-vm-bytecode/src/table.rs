//! Function table
//!
//! Resolves [`FunctionId`]s to their [`FunctionBody`] metadata. The optimizer
//! holds one of these per compilation and uses it to chase callee identities
//! the profile reports.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::function::FunctionBody;
use crate::FunctionId;

/// Shared registry of function bodies keyed by id
#[derive(Debug, Default)]
pub struct FunctionTable {
    bodies: FxHashMap<FunctionId, Arc<FunctionBody>>,
}

impl FunctionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a body, returning the shared handle.
    ///
    /// Re-inserting an id replaces the previous body (re-parse after lazy
    /// compilation produces a fresh body under the same id).
    pub fn insert(&mut self, body: FunctionBody) -> Arc<FunctionBody> {
        let id = body.id;
        let body = Arc::new(body);
        self.bodies.insert(id, Arc::clone(&body));
        body
    }

    /// Look up a body by id
    pub fn get(&self, id: FunctionId) -> Option<&Arc<FunctionBody>> {
        self.bodies.get(&id)
    }

    /// Number of registered bodies
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_resolve() {
        let mut table = FunctionTable::new();
        table.insert(FunctionBody::builder(FunctionId(1)).name("f").build());
        table.insert(FunctionBody::builder(FunctionId(2)).name("g").build());

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(FunctionId(1)).expect("body 1").display_name(),
            "f"
        );
        assert!(table.get(FunctionId(3)).is_none());
    }

    #[test]
    fn reinsert_replaces_body() {
        let mut table = FunctionTable::new();
        table.insert(
            FunctionBody::builder(FunctionId(1))
                .is_lazy(true)
                .build(),
        );
        table.insert(
            FunctionBody::builder(FunctionId(1))
                .instruction_count(12)
                .build(),
        );
        let body = table.get(FunctionId(1)).expect("body");
        assert!(!body.flags.is_lazy);
        assert_eq!(body.instruction_count, 12);
    }
}
