//! Background-compilation transfer staging.
//!
//! The compiling actor (historically a background worker, potentially
//! out-of-process) discovers guard and type assumptions while it optimizes.
//! Those references must stay alive until the finished entry point is
//! installed on the owning thread; [`JitTransferData`] is the short-lived
//! staging area that carries them across. Installation moves its contents
//! into the entry point and leaves the staging object empty; an abandoned
//! compilation just drops it.

use std::sync::Arc;

use crate::shape::Shape;

use super::guards::{EquivalentTypeCacheSet, EQUIVALENT_TYPE_CACHE_SIZE};

/// One equivalence class awaiting installation into a cache slot.
#[derive(Debug)]
pub struct PendingEquivalentTypeGuard {
    /// Destination slot in the entry point's cache array
    pub cache_index: usize,
    /// Shapes forming the equivalence class
    pub shapes: Vec<Arc<Shape>>,
}

/// Staging area between the compiling actor and the installing thread.
#[derive(Debug, Default)]
pub struct JitTransferData {
    /// Shapes the background compiler must keep alive until installation
    keep_alive_shapes: Vec<Arc<Shape>>,
    /// Raw byte-serialized guard tables (fixed-layout exchange for the
    /// out-of-process variant)
    guard_table_bytes: Vec<u8>,
    /// Equivalence classes awaiting installation
    pending_equivalent_guards: Vec<PendingEquivalentTypeGuard>,
}

impl JitTransferData {
    /// Create an empty staging area
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `shape` alive until installation
    pub fn add_keep_alive_shape(&mut self, shape: Arc<Shape>) {
        self.keep_alive_shapes.push(shape);
    }

    /// Append raw serialized guard-table bytes
    pub fn append_guard_table_bytes(&mut self, bytes: &[u8]) {
        self.guard_table_bytes.extend_from_slice(bytes);
    }

    /// Stage one equivalence class for `cache_index`
    pub fn add_equivalent_type_guard(&mut self, cache_index: usize, shapes: Vec<Arc<Shape>>) {
        debug_assert!(cache_index < EQUIVALENT_TYPE_CACHE_SIZE);
        self.pending_equivalent_guards
            .push(PendingEquivalentTypeGuard {
                cache_index,
                shapes,
            });
    }

    /// Number of staged equivalence classes
    pub fn pending_equivalent_guard_count(&self) -> usize {
        self.pending_equivalent_guards.len()
    }

    /// Raw staged guard-table bytes
    pub fn guard_table_bytes(&self) -> &[u8] {
        &self.guard_table_bytes
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.keep_alive_shapes.is_empty()
            && self.guard_table_bytes.is_empty()
            && self.pending_equivalent_guards.is_empty()
    }

    /// Move staged equivalence classes into the entry point's cache array
    /// and drop everything else. The staging object is empty afterwards.
    ///
    /// The caches hold the shapes weakly; the keep-alives that pinned them
    /// through compilation are released here, handing lifetime control back
    /// to the runtime.
    pub fn install_into(&mut self, caches: &EquivalentTypeCacheSet) {
        for pending in self.pending_equivalent_guards.drain(..) {
            let cache = caches.cache(pending.cache_index);
            for shape in &pending.shapes {
                cache.add_shape(shape);
            }
        }
        self.keep_alive_shapes.clear();
        self.guard_table_bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ShapeId;

    #[test]
    fn install_moves_classes_and_empties_staging() {
        let mut transfer = JitTransferData::new();
        let a = Shape::new(ShapeId(1), 0);
        let b = Shape::new(ShapeId(2), 0);
        transfer.add_keep_alive_shape(Arc::clone(&a));
        transfer.add_keep_alive_shape(Arc::clone(&b));
        transfer.append_guard_table_bytes(&[1, 2, 3]);
        transfer.add_equivalent_type_guard(0, vec![Arc::clone(&a)]);
        transfer.add_equivalent_type_guard(5, vec![Arc::clone(&b)]);
        assert_eq!(transfer.pending_equivalent_guard_count(), 2);

        let caches = EquivalentTypeCacheSet::new();
        transfer.install_into(&caches);

        assert!(transfer.is_empty());
        assert!(caches.cache(0).has_live_shape());
        assert!(caches.cache(5).has_live_shape());
        assert!(!caches.cache(1).has_live_shape());
    }

    #[test]
    fn caches_hold_installed_shapes_weakly() {
        let mut transfer = JitTransferData::new();
        let s = Shape::new(ShapeId(3), 0);
        transfer.add_equivalent_type_guard(2, vec![Arc::clone(&s)]);

        let caches = EquivalentTypeCacheSet::new();
        transfer.install_into(&caches);
        assert!(caches.cache(2).has_live_shape());

        drop(s);
        assert!(!caches.cache(2).has_live_shape());
    }

    #[test]
    fn abandoned_compilation_just_drops_staging() {
        let mut transfer = JitTransferData::new();
        transfer.add_keep_alive_shape(Shape::new(ShapeId(9), 0));
        transfer.append_guard_table_bytes(&[0xFF]);
        drop(transfer);
    }
}
