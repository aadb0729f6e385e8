//! Process-wide invalidation registry.
//!
//! Shape and property mutations can originate on any thread; the registry is
//! the explicit rendezvous between mutators and the guards that speculate on
//! them. It is passed into every guard-registration and invalidation entry
//! point rather than living in ambient thread-local state, so invalidation
//! can be exercised without standing up a full runtime.
//!
//! The registry holds weak references throughout: it never extends the
//! lifetime of a guard, a cache, or an entry point's equivalence array.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::guards::{ConstructorCache, EquivalentTypeCacheSet, PropertyGuard, PropertyId};
use super::EntryPointId;
use crate::shape::ShapeId;

/// Registration and fan-out for guard invalidation.
#[derive(Debug, Default)]
pub struct InvalidationRegistry {
    property_guards: Mutex<FxHashMap<PropertyId, Vec<Weak<PropertyGuard>>>>,
    constructor_caches: Mutex<Vec<Weak<ConstructorCache>>>,
    equivalence_sets: Mutex<FxHashMap<EntryPointId, Weak<EquivalentTypeCacheSet>>>,
}

impl InvalidationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a property guard for fan-out on property mutation
    pub fn register_property_guard(&self, guard: &Arc<PropertyGuard>) {
        self.property_guards
            .lock()
            .entry(guard.property())
            .or_default()
            .push(Arc::downgrade(guard));
    }

    /// Fire every live guard for `property`. Returns how many fired.
    pub fn invalidate_property(&self, property: PropertyId) -> usize {
        let mut guards = self.property_guards.lock();
        let Some(list) = guards.get_mut(&property) else {
            return 0;
        };
        let mut fired = 0;
        list.retain(|weak| {
            if let Some(guard) = weak.upgrade() {
                guard.invalidate();
                fired += 1;
            }
            // Fired or collected either way: drop the registration.
            false
        });
        guards.remove(&property);
        tracing::debug!(property = property.0, fired, "property guards invalidated");
        fired
    }

    /// Track a constructor cache on the process-wide invalidation list
    pub fn register_constructor_cache(&self, cache: &Arc<ConstructorCache>) {
        self.constructor_caches.lock().push(Arc::downgrade(cache));
    }

    /// Track an entry point's equivalence-cache array for shape sweeps
    pub fn register_equivalence_set(&self, id: EntryPointId, set: &Arc<EquivalentTypeCacheSet>) {
        self.equivalence_sets.lock().insert(id, Arc::downgrade(set));
    }

    /// Stop sweeping an entry point's equivalence caches.
    ///
    /// Called when the entry point is torn down, and also when all of its
    /// caches go dead — fully-dead entry points should stop being visited on
    /// every future shape mutation.
    pub fn unregister_equivalence_set(&self, id: EntryPointId) {
        self.equivalence_sets.lock().remove(&id);
    }

    /// Whether an entry point is currently registered for shape sweeps
    pub fn has_equivalence_set(&self, id: EntryPointId) -> bool {
        self.equivalence_sets
            .lock()
            .get(&id)
            .is_some_and(|weak| weak.upgrade().is_some())
    }

    /// A shape mutated: fire constructor caches predicting it and drop it
    /// from every registered equivalence class. Returns how many
    /// constructor caches fired.
    pub fn invalidate_shape(&self, shape: ShapeId) -> usize {
        let mut fired = 0;
        self.constructor_caches.lock().retain(|weak| {
            let Some(cache) = weak.upgrade() else {
                return false;
            };
            if cache.predicted_shape_id() == Some(shape) {
                cache.invalidate();
                fired += 1;
            }
            true
        });

        self.equivalence_sets.lock().retain(|_, weak| {
            let Some(set) = weak.upgrade() else {
                return false;
            };
            set.invalidate_shape(shape);
            true
        });

        tracing::debug!(shape = shape.0, fired, "shape invalidated");
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use marten_vm_bytecode::CallSiteId;

    fn shape(id: u64) -> Arc<Shape> {
        Shape::new(ShapeId(id), 1)
    }

    #[test]
    fn property_invalidation_fires_all_registered_guards() {
        let registry = InvalidationRegistry::new();
        let s = shape(4);
        let a = PropertyGuard::new(PropertyId(1), &s);
        let b = PropertyGuard::new(PropertyId(1), &s);
        let other = PropertyGuard::new(PropertyId(2), &s);
        registry.register_property_guard(&a);
        registry.register_property_guard(&b);
        registry.register_property_guard(&other);

        assert_eq!(registry.invalidate_property(PropertyId(1)), 2);
        assert!(!a.is_live());
        assert!(!b.is_live());
        assert!(other.is_live());

        // Already fired and deregistered; nothing left to do.
        assert_eq!(registry.invalidate_property(PropertyId(1)), 0);
    }

    #[test]
    fn dropped_guards_do_not_count_as_fired() {
        let registry = InvalidationRegistry::new();
        let s = shape(4);
        let guard = PropertyGuard::new(PropertyId(9), &s);
        registry.register_property_guard(&guard);
        drop(guard);
        assert_eq!(registry.invalidate_property(PropertyId(9)), 0);
    }

    #[test]
    fn shape_invalidation_fires_matching_constructor_caches() {
        let registry = InvalidationRegistry::new();
        let predicted = shape(7);
        let unrelated = shape(8);
        let hit = ConstructorCache::new(CallSiteId(0), &predicted);
        let miss = ConstructorCache::new(CallSiteId(1), &unrelated);
        registry.register_constructor_cache(&hit);
        registry.register_constructor_cache(&miss);

        assert_eq!(registry.invalidate_shape(ShapeId(7)), 1);
        assert!(!hit.is_live());
        assert!(miss.is_live());
    }

    #[test]
    fn shape_invalidation_sweeps_equivalence_sets() {
        let registry = InvalidationRegistry::new();
        let set = Arc::new(EquivalentTypeCacheSet::new());
        let s = shape(3);
        set.cache(0).add_shape(&s);
        registry.register_equivalence_set(EntryPointId(1), &set);

        registry.invalidate_shape(ShapeId(3));
        assert!(!set.any_live());
        assert!(registry.has_equivalence_set(EntryPointId(1)));

        registry.unregister_equivalence_set(EntryPointId(1));
        assert!(!registry.has_equivalence_set(EntryPointId(1)));
    }
}
