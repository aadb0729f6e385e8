//! Invalidation guards.
//!
//! Three families of runtime assumptions a compiled body depends on:
//!
//! - **Property guards**: "this property's shape/slot has not changed".
//!   Shared per (entry point, property) because many checks in one body
//!   guard the same assumption.
//! - **Constructor caches**: per-`new`-site object-shape prediction.
//! - **Equivalent-type caches**: shape-equivalence classes, each entry
//!   independently invalidatable as shapes mutate.
//!
//! Guards are read lock-free from the compiled code's own check
//! instructions: the live/dead state is one aligned 64-bit word, and
//! invalidation is a single fire-once zeroing write. Shape identity is held
//! weakly so a guard never keeps a collected shape alive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use marten_vm_bytecode::CallSiteId;

use crate::shape::{Shape, ShapeId};

/// Identity of one property name in the runtime's property table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyId(pub u32);

/// Number of equivalence caches allocated per entry point. Fixed; the array
/// is never resized.
pub const EQUIVALENT_TYPE_CACHE_SIZE: usize = 8;

/// One shared property-shape assumption.
#[derive(Debug)]
pub struct PropertyGuard {
    property: PropertyId,
    /// Shape id the assumption was formed against; zero once fired. Read
    /// without synchronization by compiled code — a single aligned word,
    /// never observed torn.
    value: AtomicU64,
    shape: Weak<Shape>,
}

impl PropertyGuard {
    /// Create a guard for `property` against `shape`.
    pub fn new(property: PropertyId, shape: &Arc<Shape>) -> Arc<Self> {
        // Shape id zero is reserved as the fired state.
        debug_assert!(shape.id.0 != 0, "shape id 0 is reserved");
        Arc::new(Self {
            property,
            value: AtomicU64::new(shape.id.0),
            shape: Shape::downgrade(shape),
        })
    }

    /// The guarded property
    #[inline]
    pub fn property(&self) -> PropertyId {
        self.property
    }

    /// Lock-free check the compiled code performs
    #[inline]
    pub fn is_live(&self) -> bool {
        self.value.load(Ordering::Relaxed) != 0
    }

    /// The raw word compiled code compares against
    #[inline]
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Fire the guard. Monotonic: once zeroed it never revives.
    pub fn invalidate(&self) {
        self.value.store(0, Ordering::Relaxed);
    }

    /// The guarded shape, while the runtime still holds it
    pub fn shape(&self) -> Option<Arc<Shape>> {
        self.shape.upgrade()
    }
}

/// Per-`new`-call-site shape prediction.
#[derive(Debug)]
pub struct ConstructorCache {
    site: CallSiteId,
    /// Predicted shape id; zero once invalidated.
    value: AtomicU64,
    predicted: Weak<Shape>,
}

impl ConstructorCache {
    /// Create a cache predicting `shape` for `site`.
    pub fn new(site: CallSiteId, shape: &Arc<Shape>) -> Arc<Self> {
        debug_assert!(shape.id.0 != 0, "shape id 0 is reserved");
        Arc::new(Self {
            site,
            value: AtomicU64::new(shape.id.0),
            predicted: Shape::downgrade(shape),
        })
    }

    /// The `new` call site this cache belongs to
    #[inline]
    pub fn site(&self) -> CallSiteId {
        self.site
    }

    /// Whether the prediction still holds
    #[inline]
    pub fn is_live(&self) -> bool {
        self.value.load(Ordering::Relaxed) != 0
    }

    /// The predicted shape id, zero once invalidated
    #[inline]
    pub fn predicted_shape_id(&self) -> Option<ShapeId> {
        match self.value.load(Ordering::Relaxed) {
            0 => None,
            id => Some(ShapeId(id)),
        }
    }

    /// The predicted shape, while the runtime still holds it
    pub fn predicted_shape(&self) -> Option<Arc<Shape>> {
        self.predicted.upgrade()
    }

    /// Fire the cache. Monotonic.
    pub fn invalidate(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// One independently-invalidatable shape-equivalence class.
#[derive(Debug, Default)]
pub struct EquivalentTypeCache {
    shapes: Mutex<SmallVec<[Weak<Shape>; 4]>>,
}

impl EquivalentTypeCache {
    /// Add a shape to the equivalence class
    pub fn add_shape(&self, shape: &Arc<Shape>) {
        self.shapes.lock().push(Shape::downgrade(shape));
    }

    /// Drop any entry for `shape` (the shape mutated out of the class)
    pub fn invalidate_shape(&self, shape: ShapeId) {
        self.shapes
            .lock()
            .retain(|weak| weak.upgrade().is_none_or(|s| s.id != shape));
    }

    /// Whether any shape in the class is still live (not collected)
    pub fn has_live_shape(&self) -> bool {
        self.shapes.lock().iter().any(|weak| weak.upgrade().is_some())
    }

    /// Drop entries whose shapes were collected
    pub fn sweep_dead(&self) {
        self.shapes.lock().retain(|weak| weak.upgrade().is_some());
    }

    /// Drop everything
    pub fn clear(&self) {
        self.shapes.lock().clear();
    }
}

/// The fixed-size equivalence-cache array owned by one entry point.
#[derive(Debug)]
pub struct EquivalentTypeCacheSet {
    caches: [EquivalentTypeCache; EQUIVALENT_TYPE_CACHE_SIZE],
}

impl Default for EquivalentTypeCacheSet {
    fn default() -> Self {
        Self::new()
    }
}

impl EquivalentTypeCacheSet {
    /// Allocate the (empty) fixed-size array
    pub fn new() -> Self {
        Self {
            caches: std::array::from_fn(|_| EquivalentTypeCache::default()),
        }
    }

    /// One cache by index
    pub fn cache(&self, index: usize) -> &EquivalentTypeCache {
        &self.caches[index]
    }

    /// All caches
    pub fn caches(&self) -> &[EquivalentTypeCache] {
        &self.caches
    }

    /// Whether any cache still holds a live shape.
    ///
    /// Once this goes false the owning entry point has nothing left that a
    /// shape mutation could invalidate and can be unregistered from the
    /// sweep list.
    pub fn any_live(&self) -> bool {
        self.caches.iter().any(EquivalentTypeCache::has_live_shape)
    }

    /// Drop entries for `shape` in every cache
    pub fn invalidate_shape(&self, shape: ShapeId) {
        for cache in &self.caches {
            cache.invalidate_shape(shape);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(id: u64) -> Arc<Shape> {
        Shape::new(ShapeId(id), 1)
    }

    #[test]
    fn property_guard_fires_once() {
        let s = shape(11);
        let guard = PropertyGuard::new(PropertyId(3), &s);
        assert!(guard.is_live());
        assert_eq!(guard.value(), 11);

        guard.invalidate();
        assert!(!guard.is_live());
        assert_eq!(guard.value(), 0);

        // Firing again changes nothing.
        guard.invalidate();
        assert!(!guard.is_live());
    }

    #[test]
    fn constructor_cache_prediction_dies_with_shape() {
        let s = shape(5);
        let cache = ConstructorCache::new(CallSiteId(2), &s);
        assert_eq!(cache.predicted_shape_id(), Some(ShapeId(5)));
        assert!(cache.predicted_shape().is_some());

        drop(s);
        // The id survives as data; the shape itself is gone.
        assert!(cache.predicted_shape().is_none());

        cache.invalidate();
        assert_eq!(cache.predicted_shape_id(), None);
    }

    #[test]
    fn equivalence_cache_tracks_live_shapes() {
        let set = EquivalentTypeCacheSet::new();
        let a = shape(1);
        let b = shape(2);
        set.cache(0).add_shape(&a);
        set.cache(3).add_shape(&b);
        assert!(set.any_live());

        set.invalidate_shape(ShapeId(1));
        assert!(!set.cache(0).has_live_shape());
        assert!(set.any_live());

        drop(b);
        assert!(!set.any_live());
    }
}
