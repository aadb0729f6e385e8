//! Cross-component lifecycle test: an entry point goes from compilation to
//! teardown with its guards wired through the invalidation registry.

use std::sync::Arc;

use marten_vm_bytecode::{CallSiteId, FunctionId};
use marten_vm_jit::bailout::{BailoutInfo, BailoutSlotTable};
use marten_vm_jit::entry_point::{
    CodeAddress, CodeAllocation, EntryPointState, InvalidationRegistry, NativeEntryPoint,
    PropertyId,
};
use marten_vm_jit::shape::{Shape, ShapeId};

#[test]
fn guard_fire_invalidates_and_cleanup_tears_down() {
    let registry = InvalidationRegistry::new();
    let function = FunctionId(7);
    let mut ep = NativeEntryPoint::new(function);

    // Compiling: assumptions accumulate.
    let shape = Shape::new(ShapeId(21), 3);
    let guard = ep.register_shared_property_guard(&registry, PropertyId(4), &shape);
    let ctor_cache = ep.register_constructor_cache(&registry, CallSiteId(0), &shape);
    ep.ensure_transfer_data()
        .add_equivalent_type_guard(0, vec![Arc::clone(&shape)]);

    let record = BailoutInfo::new(function, 12).freeze();
    ep.set_bailout_metadata(
        vec![Arc::clone(&record)],
        Arc::new(BailoutSlotTable::new(function)),
    );

    // Install: code attached once, staged guards move into the cache array.
    ep.record_native_code(CodeAllocation::new(vec![0x90, 0x90, 0xC3]), CodeAddress(0x7000));
    ep.install(&registry);
    assert_eq!(ep.state(), EntryPointState::Installed);
    assert!(ep.code_address().is_some());
    assert!(guard.is_live());

    // Another script thread adds a property: the guard fires through the
    // registry with a single zeroing write, and the owning thread discards
    // the code.
    let fired = registry.invalidate_property(PropertyId(4));
    assert_eq!(fired, 1);
    assert!(!guard.is_live());
    ep.invalidate();
    assert_eq!(ep.state(), EntryPointState::Invalidated);

    // Metadata stays inspectable while invalidated.
    assert!(ep.bailout_record(0).is_some());
    assert_eq!(ep.inlinee_at(0), function);

    // Teardown unregisters everything; a second cleanup is a no-op.
    ep.cleanup(&registry, false, false);
    assert_eq!(ep.state(), EntryPointState::Freed);
    assert!(!ctor_cache.is_live());
    assert!(!registry.has_equivalence_set(ep.id()));
    ep.cleanup(&registry, false, false);
    assert_eq!(ep.state(), EntryPointState::Freed);
}

#[test]
fn abandoned_compilation_never_leaves_compiling() {
    let registry = InvalidationRegistry::new();
    let mut ep = NativeEntryPoint::new(FunctionId(9));
    let shape = Shape::new(ShapeId(30), 1);
    ep.ensure_transfer_data()
        .add_keep_alive_shape(Arc::clone(&shape));

    // Background compilation abandoned: staging data is dropped without
    // installation and the orphan is freed directly.
    assert_eq!(ep.state(), EntryPointState::Compiling);
    ep.free_transfer_data();
    ep.cleanup(&registry, false, false);
    assert_eq!(ep.state(), EntryPointState::Freed);
}
