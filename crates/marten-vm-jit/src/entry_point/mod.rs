//! Native entry-point lifecycle.
//!
//! A [`NativeEntryPoint`] owns one compiled native-code body: the raw code
//! buffer, the bailout record table, and every invalidation guard the code
//! depends on. It moves through four states:
//!
//! ```text
//! Compiling ──install──► Installed ──guard fires──► Invalidated
//!     │                      │                           │
//!     └──────────── cleanup ─┴───────────────────────────┴──► Freed
//! ```
//!
//! `Freed` during process shutdown skips releasing the raw code buffer: the
//! address space is about to be torn down wholesale, and touching it risks
//! use-after-unmap races with concurrent teardown of other structures.

mod guards;
mod registry;
mod transfer;

pub use guards::{
    ConstructorCache, EquivalentTypeCache, EquivalentTypeCacheSet, PropertyGuard, PropertyId,
    EQUIVALENT_TYPE_CACHE_SIZE,
};
pub use registry::InvalidationRegistry;
pub use transfer::{JitTransferData, PendingEquivalentTypeGuard};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use marten_vm_bytecode::{CallSiteId, FunctionId};

use crate::bailout::{BailoutRecord, BailoutSlotTable};
use crate::shape::Shape;

/// Unique identity of one entry point within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPointId(pub u64);

/// Address of native code (the buffer base or the stable thunk slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeAddress(pub usize);

/// Lifecycle state of an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPointState {
    /// Optimizer running; guards accumulating via transfer data
    Compiling,
    /// Native code attached and callable
    Installed,
    /// A guard fired; code is dead but metadata remains inspectable
    Invalidated,
    /// Code buffer released, guard registrations removed. Terminal.
    Freed,
}

/// An owned executable-code allocation.
///
/// Opaque bytes as far as this crate is concerned; emission happens
/// elsewhere.
#[derive(Debug)]
pub struct CodeAllocation {
    bytes: Box<[u8]>,
}

impl CodeAllocation {
    /// Take ownership of emitted code bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    /// Base address of the buffer
    pub fn address(&self) -> CodeAddress {
        CodeAddress(self.bytes.as_ptr() as usize)
    }

    /// Buffer size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Leak the buffer instead of freeing it (shutdown path).
    fn abandon(self) {
        std::mem::forget(self.bytes);
    }
}

/// One entry in the inlinee frame map: from this native offset onward (until
/// the next entry), execution is attributed to `function`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineeFrameEntry {
    /// First native code offset the entry covers
    pub code_offset: u32,
    /// Inlined function executing at that offset
    pub function: FunctionId,
}

static NEXT_ENTRY_POINT_ID: AtomicU64 = AtomicU64::new(1);

/// Owner of one compiled native-code body and everything attached to it.
#[derive(Debug)]
pub struct NativeEntryPoint {
    id: EntryPointId,
    function: FunctionId,
    state: EntryPointState,
    /// Stale-use detector: nonzero while the entry point is usable, zeroed
    /// on free.
    cookie: u32,
    code: Option<CodeAllocation>,
    thunk: Option<CodeAddress>,
    code_size: usize,
    records: Vec<Arc<BailoutRecord>>,
    slot_table: Option<Arc<BailoutSlotTable>>,
    inlinee_frames: Vec<InlineeFrameEntry>,
    property_guards: FxHashMap<PropertyId, Arc<PropertyGuard>>,
    constructor_caches: FxHashMap<CallSiteId, Arc<ConstructorCache>>,
    equivalent_type_caches: Option<Arc<EquivalentTypeCacheSet>>,
    transfer: Option<JitTransferData>,
}

impl NativeEntryPoint {
    /// Create an empty entry point for `function`; the optimizer starts
    /// attaching assumptions immediately.
    pub fn new(function: FunctionId) -> Self {
        let id = EntryPointId(NEXT_ENTRY_POINT_ID.fetch_add(1, Ordering::Relaxed));
        // Any nonzero value derived from the id works as a cookie; zero is
        // the freed state.
        let cookie = (id.0 as u32).wrapping_mul(0x9E37_79B9) | 1;
        Self {
            id,
            function,
            state: EntryPointState::Compiling,
            cookie,
            code: None,
            thunk: None,
            code_size: 0,
            records: Vec::new(),
            slot_table: None,
            inlinee_frames: Vec::new(),
            property_guards: FxHashMap::default(),
            constructor_caches: FxHashMap::default(),
            equivalent_type_caches: None,
            transfer: None,
        }
    }

    /// Process-unique identity
    pub fn id(&self) -> EntryPointId {
        self.id
    }

    /// The compiled function
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// Current lifecycle state
    pub fn state(&self) -> EntryPointState {
        self.state
    }

    /// The validation cookie; zero once freed
    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    /// Check a caller-held cookie against the live one
    pub fn validate_cookie(&self, cookie: u32) -> bool {
        self.cookie != 0 && self.cookie == cookie
    }

    /// Native code base address, while installed
    pub fn code_address(&self) -> Option<CodeAddress> {
        self.code.as_ref().map(CodeAllocation::address)
    }

    /// The stable indirection address other callers jump through.
    ///
    /// Callers bind to the thunk, not the buffer, so code can be swapped
    /// without patching every call site.
    pub fn thunk_address(&self) -> Option<CodeAddress> {
        self.thunk
    }

    /// Compiled code size in bytes
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    // -----------------------------------------------------------------------
    // Compiling-state mutation
    // -----------------------------------------------------------------------

    /// Lazily allocate the background-transfer staging area
    pub fn ensure_transfer_data(&mut self) -> &mut JitTransferData {
        self.transfer.get_or_insert_with(JitTransferData::new)
    }

    /// Drop the staging area (contents already installed or abandoned)
    pub fn free_transfer_data(&mut self) {
        self.transfer = None;
    }

    /// One-shot attachment of the finished code, its thunk, and its size.
    ///
    /// Invoked exactly once by the compilation pipeline when codegen
    /// finishes; a second attachment is a sequencing bug.
    pub fn record_native_code(&mut self, code: CodeAllocation, thunk: CodeAddress) {
        assert_eq!(
            self.state,
            EntryPointState::Compiling,
            "native code recorded outside compilation"
        );
        assert!(self.code.is_none(), "native code recorded twice");
        assert!(self.thunk.is_none(), "thunk recorded twice");
        self.code_size = code.len();
        self.code = Some(code);
        self.thunk = Some(thunk);
    }

    /// Attach the bailout records and slot table produced by the optimizer.
    pub fn set_bailout_metadata(
        &mut self,
        records: Vec<Arc<BailoutRecord>>,
        slot_table: Arc<BailoutSlotTable>,
    ) {
        debug_assert!(self.records.is_empty() && self.slot_table.is_none());
        self.records = records;
        self.slot_table = Some(slot_table);
    }

    /// Bailout record for one exit id
    pub fn bailout_record(&self, exit: usize) -> Option<&Arc<BailoutRecord>> {
        self.records.get(exit)
    }

    /// The function-wide bailout slot table
    pub fn slot_table(&self) -> Option<&Arc<BailoutSlotTable>> {
        self.slot_table.as_ref()
    }

    /// Append an inlinee frame map entry. Entries arrive in code order.
    pub fn push_inlinee_frame(&mut self, entry: InlineeFrameEntry) {
        debug_assert!(
            self.inlinee_frames
                .last()
                .is_none_or(|last| last.code_offset <= entry.code_offset),
            "inlinee frame map must be sorted by code offset"
        );
        self.inlinee_frames.push(entry);
    }

    /// Which function execution at `code_offset` is attributed to, for
    /// stack walking and reporting without a bailout. Falls back to the
    /// outer function before the first entry.
    pub fn inlinee_at(&self, code_offset: u32) -> FunctionId {
        let index = self
            .inlinee_frames
            .partition_point(|e| e.code_offset <= code_offset);
        index
            .checked_sub(1)
            .map(|i| self.inlinee_frames[i].function)
            .unwrap_or(self.function)
    }

    // -----------------------------------------------------------------------
    // Guard registration (register-or-reuse)
    // -----------------------------------------------------------------------

    /// Get or create the shared guard for `property`.
    ///
    /// One guard per (entry point, property): multiple speculative checks in
    /// the same body commonly guard the same assumption, and they all share
    /// the same slot by reference.
    pub fn register_shared_property_guard(
        &mut self,
        registry: &InvalidationRegistry,
        property: PropertyId,
        shape: &Arc<Shape>,
    ) -> Arc<PropertyGuard> {
        if let Some(existing) = self.property_guards.get(&property) {
            return Arc::clone(existing);
        }
        let guard = PropertyGuard::new(property, shape);
        registry.register_property_guard(&guard);
        self.property_guards.insert(property, Arc::clone(&guard));
        guard
    }

    /// Get or create the constructor cache for one `new` call site.
    pub fn register_constructor_cache(
        &mut self,
        registry: &InvalidationRegistry,
        site: CallSiteId,
        shape: &Arc<Shape>,
    ) -> Arc<ConstructorCache> {
        if let Some(existing) = self.constructor_caches.get(&site) {
            return Arc::clone(existing);
        }
        let cache = ConstructorCache::new(site, shape);
        registry.register_constructor_cache(&cache);
        self.constructor_caches.insert(site, Arc::clone(&cache));
        cache
    }

    /// Allocate the fixed-size equivalence-cache array once and register it
    /// for shape sweeps. Never resized.
    pub fn ensure_equivalent_type_caches(
        &mut self,
        registry: &InvalidationRegistry,
    ) -> &Arc<EquivalentTypeCacheSet> {
        let id = self.id;
        self.equivalent_type_caches.get_or_insert_with(|| {
            let set = Arc::new(EquivalentTypeCacheSet::new());
            registry.register_equivalence_set(id, &set);
            set
        })
    }

    /// Sweep every equivalence cache, dropping collected shapes. When none
    /// of them holds a live shape anymore the entry point unregisters from
    /// the sweep list — a dead entry point should not be visited on every
    /// future shape mutation.
    pub fn clear_equivalent_type_caches(&mut self, registry: &InvalidationRegistry) {
        let Some(set) = &self.equivalent_type_caches else {
            return;
        };
        for cache in set.caches() {
            cache.sweep_dead();
        }
        if !set.any_live() {
            registry.unregister_equivalence_set(self.id);
        }
    }

    // -----------------------------------------------------------------------
    // Installation / invalidation / teardown
    // -----------------------------------------------------------------------

    /// Install the finished entry point on the owning thread.
    ///
    /// Moves staged guard data out of the transfer area into the long-lived
    /// cache array, then drops the staging object. Publication of the record
    /// table happens here, as a single pointer hand-off; afterwards the
    /// records are immutable and read without locking during bailout.
    pub fn install(&mut self, registry: &InvalidationRegistry) {
        assert_eq!(
            self.state,
            EntryPointState::Compiling,
            "install from a non-compiling state"
        );
        assert!(self.code.is_some(), "install without native code");
        if let Some(mut transfer) = self.transfer.take() {
            if transfer.pending_equivalent_guard_count() > 0 {
                let set = Arc::clone(self.ensure_equivalent_type_caches(registry));
                transfer.install_into(&set);
            }
            // Keep-alives and raw guard bytes die with the staging object.
        }
        self.state = EntryPointState::Installed;
        tracing::debug!(
            entry_point = self.id.0,
            function = self.function.0,
            code_size = self.code_size,
            "entry point installed"
        );
    }

    /// A guard fired: the code is no longer callable, but metadata stays
    /// inspectable for diagnostics until cleanup.
    pub fn invalidate(&mut self) {
        if self.state == EntryPointState::Installed {
            self.state = EntryPointState::Invalidated;
            tracing::debug!(
                entry_point = self.id.0,
                function = self.function.0,
                "entry point invalidated"
            );
        }
    }

    /// Full teardown.
    ///
    /// Frees the transfer data, releases the code buffer (skipped on
    /// shutdown — the address space is about to disappear), clears bailout
    /// metadata, and unregisters guards. With `reset`, which may run
    /// concurrently on a background thread, shared collections are left
    /// alone: references are dropped and full clearing is deferred to the
    /// non-reset path.
    ///
    /// Idempotent: cleanup of a freed entry point is a no-op.
    pub fn cleanup(&mut self, registry: &InvalidationRegistry, is_shutdown: bool, reset: bool) {
        if self.state == EntryPointState::Freed {
            return;
        }

        self.free_transfer_data();

        if let Some(code) = self.code.take() {
            if is_shutdown {
                code.abandon();
            } else {
                drop(code);
            }
        }
        self.thunk = None;
        self.records.clear();
        self.slot_table = None;
        self.inlinee_frames.clear();
        self.equivalent_type_caches = None;

        if !reset {
            registry.unregister_equivalence_set(self.id);
            for guard in self.property_guards.values() {
                guard.invalidate();
            }
            self.property_guards.clear();
            for cache in self.constructor_caches.values() {
                cache.invalidate();
            }
            self.constructor_caches.clear();
        }

        self.state = EntryPointState::Freed;
        self.cookie = 0;
        tracing::debug!(
            entry_point = self.id.0,
            function = self.function.0,
            is_shutdown,
            reset,
            "entry point freed"
        );
    }
}
