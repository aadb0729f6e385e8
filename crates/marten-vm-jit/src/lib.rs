//! # Marten VM JIT
//!
//! The adaptive execution core for hot bytecode functions: bailout records
//! and the interpreter-restore protocol, the inlining decision engine, and
//! the native entry-point lifecycle with its invalidation guards.
//!
//! Machine-code emission itself lives elsewhere; this crate owns the data
//! that surrounds it — what a speculation point must capture, which call
//! sites get speculatively inlined, and when a compiled body and its guards
//! are created, shared, invalidated, and freed.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bailout;
pub mod entry_point;
pub mod inline;
pub mod shape;
pub mod value;

pub use bailout::{
    restore_frames, take_bailout, BailoutInfo, BailoutPointId, BailoutReason, BailoutRecord,
    BailoutSlotTable, BailoutStats, CapturedValue, Interpreter, NativeFrame, RecordKind,
    RegisterId, Resumed, SlotId, ValueRepr,
};
pub use entry_point::{
    CodeAddress, CodeAllocation, EntryPointId, EntryPointState, InvalidationRegistry,
    JitTransferData, NativeEntryPoint, PropertyGuard, PropertyId,
};
pub use inline::{
    builtin_inline_kind, Builtin, BuiltinInlineKind, CallSiteFacts, InlineFlags, InlineThresholds,
    InliningDecider, IntrinsicOp,
};
pub use shape::{Shape, ShapeId};
pub use value::{Heap, HeapIndex, Value, BAILOUT_SENTINEL};
