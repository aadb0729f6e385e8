//! JIT bailout mechanism.
//!
//! When compiled code encounters a failed speculation (type guard, shape
//! guard, overflow check), it abandons native execution and hands control
//! back to the interpreter at an equivalent bytecode offset. This module
//! owns the data that makes that transfer exact: which interpreter-visible
//! values are live at each speculation point, where they sit in the native
//! frame, and how to rebuild the JavaScript call stack — including frames
//! that only exist because of inlining.
//!
//! # Bailout flow
//!
//! ```text
//! Compiled code:
//!   guard check
//!     ├─ holds → fast path continues
//!     └─ fails → return BAILOUT_SENTINEL, record id in the exit slot
//!
//! Runtime driver:
//!   result = call_compiled(...)
//!   if result == BAILOUT_SENTINEL:
//!     record = entry_point.bailout_record(exit_id)
//!     stats.record(reason, record)          // rejit accounting
//!     restore_frames(record, ...)           // materialize interpreter frames
//!     → interpreter resumes at record's bytecode offset
//! ```
//!
//! Bailout is a value-level control transfer, never an unwinding exception:
//! the restore protocol returns a [`Resumed`] token up to the dispatch loop.

mod info;
mod record;
mod restore;
mod stats;
mod table;

use crate::value::{Heap, Value};

pub use info::{BailoutInfo, PendingCall};
pub use record::{BailoutRecord, RecordKind};
pub use restore::{restore_frames, Interpreter, NativeFrame, Resumed};
pub use stats::{BailoutDisposition, BailoutStats};
pub use table::{BailoutPointId, BailoutSlotTable, SlotRow};

/// Interpreter-visible slot a restored value is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u16);

/// Machine register id inside the register save area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterId(pub u8);

/// How a live value is represented in the native frame.
///
/// Iterated at very high frequency during restore; kept as a one-byte
/// discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueRepr {
    /// Already a NaN-boxed value word
    Boxed,
    /// Unboxed 32-bit integer
    RawInt32,
    /// Unboxed 64-bit float
    RawFloat64,
    /// Two unboxed float64 lanes in consecutive slots
    SimdFloat64x2,
    /// Four unboxed int32 lanes in consecutive slots
    SimdInt32x4,
}

impl ValueRepr {
    /// Number of consecutive 64-bit native slots this representation spans
    #[inline]
    pub const fn slot_span(self) -> usize {
        match self {
            ValueRepr::Boxed | ValueRepr::RawInt32 | ValueRepr::RawFloat64 => 1,
            ValueRepr::SimdFloat64x2 | ValueRepr::SimdInt32x4 => 2,
        }
    }
}

/// Where one interpreter-visible value lives at a speculation point.
///
/// Every value live across the point has exactly one of these describing how
/// to recover its boxed form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CapturedValue {
    /// Value known at compile time; no native location
    Constant(Value),
    /// Value in a native stack slot
    StackSlot {
        /// Index into the native frame's spill area
        offset: u32,
        /// Representation at that location
        repr: ValueRepr,
    },
    /// Value in the register save area
    RegisterSlot {
        /// Saved register id
        reg: RegisterId,
        /// Representation in that register
        repr: ValueRepr,
    },
}

/// Why compiled code bailed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BailoutReason {
    /// Type guard failed (e.g., expected int32 but got string)
    TypeGuard,
    /// Object-shape guard failed
    ShapeGuard,
    /// Arithmetic overflow that couldn't be handled inline
    Overflow,
    /// Array/string bounds check failed
    BoundsCheck,
    /// Inline cache miss — unexpected property layout
    CacheMiss,
    /// Division by zero or other trap-avoidance exit
    DivByZero,
    /// Operation the compiled code does not handle at runtime
    UnsupportedOperation,
    /// Marked "always bail" instruction executed
    Explicit,
}

impl BailoutReason {
    /// Whether repeated bailouts for this reason should feed the rejit
    /// threshold (speculation was wrong, a different specialization might
    /// hold) as opposed to reasons that no recompilation can remove.
    #[inline]
    pub const fn triggers_rejit(&self) -> bool {
        matches!(
            self,
            Self::TypeGuard | Self::ShapeGuard | Self::CacheMiss
        )
    }
}

impl std::fmt::Display for BailoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TypeGuard => "type guard",
            Self::ShapeGuard => "shape guard",
            Self::Overflow => "overflow",
            Self::BoundsCheck => "bounds check",
            Self::CacheMiss => "cache miss",
            Self::DivByZero => "division by zero",
            Self::UnsupportedOperation => "unsupported operation",
            Self::Explicit => "explicit",
        };
        write!(f, "{name}")
    }
}

/// One bailout, driven end to end: rejit accounting, then frame restore.
///
/// Returns the interpreter's [`Resumed`] token together with the disposition
/// the stats layer chose for the owning function.
pub fn take_bailout<I: Interpreter, H: Heap>(
    reason: BailoutReason,
    record: &BailoutRecord,
    native: &NativeFrame<'_>,
    heap: &mut H,
    interp: &mut I,
    stats: &mut BailoutStats,
) -> (Resumed, BailoutDisposition) {
    let disposition = stats.record(reason, record);
    tracing::debug!(
        function = record.attributed_function().0,
        offset = record.resume_offset,
        depth = record.inline_depth(),
        %reason,
        ?disposition,
        "bailing out of compiled code"
    );
    let resumed = restore_frames(record, native, heap, interp);
    (resumed, disposition)
}

/// Recover one captured value from the native frame into boxed form.
pub(crate) fn recover_value<H: Heap>(
    captured: &CapturedValue,
    native: &NativeFrame<'_>,
    heap: &mut H,
) -> Value {
    match *captured {
        CapturedValue::Constant(v) => v,
        CapturedValue::StackSlot { offset, repr } => {
            box_native(native.read_stack(offset, repr.slot_span()), repr, heap)
        }
        CapturedValue::RegisterSlot { reg, repr } => {
            box_native(native.read_register(reg, repr.slot_span()), repr, heap)
        }
    }
}

fn box_native<H: Heap>(words: [u64; 2], repr: ValueRepr, heap: &mut H) -> Value {
    use crate::value::SimdValue;
    match repr {
        ValueRepr::Boxed => Value::from_bits(words[0]),
        ValueRepr::RawInt32 => Value::int32(words[0] as u32 as i32),
        ValueRepr::RawFloat64 => Value::float64(f64::from_bits(words[0])),
        ValueRepr::SimdFloat64x2 => {
            let lanes = [f64::from_bits(words[0]), f64::from_bits(words[1])];
            Value::heap(heap.alloc_simd(SimdValue::Float64x2(lanes)))
        }
        ValueRepr::SimdInt32x4 => {
            let lanes = [
                words[0] as u32 as i32,
                (words[0] >> 32) as u32 as i32,
                words[1] as u32 as i32,
                (words[1] >> 32) as u32 as i32,
            ];
            Value::heap(heap.alloc_simd(SimdValue::Int32x4(lanes)))
        }
    }
}
