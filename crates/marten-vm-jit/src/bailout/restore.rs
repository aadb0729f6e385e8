//! The restore protocol.
//!
//! Turns a bailout record chain plus a snapshot of the native frame into
//! fully materialized interpreter frames, then hands control to the
//! interpreter's dispatch loop. Restoration is synchronous and not
//! cancellable: once triggered it runs to completion — partial restoration
//! is never a valid state.
//!
//! Frames are materialized innermost-first (the innermost record is where
//! execution actually was), but the call stack handed to the interpreter is
//! ordered outermost-first, so the dispatch loop re-enters at the top
//! function and immediately falls into the already-materialized inner
//! frames. That is what makes inlined-call bailout cheap: only the tail of
//! execution re-runs.

use smallvec::SmallVec;

use marten_vm_bytecode::FunctionId;

use super::record::BailoutRecord;
use super::{recover_value, SlotId};
use crate::value::{Heap, Value};

/// Snapshot of one native frame at a bailout: the register save area and the
/// spill slots, as 64-bit words.
///
/// All frames in one record chain share a single physical native frame; the
/// per-record slot tables index into this one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct NativeFrame<'a> {
    /// Register save area, indexed by [`RegisterId`](super::RegisterId)
    pub registers: &'a [u64],
    /// Spill area, indexed by stack offset
    pub stack: &'a [u64],
}

impl NativeFrame<'_> {
    /// Read `span` consecutive words from the register save area.
    pub(super) fn read_register(&self, reg: super::RegisterId, span: usize) -> [u64; 2] {
        Self::read(self.registers, reg.0 as usize, span)
    }

    /// Read `span` consecutive words from the spill area.
    pub(super) fn read_stack(&self, offset: u32, span: usize) -> [u64; 2] {
        Self::read(self.stack, offset as usize, span)
    }

    fn read(area: &[u64], index: usize, span: usize) -> [u64; 2] {
        // A slot outside the snapshot means the record's layout does not
        // match the frame it is being applied to — a compiler bug, not a
        // recoverable condition.
        debug_assert!(
            index + span <= area.len(),
            "native slot {index}+{span} out of range ({})",
            area.len()
        );
        let mut words = [0u64; 2];
        words[..span].copy_from_slice(&area[index..index + span]);
        words
    }
}

/// Proof that control was handed to the interpreter's dispatch loop.
///
/// [`Interpreter::resume_at`] is the only way to obtain one, so the restore
/// path cannot forget the final transfer.
#[derive(Debug, PartialEq, Eq)]
pub struct Resumed;

/// The interpreter, as the restore protocol sees it.
///
/// Three operations: make a frame, fill its slots, resume. Tests drive the
/// protocol with a recording fake; the real interpreter maps these onto its
/// frame stack.
pub trait Interpreter {
    /// An interpreter stack frame under construction
    type Frame;

    /// Allocate/obtain a frame for one invocation of `function`
    fn create_frame(&mut self, function: FunctionId) -> Self::Frame;

    /// Write one restored local into a frame
    fn set_local(&mut self, frame: &mut Self::Frame, slot: SlotId, value: Value);

    /// Write one restored outgoing argument into a frame's call-staging
    /// area: `call_index` is the pending call (outermost first),
    /// `arg_index` the argument's position within it
    fn stage_argument(
        &mut self,
        frame: &mut Self::Frame,
        call_index: u16,
        arg_index: u16,
        value: Value,
    );

    /// Hand control to the dispatch loop: `frames` are ordered
    /// outermost-first, and execution resumes in the innermost frame at
    /// `offset`. Never "fails" — a bailout cannot be aborted midway.
    fn resume_at(&mut self, frames: Vec<Self::Frame>, offset: u32) -> Resumed;
}

/// Materialize every frame described by `record`'s chain and resume the
/// interpreter.
///
/// The per-value restore step converts each native location to boxed form:
/// raw int32 becomes a tagged integer, raw float64 a (NaN-canonicalized)
/// number, boxed references copy as-is, and SIMD lane groups box through the
/// heap.
pub fn restore_frames<I: Interpreter, H: Heap>(
    record: &BailoutRecord,
    native: &NativeFrame<'_>,
    heap: &mut H,
    interp: &mut I,
) -> Resumed {
    // Innermost record first: that is where execution actually was, and the
    // materialization order tests observe.
    let mut frames: SmallVec<[I::Frame; 4]> = SmallVec::new();
    let mut condition_value = None;

    for link in record.chain() {
        let mut frame = interp.create_frame(link.function);

        for (slot, captured) in link.slots() {
            let value = recover_value(captured, native, heap);
            interp.set_local(&mut frame, *slot, value);
        }

        // Reconstruct argument lists for calls that were in flight, so an
        // un-inlined or abandoned call can still be completed.
        for (call_index, call) in link.pending_calls().iter().enumerate() {
            for (arg_index, captured) in call.staged.iter().enumerate() {
                let value = recover_value(captured, native, heap);
                interp.stage_argument(&mut frame, call_index as u16, arg_index as u16, value);
            }
        }

        if let Some((slot, captured)) = &link.condition {
            let value = recover_value(captured, native, heap);
            interp.set_local(&mut frame, *slot, value);
            if std::ptr::eq(link, record) {
                condition_value = Some(value);
            }
        }

        // A result computed natively before the bailout was recognized is
        // honored rather than re-executed.
        if let Some((slot, captured)) = &link.return_value {
            let value = recover_value(captured, native, heap);
            interp.set_local(&mut frame, *slot, value);
        }

        frames.push(frame);
    }

    let offset = record.resolve_resume_offset(condition_value);
    tracing::trace!(
        frames = frames.len(),
        offset,
        "restored interpreter frames"
    );

    // The dispatch loop wants the call stack outermost-first.
    let mut frames = frames.into_vec();
    frames.reverse();
    interp.resume_at(frames, offset)
}
