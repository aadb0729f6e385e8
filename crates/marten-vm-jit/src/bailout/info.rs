//! Mutable bailout descriptions built during optimization.
//!
//! The optimizer creates one [`BailoutInfo`] per speculation point as it
//! places checks, filling in captured values as liveness and final stack
//! layout become known. Once layout is final the info is frozen into an
//! immutable [`BailoutRecord`] and discarded — the record is what ships with
//! the compiled code.

use std::sync::Arc;

use marten_vm_bytecode::FunctionId;
use smallvec::SmallVec;

use super::record::{BailoutRecord, RecordKind};
use super::{CapturedValue, SlotId};

/// Argument staging for one in-flight call.
///
/// On targets where call arguments are pushed incrementally, a bailout can
/// land between the call setup and the call itself. The record keeps the
/// declared argument count plus however many arguments had been staged, so
/// the interpreter can still complete the call.
#[derive(Debug, Clone)]
pub struct PendingCall {
    /// Argument count the call setup declared
    pub declared_arg_count: u16,
    /// Arguments staged so far, in push order
    pub staged: SmallVec<[CapturedValue; 4]>,
}

impl PendingCall {
    fn new(declared_arg_count: u16) -> Self {
        Self {
            declared_arg_count,
            staged: SmallVec::new(),
        }
    }
}

/// Builder for one speculation point's restore description.
#[derive(Debug)]
pub struct BailoutInfo {
    function: FunctionId,
    resume_offset: u32,
    kind: RecordKind,
    locals: SmallVec<[(SlotId, CapturedValue); 8]>,
    pending_calls: Vec<PendingCall>,
    condition: Option<(SlotId, CapturedValue)>,
    return_value: Option<(SlotId, CapturedValue)>,
    exception_region: Option<u32>,
    parent: Option<Arc<BailoutRecord>>,
}

impl BailoutInfo {
    /// Start describing a speculation point in `function` resuming at
    /// `resume_offset`.
    pub fn new(function: FunctionId, resume_offset: u32) -> Self {
        Self {
            function,
            resume_offset,
            kind: RecordKind::Normal,
            locals: SmallVec::new(),
            pending_calls: Vec::new(),
            condition: None,
            return_value: None,
            exception_region: None,
            parent: None,
        }
    }

    /// Describe one live local/temporary.
    ///
    /// Each slot must be captured exactly once; a second capture for the
    /// same slot is a compiler bug.
    pub fn capture_local(&mut self, slot: SlotId, value: CapturedValue) -> &mut Self {
        debug_assert!(
            self.locals.iter().all(|(s, _)| *s != slot),
            "slot {slot:?} captured twice"
        );
        self.locals.push((slot, value));
        self
    }

    /// Begin staging an in-flight call with `declared_arg_count` arguments.
    pub fn start_call(&mut self, declared_arg_count: u16) -> &mut Self {
        self.pending_calls.push(PendingCall::new(declared_arg_count));
        self
    }

    /// Stage one outgoing argument for the most recent pending call.
    pub fn capture_arg_out(&mut self, value: CapturedValue) -> &mut Self {
        let call = self
            .pending_calls
            .last_mut()
            .expect("capture_arg_out without start_call");
        debug_assert!(
            (call.staged.len() as u16) < call.declared_arg_count,
            "more arguments staged than the call declared"
        );
        call.staged.push(value);
        self
    }

    /// Mark this point as a speculated branch: capture the condition's
    /// location and the offset of the untaken side.
    pub fn capture_condition(
        &mut self,
        slot: SlotId,
        value: CapturedValue,
        false_target: u32,
    ) -> &mut Self {
        self.kind = RecordKind::Branch { false_target };
        self.condition = Some((slot, value));
        self
    }

    /// Record a result computed natively before the bailout was recognized;
    /// restore honors it instead of re-running the computation.
    pub fn capture_return_value(&mut self, slot: SlotId, value: CapturedValue) -> &mut Self {
        self.return_value = Some((slot, value));
        self
    }

    /// Mark the record as shared across native instructions, attributed to
    /// `owner` for rejit feedback.
    pub fn mark_shared(&mut self, owner: FunctionId) -> &mut Self {
        debug_assert!(
            !matches!(self.kind, RecordKind::Branch { .. }),
            "a branch record cannot be shared"
        );
        self.kind = RecordKind::Shared { owner };
        self
    }

    /// Note the enclosing exception-handling region.
    pub fn set_exception_region(&mut self, region: u32) -> &mut Self {
        self.exception_region = Some(region);
        self
    }

    /// Link the enclosing frame's record (set when this frame was inlined).
    pub fn set_parent(&mut self, parent: Arc<BailoutRecord>) -> &mut Self {
        self.parent = Some(parent);
        self
    }

    /// Freeze into the immutable record that ships with compiled code.
    ///
    /// Consumes the info; the builder is not reusable once layout is final.
    pub fn freeze(self) -> Arc<BailoutRecord> {
        Arc::new(BailoutRecord {
            kind: self.kind,
            resume_offset: self.resume_offset,
            function: self.function,
            parent: self.parent,
            slots: self.locals.into_vec().into_boxed_slice(),
            pending_calls: self.pending_calls.into_boxed_slice(),
            condition: self.condition,
            return_value: self.return_value,
            exception_region: self.exception_region,
        })
    }
}
