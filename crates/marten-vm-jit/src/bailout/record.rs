//! Immutable bailout records.
//!
//! A [`BailoutRecord`] is the frozen, runtime-immutable counterpart of
//! [`BailoutInfo`](super::BailoutInfo): one per speculation point, shipped
//! with the compiled code. Records for inlined calls chain through `parent`
//! from the innermost inlined frame out to the top function, so the chain
//! length equals the inlining depth at that point.

use std::sync::Arc;

use marten_vm_bytecode::FunctionId;

use super::info::PendingCall;
use super::{CapturedValue, SlotId};
use crate::value::Value;

/// Record kind discriminant.
///
/// A tagged variant rather than a type hierarchy: restore logic dispatches on
/// the tag, and the flat layout copies across a process boundary without
/// pointer fixups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Ordinary speculation point
    Normal,
    /// Speculated branch; carries the offset for the untaken ("false") side
    Branch {
        /// Bytecode offset to resume at when the condition is falsy
        false_target: u32,
    },
    /// Reused across several native instructions that bail to one target.
    ///
    /// Carries the function the record logically belongs to, which differs
    /// from the executing function when the originating check was hoisted
    /// out of an inlined callee into its caller; rejit feedback must go to
    /// the owner.
    Shared {
        /// Function body the record is attributed to
        owner: FunctionId,
    },
}

/// The per-speculation-point restore description embedded in compiled code
/// metadata.
#[derive(Debug)]
pub struct BailoutRecord {
    /// Kind discriminant and kind-specific payload
    pub kind: RecordKind,
    /// Bytecode offset the interpreter resumes at
    pub resume_offset: u32,
    /// Function this record's frame belongs to
    pub function: FunctionId,
    /// Enclosing frame's record when this frame was inlined; `None` for the
    /// outermost frame
    pub parent: Option<Arc<BailoutRecord>>,
    /// Live interpreter-visible values and how to recover them
    pub(super) slots: Box<[(SlotId, CapturedValue)]>,
    /// In-flight call argument staging, outermost pending call first
    pub(super) pending_calls: Box<[PendingCall]>,
    /// Speculated branch condition (slot it belongs to + native location)
    pub(super) condition: Option<(SlotId, CapturedValue)>,
    /// Result computed natively before the bailout was recognized
    pub(super) return_value: Option<(SlotId, CapturedValue)>,
    /// Enclosing exception-handling region, when inside one
    pub exception_region: Option<u32>,
}

impl BailoutRecord {
    /// Number of inlined frames above this record's frame.
    ///
    /// Equals the parent chain length; zero for a non-inlined bailout.
    pub fn inline_depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent.as_deref();
        while let Some(record) = cursor {
            depth += 1;
            cursor = record.parent.as_deref();
        }
        depth
    }

    /// Walk the chain from this (innermost) record to the outermost.
    pub fn chain(&self) -> impl Iterator<Item = &BailoutRecord> {
        std::iter::successors(Some(self), |record| record.parent.as_deref())
    }

    /// The function rejit/profile feedback for this record belongs to.
    pub fn attributed_function(&self) -> FunctionId {
        match self.kind {
            RecordKind::Shared { owner } => owner,
            _ => self.function,
        }
    }

    /// The offset to resume at, given the restored branch condition.
    ///
    /// Non-branch records ignore the condition.
    pub fn resolve_resume_offset(&self, condition: Option<Value>) -> u32 {
        match (self.kind, condition) {
            (RecordKind::Branch { false_target }, Some(cond)) if !cond.is_truthy() => false_target,
            _ => self.resume_offset,
        }
    }

    /// Live-value descriptions for this record's frame.
    pub fn slots(&self) -> &[(SlotId, CapturedValue)] {
        &self.slots
    }

    /// Pending in-flight calls at this point.
    pub fn pending_calls(&self) -> &[PendingCall] {
        &self.pending_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bailout::BailoutInfo;

    fn record_for(function: u32, parent: Option<Arc<BailoutRecord>>) -> Arc<BailoutRecord> {
        let mut info = BailoutInfo::new(FunctionId(function), 8);
        if let Some(parent) = parent {
            info.set_parent(parent);
        }
        info.freeze()
    }

    #[test]
    fn chain_length_matches_inline_depth() {
        let outer = record_for(1, None);
        let mid = record_for(2, Some(Arc::clone(&outer)));
        let inner = record_for(3, Some(Arc::clone(&mid)));

        assert_eq!(outer.inline_depth(), 0);
        assert_eq!(mid.inline_depth(), 1);
        assert_eq!(inner.inline_depth(), 2);

        let functions: Vec<u32> = inner.chain().map(|r| r.function.0).collect();
        assert_eq!(functions, vec![3, 2, 1]);
    }

    #[test]
    fn shared_record_attributes_to_owner() {
        let mut info = BailoutInfo::new(FunctionId(5), 0);
        info.mark_shared(FunctionId(9));
        let record = info.freeze();
        assert_eq!(record.attributed_function(), FunctionId(9));

        let plain = record_for(5, None);
        assert_eq!(plain.attributed_function(), FunctionId(5));
    }

    #[test]
    fn branch_record_picks_side_by_truthiness() {
        let mut info = BailoutInfo::new(FunctionId(1), 40);
        info.capture_condition(
            SlotId(0),
            CapturedValue::Constant(Value::boolean(false)),
            52,
        );
        let record = info.freeze();

        assert_eq!(record.resolve_resume_offset(Some(Value::boolean(true))), 40);
        assert_eq!(
            record.resolve_resume_offset(Some(Value::boolean(false))),
            52
        );
        assert_eq!(record.resolve_resume_offset(Some(Value::int32(0))), 52);
    }
}
