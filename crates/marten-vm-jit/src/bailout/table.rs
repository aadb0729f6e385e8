//! Function-wide bailout slot table.
//!
//! Many speculation points in one function share the same live-value layout.
//! Storing a full slot table per point would be quadratic in function size,
//! so rows carry `[start, end]` validity ranges over monotonically increasing
//! speculation-point ids: one row says "between points `start` and `end`,
//! interpreter slot S lives at native offset O with representation R".
//!
//! Rows are sorted by `start`, which bounds both traversal modes: a covering
//! scan stops as soon as `row.start` passes the query id.

use marten_vm_bytecode::FunctionId;

use super::{NativeFrame, SlotId, ValueRepr};
use crate::value::Value;

/// Identity of one speculation point within a function, assigned in
/// monotonically increasing order by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BailoutPointId(pub u32);

/// One row: a live-range of speculation points over which a slot's native
/// location is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRow {
    /// First speculation point the row covers
    pub start: u32,
    /// Last speculation point the row covers (inclusive)
    pub end: u32,
    /// Interpreter-visible slot the value belongs to
    pub slot: SlotId,
    /// Representation at the native location
    pub repr: ValueRepr,
    /// Index into the native frame's spill area
    pub stack_offset: u32,
}

/// Offset-sorted table of slot rows for one compiled function.
#[derive(Debug)]
pub struct BailoutSlotTable {
    function: FunctionId,
    rows: Vec<SlotRow>,
}

impl BailoutSlotTable {
    /// Create an empty table for `function`
    pub fn new(function: FunctionId) -> Self {
        Self {
            function,
            rows: Vec::new(),
        }
    }

    /// The function this table belongs to
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// Append a row. Rows must be pushed in nondecreasing `start` order;
    /// the optimizer emits them that way and lookups depend on it.
    pub fn push_row(&mut self, row: SlotRow) {
        debug_assert!(row.start <= row.end, "row range inverted");
        debug_assert!(
            self.rows.last().is_none_or(|last| last.start <= row.start),
            "rows must be sorted by start"
        );
        self.rows.push(row);
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Visit every row whose range covers `point` — the restore traversal.
    ///
    /// Sortedness bounds the scan: iteration stops at the first row with
    /// `start > point`.
    pub fn visit_rows_covering(&self, point: BailoutPointId, mut visit: impl FnMut(&SlotRow)) {
        for row in &self.rows {
            if row.start > point.0 {
                break;
            }
            if point.0 <= row.end {
                visit(row);
            }
        }
    }

    /// Visit only rows that start exactly at `point`.
    ///
    /// Used once per compiled function, at its first bailout, to seed
    /// GC-root tracking for the register save area.
    pub fn visit_rows_starting_at(&self, point: BailoutPointId, mut visit: impl FnMut(&SlotRow)) {
        let first = self.rows.partition_point(|row| row.start < point.0);
        for row in &self.rows[first..] {
            if row.start != point.0 {
                break;
            }
            visit(row);
        }
    }

    /// Report every boxed (GC-visible) value rooted by rows starting at
    /// `point`, reading its current word out of the native frame.
    pub fn seed_gc_roots(
        &self,
        point: BailoutPointId,
        native: &NativeFrame<'_>,
        mut report: impl FnMut(SlotId, Value),
    ) {
        self.visit_rows_starting_at(point, |row| {
            if row.repr == ValueRepr::Boxed {
                let words = native.read_stack(row.stack_offset, 1);
                report(row.slot, Value::from_bits(words[0]));
            }
        });
    }
}
