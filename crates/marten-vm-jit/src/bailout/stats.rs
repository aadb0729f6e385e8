//! Bailout accounting.
//!
//! Counts bailouts per reason and per speculation site. A site that keeps
//! failing the same speculation is evidence the compiled code's assumptions
//! are wrong for this program: once a site crosses the threshold, the owning
//! function is flagged for re-optimization with the assumption relaxed.
//! Shared records attribute their counts to the function the check was
//! hoisted from, not the one executing.

use rustc_hash::FxHashMap;

use marten_vm_bytecode::FunctionId;

use super::record::BailoutRecord;
use super::BailoutReason;

/// Number of bailouts at one site before the owner is flagged for rejit.
pub const DEFAULT_REJIT_THRESHOLD: u32 = 10;

/// What the accounting layer decided about this bailout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BailoutDisposition {
    /// Keep the compiled code; this was an isolated failure
    Continue,
    /// The site crossed the threshold — recompile the owner with the
    /// failing assumption relaxed
    RequestRejit {
        /// Function to recompile
        function: FunctionId,
    },
}

/// Per-runtime bailout counters.
#[derive(Debug)]
pub struct BailoutStats {
    rejit_threshold: u32,
    by_reason: FxHashMap<BailoutReason, u64>,
    by_site: FxHashMap<(FunctionId, u32), u32>,
}

impl Default for BailoutStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BailoutStats {
    /// Create stats with the default rejit threshold
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_REJIT_THRESHOLD)
    }

    /// Create stats with a custom rejit threshold
    pub fn with_threshold(rejit_threshold: u32) -> Self {
        Self {
            rejit_threshold,
            by_reason: FxHashMap::default(),
            by_site: FxHashMap::default(),
        }
    }

    /// Record one bailout and decide its disposition.
    pub fn record(&mut self, reason: BailoutReason, record: &BailoutRecord) -> BailoutDisposition {
        *self.by_reason.entry(reason).or_insert(0) += 1;

        // Attribution follows the record, not the executing function: a
        // hoisted check's failures belong to the inlinee it came from.
        let owner = record.attributed_function();
        let site = (owner, record.resume_offset);
        let count = self.by_site.entry(site).or_insert(0);
        *count += 1;

        if reason.triggers_rejit() && *count >= self.rejit_threshold {
            BailoutDisposition::RequestRejit { function: owner }
        } else {
            BailoutDisposition::Continue
        }
    }

    /// Total bailouts recorded for one reason
    pub fn count_for_reason(&self, reason: BailoutReason) -> u64 {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }

    /// Bailouts recorded at one (function, offset) site
    pub fn count_for_site(&self, function: FunctionId, offset: u32) -> u32 {
        self.by_site.get(&(function, offset)).copied().unwrap_or(0)
    }
}
