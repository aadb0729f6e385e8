//! Dynamic profile store
//!
//! Call-site and type observations recorded by the interpreter and consumed
//! read-only by the optimizer's inlining decider. Each call site follows the
//! same state ladder as an inline cache:
//!
//! ```text
//! Uninitialized ──► Monomorphic ──► Polymorphic (≤ 4 targets) ──► Megamorphic
//! ```
//!
//! Megamorphic sites report no candidates; the decider treats them as
//! uninlinable and leaves the call as a real call.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{CallSiteId, FunctionId};

/// Maximum number of distinct callee identities a polymorphic call site tracks.
pub const MAX_POLYMORPHIC_TARGETS: usize = 4;

/// Bitmask over a call site's arguments (bit `i` = argument `i`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgMask(pub u16);

impl ArgMask {
    /// Empty mask
    pub const NONE: ArgMask = ArgMask(0);

    /// Set the bit for one argument index
    #[inline]
    pub fn with_arg(self, index: u8) -> Self {
        ArgMask(self.0 | (1 << index))
    }

    /// Whether any argument in `self` also appears in `other`
    #[inline]
    pub fn intersects(self, other: ArgMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the mask is empty
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Value type observations at one profiled site (arguments, return values)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeObservations {
    /// Has seen undefined
    pub seen_undefined: bool,
    /// Has seen null
    pub seen_null: bool,
    /// Has seen boolean
    pub seen_boolean: bool,
    /// Has seen int32 (small integer)
    pub seen_int32: bool,
    /// Has seen number (float64)
    pub seen_float64: bool,
    /// Has seen string
    pub seen_string: bool,
    /// Has seen object
    pub seen_object: bool,
    /// Has seen function
    pub seen_function: bool,
}

impl TypeObservations {
    /// Observations for a site that only ever produced objects
    pub const OBJECT: TypeObservations = TypeObservations {
        seen_undefined: false,
        seen_null: false,
        seen_boolean: false,
        seen_int32: false,
        seen_float64: false,
        seen_string: false,
        seen_object: true,
        seen_function: false,
    };

    /// Observations for a site that only ever produced numbers
    pub const NUMBER: TypeObservations = TypeObservations {
        seen_undefined: false,
        seen_null: false,
        seen_boolean: false,
        seen_int32: true,
        seen_float64: true,
        seen_string: false,
        seen_object: false,
        seen_function: false,
    };

    fn count(&self) -> u8 {
        self.seen_undefined as u8
            + self.seen_null as u8
            + self.seen_boolean as u8
            + self.seen_int32 as u8
            + self.seen_float64 as u8
            + self.seen_string as u8
            + self.seen_object as u8
            + self.seen_function as u8
    }

    /// Check if exactly one type has been seen
    pub fn is_monomorphic(&self) -> bool {
        self.count() == 1
    }
}

/// What profiling observed about a monomorphic call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSiteInfo {
    /// The single callee identity observed
    pub callee: FunctionId,
    /// Whether the site is a `new` invocation
    pub is_constructor: bool,
    /// Whether the site has since gone polymorphic
    pub is_polymorphic: bool,
}

/// One callee identity observed at a polymorphic call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalleeCandidate {
    /// Observed callee
    pub callee: FunctionId,
    /// Whether the observation was a `new` invocation
    pub is_constructor: bool,
}

/// State of one profiled call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSiteState {
    /// No call observed yet
    Uninitialized,
    /// Single callee observed
    Monomorphic(CalleeCandidate),
    /// Multiple distinct callees observed (up to [`MAX_POLYMORPHIC_TARGETS`])
    Polymorphic {
        /// Number of valid entries (2..=4)
        count: u8,
        /// Observed callee identities
        entries: [CalleeCandidate; MAX_POLYMORPHIC_TARGETS],
    },
    /// Too many distinct callees; site no longer tracks identities
    Megamorphic,
}

impl Default for CallSiteState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

/// Per-site profile record
#[derive(Debug, Default)]
struct CallSiteRecord {
    state: CallSiteState,
    constant_args: ArgMask,
}

/// Dynamic profile for one function.
///
/// Recording happens on the interpreter thread; the optimizer reads through
/// shared references. Call-site records sit behind an `RwLock`, function-wide
/// flags are plain atomics.
#[derive(Debug)]
pub struct DynamicProfile {
    sites: RwLock<Vec<CallSiteRecord>>,
    has_polymorphic_field_access: AtomicBool,
    /// Arguments this function is known to branch on.
    branch_args: AtomicU16,
}

impl DynamicProfile {
    /// Create a profile with `call_site_count` uninitialized sites
    pub fn new(call_site_count: u16) -> Self {
        let mut sites = Vec::with_capacity(call_site_count as usize);
        sites.resize_with(call_site_count as usize, CallSiteRecord::default);
        Self {
            sites: RwLock::new(sites),
            has_polymorphic_field_access: AtomicBool::new(false),
            branch_args: AtomicU16::new(0),
        }
    }

    /// Number of profiled call sites
    pub fn call_site_count(&self) -> usize {
        self.sites.read().len()
    }

    // -----------------------------------------------------------------------
    // Recording (interpreter side)
    // -----------------------------------------------------------------------

    /// Record an observed call target at a site.
    ///
    /// Drives the Uninitialized → Monomorphic → Polymorphic → Megamorphic
    /// ladder. Repeat observations of a known target are no-ops.
    pub fn record_call_target(&self, site: CallSiteId, callee: FunctionId, is_constructor: bool) {
        let mut sites = self.sites.write();
        let Some(record) = sites.get_mut(site.0 as usize) else {
            return;
        };
        let seen = CalleeCandidate {
            callee,
            is_constructor,
        };
        record.state = match record.state {
            CallSiteState::Uninitialized => CallSiteState::Monomorphic(seen),
            CallSiteState::Monomorphic(existing) if existing.callee == callee => {
                CallSiteState::Monomorphic(existing)
            }
            CallSiteState::Monomorphic(existing) => {
                let mut entries = [existing; MAX_POLYMORPHIC_TARGETS];
                entries[1] = seen;
                CallSiteState::Polymorphic { count: 2, entries }
            }
            CallSiteState::Polymorphic { count, mut entries } => {
                if entries[..count as usize].iter().any(|e| e.callee == callee) {
                    CallSiteState::Polymorphic { count, entries }
                } else if (count as usize) < MAX_POLYMORPHIC_TARGETS {
                    entries[count as usize] = seen;
                    CallSiteState::Polymorphic {
                        count: count + 1,
                        entries,
                    }
                } else {
                    CallSiteState::Megamorphic
                }
            }
            CallSiteState::Megamorphic => CallSiteState::Megamorphic,
        };
    }

    /// Record that an argument at a site was a compile-time-known constant
    pub fn record_constant_arg(&self, site: CallSiteId, arg_index: u8) {
        let mut sites = self.sites.write();
        if let Some(record) = sites.get_mut(site.0 as usize) {
            record.constant_args = record.constant_args.with_arg(arg_index);
        }
    }

    /// Record that this function branches on one of its arguments
    pub fn record_branch_arg(&self, arg_index: u8) {
        self.branch_args
            .fetch_or(1 << arg_index, Ordering::Relaxed);
    }

    /// Record that the function's field accesses went polymorphic
    pub fn record_polymorphic_field_access(&self) {
        self.has_polymorphic_field_access
            .store(true, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Queries (optimizer side)
    // -----------------------------------------------------------------------

    /// Whether any call was observed at the site
    pub fn has_call_site_info(&self, site: CallSiteId) -> bool {
        !matches!(
            self.sites
                .read()
                .get(site.0 as usize)
                .map(|r| r.state)
                .unwrap_or_default(),
            CallSiteState::Uninitialized
        )
    }

    /// Monomorphic observation for a site, if any.
    ///
    /// A polymorphic site still answers with its first target but sets
    /// `is_polymorphic`; megamorphic and unobserved sites answer `None`.
    pub fn call_site_info(&self, site: CallSiteId) -> Option<CallSiteInfo> {
        match self.sites.read().get(site.0 as usize)?.state {
            CallSiteState::Monomorphic(c) => Some(CallSiteInfo {
                callee: c.callee,
                is_constructor: c.is_constructor,
                is_polymorphic: false,
            }),
            CallSiteState::Polymorphic { entries, .. } => Some(CallSiteInfo {
                callee: entries[0].callee,
                is_constructor: entries[0].is_constructor,
                is_polymorphic: true,
            }),
            _ => None,
        }
    }

    /// Candidate array for a polymorphic site (2..=4 entries), if any
    pub fn polymorphic_call_site_info(
        &self,
        site: CallSiteId,
    ) -> Option<Vec<CalleeCandidate>> {
        match self.sites.read().get(site.0 as usize)?.state {
            CallSiteState::Polymorphic { count, entries } => {
                Some(entries[..count as usize].to_vec())
            }
            _ => None,
        }
    }

    /// Bitmask of statically-known (constant) arguments at a site
    pub fn constant_arg_info(&self, site: CallSiteId) -> ArgMask {
        self.sites
            .read()
            .get(site.0 as usize)
            .map(|r| r.constant_args)
            .unwrap_or(ArgMask::NONE)
    }

    /// Arguments this function is known to branch on
    pub fn branch_arg_info(&self) -> ArgMask {
        ArgMask(self.branch_args.load(Ordering::Relaxed))
    }

    /// Whether the function's field accesses were observed polymorphic
    pub fn has_polymorphic_field_access(&self) -> bool {
        self.has_polymorphic_field_access.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_site_ladder_mono_to_poly_to_mega() {
        let profile = DynamicProfile::new(1);
        let site = CallSiteId(0);
        assert!(!profile.has_call_site_info(site));

        profile.record_call_target(site, FunctionId(10), false);
        let info = profile.call_site_info(site).expect("monomorphic info");
        assert_eq!(info.callee, FunctionId(10));
        assert!(!info.is_polymorphic);

        // Same target again stays monomorphic.
        profile.record_call_target(site, FunctionId(10), false);
        assert!(!profile.call_site_info(site).unwrap().is_polymorphic);

        for id in 11..14 {
            profile.record_call_target(site, FunctionId(id), false);
        }
        let candidates = profile
            .polymorphic_call_site_info(site)
            .expect("polymorphic candidates");
        assert_eq!(candidates.len(), 4);
        assert!(profile.call_site_info(site).unwrap().is_polymorphic);

        // Fifth distinct target tips the site megamorphic.
        profile.record_call_target(site, FunctionId(99), false);
        assert!(profile.call_site_info(site).is_none());
        assert!(profile.polymorphic_call_site_info(site).is_none());
        assert!(profile.has_call_site_info(site));
    }

    #[test]
    fn constant_and_branch_arg_masks_intersect() {
        let profile = DynamicProfile::new(2);
        profile.record_constant_arg(CallSiteId(1), 0);
        profile.record_constant_arg(CallSiteId(1), 2);
        profile.record_branch_arg(2);

        let constants = profile.constant_arg_info(CallSiteId(1));
        assert!(constants.intersects(profile.branch_arg_info()));
        assert!(profile.constant_arg_info(CallSiteId(0)).is_empty());
    }

    #[test]
    fn out_of_range_site_is_silent() {
        let profile = DynamicProfile::new(1);
        profile.record_call_target(CallSiteId(7), FunctionId(1), false);
        assert!(!profile.has_call_site_info(CallSiteId(7)));
    }

    #[test]
    fn polymorphic_field_access_flag() {
        let profile = DynamicProfile::new(0);
        assert!(!profile.has_polymorphic_field_access());
        profile.record_polymorphic_field_access();
        assert!(profile.has_polymorphic_field_access());
    }

    #[test]
    fn type_observations_monomorphic() {
        let mut obs = TypeObservations::default();
        obs.seen_int32 = true;
        assert!(obs.is_monomorphic());
        obs.seen_object = true;
        assert!(!obs.is_monomorphic());
    }
}
