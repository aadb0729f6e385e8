//! Inlining decision engine.
//!
//! Decides, call site by call site within one top function being compiled,
//! whether to speculatively inline the profiled callee. Every rejection is a
//! normal outcome — the call stays a real call — never an error.
//!
//! The acceptance gate is a layered ladder evaluated in a fixed order; the
//! ordering is load-bearing because later checks assume earlier ones passed:
//!
//! ```text
//! recursion / per-callee budget → asm.js → force flags
//!   → size gate (base bucket, leaf bonus, loop penalty,
//!                polymorphic penalty, constructor gate)
//!   → constant-argument escape hatch
//!   → final positive-threshold size check
//! ```
//!
//! Decisions are deterministic for a fixed profile and configuration: the
//! gate itself never mutates decider state, and the running counters only
//! move when a candidate is finally accepted.

mod builtins;
mod thresholds;

pub use builtins::{builtin_inline_kind, Builtin, BuiltinInlineKind, IntrinsicOp};
pub use thresholds::InlineThresholds;

use std::sync::Arc;

use marten_vm_bytecode::{
    ArgMask, CallSiteId, CalleeCandidate, FunctionBody, FunctionId, FunctionTable,
    MAX_POLYMORPHIC_TARGETS,
};

/// Phase and mode flags for one compilation.
#[derive(Debug, Clone, Copy)]
pub struct InlineFlags {
    /// Master switch for the inlining phase
    pub inline_phase_enabled: bool,
    /// Build-mode force-off; wins over everything else
    pub force_off: bool,
    /// Force acceptance past size gates and the global budget
    pub force_inline: bool,
    /// Allow inlining while compiling a standalone loop body
    pub loop_body_inlining: bool,
    /// Allow partial polymorphic inlining (inline the qualifying subset,
    /// real-call dispatch for the rest)
    pub partial_polymorphic: bool,
    /// Force constructor inlining past its size gate
    pub force_constructor_inlining: bool,
    /// A debugger is attached; inlined frames cannot be unwound precisely
    /// enough for stepping
    pub debugging: bool,
    /// This compilation is a standalone loop body, not a whole function
    pub loop_body_compile: bool,
}

impl Default for InlineFlags {
    fn default() -> Self {
        Self {
            inline_phase_enabled: true,
            force_off: false,
            force_inline: false,
            loop_body_inlining: true,
            partial_polymorphic: true,
            force_constructor_inlining: false,
            debugging: false,
            loop_body_compile: false,
        }
    }
}

/// Call-site facts one candidate is evaluated against.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallSiteFacts {
    /// The site is a `new` invocation
    pub is_constructor: bool,
    /// The site was observed polymorphic
    pub is_polymorphic: bool,
    /// Current direct-recursion inlining depth
    pub recursive_depth: u32,
    /// Profiled constant arguments at the site
    pub constant_args: ArgMask,
}

/// Per-compilation inlining decisions for one top function.
pub struct InliningDecider<'a> {
    top: &'a FunctionBody,
    functions: &'a FunctionTable,
    flags: InlineFlags,
    thresholds: InlineThresholds,
    /// Byte-code instructions inlined into the top function so far
    inlined_bytecode: u32,
    /// Accepted candidates that contain loops
    inlinees_with_loops: u32,
}

impl<'a> InliningDecider<'a> {
    /// Create a decider for compiling `top`.
    pub fn new(
        top: &'a FunctionBody,
        functions: &'a FunctionTable,
        flags: InlineFlags,
        thresholds: InlineThresholds,
    ) -> Self {
        Self {
            top,
            functions,
            flags,
            thresholds,
            inlined_bytecode: 0,
            inlinees_with_loops: 0,
        }
    }

    /// Byte-code instructions inlined into the top function so far.
    pub fn inlined_bytecode(&self) -> u32 {
        self.inlined_bytecode
    }

    /// Whether the top function is eligible for any inlining at all.
    ///
    /// Fails closed, with no side effects: phase disabled, build-mode
    /// force-off, or a try region in the top function (bailout generation
    /// across exception-handling regions is unsupported, so speculative
    /// inlining there is unsound).
    pub fn inline_into_top_func(&self) -> bool {
        if !self.flags.inline_phase_enabled || self.flags.force_off {
            return false;
        }
        if self.top.flags.has_try {
            return false;
        }
        true
    }

    /// Decide a monomorphic call site inside `inliner`.
    ///
    /// Returns the accepted callee's identity, or `None` to leave the call
    /// real. Acceptance — and only acceptance — advances the cumulative
    /// inlined-bytecode counter.
    pub fn inline_call_site(
        &mut self,
        inliner: &FunctionBody,
        site: CallSiteId,
        recursive_depth: u32,
    ) -> Option<FunctionId> {
        let profile = inliner.profile();
        let info = profile.call_site_info(site)?;
        if info.is_polymorphic {
            return None;
        }
        let candidate = Arc::clone(self.functions.get(info.callee)?);
        if !self.budget_allows() {
            tracing::debug!(
                top = self.top.id.0,
                callee = info.callee.0,
                "inlined-bytecode budget exhausted"
            );
            return None;
        }
        let facts = CallSiteFacts {
            is_constructor: info.is_constructor,
            is_polymorphic: false,
            recursive_depth,
            constant_args: profile.constant_arg_info(site),
        };
        if self.inline(inliner, &candidate, facts) {
            self.note_accepted(&candidate);
            Some(info.callee)
        } else {
            None
        }
    }

    /// Decide a polymorphic call site with up to four observed callees.
    ///
    /// Evaluates each candidate independently against the same acceptance
    /// rules, marking `accepted[i]` per candidate, and returns how many were
    /// accepted. If only a subset qualifies, partial polymorphic inlining
    /// proceeds only when enabled and not in a loop-body compile (loop-body
    /// rejit handling does not support partial-polymorphic bailouts);
    /// otherwise the whole site is rejected.
    pub fn inline_polymorphic_call_site(
        &mut self,
        inliner: &FunctionBody,
        site: CallSiteId,
        candidates: &[CalleeCandidate],
        accepted: &mut [bool],
    ) -> usize {
        debug_assert!(candidates.len() <= MAX_POLYMORPHIC_TARGETS);
        debug_assert!(accepted.len() >= candidates.len());
        accepted[..candidates.len()].fill(false);

        let constant_args = inliner.profile().constant_arg_info(site);
        let mut bodies: [Option<Arc<FunctionBody>>; MAX_POLYMORPHIC_TARGETS] =
            [const { None }; MAX_POLYMORPHIC_TARGETS];
        let mut count = 0;

        for (index, candidate) in candidates.iter().enumerate() {
            let Some(body) = self.functions.get(candidate.callee) else {
                continue;
            };
            let body = Arc::clone(body);
            if !self.budget_allows() {
                continue;
            }
            let facts = CallSiteFacts {
                is_constructor: candidate.is_constructor,
                is_polymorphic: true,
                recursive_depth: 0,
                constant_args,
            };
            if self.inline(inliner, &body, facts) {
                accepted[index] = true;
                bodies[index] = Some(body);
                count += 1;
            }
        }

        let partial = count > 0 && count < candidates.len();
        if partial && !(self.flags.partial_polymorphic && !self.flags.loop_body_compile) {
            tracing::debug!(
                top = self.top.id.0,
                site = site.0,
                accepted = count,
                of = candidates.len(),
                "partial polymorphic inlining unavailable, rejecting site"
            );
            accepted[..candidates.len()].fill(false);
            return 0;
        }

        for body in bodies.iter().flatten() {
            self.note_accepted(body);
        }
        count
    }

    /// The acceptance gate for one concrete candidate.
    ///
    /// Ordered, short-circuiting rejections first, then the heuristic gate.
    /// Never mutates decider state; identical inputs give identical answers.
    pub fn inline(
        &self,
        inliner: &FunctionBody,
        candidate: &FunctionBody,
        facts: CallSiteFacts,
    ) -> bool {
        // Loop-body compiles only inline when the mode allows it.
        if self.flags.loop_body_compile && !self.flags.loop_body_inlining {
            return false;
        }
        // Inlined frames cannot be unwound precisely enough for stepping.
        if self.flags.debugging {
            return false;
        }
        // Lazily-parsed candidate: no bytecode to inline yet.
        if candidate.flags.is_lazy {
            return false;
        }
        // Bailout generation across exception regions is unsupported.
        if candidate.flags.has_try {
            return false;
        }
        // Fixed-size argument relay at the machine level.
        if candidate.param_count > self.thresholds.max_inlinee_arg_count {
            return false;
        }
        // Zero parameters identifies the implicit global body.
        if candidate.is_global_body() {
            return false;
        }
        if candidate.flags.dont_inline {
            return false;
        }
        // A class constructor called without `new` is guaranteed to throw;
        // not worth inlining.
        if candidate.flags.is_class_constructor && !facts.is_constructor {
            return false;
        }

        let accepted = self.heuristic_gate(inliner, candidate, facts);
        tracing::trace!(
            top = self.top.id.0,
            inliner = inliner.id.0,
            candidate = candidate.id.0,
            size = candidate.countable_instruction_count,
            constructor = facts.is_constructor,
            polymorphic = facts.is_polymorphic,
            accepted,
            "inline decision"
        );
        accepted
    }

    /// The cost/heuristic gate. Evaluation order is load-bearing.
    fn heuristic_gate(
        &self,
        inliner: &FunctionBody,
        candidate: &FunctionBody,
        facts: CallSiteFacts,
    ) -> bool {
        // 1. Recursion control: direct recursion is accepted immediately up
        //    to the configured depth; everything else must still be within
        //    its own "can inline again" budget.
        if candidate.id == inliner.id {
            return facts.recursive_depth < self.thresholds.max_recursive_depth;
        }
        if !candidate.can_be_inlined_again(self.thresholds.max_times_inlined) {
            return false;
        }

        // 2. asm.js-mode functions are never inlined into or from.
        if candidate.flags.is_asm_js || self.top.flags.is_asm_js {
            return false;
        }

        // 3. Force flags short-circuit.
        if self.flags.force_off {
            return false;
        }
        if self.flags.force_inline {
            return true;
        }

        // 4./5. Size gate with contextual adjustments, then the final
        // positive-threshold check. The constant-argument escape hatch can
        // override either failing.
        let size_accepts = match self.size_gate(inliner, candidate, facts) {
            Some(threshold) => {
                threshold > 0 && candidate.countable_instruction_count as i32 <= threshold
            }
            None => false,
        };
        size_accepts || self.constant_arg_escape(candidate, facts.constant_args)
    }

    /// Compute the adjusted size threshold, or `None` when a category rule
    /// rejects outright.
    fn size_gate(
        &self,
        inliner: &FunctionBody,
        candidate: &FunctionBody,
        facts: CallSiteFacts,
    ) -> Option<i32> {
        let mut threshold = self.thresholds.base_threshold(
            inliner.countable_instruction_count,
            self.flags.loop_body_compile,
        );

        let has_loops = candidate.loop_count > 0;

        // Leaf bonus, capped by the loop-duplication budget.
        if candidate.is_leaf()
            && !facts.is_polymorphic
            && !facts.is_constructor
            && candidate.loop_count <= 2
            && self.inlinees_with_loops < self.thresholds.max_inlinees_with_loops
        {
            threshold = threshold.max(self.thresholds.leaf_threshold);
        }

        // Loop penalty.
        if has_loops {
            if self.thresholds.loop_threshold < 0
                || self.inlinees_with_loops >= self.thresholds.max_inlinees_with_loops
                || candidate.loop_count > 2
                || candidate.has_nested_loop
                || facts.is_constructor
            {
                return None;
            }
            threshold = threshold.min(self.thresholds.loop_threshold);
        }

        // Polymorphic penalty.
        if facts.is_polymorphic {
            if self.thresholds.polymorphic_threshold < 0 || facts.is_constructor {
                return None;
            }
            threshold = threshold.min(self.thresholds.polymorphic_threshold);
        }

        // Constructor gate: forced on, or profile-proven polymorphic field
        // access (per-call-site cloned runtime data makes it safe), or
        // within the constructor-specific size threshold.
        if facts.is_constructor {
            let within_size = self.thresholds.constructor_threshold >= 0
                && candidate.countable_instruction_count as i32
                    <= self.thresholds.constructor_threshold;
            if !(self.flags.force_constructor_inlining
                || candidate.profile().has_polymorphic_field_access()
                || within_size)
            {
                return None;
            }
            // The gate above is the constructor's size policy; an accepted
            // constructor bypasses the general size check.
            return Some(i32::MAX);
        }

        Some(threshold)
    }

    /// The independent escape hatch: a profiled-constant argument the callee
    /// is known to branch on, with the callee inside the looser
    /// constant-argument threshold, pays for itself through constant folding.
    fn constant_arg_escape(&self, candidate: &FunctionBody, constant_args: ArgMask) -> bool {
        constant_args.intersects(candidate.profile().branch_arg_info())
            && self.thresholds.constant_arg_threshold >= 0
            && candidate.countable_instruction_count as i32
                <= self.thresholds.constant_arg_threshold
    }

    /// Whether the global user-function budget still accepts candidates.
    /// Built-ins are a separate, always-considered category (see
    /// [`builtin_inline_kind`]).
    fn budget_allows(&self) -> bool {
        self.flags.force_inline || self.inlined_bytecode < self.thresholds.max_inlined_bytecode
    }

    /// Account for a finally-accepted candidate.
    fn note_accepted(&mut self, candidate: &FunctionBody) {
        self.inlined_bytecode = self
            .inlined_bytecode
            .saturating_add(candidate.countable_instruction_count);
        if candidate.loop_count > 0 {
            self.inlinees_with_loops += 1;
        }
        candidate.note_inlined();
    }
}
