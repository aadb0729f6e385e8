//! Function bytecode metadata

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::profile::DynamicProfile;
use crate::FunctionId;

/// Structural function flags fixed at bytecode-generation time.
///
/// Each flag independently gates one optimizer decision; none of them change
/// after the function body is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFlags {
    /// Body contains a try/catch/finally region
    pub has_try: bool,
    /// Body contains at least one call instruction
    pub has_calls: bool,
    /// Is a class constructor (throws when called without `new`)
    pub is_class_constructor: bool,
    /// Bytecode has not been generated yet (lazily parsed)
    pub is_lazy: bool,
    /// Compiled under asm.js validation rules
    pub is_asm_js: bool,
    /// Explicitly excluded from inlining
    pub dont_inline: bool,
}

/// A bytecode function's optimizer-visible metadata.
///
/// The instruction stream itself lives with the interpreter; the optimizer
/// only needs counts, loop facts, and flags, plus the dynamic profile the
/// interpreter fills in as the function runs.
#[derive(Debug)]
pub struct FunctionBody {
    /// Function identity within the runtime
    pub id: FunctionId,

    /// Function name (empty for anonymous)
    pub name: Option<String>,

    /// Number of declared parameters (not including rest).
    ///
    /// Zero parameters identifies the implicit global/top-level body, which
    /// is never an inlining candidate.
    pub param_count: u8,

    /// Number of interpreter-visible local slots
    pub local_count: u16,

    /// Total byte-code instruction count
    pub instruction_count: u32,

    /// Instruction count excluding no-op padding instructions.
    ///
    /// This is the count inlining thresholds compare against.
    pub countable_instruction_count: u32,

    /// Number of loops in the body
    pub loop_count: u16,

    /// Whether any loop contains another loop
    pub has_nested_loop: bool,

    /// Structural flags
    pub flags: FunctionFlags,

    /// How many times this body has been inlined into other functions.
    ///
    /// Bounds code growth: a body inlined too many times elsewhere stops
    /// being an inlining candidate.
    times_inlined: AtomicU32,

    /// Dynamic profile recorded by the interpreter
    profile: DynamicProfile,
}

impl FunctionBody {
    /// Create a new function body builder
    pub fn builder(id: FunctionId) -> FunctionBodyBuilder {
        FunctionBodyBuilder::new(id)
    }

    /// Get the function name or `<anonymous>`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// The dynamic profile for this function
    #[inline]
    pub fn profile(&self) -> &DynamicProfile {
        &self.profile
    }

    /// Whether this body is the implicit global/top-level function
    #[inline]
    pub fn is_global_body(&self) -> bool {
        self.param_count == 0
    }

    /// Whether this body makes no calls of its own
    #[inline]
    pub fn is_leaf(&self) -> bool {
        !self.flags.has_calls
    }

    /// How many times this body has been inlined elsewhere
    #[inline]
    pub fn times_inlined(&self) -> u32 {
        self.times_inlined.load(Ordering::Relaxed)
    }

    /// Record that this body was inlined into another function
    #[inline]
    pub fn note_inlined(&self) {
        self.times_inlined.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the per-body inlining budget still permits another copy
    #[inline]
    pub fn can_be_inlined_again(&self, max_times_inlined: u32) -> bool {
        self.times_inlined() < max_times_inlined
    }
}

/// Builder for creating function bodies
#[derive(Debug)]
pub struct FunctionBodyBuilder {
    id: FunctionId,
    name: Option<String>,
    param_count: u8,
    local_count: u16,
    instruction_count: u32,
    countable_instruction_count: Option<u32>,
    loop_count: u16,
    has_nested_loop: bool,
    flags: FunctionFlags,
    call_site_count: u16,
}

impl FunctionBodyBuilder {
    /// Create a new builder for the given function id
    pub fn new(id: FunctionId) -> Self {
        Self {
            id,
            name: None,
            param_count: 0,
            local_count: 0,
            instruction_count: 0,
            countable_instruction_count: None,
            loop_count: 0,
            has_nested_loop: false,
            flags: FunctionFlags::default(),
            call_site_count: 0,
        }
    }

    /// Set function name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set parameter count
    pub fn param_count(mut self, count: u8) -> Self {
        self.param_count = count;
        self
    }

    /// Set local slot count
    pub fn local_count(mut self, count: u16) -> Self {
        self.local_count = count;
        self
    }

    /// Set total instruction count
    pub fn instruction_count(mut self, count: u32) -> Self {
        self.instruction_count = count;
        self
    }

    /// Set the instruction count excluding no-op padding.
    ///
    /// Defaults to the total instruction count when not set.
    pub fn countable_instruction_count(mut self, count: u32) -> Self {
        self.countable_instruction_count = Some(count);
        self
    }

    /// Set loop count
    pub fn loop_count(mut self, count: u16) -> Self {
        self.loop_count = count;
        self
    }

    /// Mark the body as containing a nested loop
    pub fn has_nested_loop(mut self, value: bool) -> Self {
        self.has_nested_loop = value;
        self
    }

    /// Set flags wholesale
    pub fn flags(mut self, flags: FunctionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Mark the body as containing a try region
    pub fn has_try(mut self, value: bool) -> Self {
        self.flags.has_try = value;
        self
    }

    /// Mark the body as containing calls
    pub fn has_calls(mut self, value: bool) -> Self {
        self.flags.has_calls = value;
        self
    }

    /// Mark the body as a class constructor
    pub fn is_class_constructor(mut self, value: bool) -> Self {
        self.flags.is_class_constructor = value;
        self
    }

    /// Mark the body as lazily parsed (no bytecode yet)
    pub fn is_lazy(mut self, value: bool) -> Self {
        self.flags.is_lazy = value;
        self
    }

    /// Mark the body as asm.js-mode
    pub fn is_asm_js(mut self, value: bool) -> Self {
        self.flags.is_asm_js = value;
        self
    }

    /// Exclude the body from inlining
    pub fn dont_inline(mut self, value: bool) -> Self {
        self.flags.dont_inline = value;
        self
    }

    /// Number of profiled call sites to allocate
    pub fn call_site_count(mut self, count: u16) -> Self {
        self.call_site_count = count;
        self
    }

    /// Build the function body
    pub fn build(self) -> FunctionBody {
        let countable = self
            .countable_instruction_count
            .unwrap_or(self.instruction_count);
        debug_assert!(
            countable <= self.instruction_count,
            "countable instructions cannot exceed the total"
        );
        FunctionBody {
            id: self.id,
            name: self.name,
            param_count: self.param_count,
            local_count: self.local_count,
            instruction_count: self.instruction_count,
            countable_instruction_count: countable,
            loop_count: self.loop_count,
            has_nested_loop: self.has_nested_loop,
            flags: self.flags,
            times_inlined: AtomicU32::new(0),
            profile: DynamicProfile::new(self.call_site_count),
        }
    }
}
