//! Inlining thresholds.
//!
//! All size limits are in byte-code instructions, excluding the no-op
//! padding class. Negative disables the corresponding category outright.

/// Caller-size buckets for the base acceptance threshold: bigger callers
/// tolerate bigger callees.
const CALLER_SIZE_BUCKETS: [(u32, i32); 4] = [(128, 60), (512, 45), (2048, 35), (u32::MAX, 25)];

/// Threshold configuration for one compilation.
#[derive(Debug, Clone)]
pub struct InlineThresholds {
    /// Relaxed threshold for leaf candidates (no calls of their own)
    pub leaf_threshold: i32,
    /// Stricter threshold for candidates containing loops; negative
    /// disables with-loops inlining entirely
    pub loop_threshold: i32,
    /// Stricter threshold for polymorphic call sites; negative disables
    pub polymorphic_threshold: i32,
    /// Constructor-specific size gate; negative disables
    pub constructor_threshold: i32,
    /// Looser threshold for the constant-argument escape hatch
    pub constant_arg_threshold: i32,
    /// Divisor applied to the base threshold in loop-body compiles
    pub loop_body_divisor: i32,
    /// Cap on inlined candidates that contain loops, per top function
    pub max_inlinees_with_loops: u32,
    /// Maximum depth for direct-recursion inlining
    pub max_recursive_depth: u32,
    /// Per-candidate cap on how often one body may be inlined anywhere
    pub max_times_inlined: u32,
    /// Cumulative inlined-bytecode budget per top function
    pub max_inlined_bytecode: u32,
    /// Hard parameter-count limit from the fixed-size argument relay
    pub max_inlinee_arg_count: u8,
}

impl Default for InlineThresholds {
    fn default() -> Self {
        Self {
            leaf_threshold: 60,
            loop_threshold: 25,
            polymorphic_threshold: 32,
            constructor_threshold: 21,
            constant_arg_threshold: 157,
            loop_body_divisor: 2,
            max_inlinees_with_loops: 40,
            max_recursive_depth: 2,
            max_times_inlined: 16,
            max_inlined_bytecode: 4800,
            max_inlinee_arg_count: 15,
        }
    }
}

impl InlineThresholds {
    /// Base acceptance threshold for a caller of the given size.
    ///
    /// Loop-body compiles divide the bucket value down — duplicated loop
    /// bodies amplify code-size growth, so they inline more reluctantly.
    pub fn base_threshold(&self, caller_size: u32, loop_body_compile: bool) -> i32 {
        let bucket = CALLER_SIZE_BUCKETS
            .iter()
            .find(|(limit, _)| caller_size <= *limit)
            .map(|(_, threshold)| *threshold)
            .unwrap_or(0);
        if loop_body_compile {
            bucket / self.loop_body_divisor.max(1)
        } else {
            bucket
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigger_callers_tolerate_bigger_callees() {
        let t = InlineThresholds::default();
        assert_eq!(t.base_threshold(100, false), 60);
        assert_eq!(t.base_threshold(400, false), 45);
        assert_eq!(t.base_threshold(2000, false), 35);
        assert_eq!(t.base_threshold(100_000, false), 25);
    }

    #[test]
    fn loop_body_compiles_divide_down() {
        let t = InlineThresholds::default();
        assert_eq!(t.base_threshold(100, true), 30);
    }
}
