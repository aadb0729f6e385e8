//! Bytecode metadata errors

use thiserror::Error;

/// Errors that can occur while working with function metadata
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Unsupported metadata version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// A function id that is not present in the table
    #[error("Unknown function id: {0}")]
    UnknownFunction(u32),

    /// A call site id outside the function's profiled range
    #[error("Call site {site} out of range for function {function} (len={len})")]
    CallSiteOutOfRange {
        /// Offending call site id
        site: u16,
        /// Function the lookup targeted
        function: u32,
        /// Number of profiled call sites in that function
        len: usize,
    },

    /// IO error during serialization
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bytecode metadata operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
