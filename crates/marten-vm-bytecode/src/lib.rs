//! # Marten VM Bytecode
//!
//! This crate defines the function-level bytecode metadata for the Marten
//! JavaScript runtime, together with the dynamic profile store the adaptive
//! optimizer reads.
//!
//! ## Design Principles
//!
//! - **Static vs. dynamic split**: `FunctionBody` carries facts fixed at
//!   bytecode-generation time; `DynamicProfile` carries facts observed by the
//!   interpreter while the program runs
//! - **Read-mostly profiles**: the optimizer only ever reads profile data;
//!   recording happens on the interpreter thread through interior mutability
//! - **Serializable**: the static half derives `serde` so function metadata
//!   can be cached to disk alongside compiled bytecode

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod function;
pub mod profile;
pub mod table;

pub use error::BytecodeError;
pub use function::{FunctionBody, FunctionBodyBuilder, FunctionFlags};
pub use profile::{
    ArgMask, CallSiteInfo, CallSiteState, CalleeCandidate, DynamicProfile, TypeObservations,
    MAX_POLYMORPHIC_TARGETS,
};
pub use table::FunctionTable;

/// Identity of one bytecode function within a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct FunctionId(pub u32);

/// Identity of one call site within a function, assigned in bytecode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CallSiteId(pub u16);

/// Metadata format version
pub const METADATA_VERSION: u32 = 1;
