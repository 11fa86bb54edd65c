//! Cohort sim -- host-side registry and step loop for ragged variables.
//!
//! This crate owns the "when" of the two-phase update discipline: processes
//! run against committed state and queue updates, then every registered
//! variable is committed exactly once at the end of the step.
//!
//! # Modules
//!
//! - [`registry`]: named, type-erased storage for `RaggedVariable<T>`s with
//!   typed access and a single `commit_all`.
//! - [`step`]: the fixed-timestep loop, the [`StepContext`](step::StepContext)
//!   handed to processes, and per-step diagnostics.

#![deny(unsafe_code)]

pub mod registry;
pub mod step;

use cohort_core::RaggedError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the registry and step loop.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// No variable is registered under this name.
    #[error("variable '{0}' is not registered")]
    UnknownVariable(String),

    /// A variable with this name is already registered.
    #[error("variable '{0}' is already registered")]
    DuplicateVariable(String),

    /// The variable exists but holds a different element type.
    #[error("variable '{name}' holds {found} elements, requested as {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A ragged variable operation failed.
    #[error(transparent)]
    Ragged(#[from] RaggedError),

    /// A process failed; the step it ran in was abandoned.
    #[error("process '{process}' failed: {source}")]
    Process {
        process: String,
        source: Box<SimError>,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::registry::VariableRegistry;
    pub use crate::step::{ProcessFn, StepConfig, StepContext, StepDiagnostics, StepLoop};
    pub use crate::SimError;
}
