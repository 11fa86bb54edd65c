//! Cohort core -- ragged per-entity variables with deferred FIFO updates.
//!
//! A [`RaggedVariable`](variable::RaggedVariable) stores, for each of a fixed
//! number of entities, an independently sized sequence of values (event
//! histories, contact lists, trait arrays). The population size never
//! changes after construction.
//!
//! Reads always see the last committed state. Writes are queued during a
//! simulation step and applied together, in enqueue order, when the host
//! calls `commit` at the step's synchronization point. Writers within a step
//! therefore never observe each other's partial effects.
//!
//! # Quick Start
//!
//! ```
//! use cohort_core::prelude::*;
//!
//! let mut history = IntegerRaggedVariable::new(vec![vec![1, 2], vec![3], vec![4, 5, 6]]);
//!
//! let infected = IndexBitset::from_indices(3, &[0, 2]).unwrap();
//! history.queue_update_in(vec![vec![0]], &infected).unwrap();
//! history.queue_update(vec![vec![9, 9]], vec![1]).unwrap();
//! history.commit();
//!
//! assert_eq!(history.get_values(), vec![vec![0], vec![9, 9], vec![0]]);
//! ```

#![deny(unsafe_code)]

pub mod policy;
pub mod selection;
pub mod update;
pub mod variable;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ragged variable operations.
///
/// Every error fails the call that produced it without changing committed
/// values or the update queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RaggedError {
    /// A membership set's universe does not match the population size.
    #[error("incompatible membership set: universe size {actual}, population size {expected}")]
    SizeMismatch {
        expected: usize,
        actual: usize,
    },

    /// An entity index is not in `[0, size)`.
    #[error("entity index out of range: supplied index {index}, population size {size}")]
    OutOfRange {
        index: usize,
        size: usize,
    },

    /// A replacement sequence was empty.
    #[error("replacement at position {position} is empty; updates must be non-empty")]
    EmptyUpdateValue {
        position: usize,
    },

    /// Replacement and target counts do not agree.
    #[error(
        "mismatch between replacement and target counts: {replacements} replacements, \
         {targets} targets, population size {size}"
    )]
    MismatchedCounts {
        replacements: usize,
        targets: usize,
        size: usize,
    },
}

/// Shorthand result type for ragged variable operations.
pub type RaggedResult<T> = Result<T, RaggedError>;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::policy::ValidationPolicy;
    pub use crate::selection::{IndexBitset, MembershipSet, Selection};
    pub use crate::update::{ApplyMode, CommitReport, PendingUpdate, UpdateQueue};
    pub use crate::variable::{
        DoubleRaggedVariable, IntegerRaggedVariable, RaggedVariable, Variable,
    };
    pub use crate::{RaggedError, RaggedResult};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
