//! Enqueue-time validation policy for [`RaggedVariable`](crate::variable::RaggedVariable).
//!
//! Both policies guarantee that a queued update can be applied without
//! indexing outside the population or outside the replacement list. They
//! differ in how strictly the replacement/target counts must agree.
//!
//! The policy is plain data and can be loaded from configuration:
//!
//! ```
//! use cohort_core::policy::ValidationPolicy;
//!
//! let policy: ValidationPolicy = serde_json::from_str("\"compatible\"").unwrap();
//! assert_eq!(policy, ValidationPolicy::Compatible);
//! ```

use serde::{Deserialize, Serialize};

/// How strictly `queue_update` checks its arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Every replacement must be non-empty, and a positional update with more
    /// than one replacement must supply exactly one replacement per target.
    #[default]
    Strict,
    /// Count agreement is only checked when `1 < replacements < population`,
    /// and only replacements paired with an explicit target are checked for
    /// emptiness.
    ///
    /// Updates that would still be unsafe to apply are rejected.
    Compatible,
}

impl ValidationPolicy {
    /// Whether a replacement/target count disagreement must be rejected for
    /// a positional update (non-empty targets, more than one replacement).
    pub(crate) fn requires_matching_counts(self, replacements: usize, population: usize) -> bool {
        match self {
            ValidationPolicy::Strict => true,
            ValidationPolicy::Compatible => replacements < population,
        }
    }

    /// Whether replacements not paired with an explicit target are checked
    /// for emptiness too (whole-population updates, trailing extras).
    pub(crate) fn checks_untargeted_values(self) -> bool {
        matches!(self, ValidationPolicy::Strict)
    }
}
