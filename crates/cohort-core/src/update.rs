//! Deferred batch updates for ragged variables.
//!
//! A [`PendingUpdate`] is one validated replacement request. The
//! [`UpdateQueue`] collects them during a simulation step and applies them in
//! strict FIFO order at the commit point. Readers never observe a queued
//! update until it has been committed.
//!
//! Each update resolves to one of four [`ApplyMode`]s from the shape of its
//! arguments:
//!
//! | targets  | replacements | mode                                    |
//! |----------|--------------|-----------------------------------------|
//! | empty    | 1            | [`ApplyMode::Broadcast`]                |
//! | empty    | N            | [`ApplyMode::FullReplace`]              |
//! | non-empty| 1            | [`ApplyMode::SelectiveFill`]            |
//! | non-empty| many         | [`ApplyMode::SelectivePositional`]      |
//!
//! When several queued updates write the same entity, the one enqueued last
//! wins. Overlaps are counted in the [`CommitReport`] but are not an error.

use serde::{Deserialize, Serialize};

use crate::policy::ValidationPolicy;
use crate::selection::{IndexBitset, MembershipSet};
use crate::{RaggedError, RaggedResult};

// ---------------------------------------------------------------------------
// ApplyMode
// ---------------------------------------------------------------------------

/// How a pending update is written into the store at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Every entity receives the single replacement.
    Broadcast,
    /// Entity `i` receives `replacements[i]` for every `i`.
    FullReplace,
    /// Every target receives the single replacement.
    SelectiveFill,
    /// `targets[k]` receives `replacements[k]`.
    SelectivePositional,
}

impl ApplyMode {
    fn resolve(replacements: usize, targets: usize) -> Self {
        match (targets == 0, replacements == 1) {
            (true, true) => ApplyMode::Broadcast,
            (true, false) => ApplyMode::FullReplace,
            (false, true) => ApplyMode::SelectiveFill,
            (false, false) => ApplyMode::SelectivePositional,
        }
    }
}

// ---------------------------------------------------------------------------
// PendingUpdate
// ---------------------------------------------------------------------------

/// A validated replacement request waiting in an [`UpdateQueue`].
///
/// Only constructible through [`PendingUpdate::validate`], so every queued
/// record is known to be safe to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate<T> {
    replacements: Vec<Vec<T>>,
    targets: Vec<usize>,
    mode: ApplyMode,
    update_index: u32,
}

impl<T> PendingUpdate<T> {
    /// Check `replacements`/`targets` against a population of `size` entities.
    ///
    /// Returns `Ok(None)` when `replacements` is empty: there is nothing to
    /// queue and that is not an error.
    ///
    /// Checks run in this order and the first failure is returned:
    ///
    /// 1. every target is `< size` ([`RaggedError::OutOfRange`]);
    /// 2. replacement and target counts agree under `policy`
    ///    ([`RaggedError::MismatchedCounts`]);
    /// 3. replacements are non-empty ([`RaggedError::EmptyUpdateValue`]).
    ///
    /// Regardless of policy, a whole-population update must carry exactly
    /// one or exactly `size` replacements, and a positional update must carry
    /// at least one replacement per target.
    pub fn validate(
        replacements: Vec<Vec<T>>,
        targets: Vec<usize>,
        size: usize,
        policy: ValidationPolicy,
    ) -> RaggedResult<Option<Self>> {
        if replacements.is_empty() {
            return Ok(None);
        }

        if let Some(&index) = targets.iter().find(|&&i| i >= size) {
            return Err(RaggedError::OutOfRange { index, size });
        }

        let mode = ApplyMode::resolve(replacements.len(), targets.len());
        let mismatch = || RaggedError::MismatchedCounts {
            replacements: replacements.len(),
            targets: targets.len(),
            size,
        };

        match mode {
            ApplyMode::Broadcast => {
                if policy.checks_untargeted_values() {
                    check_non_empty(&replacements, 0)?;
                }
            }
            ApplyMode::SelectiveFill => {
                check_non_empty(&replacements, 0)?;
            }
            ApplyMode::FullReplace => {
                if replacements.len() != size {
                    return Err(mismatch());
                }
                if policy.checks_untargeted_values() {
                    check_non_empty(&replacements, 0)?;
                }
            }
            ApplyMode::SelectivePositional => {
                let disagree = replacements.len() != targets.len();
                if disagree && policy.requires_matching_counts(replacements.len(), size) {
                    return Err(mismatch());
                }
                // Positional pairing must never run off the replacement list.
                if replacements.len() < targets.len() {
                    return Err(mismatch());
                }
                check_non_empty(&replacements[..targets.len()], 0)?;
                if policy.checks_untargeted_values() {
                    check_non_empty(&replacements[targets.len()..], targets.len())?;
                }
            }
        }

        Ok(Some(Self {
            replacements,
            targets,
            mode,
            update_index: 0,
        }))
    }

    /// Replacement sequences, in the order supplied.
    pub fn replacements(&self) -> &[Vec<T>] {
        &self.replacements
    }

    /// Target entity indices. Empty means the whole population.
    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// The resolved apply mode.
    pub fn mode(&self) -> ApplyMode {
        self.mode
    }

    /// Position of this update in its queue since the last commit.
    pub fn update_index(&self) -> u32 {
        self.update_index
    }
}

fn check_non_empty<T>(values: &[Vec<T>], offset: usize) -> RaggedResult<()> {
    match values.iter().position(Vec::is_empty) {
        Some(k) => Err(RaggedError::EmptyUpdateValue {
            position: offset + k,
        }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// CommitReport
// ---------------------------------------------------------------------------

/// Summary of the last commit of an [`UpdateQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    /// Number of pending updates drained and applied.
    pub updates_applied: usize,
    /// Total entity writes across all updates (an entity written twice counts twice).
    pub entities_written: usize,
    /// Number of distinct entities written more than once (last write wins).
    pub overlapping_writes: usize,
}

// ---------------------------------------------------------------------------
// UpdateQueue
// ---------------------------------------------------------------------------

/// FIFO queue of [`PendingUpdate`]s.
#[derive(Debug, Clone)]
pub struct UpdateQueue<T> {
    updates: Vec<PendingUpdate<T>>,
    next_index: u32,
}

impl<T> UpdateQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            updates: Vec::new(),
            next_index: 0,
        }
    }

    /// Append a validated update at the tail.
    pub fn push(&mut self, mut update: PendingUpdate<T>) {
        update.update_index = self.next_index;
        self.next_index += 1;
        self.updates.push(update);
    }

    /// Queued updates in FIFO order.
    pub fn updates(&self) -> &[PendingUpdate<T>] {
        &self.updates
    }

    /// Number of queued updates.
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Drop every queued update without applying it.
    pub fn clear(&mut self) {
        self.updates.clear();
        self.next_index = 0;
    }
}

impl<T: Clone> UpdateQueue<T> {
    /// Drain the queue head to tail into `store`, leaving the queue empty.
    ///
    /// `store` must be the population the updates were validated against.
    /// Draining an empty queue leaves `store` untouched.
    pub fn apply(&mut self, store: &mut Vec<Vec<T>>) -> CommitReport {
        let updates = std::mem::take(&mut self.updates);
        self.next_index = 0;

        let mut report = CommitReport {
            updates_applied: updates.len(),
            ..CommitReport::default()
        };
        if updates.is_empty() {
            return report;
        }

        // Overlap tracking only matters once two writes can collide.
        let mut overlap = (updates.len() > 1 || updates[0].targets.len() > 1)
            .then(|| OverlapTracker::new(store.len()));

        for update in updates {
            let written = write_one(store, update, overlap.as_mut());
            report.entities_written += written;
        }

        report.overlapping_writes = overlap.map_or(0, |t| t.overlapped.len());
        report
    }
}

impl<T> Default for UpdateQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct OverlapTracker {
    seen: IndexBitset,
    overlapped: IndexBitset,
}

impl OverlapTracker {
    fn new(size: usize) -> Self {
        Self {
            seen: IndexBitset::new(size),
            overlapped: IndexBitset::new(size),
        }
    }

    fn record(&mut self, index: usize) {
        // Indices were validated at enqueue time, so insertion cannot fail.
        if let Ok(false) = self.seen.insert(index) {
            let _ = self.overlapped.insert(index);
        }
    }

    fn record_all(&mut self, size: usize) {
        for index in 0..size {
            self.record(index);
        }
    }
}

/// Apply one update and return how many entity slots it wrote.
fn write_one<T: Clone>(
    store: &mut Vec<Vec<T>>,
    update: PendingUpdate<T>,
    mut overlap: Option<&mut OverlapTracker>,
) -> usize {
    let PendingUpdate {
        mut replacements,
        targets,
        mode,
        update_index,
    } = update;

    tracing::trace!(
        update_index,
        mode = ?mode,
        replacements = replacements.len(),
        targets = targets.len(),
        "applying pending update"
    );

    match mode {
        ApplyMode::Broadcast => {
            let value = &replacements[0];
            for slot in store.iter_mut() {
                slot.clone_from(value);
            }
            if let Some(t) = overlap.as_deref_mut() {
                t.record_all(store.len());
            }
            store.len()
        }
        ApplyMode::FullReplace => {
            // Length equals the population; checked at enqueue time.
            *store = replacements;
            if let Some(t) = overlap.as_deref_mut() {
                t.record_all(store.len());
            }
            store.len()
        }
        ApplyMode::SelectiveFill => {
            let value = &replacements[0];
            for &index in &targets {
                store[index].clone_from(value);
                if let Some(t) = overlap.as_deref_mut() {
                    t.record(index);
                }
            }
            targets.len()
        }
        ApplyMode::SelectivePositional => {
            replacements.truncate(targets.len());
            for (&index, value) in targets.iter().zip(replacements) {
                store[index] = value;
                if let Some(t) = overlap.as_deref_mut() {
                    t.record(index);
                }
            }
            targets.len()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
