//! Ragged per-entity variables with deferred, FIFO-ordered updates.
//!
//! A [`RaggedVariable`] holds one independently sized `Vec<T>` per entity for
//! a population fixed at construction. Reads always reflect the last commit;
//! writes are queued with [`RaggedVariable::queue_update`] and only become
//! visible when the host calls [`RaggedVariable::commit`] at the end of the
//! step.
//!
//! # Example
//!
//! ```
//! use cohort_core::prelude::*;
//!
//! let mut contacts = RaggedVariable::new(vec![vec![1, 2], vec![3], vec![4, 5, 6]]);
//! assert_eq!(contacts.get_length(), vec![2, 1, 3]);
//!
//! contacts.queue_update(vec![vec![9, 9]], vec![1]).unwrap();
//! // Not visible until commit.
//! assert_eq!(contacts.get_values_at(&[1]).unwrap(), vec![vec![3]]);
//!
//! contacts.commit();
//! assert_eq!(contacts.get_values(), vec![vec![1, 2], vec![9, 9], vec![4, 5, 6]]);
//! ```

use std::any::Any;

use crate::policy::ValidationPolicy;
use crate::selection::{MembershipSet, Selection};
use crate::update::{CommitReport, PendingUpdate, UpdateQueue};
use crate::{RaggedError, RaggedResult};

/// Ragged variable of `f64` sequences.
pub type DoubleRaggedVariable = RaggedVariable<f64>;

/// Ragged variable of `i32` sequences.
pub type IntegerRaggedVariable = RaggedVariable<i32>;

// ---------------------------------------------------------------------------
// Variable
// ---------------------------------------------------------------------------

/// Type-erased interface a host uses to commit heterogeneous variables at
/// the end of a step.
pub trait Variable: Any {
    /// Population size.
    fn size(&self) -> usize;

    /// Number of updates queued since the last commit.
    fn pending_len(&self) -> usize;

    /// Apply every queued update in FIFO order.
    fn update(&mut self);

    /// Drop every queued update without applying it.
    fn discard_pending(&mut self);

    /// Report from the most recent [`update`](Self::update).
    fn last_commit_report(&self) -> CommitReport;

    #[doc(hidden)]
    fn as_any(&self) -> &dyn Any;

    #[doc(hidden)]
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ---------------------------------------------------------------------------
// RaggedVariable
// ---------------------------------------------------------------------------

/// Per-entity variable-length sequences with a deferred update queue.
#[derive(Debug, Clone)]
pub struct RaggedVariable<T> {
    values: Vec<Vec<T>>,
    queue: UpdateQueue<T>,
    policy: ValidationPolicy,
    last_commit_report: CommitReport,
}

impl<T: Clone> RaggedVariable<T> {
    /// Create a variable with one sequence per entity, using
    /// [`ValidationPolicy::Strict`].
    ///
    /// The population size is fixed to `initial.len()`.
    pub fn new(initial: Vec<Vec<T>>) -> Self {
        Self::with_policy(initial, ValidationPolicy::default())
    }

    /// Create a variable with an explicit validation policy.
    pub fn with_policy(initial: Vec<Vec<T>>, policy: ValidationPolicy) -> Self {
        Self {
            values: initial,
            queue: UpdateQueue::new(),
            policy,
            last_commit_report: CommitReport::default(),
        }
    }

    /// Create a variable holding an independent copy of `initial`.
    pub fn from_slices(initial: &[Vec<T>]) -> Self {
        Self::new(initial.to_vec())
    }

    /// Number of entities.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// The active validation policy.
    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    // -- reads ----------------------------------------------------------------

    /// Borrow one entity's committed sequence.
    pub fn values(&self, index: usize) -> Option<&[T]> {
        self.values.get(index).map(Vec::as_slice)
    }

    /// Copy of every entity's sequence, in index order.
    pub fn get_values(&self) -> Vec<Vec<T>> {
        self.values.clone()
    }

    /// Copy of the sequences of every member of `set`, ascending.
    ///
    /// # Errors
    ///
    /// [`RaggedError::SizeMismatch`] if the set's universe is not the
    /// population size.
    pub fn get_values_in<S>(&self, set: &S) -> RaggedResult<Vec<Vec<T>>>
    where
        S: MembershipSet + ?Sized,
    {
        self.check_universe(set)?;
        let mut out = Vec::with_capacity(set.len());
        out.extend(set.members().map(|i| self.values[i].clone()));
        Ok(out)
    }

    /// Copy of the sequences at `indices`, in the order given. Repeated
    /// indices yield repeated copies.
    ///
    /// # Errors
    ///
    /// [`RaggedError::OutOfRange`] for the first index `>= size()`.
    pub fn get_values_at(&self, indices: &[usize]) -> RaggedResult<Vec<Vec<T>>> {
        self.check_indices(indices)?;
        Ok(indices.iter().map(|&i| self.values[i].clone()).collect())
    }

    /// Dispatch [`get_values`](Self::get_values),
    /// [`get_values_at`](Self::get_values_at) or
    /// [`get_values_in`](Self::get_values_in) on `selection`.
    pub fn get_values_of<S: MembershipSet>(
        &self,
        selection: Selection<'_, S>,
    ) -> RaggedResult<Vec<Vec<T>>> {
        match selection {
            Selection::All => Ok(self.get_values()),
            Selection::Indices(indices) => self.get_values_at(indices),
            Selection::Members(set) => self.get_values_in(set),
        }
    }

    /// Length of every entity's sequence, in index order.
    pub fn get_length(&self) -> Vec<usize> {
        self.values.iter().map(Vec::len).collect()
    }

    /// Lengths of the sequences of every member of `set`, ascending.
    ///
    /// # Errors
    ///
    /// [`RaggedError::SizeMismatch`] if the set's universe is not the
    /// population size.
    pub fn get_length_in<S>(&self, set: &S) -> RaggedResult<Vec<usize>>
    where
        S: MembershipSet + ?Sized,
    {
        self.check_universe(set)?;
        Ok(set.members().map(|i| self.values[i].len()).collect())
    }

    /// Lengths of the sequences at `indices`, in the order given.
    ///
    /// # Errors
    ///
    /// [`RaggedError::OutOfRange`] for the first index `>= size()`.
    pub fn get_length_at(&self, indices: &[usize]) -> RaggedResult<Vec<usize>> {
        self.check_indices(indices)?;
        Ok(indices.iter().map(|&i| self.values[i].len()).collect())
    }

    /// Length counterpart of [`get_values_of`](Self::get_values_of).
    pub fn get_length_of<S: MembershipSet>(
        &self,
        selection: Selection<'_, S>,
    ) -> RaggedResult<Vec<usize>> {
        match selection {
            Selection::All => Ok(self.get_length()),
            Selection::Indices(indices) => self.get_length_at(indices),
            Selection::Members(set) => self.get_length_in(set),
        }
    }

    // -- writes ---------------------------------------------------------------

    /// Queue a replacement of some or all entities' sequences.
    ///
    /// `replacements[k]` is destined for `targets[k]`. A single replacement
    /// is written to every target; empty `targets` means the whole
    /// population. An empty `replacements` list queues nothing.
    ///
    /// Nothing is visible to readers until [`commit`](Self::commit).
    ///
    /// # Errors
    ///
    /// [`RaggedError::OutOfRange`], [`RaggedError::MismatchedCounts`] or
    /// [`RaggedError::EmptyUpdateValue`]; see [`PendingUpdate::validate`].
    /// On error nothing is queued.
    pub fn queue_update(&mut self, replacements: Vec<Vec<T>>, targets: Vec<usize>) -> RaggedResult<()> {
        let Some(update) = PendingUpdate::validate(replacements, targets, self.size(), self.policy)?
        else {
            return Ok(());
        };

        tracing::debug!(
            mode = ?update.mode(),
            replacements = update.replacements().len(),
            targets = update.targets().len(),
            pending = self.queue.len() + 1,
            "queued ragged update"
        );
        self.queue.push(update);
        Ok(())
    }

    /// Queue `value` as every entity's new sequence.
    pub fn queue_fill(&mut self, value: Vec<T>) -> RaggedResult<()> {
        self.queue_update(vec![value], Vec::new())
    }

    /// Queue an update targeting the members of `set`, ascending.
    ///
    /// An empty set queues nothing: it never widens to a whole-population
    /// update.
    ///
    /// # Errors
    ///
    /// [`RaggedError::SizeMismatch`] if the set's universe is not the
    /// population size, otherwise as [`queue_update`](Self::queue_update).
    pub fn queue_update_in<S>(&mut self, replacements: Vec<Vec<T>>, set: &S) -> RaggedResult<()>
    where
        S: MembershipSet + ?Sized,
    {
        self.check_universe(set)?;
        if set.is_empty() {
            return Ok(());
        }
        let targets: Vec<usize> = set.members().collect();
        self.queue_update(replacements, targets)
    }

    /// Number of updates queued since the last commit.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// The queued updates, in FIFO order.
    pub fn pending(&self) -> &[PendingUpdate<T>] {
        self.queue.updates()
    }

    /// Drop every queued update without applying it.
    pub fn discard_pending(&mut self) {
        if !self.queue.is_empty() {
            tracing::debug!(discarded = self.queue.len(), "discarded pending ragged updates");
        }
        self.queue.clear();
    }

    /// Apply every queued update in enqueue order and empty the queue.
    ///
    /// Later updates overwrite earlier ones for the same entity. Committing
    /// an empty queue leaves the committed values untouched.
    pub fn commit(&mut self) {
        let report = self.queue.apply(&mut self.values);

        if report.updates_applied > 0 {
            tracing::debug!(
                updates = report.updates_applied,
                entities_written = report.entities_written,
                overlapping = report.overlapping_writes,
                "committed ragged updates"
            );
        }
        if report.overlapping_writes > 0 {
            tracing::debug!(
                overlapping = report.overlapping_writes,
                "entities written more than once in one commit (last write wins)"
            );
        }

        self.last_commit_report = report;
    }

    /// Report from the most recent [`commit`](Self::commit).
    ///
    /// All zeros before the first commit.
    pub fn last_commit_report(&self) -> CommitReport {
        self.last_commit_report
    }

    // -- internal helpers -----------------------------------------------------

    fn check_universe<S: MembershipSet + ?Sized>(&self, set: &S) -> RaggedResult<()> {
        if set.universe_size() != self.size() {
            return Err(RaggedError::SizeMismatch {
                expected: self.size(),
                actual: set.universe_size(),
            });
        }
        Ok(())
    }

    fn check_indices(&self, indices: &[usize]) -> RaggedResult<()> {
        match indices.iter().find(|&&i| i >= self.size()) {
            Some(&index) => Err(RaggedError::OutOfRange {
                index,
                size: self.size(),
            }),
            None => Ok(()),
        }
    }
}

impl<T: Clone + 'static> Variable for RaggedVariable<T> {
    fn size(&self) -> usize {
        RaggedVariable::size(self)
    }

    fn pending_len(&self) -> usize {
        RaggedVariable::pending_len(self)
    }

    fn update(&mut self) {
        self.commit();
    }

    fn discard_pending(&mut self) {
        RaggedVariable::discard_pending(self);
    }

    fn last_commit_report(&self) -> CommitReport {
        self.last_commit_report
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::IndexBitset;

    fn sample() -> RaggedVariable<i32> {
        RaggedVariable::new(vec![vec![1, 2], vec![3], vec![4, 5, 6]])
    }

    // -- construction / reads -------------------------------------------------

    #[test]
    fn construction_fixes_size_and_preserves_order() {
        let v = sample();
        assert_eq!(v.size(), 3);
        assert_eq!(v.get_values(), vec![vec![1, 2], vec![3], vec![4, 5, 6]]);
        assert_eq!(v.get_length(), vec![2, 1, 3]);
        assert_eq!(v.pending_len(), 0);
    }

    #[test]
    fn from_slices_is_an_independent_copy() {
        let mut source = vec![vec![1.0], vec![]];
        let v = DoubleRaggedVariable::from_slices(&source);
        source[0].push(2.0);
        assert_eq!(v.get_values(), vec![vec![1.0], vec![]]);
        assert_eq!(v.get_length(), vec![1, 0]);
    }

    #[test]
    fn empty_population() {
        let mut v = IntegerRaggedVariable::new(Vec::new());
        assert_eq!(v.size(), 0);
        assert!(v.get_values().is_empty());
        v.queue_fill(vec![1]).unwrap();
        v.commit();
        assert!(v.get_values().is_empty());
    }

    #[test]
    fn values_at_preserves_order_and_duplicates() {
        let v = sample();
        assert_eq!(
            v.get_values_at(&[2, 0, 2]).unwrap(),
            vec![vec![4, 5, 6], vec![1, 2], vec![4, 5, 6]]
        );
        assert_eq!(v.get_length_at(&[1, 1]).unwrap(), vec![1, 1]);
        assert!(v.get_values_at(&[]).unwrap().is_empty());
    }

    #[test]
    fn values_at_rejects_out_of_range() {
        let v = sample();
        let err = v.get_values_at(&[0, 3]).unwrap_err();
        assert!(matches!(err, RaggedError::OutOfRange { index: 3, size: 3 }));
        assert!(err.to_string().contains('3'));
        assert!(matches!(
            v.get_length_at(&[7]).unwrap_err(),
            RaggedError::OutOfRange { index: 7, size: 3 }
        ));
    }

    #[test]
    fn values_in_set_are_ascending() {
        let v = sample();
        let set = IndexBitset::from_indices(3, &[2, 0]).unwrap();
        assert_eq!(v.get_values_in(&set).unwrap(), vec![vec![1, 2], vec![4, 5, 6]]);
        assert_eq!(v.get_length_in(&set).unwrap(), vec![2, 3]);
    }

    #[test]
    fn values_in_set_rejects_wrong_universe() {
        let v = sample();
        let set = IndexBitset::from_indices(4, &[0]).unwrap();
        assert!(matches!(
            v.get_values_in(&set).unwrap_err(),
            RaggedError::SizeMismatch { expected: 3, actual: 4 }
        ));
        assert!(v.get_length_in(&set).is_err());
    }

    #[test]
    fn selection_dispatch() {
        let v = sample();
        let set = IndexBitset::from_indices(3, &[1]).unwrap();
        assert_eq!(v.get_values_of(Selection::all()).unwrap(), v.get_values());
        assert_eq!(v.get_values_of(Selection::indices(&[2])).unwrap(), vec![vec![4, 5, 6]]);
        assert_eq!(v.get_values_of(Selection::Members(&set)).unwrap(), vec![vec![3]]);
        assert_eq!(v.get_length_of(Selection::Members(&set)).unwrap(), vec![1]);
        assert_eq!(v.get_length_of(Selection::all()).unwrap(), vec![2, 1, 3]);
    }

    #[test]
    fn returned_values_do_not_alias_storage() {
        let v = sample();
        let mut copy = v.get_values();
        copy[0].clear();
        assert_eq!(v.values(0), Some(&[1, 2][..]));
        assert_eq!(v.values(3), None);
    }

    // -- queue / commit -------------------------------------------------------

    #[test]
    fn selective_replace_then_commit() {
        let mut v = sample();
        v.queue_update(vec![vec![9, 9]], vec![1]).unwrap();
        assert_eq!(v.get_values()[1], vec![3], "reads see committed state only");
        v.commit();
        assert_eq!(v.get_values(), vec![vec![1, 2], vec![9, 9], vec![4, 5, 6]]);
        assert_eq!(v.pending_len(), 0);
    }

    #[test]
    fn positional_replace_pairs_values_with_targets() {
        let mut v = sample();
        v.queue_update(vec![vec![7], vec![8, 8]], vec![2, 0]).unwrap();
        v.commit();
        assert_eq!(v.get_values(), vec![vec![8, 8], vec![3], vec![7]]);
    }

    #[test]
    fn fill_replaces_every_entity() {
        let mut v = sample();
        v.queue_fill(vec![7]).unwrap();
        v.commit();
        assert_eq!(v.get_values(), vec![vec![7], vec![7], vec![7]]);
    }

    #[test]
    fn full_replace_with_population_length() {
        let mut v = sample();
        v.queue_update(vec![vec![0], vec![0, 0], vec![0, 0, 0]], vec![])
            .unwrap();
        v.commit();
        assert_eq!(v.get_length(), vec![1, 2, 3]);
        assert_eq!(v.size(), 3);
    }

    #[test]
    fn last_write_wins_across_queue() {
        let mut v = sample();
        v.queue_update(vec![vec![10]], vec![0]).unwrap();
        v.queue_update(vec![vec![20]], vec![0]).unwrap();
        v.commit();
        assert_eq!(v.values(0), Some(&[20][..]));
        assert_eq!(v.last_commit_report().overlapping_writes, 1);
    }

    #[test]
    fn empty_replacements_is_a_no_op() {
        let mut v = sample();
        v.queue_update(Vec::new(), vec![0, 1]).unwrap();
        assert_eq!(v.pending_len(), 0);
        let before = v.get_values();
        v.commit();
        assert_eq!(v.get_values(), before);
    }

    #[test]
    fn failed_queue_leaves_queue_unchanged() {
        let mut v = sample();
        v.queue_update(vec![vec![1]], vec![0]).unwrap();
        let err = v.queue_update(vec![vec![1], vec![2]], vec![5]).unwrap_err();
        assert!(matches!(err, RaggedError::OutOfRange { index: 5, size: 3 }));
        assert_eq!(v.pending_len(), 1);
    }

    #[test]
    fn commit_on_empty_queue_is_idempotent() {
        let mut v = sample();
        let before = v.get_values();
        v.commit();
        v.commit();
        assert_eq!(v.get_values(), before);
        assert_eq!(v.last_commit_report(), CommitReport::default());
    }

    #[test]
    fn queue_update_in_uses_ascending_members() {
        let mut v = sample();
        let set = IndexBitset::from_indices(3, &[2, 0]).unwrap();
        v.queue_update_in(vec![vec![100], vec![200]], &set).unwrap();
        v.commit();
        assert_eq!(v.get_values(), vec![vec![100], vec![3], vec![200]]);
    }

    #[test]
    fn queue_update_in_with_empty_set_never_broadcasts() {
        let mut v = sample();
        v.queue_update_in(vec![vec![0]], &IndexBitset::new(3)).unwrap();
        assert_eq!(v.pending_len(), 0);
    }

    #[test]
    fn queue_update_in_rejects_wrong_universe() {
        let mut v = sample();
        let set = IndexBitset::full(2);
        assert!(matches!(
            v.queue_update_in(vec![vec![0]], &set).unwrap_err(),
            RaggedError::SizeMismatch { expected: 3, actual: 2 }
        ));
    }

    #[test]
    fn discard_pending_drops_without_applying() {
        let mut v = sample();
        v.queue_fill(vec![0]).unwrap();
        v.discard_pending();
        v.commit();
        assert_eq!(v.get_length(), vec![2, 1, 3]);
    }

    #[test]
    fn compatible_policy_accepts_extra_replacements() {
        let mut v = RaggedVariable::with_policy(
            vec![vec![0], vec![0], vec![0]],
            ValidationPolicy::Compatible,
        );
        v.queue_update(vec![vec![1], vec![2], vec![3]], vec![2]).unwrap();
        v.commit();
        assert_eq!(v.get_values(), vec![vec![0], vec![0], vec![1]]);

        let mut strict = RaggedVariable::new(vec![vec![0], vec![0], vec![0]]);
        assert!(strict
            .queue_update(vec![vec![1], vec![2], vec![3]], vec![2])
            .is_err());
    }

    #[test]
    fn variable_trait_commits_and_downcasts() {
        let mut boxed: Box<dyn Variable> = Box::new(sample());
        let typed = boxed
            .as_any_mut()
            .downcast_mut::<RaggedVariable<i32>>()
            .unwrap();
        typed.queue_fill(vec![5]).unwrap();
        assert_eq!(boxed.pending_len(), 1);
        boxed.update();
        assert_eq!(boxed.pending_len(), 0);
        assert_eq!(boxed.last_commit_report().entities_written, 3);

        let typed = boxed.as_any().downcast_ref::<RaggedVariable<i32>>().unwrap();
        assert_eq!(typed.get_values(), vec![vec![5]; 3]);
        assert!(boxed.as_any().downcast_ref::<RaggedVariable<f64>>().is_none());
    }
}
