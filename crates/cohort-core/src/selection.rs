//! Entity selection: explicit index lists and fixed-universe membership sets.
//!
//! Reads and writes on a [`RaggedVariable`](crate::variable::RaggedVariable)
//! can target a subset of the population in two ways:
//!
//! - An explicit `&[usize]` list. Order is preserved and duplicates are
//!   allowed.
//! - A [`MembershipSet`]: a set over a fixed universe `[0, universe_size)`
//!   that enumerates its members in ascending order. The universe must match
//!   the variable's population size exactly.
//!
//! [`IndexBitset`] is the bundled membership set, a word-packed bit vector.
//! Hosts with their own population sets only need to implement the trait.

use crate::{RaggedError, RaggedResult};

const WORD_BITS: usize = u64::BITS as usize;

// ---------------------------------------------------------------------------
// MembershipSet
// ---------------------------------------------------------------------------

/// A set of entity indices over a fixed, declared universe.
pub trait MembershipSet {
    /// Iterator over members in ascending index order.
    type Iter<'a>: Iterator<Item = usize>
    where
        Self: 'a;

    /// Size of the universe the set is defined over (not the member count).
    fn universe_size(&self) -> usize;

    /// Number of members.
    fn len(&self) -> usize;

    /// Whether the set has no members.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members in strictly ascending order.
    fn members(&self) -> Self::Iter<'_>;
}

// ---------------------------------------------------------------------------
// IndexBitset
// ---------------------------------------------------------------------------

/// Fixed-universe bitset of entity indices.
///
/// The universe is set at construction and never changes. The member count is
/// cached so [`len`](MembershipSet::len) is O(1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBitset {
    words: Vec<u64>,
    universe: usize,
    count: usize,
}

impl IndexBitset {
    /// Create an empty set over `[0, universe)`.
    pub fn new(universe: usize) -> Self {
        Self {
            words: vec![0; universe.div_ceil(WORD_BITS)],
            universe,
            count: 0,
        }
    }

    /// Create a set over `[0, universe)` containing every index in `indices`.
    ///
    /// # Errors
    ///
    /// Returns [`RaggedError::OutOfRange`] for the first index `>= universe`.
    pub fn from_indices(universe: usize, indices: &[usize]) -> RaggedResult<Self> {
        let mut set = Self::new(universe);
        set.insert_all(indices)?;
        Ok(set)
    }

    /// Create a set containing the whole universe.
    pub fn full(universe: usize) -> Self {
        let mut set = Self::new(universe);
        for word in &mut set.words {
            *word = u64::MAX;
        }
        let tail = universe % WORD_BITS;
        if tail != 0 {
            if let Some(last) = set.words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        set.count = universe;
        set
    }

    /// Add `index` to the set. Returns `true` if it was not already present.
    ///
    /// # Errors
    ///
    /// Returns [`RaggedError::OutOfRange`] if `index >= universe_size()`.
    pub fn insert(&mut self, index: usize) -> RaggedResult<bool> {
        self.check(index)?;
        let (word, mask) = locate(index);
        let fresh = self.words[word] & mask == 0;
        if fresh {
            self.words[word] |= mask;
            self.count += 1;
        }
        Ok(fresh)
    }

    /// Add every index in `indices`. Stops at the first out-of-range index;
    /// indices before it stay inserted.
    pub fn insert_all(&mut self, indices: &[usize]) -> RaggedResult<()> {
        for &index in indices {
            self.insert(index)?;
        }
        Ok(())
    }

    /// Remove `index`. Returns `true` if it was present. Indices outside the
    /// universe are never members, so removing one is a no-op.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.universe {
            return false;
        }
        let (word, mask) = locate(index);
        let present = self.words[word] & mask != 0;
        if present {
            self.words[word] &= !mask;
            self.count -= 1;
        }
        present
    }

    /// Whether `index` is a member.
    pub fn contains(&self, index: usize) -> bool {
        if index >= self.universe {
            return false;
        }
        let (word, mask) = locate(index);
        self.words[word] & mask != 0
    }

    /// Members in ascending order.
    pub fn iter(&self) -> BitsetIter<'_> {
        BitsetIter {
            words: &self.words,
            word_index: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    /// Members collected into an ascending index list.
    pub fn to_indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.count);
        out.extend(self.iter());
        out
    }

    fn check(&self, index: usize) -> RaggedResult<()> {
        if index >= self.universe {
            return Err(RaggedError::OutOfRange {
                index,
                size: self.universe,
            });
        }
        Ok(())
    }
}

#[inline]
fn locate(index: usize) -> (usize, u64) {
    (index / WORD_BITS, 1u64 << (index % WORD_BITS))
}

impl MembershipSet for IndexBitset {
    type Iter<'a> = BitsetIter<'a>;

    fn universe_size(&self) -> usize {
        self.universe
    }

    fn len(&self) -> usize {
        self.count
    }

    fn members(&self) -> Self::Iter<'_> {
        self.iter()
    }
}

impl<'a> IntoIterator for &'a IndexBitset {
    type Item = usize;
    type IntoIter = BitsetIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ascending iterator over the members of an [`IndexBitset`].
#[derive(Debug, Clone)]
pub struct BitsetIter<'a> {
    words: &'a [u64],
    word_index: usize,
    current: u64,
}

impl Iterator for BitsetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                // Clear the lowest set bit.
                self.current &= self.current - 1;
                return Some(self.word_index * WORD_BITS + bit);
            }
            self.word_index += 1;
            self.current = *self.words.get(self.word_index)?;
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Which entities a read targets.
#[derive(Debug)]
pub enum Selection<'a, S: MembershipSet = IndexBitset> {
    /// Every entity, in index order.
    All,
    /// An explicit index list, order and duplicates preserved.
    Indices(&'a [usize]),
    /// Members of a fixed-universe set, ascending.
    Members(&'a S),
}

impl<'a> Selection<'a, IndexBitset> {
    /// Every entity. Pins the set type so callers need no annotation.
    pub fn all() -> Self {
        Selection::All
    }

    /// Explicit index list. Pins the set type so callers need no annotation.
    pub fn indices(indices: &'a [usize]) -> Self {
        Selection::Indices(indices)
    }
}

impl<S: MembershipSet> Clone for Selection<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: MembershipSet> Copy for Selection<'_, S> {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
