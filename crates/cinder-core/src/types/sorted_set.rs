//! Sorted set data structure: dual-indexed by score and name.
//!
//! Each pair has a unique name and an associated `f64` score. Pairs are
//! ordered by (score, name) — ties in score are broken by comparing the
//! name bytes lexicographically.
//!
//! Implementation uses a `BTreeMap<(OrderedFloat<f64>, Bytes), ()>` for
//! ordered iteration and a `HashMap<Bytes, OrderedFloat<f64>>` for O(1)
//! name→score lookups. `Bytes` handles are reference-counted, so keeping
//! each name in both indexes costs a pointer, not a copy.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use bytes::Bytes;
use ordered_float::OrderedFloat;

/// A sorted set of unique byte-string names, each with a float score.
///
/// Rank is determined by position in the (score, name) ordering
/// (0-based, lowest pair first).
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    /// Score→name index for ordered iteration.
    tree: BTreeMap<(OrderedFloat<f64>, Bytes), ()>,
    /// Name→score index for O(1) lookups.
    scores: HashMap<Bytes, OrderedFloat<f64>>,
}

impl SortedSet {
    /// Creates an empty sorted set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or updates a pair. Returns `true` if the name was newly
    /// added, `false` if an existing pair's score was replaced.
    pub fn insert(&mut self, score: f64, name: Bytes) -> bool {
        let new_score = OrderedFloat(score);

        if let Some((existing, old_score)) = self.scores.remove_entry(&name) {
            // reposition: drop the old tree slot, reinsert under the new score
            self.tree.remove(&(old_score, existing.clone()));
            self.scores.insert(existing.clone(), new_score);
            self.tree.insert((new_score, existing), ());
            false
        } else {
            self.scores.insert(name.clone(), new_score);
            self.tree.insert((new_score, name), ());
            true
        }
    }

    /// Removes a pair by name. Returns `true` if it existed.
    pub fn remove(&mut self, name: &[u8]) -> bool {
        if let Some((owned, score)) = self.scores.remove_entry(name) {
            self.tree.remove(&(score, owned));
            true
        } else {
            false
        }
    }

    /// Returns the score for a name, or `None` if not present.
    pub fn score(&self, name: &[u8]) -> Option<f64> {
        self.scores.get(name).map(|s| s.0)
    }

    /// Returns the 0-based rank of a name (lowest pair = rank 0), or
    /// `None` if the name is not present.
    ///
    /// O(n) — walks the tree up to the target pair. Acceptable for
    /// small-to-medium sets; an order-statistic tree would give
    /// O(log n) if this becomes a bottleneck.
    pub fn rank(&self, name: &[u8]) -> Option<usize> {
        let score = *self.scores.get(name)?;
        let key = (score, Bytes::copy_from_slice(name));
        Some(self.tree.range(..key).count())
    }

    /// Returns pairs `(score, name) >= (score, name)` in ascending
    /// (score, name) order, skipping the first `offset` and yielding at
    /// most `limit` pairs. A `limit` of zero means unbounded.
    pub fn range_from(
        &self,
        score: f64,
        name: &[u8],
        offset: u64,
        limit: u64,
    ) -> impl Iterator<Item = (f64, &Bytes)> {
        let start = (OrderedFloat(score), Bytes::copy_from_slice(name));
        let limit = if limit == 0 { usize::MAX } else { limit as usize };

        self.tree
            .range((Bound::Included(start), Bound::Unbounded))
            .skip(offset as usize)
            .take(limit)
            .map(|(key, _)| ((key.0).0, &key.1))
    }

    /// Returns the number of pairs.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Returns `true` if the sorted set has no pairs.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Returns an iterator over (score, name) pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &Bytes)> {
        self.tree.keys().map(|key| ((key.0).0, &key.1))
    }
}
