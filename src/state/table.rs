//! Interning Table
//!
//! Hash-consed set of canonical states. Lookups go through content-hash
//! buckets; the dense `entries` vector gives every member a stable index
//! that the incremental garbage collector walks. Removal swaps the last
//! entry into the freed index and reports which key moved so the owner can
//! update that key's saved index.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::StateKey;

#[derive(Debug, Default)]
pub struct StateTable {
    entries: Vec<StateKey>,
    buckets: FxHashMap<u64, SmallVec<[StateKey; 2]>>,
}

impl StateTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key stored at `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<StateKey> {
        self.entries.get(index).copied()
    }

    /// All members in index order.
    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = StateKey> + '_ {
        self.entries.iter().copied()
    }

    /// Finds a member with the given hash for which `eq` holds.
    pub fn find(&self, hash: u64, mut eq: impl FnMut(StateKey) -> bool) -> Option<StateKey> {
        self.buckets
            .get(&hash)?
            .iter()
            .copied()
            .find(|&key| eq(key))
    }

    /// Adds a member and returns its index.
    pub fn insert(&mut self, hash: u64, key: StateKey) -> usize {
        self.buckets.entry(hash).or_default().push(key);
        self.entries.push(key);
        self.entries.len() - 1
    }

    /// Removes the member at `index`, whose content hash is `hash`.
    ///
    /// Returns the key that was moved into `index` to fill the gap, if any.
    pub fn remove(&mut self, index: usize, hash: u64) -> Option<StateKey> {
        let key = self.entries.swap_remove(index);
        if let Some(bucket) = self.buckets.get_mut(&hash) {
            bucket.retain(|k| *k != key);
            if bucket.is_empty() {
                self.buckets.remove(&hash);
            }
        }
        self.entries.get(index).copied()
    }

    /// Number of members reachable through the hash buckets.
    #[must_use]
    pub fn bucketed_len(&self) -> usize {
        self.buckets.values().map(SmallVec::len).sum()
    }
}
