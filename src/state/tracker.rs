//! Reference Tracking
//!
//! Every interned state carries a [`RefTracker`] with two counters:
//!
//! - `ref_count`: all references, external handles and cache edges alike
//! - `cache_ref_count`: the part of `ref_count` held by the interning table
//!   and by other states' composition caches
//!
//! A state whose two counts are equal is reachable only through caches, which
//! is the condition the cycle detector and the garbage collector look for.

use std::sync::atomic::{AtomicU32, Ordering};

/// Dual-channel reference counter.
#[derive(Debug)]
pub struct RefTracker {
    ref_count: AtomicU32,
    cache_ref_count: AtomicU32,
}

impl Default for RefTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RefTracker {
    /// Creates a tracker with no references.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ref_count: AtomicU32::new(0),
            cache_ref_count: AtomicU32::new(0),
        }
    }

    /// Increments the total count, returns the new count
    #[inline]
    pub fn add_ref(&self) -> u32 {
        self.ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the total count, returns the remaining count
    #[inline]
    pub fn release_ref(&self) -> u32 {
        let prev = self.ref_count.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "reference count underflow");
        if prev == 1 {
            // Make writes of the releasing threads visible to the destroyer
            std::sync::atomic::fence(Ordering::Acquire);
        }
        prev - 1
    }

    /// Decrements the total count only if this is the last reference.
    ///
    /// Returns `true` when the count went from 1 to 0.
    #[inline]
    pub fn release_if_last(&self) -> bool {
        self.ref_count
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Adds a cache reference, which is also a regular reference.
    #[inline]
    pub fn add_cache_ref(&self) {
        self.cache_ref_count.fetch_add(1, Ordering::Relaxed);
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops the cache-only part of a cache reference. The caller releases the
    /// regular part separately.
    #[inline]
    pub fn release_cache_ref_only(&self) {
        let prev = self.cache_ref_count.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "cache reference count underflow");
    }

    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    #[inline]
    #[must_use]
    pub fn cache_ref_count(&self) -> u32 {
        self.cache_ref_count.load(Ordering::Relaxed)
    }

    /// Whether every remaining reference belongs to a cache.
    #[inline]
    #[must_use]
    pub fn only_cache_refs(&self) -> bool {
        let cache = self.cache_ref_count();
        cache > 0 && self.ref_count() == cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts() {
        let tracker = RefTracker::new();
        assert_eq!(tracker.add_ref(), 1);
        assert_eq!(tracker.add_ref(), 2);
        assert_eq!(tracker.release_ref(), 1);
        assert_eq!(tracker.ref_count(), 1);
    }

    #[test]
    fn test_cache_refs_count_twice() {
        let tracker = RefTracker::new();
        tracker.add_ref();
        tracker.add_cache_ref();
        assert_eq!(tracker.ref_count(), 2);
        assert_eq!(tracker.cache_ref_count(), 1);
        assert!(!tracker.only_cache_refs());

        tracker.release_ref();
        assert!(tracker.only_cache_refs());

        tracker.release_cache_ref_only();
        assert_eq!(tracker.release_ref(), 0);
        assert_eq!(tracker.cache_ref_count(), 0);
    }

    #[test]
    fn test_release_if_last() {
        let tracker = RefTracker::new();
        tracker.add_ref();
        tracker.add_ref();
        assert!(!tracker.release_if_last());
        assert_eq!(tracker.ref_count(), 2);
        tracker.release_ref();
        assert!(tracker.release_if_last());
        assert_eq!(tracker.ref_count(), 0);
    }
}
