//! Composition cache statistics.

use std::time::{Duration, Instant};

/// Counters for the composition caches, reset after every report.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Lookups that found a computed result.
    pub hits: u64,
    /// Lookups that had to compute the result.
    pub misses: u64,
    /// Entries added to a cache that already had entries.
    pub adds: u64,
    /// Entries added to an empty cache.
    pub new_adds: u64,
    /// Entries removed while purging cache pointers.
    pub dels: u64,
    /// Total entries across all composition caches.
    pub total_size: u64,
    /// Live interned states.
    pub num_states: u64,
    last_reset: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self {
            hits: 0,
            misses: 0,
            adds: 0,
            new_adds: 0,
            dels: 0,
            total_size: 0,
            num_states: 0,
            last_reset: Instant::now(),
        }
    }
}

impl CacheStats {
    #[inline]
    pub fn inc_hits(&mut self) {
        self.hits += 1;
    }

    #[inline]
    pub fn inc_misses(&mut self) {
        self.misses += 1;
    }

    /// Records a new cache entry; `was_empty` when it is the cache's first.
    #[inline]
    pub fn inc_adds(&mut self, was_empty: bool) {
        if was_empty {
            self.new_adds += 1;
        } else {
            self.adds += 1;
        }
        self.total_size += 1;
    }

    #[inline]
    pub fn inc_dels(&mut self) {
        self.dels += 1;
        self.total_size = self.total_size.saturating_sub(1);
    }

    /// Fraction of lookups served from the cache.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Logs a summary when `interval` has elapsed since the last report and
    /// restarts the counting window.
    pub fn maybe_report(&mut self, name: &str, interval: Duration) {
        if self.last_reset.elapsed() < interval {
            return;
        }
        log::info!(
            "{name} cache: {} hits, {} misses ({:.1}% hits), {} adds ({} new), {} dels, {} / {} = {:.2} entries per state",
            self.hits,
            self.misses,
            self.hit_ratio() * 100.0,
            self.adds + self.new_adds,
            self.new_adds,
            self.dels,
            self.total_size,
            self.num_states,
            if self.num_states == 0 {
                0.0
            } else {
                self.total_size as f64 / self.num_states as f64
            },
        );
        self.reset();
    }

    /// Clears the per-window counters. Sizes are running totals and survive.
    pub fn reset(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.adds = 0;
        self.new_adds = 0;
        self.dels = 0;
        self.last_reset = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_ratio() {
        let mut stats = CacheStats::default();
        stats.inc_hits();
        stats.inc_hits();
        stats.inc_hits();
        stats.inc_misses();
        stats.inc_adds(true);
        stats.inc_adds(false);
        stats.inc_dels();
        assert!((stats.hit_ratio() - 0.75).abs() < 1e-9);
        assert_eq!(stats.new_adds, 1);
        assert_eq!(stats.adds, 1);
        assert_eq!(stats.total_size, 1);
    }

    #[test]
    fn test_report_resets_window() {
        let mut stats = CacheStats::default();
        stats.inc_hits();
        stats.inc_adds(true);
        stats.maybe_report("test", Duration::from_secs(3600));
        assert_eq!(stats.hits, 1);
        stats.maybe_report("test", Duration::ZERO);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.total_size, 1);
    }
}
