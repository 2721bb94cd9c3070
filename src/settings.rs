//! State Cache Settings
//!
//! [`StateCacheConfig`] controls how aggressively render states are shared,
//! memoized and reclaimed. It is captured once when a
//! [`StateCache`](crate::StateCache) is created and never changes afterwards.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use myth_state::{StateCache, StateCacheConfig};
//!
//! // Default: interned states, reference counting with automatic cycle breaking
//! let cache = StateCache::new(StateCacheConfig::default());
//!
//! // Deferred reclamation: call `garbage_collect()` once per frame
//! let cache = StateCache::new(StateCacheConfig {
//!     garbage_collect_states: true,
//!     garbage_collect_states_rate: 0.25,
//!     ..Default::default()
//! });
//! ```
//!
//! # Reclamation Modes
//!
//! | Mode                     | Table holds a ref | Cycle breaking      | Reclaimed by          |
//! |--------------------------|-------------------|---------------------|-----------------------|
//! | Reference counting       | ❌                | on the unref path   | last `RenderState` drop |
//! | Garbage collection       | ✅                | during the sweep    | `garbage_collect()`   |
//! | Cache disabled           | ❌                | never               | last `RenderState` drop |

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Configuration of the render-state cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateCacheConfig {
    /// Master switch for interning and composition caching.
    ///
    /// When off, every derivation builds a fresh value and nothing is memoized.
    pub state_cache: bool,

    /// Share one canonical instance between all value-equal states.
    ///
    /// When off, only the empty state is interned; composition results are
    /// still memoized per operand pair.
    pub uniquify_states: bool,

    /// Canonicalize attribute pointers through the attribute pool before the
    /// state table lookup.
    pub uniquify_attribs: bool,

    /// Keep every interned state alive until [`StateCache::garbage_collect`]
    /// finds it unreferenced.
    ///
    /// [`StateCache::garbage_collect`]: crate::StateCache::garbage_collect
    pub garbage_collect_states: bool,

    /// Fraction of the state table visited by each garbage collection pass.
    pub garbage_collect_states_rate: f32,

    /// Detect and break reference cycles formed through composition caches.
    pub auto_break_cycles: bool,

    /// Validate the whole state table on every interning (debug builds only).
    pub paranoid_const: bool,

    /// Periodically log cache hit/miss statistics.
    pub cache_report: bool,

    /// Seconds between two cache statistics reports.
    pub cache_report_interval: f32,
}

impl Default for StateCacheConfig {
    fn default() -> Self {
        Self {
            state_cache: true,
            uniquify_states: true,
            uniquify_attribs: true,
            garbage_collect_states: false,
            garbage_collect_states_rate: 1.0,
            auto_break_cycles: true,
            paranoid_const: false,
            cache_report: false,
            cache_report_interval: 5.0,
        }
    }
}

impl StateCacheConfig {
    /// Parses a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Returns `true` when the unref path should look for composition cycles.
    #[inline]
    #[must_use]
    pub fn breaks_cycles_on_unref(&self) -> bool {
        self.state_cache
            && !self.garbage_collect_states
            && self.auto_break_cycles
            && self.uniquify_states
    }

    /// Returns `true` when releasing the last external reference is a plain
    /// atomic decrement that does not need the table lock.
    #[inline]
    #[must_use]
    pub fn lock_free_unref(&self) -> bool {
        self.garbage_collect_states || !self.state_cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StateCacheConfig::default();
        assert!(config.state_cache);
        assert!(config.uniquify_states);
        assert!(!config.garbage_collect_states);
        assert!(config.breaks_cycles_on_unref());
        assert!(!config.lock_free_unref());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            StateCacheConfig::from_json(r#"{ "garbage_collect_states": true, "garbage_collect_states_rate": 0.5 }"#)
                .unwrap();
        assert!(config.garbage_collect_states);
        assert!((config.garbage_collect_states_rate - 0.5).abs() < f32::EPSILON);
        // Untouched fields keep their defaults
        assert!(config.auto_break_cycles);
        assert!(config.lock_free_unref());
        assert!(!config.breaks_cycles_on_unref());
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(StateCacheConfig::from_json("{ not json").is_err());
    }
}
