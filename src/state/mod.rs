//! Render States
//!
//! A render state is the complete, immutable bundle of render attributes
//! applied to a drawable. States are interned: value-equal states share one
//! canonical node, so comparing two [`RenderState`] handles is a key
//! comparison.
//!
//! # Architecture
//!
//! ```text
//! StateCache (service handle)
//!     └── ReentrantMutex<RefCell<StateTables>>
//!             ├── SlotMap<StateKey, StateRecord>   ← arena of every live state
//!             │       ├── Arc<StateNode>           ← data + ref counts, shared with handles
//!             │       ├── composition cache        ← other → result (keys, not pointers)
//!             │       └── invert composition cache
//!             └── StateTable                       ← canonical set (hash buckets + dense index)
//! ```
//!
//! Handles read their [`StateData`] through the shared node without taking
//! the lock. Everything that touches the table or a cache runs under the
//! subsystem lock.

pub mod cache;
pub mod data;
pub mod handle;
pub mod stats;
pub mod table;
pub mod tables;
pub mod tracker;

use std::sync::OnceLock;

pub use cache::StateCache;
pub use data::{Attribute, StateData};
pub use handle::RenderState;
pub use stats::CacheStats;
pub use tracker::RefTracker;

/// Highest priority any attribute can meaningfully carry.
pub const MAX_PRIORITY: i32 = 1_000_000_000;

slotmap::new_key_type! {
    /// Arena key of an interned render state.
    pub struct StateKey;
}

/// Cull bin a state draws in, resolved once per state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinInfo {
    pub bin_index: usize,
    pub draw_order: i32,
}

/// The shared, frozen part of an interned state.
#[derive(Debug)]
pub struct StateNode {
    pub(crate) data: StateData,
    pub(crate) tracker: RefTracker,
    pub(crate) bin: OnceLock<BinInfo>,
}

impl StateNode {
    pub(crate) fn new(data: StateData) -> Self {
        // The table locates its entry by this hash.
        let _ = data.content_hash();
        Self {
            data,
            tracker: RefTracker::new(),
            bin: OnceLock::new(),
        }
    }
}
