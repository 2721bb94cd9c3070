//! State Cache Service
//!
//! [`StateCache`] owns the whole render-state subsystem: the interning table,
//! the composition caches, the attribute registry and the cull bins. It is a
//! cheap, cloneable handle; every [`RenderState`] it hands out keeps the
//! service alive.
//!
//! All table and cache traffic is serialized by one re-entrant lock. Interning
//! a value may happen while a composition already holds the lock on the same
//! thread, and releasing a cached result may cascade into further releases;
//! the re-entrant lock lets both nest.

use std::any::TypeId;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::FxHashSet;

use super::tables::{CacheKind, Lookup, StateTables};
use super::{BinInfo, CacheStats, RenderState, StateData, StateKey, StateNode};
use crate::attrib::{
    AttribRef, AttribRegistry, CullBinAttrib, Slot, TransparencyAttrib, attrib_type_id, downcast,
    short_type_name,
};
use crate::bins::{BinType, CullBinManager};
use crate::settings::StateCacheConfig;

pub(crate) struct CacheShared {
    pub(crate) config: StateCacheConfig,
    pub(crate) registry: Arc<AttribRegistry>,
    pub(crate) bins: CullBinManager,
    tables: ReentrantMutex<RefCell<StateTables>>,
    empty_key: StateKey,
    empty_node: Arc<StateNode>,
    reported_slotless: Mutex<FxHashSet<TypeId>>,
}

impl CacheShared {
    #[inline]
    fn handle(self: &Arc<Self>, key: StateKey, node: Arc<StateNode>) -> RenderState {
        RenderState::from_parts(key, node, Arc::clone(self))
    }

    pub(crate) fn empty_state(self: &Arc<Self>) -> RenderState {
        // The service holds a permanent reference, so this cannot race a
        // destruction.
        self.empty_node.tracker.add_ref();
        self.handle(self.empty_key, Arc::clone(&self.empty_node))
    }

    // ─── Interning ─────────────────────────────────────────────────────────

    /// Hands a freshly built value back to the caller as a state handle,
    /// interning it unless sharing is disabled.
    pub(crate) fn return_new(self: &Arc<Self>, mut data: StateData) -> RenderState {
        if let Some(stray) = data.clear(Slot::NONE) {
            self.report_slotless(&stray.attrib);
        }
        debug_assert!(data.validate_filled_slots());

        if data.is_empty() {
            return self.empty_state();
        }
        if !self.config.state_cache || !self.config.uniquify_states {
            let guard = self.tables.lock();
            let (key, node) = guard.borrow_mut().insert_unshared(data);
            return self.handle(key, node);
        }
        self.return_unique(data).0
    }

    /// Interns `data`. The flag is `true` when `data` became the canonical
    /// instance.
    pub(crate) fn return_unique(self: &Arc<Self>, mut data: StateData) -> (RenderState, bool) {
        if !self.config.state_cache {
            let guard = self.tables.lock();
            let (key, node) = guard.borrow_mut().insert_unshared(data);
            return (self.handle(key, node), true);
        }
        if self.config.uniquify_attribs && !data.is_empty() {
            data.uniquify_attribs(&self.registry);
        }

        let guard = self.tables.lock();
        if self.config.paranoid_const {
            debug_assert!(guard.borrow().validate());
        }
        let (key, node, inserted) = guard.borrow_mut().intern(data);
        (self.handle(key, node), inserted)
    }

    fn report_slotless(&self, attrib: &AttribRef) {
        if self.reported_slotless.lock().insert(attrib_type_id(attrib.as_ref())) {
            log::error!(
                "{} did not initialize its slot number.",
                short_type_name(attrib.as_ref())
            );
        }
    }

    // ─── Composition ───────────────────────────────────────────────────────

    pub(crate) fn compose(self: &Arc<Self>, a: &RenderState, b: &RenderState) -> RenderState {
        if a.is_empty() {
            return b.clone();
        }
        if b.is_empty() {
            return a.clone();
        }
        if !self.config.state_cache {
            return self.return_new(a.data().compose(b.data()));
        }
        self.cached(CacheKind::Compose, a, b, || a.data().compose(b.data()))
    }

    pub(crate) fn invert_compose(self: &Arc<Self>, a: &RenderState, b: &RenderState) -> RenderState {
        if a.is_empty() {
            return b.clone();
        }
        if a == b {
            return self.empty_state();
        }
        if !self.config.state_cache {
            return self.return_new(a.data().invert_compose(b.data(), &self.registry));
        }
        self.cached(CacheKind::Invert, a, b, || {
            a.data().invert_compose(b.data(), &self.registry)
        })
    }

    /// Memoized `a ∘ b` (or its inverse). The lock is held across the
    /// computation so that concurrent callers agree on one result.
    fn cached(
        self: &Arc<Self>,
        kind: CacheKind,
        a: &RenderState,
        b: &RenderState,
        compute: impl FnOnce() -> StateData,
    ) -> RenderState {
        let guard = self.tables.lock();

        let lookup = guard.borrow_mut().lookup_composition(kind, a.key(), b.key());
        if let Lookup::Hit(result) = lookup {
            let node = guard.borrow().acquire(result);
            if let Some(node) = node {
                return self.handle(result, node);
            }
        }

        // No `RefCell` borrow may be live here: interning re-enters the lock.
        let result = self.return_new(compute());
        let stored = guard
            .borrow_mut()
            .store_composition(kind, a.key(), b.key(), result.key());
        if stored == result.key() {
            return result;
        }
        let node = guard.borrow().acquire(stored);
        match node {
            Some(node) => self.handle(stored, node),
            None => result,
        }
    }

    // ─── Release ───────────────────────────────────────────────────────────

    /// Drops the reference held by a handle.
    pub(crate) fn release(&self, key: StateKey, node: &StateNode) {
        if self.config.lock_free_unref() {
            if node.tracker.release_ref() == 0 {
                let guard = self.tables.lock();
                guard.borrow_mut().destroy(key);
            }
            return;
        }
        let guard = self.tables.lock();
        guard.borrow_mut().unref(key);
    }

    // ─── Bins ──────────────────────────────────────────────────────────────

    pub(crate) fn bin_info(&self, node: &StateNode) -> BinInfo {
        *node.bin.get_or_init(|| self.determine_bin(&node.data))
    }

    fn determine_bin(&self, data: &StateData) -> BinInfo {
        let mut bin_name = "";
        let mut draw_order = 0;
        if let Some(bin) = data
            .get(CullBinAttrib::SLOT)
            .and_then(|a| downcast::<CullBinAttrib>(a.attrib.as_ref()))
        {
            bin_name = bin.bin_name();
            draw_order = bin.draw_order();
        }

        if bin_name.is_empty() {
            let sorted = data
                .get(TransparencyAttrib::SLOT)
                .and_then(|a| downcast::<TransparencyAttrib>(a.attrib.as_ref()))
                .is_some_and(|t| t.mode().needs_sorting());
            bin_name = if sorted { "transparent" } else { "opaque" };
        }

        let bin_index = self.bins.find_bin(bin_name).unwrap_or_else(|| {
            log::warn!("No bin named {bin_name}; creating default bin.");
            self.bins.add_bin(bin_name, BinType::Unsorted, 0)
        });
        BinInfo {
            bin_index,
            draw_order,
        }
    }
}

/// Handle to a render-state subsystem.
///
/// # Example
///
/// ```rust,ignore
/// use myth_state::{StateCache, StateCacheConfig, DepthWriteAttrib, TransparencyAttrib, TransparencyMode};
///
/// let cache = StateCache::new(StateCacheConfig::default());
/// let reg = cache.registry();
///
/// let parent = cache.make(&[reg.make(TransparencyAttrib::new(TransparencyMode::Alpha))], 0);
/// let child = cache.make(&[reg.make(DepthWriteAttrib::new(false))], 0);
/// let net = parent.compose(&child);
/// assert_eq!(net.num_attribs(), 2);
/// ```
#[derive(Clone)]
pub struct StateCache {
    shared: Arc<CacheShared>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new(StateCacheConfig::default())
    }
}

impl fmt::Debug for StateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCache")
            .field("config", &self.shared.config)
            .field("num_states", &self.num_states())
            .finish_non_exhaustive()
    }
}

impl StateCache {
    /// Creates a subsystem with the standard attribute registry.
    #[must_use]
    pub fn new(config: StateCacheConfig) -> Self {
        Self::with_registry(config, Arc::new(AttribRegistry::new()))
    }

    /// Creates a subsystem sharing an existing attribute registry.
    #[must_use]
    pub fn with_registry(config: StateCacheConfig, registry: Arc<AttribRegistry>) -> Self {
        let mut tables = StateTables::new(config);
        // The reference taken here is the service's own and is never released.
        let (empty_key, empty_node, _) = tables.intern(StateData::new());

        let shared = Arc::new(CacheShared {
            config,
            registry,
            bins: CullBinManager::new(),
            tables: ReentrantMutex::new(RefCell::new(tables)),
            empty_key,
            empty_node,
            reported_slotless: Mutex::new(FxHashSet::default()),
        });
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<CacheShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<CacheShared> {
        &self.shared
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &StateCacheConfig {
        &self.shared.config
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<AttribRegistry> {
        &self.shared.registry
    }

    #[inline]
    #[must_use]
    pub fn bin_manager(&self) -> &CullBinManager {
        &self.shared.bins
    }

    // ─── Construction ──────────────────────────────────────────────────────

    /// The state with no attributes.
    #[must_use]
    pub fn empty_state(&self) -> RenderState {
        self.shared.empty_state()
    }

    /// A state holding `attribs`, all at `priority`. An empty slice yields the
    /// empty state.
    #[must_use]
    pub fn make(&self, attribs: &[AttribRef], priority: i32) -> RenderState {
        if attribs.is_empty() {
            return self.empty_state();
        }
        self.shared
            .return_new(StateData::from_attribs(attribs, priority))
    }

    /// A state with every registered slot set to its default attribute.
    #[must_use]
    pub fn make_full_default(&self) -> RenderState {
        let registry = &self.shared.registry;
        let mut data = StateData::new();
        for index in 1..registry.num_slots() {
            if let Some(default) = registry.slot_default(Slot::from_index(index)) {
                data.set(default, 0);
            }
        }
        self.shared.return_new(data)
    }

    /// Returns the canonical instance equal to `state`.
    ///
    /// States built while `uniquify_states` is off are not shared; this
    /// interns them after the fact.
    #[must_use]
    pub fn uniquify(&self, state: &RenderState) -> RenderState {
        if !self.shared.config.state_cache || self.is_interned(state) {
            return state.clone();
        }
        self.shared.return_unique(state.data().clone()).0
    }

    /// Whether `state` is the canonical instance of its value.
    #[must_use]
    pub fn is_interned(&self, state: &RenderState) -> bool {
        self.shared.tables.lock().borrow().is_interned(state.key())
    }

    // ─── Diagnostics & maintenance ─────────────────────────────────────────

    /// Number of canonical states in the interning table.
    #[must_use]
    pub fn num_states(&self) -> usize {
        self.shared.tables.lock().borrow().num_states()
    }

    /// Number of live states, canonical or not.
    #[must_use]
    pub fn num_live_states(&self) -> usize {
        self.shared.tables.lock().borrow().num_records()
    }

    /// Number of states referenced only by the table and composition caches.
    #[must_use]
    pub fn num_unused_states(&self) -> usize {
        self.shared.tables.lock().borrow().num_unused_states()
    }

    /// Empties every composition cache, freeing states only the caches kept
    /// alive. Returns the number of canonical states freed.
    pub fn clear_cache(&self) -> usize {
        self.shared.tables.lock().borrow_mut().clear_cache()
    }

    /// Runs one incremental pass of the state collector (in deferred
    /// reclamation mode) and frees pooled attributes no state uses anymore.
    /// Returns the number of states and attributes freed.
    pub fn garbage_collect(&self) -> usize {
        let states = self.shared.tables.lock().borrow_mut().garbage_collect();
        states + self.shared.registry.garbage_collect()
    }

    /// Writes every composition cycle found among the canonical states and
    /// returns how many there are.
    pub fn list_cycles(&self, out: &mut dyn fmt::Write) -> Result<usize, fmt::Error> {
        self.shared.tables.lock().borrow_mut().list_cycles(out)
    }

    /// Writes every canonical state.
    pub fn list_states(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.shared.tables.lock().borrow().list_states(out)
    }

    /// Checks the interning table for internal consistency, logging the first
    /// problem found.
    #[must_use]
    pub fn validate_states(&self) -> bool {
        self.shared.tables.lock().borrow().validate()
    }

    /// Snapshot of the composition cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.shared.tables.lock().borrow().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrib::{ColorAttrib, DepthWriteAttrib, MAX_SLOTS, RenderAttrib};
    use std::cmp::Ordering;

    #[derive(Debug)]
    struct Unregistered;

    impl RenderAttrib for Unregistered {
        fn slot(&self) -> Slot {
            Slot::NONE
        }

        fn compare_to(&self, _other: &dyn RenderAttrib) -> Ordering {
            Ordering::Equal
        }
    }

    #[test]
    fn test_empty_state_is_unique() {
        let cache = StateCache::default();
        let a = cache.empty_state();
        let b = cache.make(&[], 0);
        assert_eq!(a, b);
        assert!(a.is_empty());
        assert_eq!(cache.num_states(), 1);
    }

    #[test]
    fn test_slot_zero_is_stripped() {
        let cache = StateCache::default();
        let stray: AttribRef = Arc::new(Unregistered);
        let state = cache.make(&[stray], 3);
        assert!(state.is_empty());
        assert_eq!(state, cache.empty_state());

        let stray: AttribRef = Arc::new(Unregistered);
        let depth = cache.registry().make(DepthWriteAttrib::new(false));
        let state = cache.make(&[stray, depth], 0);
        assert_eq!(state.num_attribs(), 1);
        assert!(!state.has_attrib(Slot::NONE));
    }

    #[test]
    fn test_make_full_default() {
        let cache = StateCache::default();
        let state = cache.make_full_default();
        assert_eq!(state.num_attribs(), cache.registry().num_slots() - 1);
        assert!(state.num_attribs() < MAX_SLOTS);
        assert_eq!(state, cache.make_full_default());
    }

    #[test]
    fn test_uniquify_after_the_fact() {
        let config = StateCacheConfig {
            uniquify_states: false,
            ..Default::default()
        };
        let cache = StateCache::new(config);
        let color = cache.registry().make(ColorAttrib::vertex());
        let a = cache.make(&[color.clone()], 0);
        let b = cache.make(&[color], 0);
        assert_ne!(a, b);
        assert!(!cache.is_interned(&a));

        let ua = cache.uniquify(&a);
        let ub = cache.uniquify(&b);
        assert_eq!(ua, ub);
        assert!(cache.is_interned(&ua));
        assert_eq!(cache.uniquify(&ua), ua);
    }

    #[test]
    fn test_cache_disabled_still_composes() {
        let config = StateCacheConfig {
            state_cache: false,
            ..Default::default()
        };
        let cache = StateCache::new(config);
        let reg = cache.registry();
        let a = cache.make(&[reg.make(ColorAttrib::vertex())], 0);
        let b = cache.make(&[reg.make(DepthWriteAttrib::new(false))], 0);
        let ab = a.compose(&b);
        assert_eq!(ab.num_attribs(), 2);
        // Nothing is shared or memoized.
        assert_ne!(ab, a.compose(&b));
        assert_eq!(cache.cache_stats().misses, 0);
        drop(ab);
        assert_eq!(cache.num_live_states(), 3);
    }

    #[test]
    fn test_bin_resolution() {
        let cache = StateCache::default();
        let reg = cache.registry();
        let opaque = cache.bin_manager().find_bin("opaque").unwrap();
        let transparent = cache.bin_manager().find_bin("transparent").unwrap();

        assert_eq!(cache.empty_state().bin_index(), opaque);

        let alpha = cache.make(
            &[reg.make(TransparencyAttrib::new(crate::attrib::TransparencyMode::Alpha))],
            0,
        );
        assert_eq!(alpha.bin_index(), transparent);

        let explicit = cache.make(&[reg.make(CullBinAttrib::new("overlay", 7))], 0);
        assert!(cache.bin_manager().find_bin("overlay").is_none());
        let index = explicit.bin_index();
        assert_eq!(cache.bin_manager().find_bin("overlay"), Some(index));
        assert_eq!(explicit.draw_order(), 7);
    }
}
