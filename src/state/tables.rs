//! State Tables
//!
//! [`StateTables`] is everything the subsystem lock protects: the arena of
//! state records, the interning table, the cycle-detection generation counter,
//! the garbage collector cursor and the cache statistics.
//!
//! Every method runs with the lock held and with the `RefCell` mutably
//! borrowed, so nothing in here may drop a [`RenderState`](super::RenderState)
//! handle. Cache edges are [`StateKey`]s and are released through
//! [`StateTables::cache_unref`], never through handles.
//!
//! Releases that cascade (a destroyed state dropping the cache references on
//! its results) are queued and settled in a loop, as is the cycle search, so
//! the depth of a result chain never turns into stack depth.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::stats::CacheStats;
use super::table::StateTable;
use super::{StateData, StateKey, StateNode};
use crate::attrib::Slot;
use crate::settings::StateCacheConfig;

/// Which of the two composition caches an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Compose,
    Invert,
}

/// One cache entry. `None` is the placeholder mirrored into the partner's
/// cache until that direction is computed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Composition {
    pub result: Option<StateKey>,
}

/// Outcome of a composition cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The result is cached.
    Hit(StateKey),
    /// An entry exists but holds only the mirrored placeholder.
    Placeholder,
    /// No entry; a new pair of entries will be created.
    Miss,
}

/// One edge of a reported cycle: `state ∘ other = result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStep {
    pub other: StateKey,
    pub result: StateKey,
    pub inverted: bool,
}

type CompositionCache = FxHashMap<StateKey, Composition>;

/// Direction a cycle search follows: a state's own cached results, or the
/// results its partners cached for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Forward,
    Reverse,
}

/// Follow-up work from releasing references, drained by
/// [`StateTables::settle`].
#[derive(Debug, Default)]
struct Released {
    /// States whose reference count reached zero.
    doomed: Vec<StateKey>,
    /// States left with only cache references.
    suspects: Vec<StateKey>,
}

pub(crate) struct StateRecord {
    pub(crate) node: Arc<StateNode>,
    /// Index in the interning table, if the state is canonical.
    pub(crate) saved_entry: Option<usize>,
    composition_cache: CompositionCache,
    invert_composition_cache: CompositionCache,
    cycle_detect: u64,
}

impl StateRecord {
    fn new(node: Arc<StateNode>) -> Self {
        Self {
            node,
            saved_entry: None,
            composition_cache: CompositionCache::default(),
            invert_composition_cache: CompositionCache::default(),
            cycle_detect: 0,
        }
    }

    #[inline]
    fn cache(&self, kind: CacheKind) -> &CompositionCache {
        match kind {
            CacheKind::Compose => &self.composition_cache,
            CacheKind::Invert => &self.invert_composition_cache,
        }
    }

    #[inline]
    fn cache_mut(&mut self, kind: CacheKind) -> &mut CompositionCache {
        match kind {
            CacheKind::Compose => &mut self.composition_cache,
            CacheKind::Invert => &mut self.invert_composition_cache,
        }
    }

    /// Cached results, forward cache first.
    fn result_edges(&self) -> SmallVec<[CycleStep; 8]> {
        let forward = self.composition_cache.iter().map(|(&other, c)| (other, c, false));
        let inverse = self.invert_composition_cache.iter().map(|(&other, c)| (other, c, true));
        forward
            .chain(inverse)
            .filter_map(|(other, comp, inverted)| {
                comp.result.map(|result| CycleStep {
                    other,
                    result,
                    inverted,
                })
            })
            .collect()
    }
}

pub(crate) struct StateTables {
    records: SlotMap<StateKey, StateRecord>,
    table: StateTable,
    last_cycle_detect: u64,
    garbage_index: usize,
    pub(crate) stats: CacheStats,
    config: StateCacheConfig,
}

impl StateTables {
    pub(crate) fn new(config: StateCacheConfig) -> Self {
        Self {
            records: SlotMap::with_key(),
            table: StateTable::new(),
            last_cycle_detect: 0,
            garbage_index: 0,
            stats: CacheStats::default(),
            config,
        }
    }

    // ─── Records ───────────────────────────────────────────────────────────

    #[inline]
    pub(crate) fn node(&self, key: StateKey) -> Option<&Arc<StateNode>> {
        self.records.get(key).map(|r| &r.node)
    }

    #[inline]
    pub(crate) fn is_interned(&self, key: StateKey) -> bool {
        self.records.get(key).is_some_and(|r| r.saved_entry.is_some())
    }

    /// Number of canonical states.
    #[inline]
    pub(crate) fn num_states(&self) -> usize {
        self.table.len()
    }

    /// Number of live states, canonical or not.
    #[inline]
    pub(crate) fn num_records(&self) -> usize {
        self.records.len()
    }

    /// Takes a reference on `key` for a new handle.
    pub(crate) fn acquire(&self, key: StateKey) -> Option<Arc<StateNode>> {
        let node = self.node(key)?;
        node.tracker.add_ref();
        Some(Arc::clone(node))
    }

    fn sync_num_states(&mut self) {
        self.stats.num_states = self.table.len() as u64;
    }

    // ─── Interning ─────────────────────────────────────────────────────────

    /// Registers a state that is not shared through the table.
    pub(crate) fn insert_unshared(&mut self, data: StateData) -> (StateKey, Arc<StateNode>) {
        let node = Arc::new(StateNode::new(data));
        node.tracker.add_ref();
        let key = self.records.insert(StateRecord::new(Arc::clone(&node)));
        (key, node)
    }

    /// Returns the canonical state equal to `data`, inserting `data` as the
    /// canonical instance if none exists. The returned node carries a new
    /// reference for the caller's handle; the flag is `true` when `data`
    /// became the canonical instance.
    pub(crate) fn intern(&mut self, data: StateData) -> (StateKey, Arc<StateNode>, bool) {
        let hash = data.content_hash();
        let records = &self.records;
        let existing = self.table.find(hash, |key| {
            records
                .get(key)
                .is_some_and(|r| r.node.data.compare_to(&data) == Ordering::Equal)
        });
        if let Some(key) = existing {
            let node = &self.records[key].node;
            node.tracker.add_ref();
            return (key, Arc::clone(node), false);
        }

        let node = Arc::new(StateNode::new(data));
        if self.config.garbage_collect_states {
            // The table keeps the state alive until the collector visits it.
            node.tracker.add_cache_ref();
        }
        node.tracker.add_ref();
        let key = self.records.insert(StateRecord::new(Arc::clone(&node)));
        let index = self.table.insert(hash, key);
        self.records[key].saved_entry = Some(index);
        self.sync_num_states();
        (key, node, true)
    }

    // ─── Reference counting ────────────────────────────────────────────────

    /// Drops one reference. Returns `true` while the state is still alive.
    pub(crate) fn unref(&mut self, key: StateKey) -> bool {
        let mut work = Released::default();
        self.release_one(key, &mut work);
        self.settle(work);
        self.records.contains_key(key)
    }

    #[inline]
    pub(crate) fn cache_ref(&self, key: StateKey) {
        if let Some(node) = self.node(key) {
            node.tracker.add_cache_ref();
        }
    }

    pub(crate) fn cache_unref(&mut self, key: StateKey) -> bool {
        let mut work = Released::default();
        self.release_cached(key, &mut work);
        self.settle(work);
        self.records.contains_key(key)
    }

    /// Removes a state whose reference count reached zero.
    pub(crate) fn destroy(&mut self, key: StateKey) {
        self.settle(Released {
            doomed: vec![key],
            suspects: Vec::new(),
        });
    }

    /// Drops one reference and queues whatever follow-up work it causes.
    fn release_one(&self, key: StateKey, work: &mut Released) {
        let Some(tracker) = self.node(key).map(|n| &n.tracker) else {
            debug_assert!(false, "unref of a destroyed state");
            return;
        };
        let remaining = tracker.release_ref();
        if remaining == 0 {
            work.doomed.push(key);
        } else if self.config.breaks_cycles_on_unref() && tracker.cache_ref_count() == remaining {
            // The last reference not held by a cache just went away.
            work.suspects.push(key);
        }
    }

    fn release_cached(&self, key: StateKey, work: &mut Released) {
        let Some(node) = self.node(key) else {
            debug_assert!(false, "cache_unref of a destroyed state");
            return;
        };
        node.tracker.release_cache_ref_only();
        self.release_one(key, work);
    }

    /// Runs queued destructions and cycle checks until none are left. Purging
    /// one state's caches may release the last reference on its results, which
    /// join the queue instead of being destroyed recursively.
    fn settle(&mut self, mut work: Released) {
        loop {
            if let Some(key) = work.doomed.pop() {
                self.release_new(key);
                self.purge_cache_edges(key, &mut work);
                if let Some(record) = self.records.remove(key) {
                    debug_assert_eq!(record.node.tracker.ref_count(), 0);
                    debug_assert_eq!(record.node.tracker.cache_ref_count(), 0);
                }
            } else if let Some(key) = work.suspects.pop() {
                if self.node(key).is_some_and(|n| n.tracker.only_cache_refs()) {
                    self.break_cycles(key, &mut work);
                }
            } else {
                break;
            }
        }
    }

    /// Takes `key` out of the interning table.
    pub(crate) fn release_new(&mut self, key: StateKey) {
        let Some(record) = self.records.get_mut(key) else {
            return;
        };
        let Some(index) = record.saved_entry.take() else {
            return;
        };
        let hash = record.node.data.content_hash();
        if let Some(moved) = self.table.remove(index, hash)
            && let Some(moved) = self.records.get_mut(moved)
        {
            moved.saved_entry = Some(index);
        }
        self.sync_num_states();
    }

    /// Removes every composition cache edge from and to `key`, releasing the
    /// cache references held on the results.
    fn purge_cache_edges(&mut self, key: StateKey, work: &mut Released) {
        for kind in [CacheKind::Compose, CacheKind::Invert] {
            let Some(record) = self.records.get_mut(key) else {
                return;
            };
            let cache = std::mem::take(record.cache_mut(kind));

            for (other, comp) in cache {
                self.stats.inc_dels();

                if other != key
                    && let Some(partner) = self.records.get_mut(other)
                    && let Some(mirror) = partner.cache_mut(kind).remove(&key)
                {
                    self.stats.inc_dels();
                    if let Some(result) = mirror.result
                        && result != other
                    {
                        self.release_cached(result, work);
                    }
                }

                if let Some(result) = comp.result
                    && result != key
                {
                    self.release_cached(result, work);
                }
            }
        }
    }

    // ─── Composition caches ────────────────────────────────────────────────

    pub(crate) fn lookup_composition(&mut self, kind: CacheKind, a: StateKey, b: StateKey) -> Lookup {
        let entry = self
            .records
            .get(a)
            .and_then(|r| r.cache(kind).get(&b).copied());
        match entry {
            Some(Composition { result: Some(result) }) => {
                self.stats.inc_hits();
                Lookup::Hit(result)
            }
            Some(Composition { result: None }) => {
                self.stats.inc_hits();
                Lookup::Placeholder
            }
            None => {
                self.stats.inc_misses();
                Lookup::Miss
            }
        }
    }

    /// Records `a ∘ b = result` (or its inverse) and mirrors a placeholder
    /// into `b`'s cache.
    ///
    /// Returns the key that is now cached, which is an earlier result if one
    /// was stored in the meantime.
    pub(crate) fn store_composition(
        &mut self,
        kind: CacheKind,
        a: StateKey,
        b: StateKey,
        result: StateKey,
    ) -> StateKey {
        let Some(record) = self.records.get_mut(a) else {
            return result;
        };
        let was_empty = record.cache(kind).is_empty();
        match record.cache_mut(kind).entry(b) {
            Entry::Occupied(mut entry) => {
                if let Some(existing) = entry.get().result {
                    return existing;
                }
                entry.get_mut().result = Some(result);
            }
            Entry::Vacant(entry) => {
                entry.insert(Composition {
                    result: Some(result),
                });
                self.stats.inc_adds(was_empty);

                if b != a
                    && let Some(partner) = self.records.get_mut(b)
                {
                    let partner_empty = partner.cache(kind).is_empty();
                    if let Entry::Vacant(mirror) = partner.cache_mut(kind).entry(a) {
                        mirror.insert(Composition::default());
                        self.stats.inc_adds(partner_empty);
                    }
                }
            }
        }

        // A state caching itself as its own result holds no reference on it.
        if result != a {
            self.cache_ref(result);
        }

        if self.config.cache_report {
            let interval = Duration::from_secs_f32(self.config.cache_report_interval.max(0.0));
            self.stats.maybe_report("RenderState", interval);
        }
        result
    }

    // ─── Cycle detection ───────────────────────────────────────────────────

    fn next_cycle_generation(&mut self) -> u64 {
        self.last_cycle_detect += 1;
        self.last_cycle_detect
    }

    /// Breaks a cache cycle through `key`, if there is one, by purging
    /// `key`'s cache edges.
    pub(crate) fn detect_and_break_cycles(&mut self, key: StateKey) {
        let mut work = Released::default();
        self.break_cycles(key, &mut work);
        self.settle(work);
    }

    fn break_cycles(&mut self, key: StateKey, work: &mut Released) {
        let found = self.find_cycle(key, Walk::Forward, None) || self.find_cycle(key, Walk::Reverse, None);
        if found {
            if log::log_enabled!(log::Level::Debug)
                && let Some(node) = self.node(key)
            {
                log::debug!("Breaking cycle involving {key:?} {}", node.data);
            }
            self.purge_cache_edges(key, work);
        }
    }

    /// Edges leaving `key` in the given direction.
    fn cycle_edges(&self, key: StateKey, walk: Walk) -> SmallVec<[CycleStep; 8]> {
        let Some(record) = self.records.get(key) else {
            return SmallVec::new();
        };
        match walk {
            Walk::Forward => record.result_edges(),
            Walk::Reverse => record
                .composition_cache
                .keys()
                .map(|&other| (other, CacheKind::Compose))
                .chain(
                    record
                        .invert_composition_cache
                        .keys()
                        .map(|&other| (other, CacheKind::Invert)),
                )
                .filter(|&(other, _)| other != key)
                .filter_map(|(other, kind)| {
                    let result = self.records.get(other)?.cache(kind).get(&key)?.result?;
                    Some(CycleStep {
                        other,
                        result,
                        inverted: kind == CacheKind::Invert,
                    })
                })
                .collect(),
        }
    }

    /// Depth-first search along `walk` edges for a path from `start` back to
    /// itself. `start` counts as length 1, and only paths longer than 2 are
    /// cycles. On success `desc` receives the path, innermost step first.
    ///
    /// The path lives on an explicit stack; result chains can be arbitrarily
    /// long.
    fn find_cycle(&mut self, start: StateKey, walk: Walk, mut desc: Option<&mut Vec<CycleStep>>) -> bool {
        let generation = self.next_cycle_generation();
        let Some(record) = self.records.get_mut(start) else {
            return false;
        };
        record.cycle_detect = generation;

        let mut path: Vec<(SmallVec<[CycleStep; 8]>, usize)> = vec![(self.cycle_edges(start, walk), 0)];
        loop {
            let length = path.len() + 1;
            let Some((edges, next)) = path.last_mut() else {
                return false;
            };
            let Some(&step) = edges.get(*next) else {
                path.pop();
                continue;
            };
            *next += 1;

            let Some(record) = self.records.get_mut(step.result) else {
                continue;
            };
            if record.cycle_detect == generation {
                // A self-loop (length 2) is not a leak.
                if step.result == start && length > 2 {
                    if let Some(desc) = desc.as_mut() {
                        desc.extend(path.iter().rev().map(|(edges, next)| edges[*next - 1]));
                    }
                    return true;
                }
                continue;
            }
            record.cycle_detect = generation;
            path.push((self.cycle_edges(step.result, walk), 0));
        }
    }

    // ─── Maintenance ───────────────────────────────────────────────────────

    /// Visits `rate × size` table entries starting where the previous pass
    /// stopped, deleting those only the table still references. Returns the
    /// number of states freed.
    pub(crate) fn garbage_collect(&mut self) -> usize {
        if !self.config.garbage_collect_states {
            return 0;
        }
        let orig_size = self.table.len();
        let num_this_pass = (orig_size as f32 * self.config.garbage_collect_states_rate) as usize;
        if num_this_pass == 0 {
            return 0;
        }
        let check_cycles = self.config.auto_break_cycles && self.config.uniquify_states;

        let mut si = if self.garbage_index >= orig_size {
            0
        } else {
            self.garbage_index
        };
        let mut remaining = num_this_pass.min(orig_size);

        while remaining > 0 && !self.table.is_empty() {
            if si >= self.table.len() {
                si = 0;
            }
            let Some(key) = self.table.get(si) else {
                break;
            };
            let Some(node) = self.node(key).cloned() else {
                break;
            };

            if check_cycles && node.tracker.only_cache_refs() {
                self.detect_and_break_cycles(key);
            }

            if node.tracker.release_if_last() {
                // Only the table held it. Deleting swaps the last entry into
                // `si`, which is visited next.
                node.tracker.release_cache_ref_only();
                self.destroy(key);
            } else {
                si += 1;
            }
            remaining -= 1;
        }

        self.garbage_index = if si >= self.table.len() { 0 } else { si };
        orig_size.saturating_sub(self.table.len())
    }

    /// Empties every composition cache. Returns the number of canonical states
    /// freed as a result.
    pub(crate) fn clear_cache(&mut self) -> usize {
        let orig_size = self.table.len();

        // Temporary references keep every state alive until all caches are
        // empty; only then do the releases cascade.
        let keys: Vec<StateKey> = self.records.keys().collect();
        for &key in &keys {
            if let Some(node) = self.node(key) {
                node.tracker.add_ref();
            }
        }

        for &key in &keys {
            let Some(record) = self.records.get_mut(key) else {
                continue;
            };
            let forward = std::mem::take(&mut record.composition_cache);
            let inverse = std::mem::take(&mut record.invert_composition_cache);
            for comp in forward.values().chain(inverse.values()) {
                self.stats.inc_dels();
                if let Some(result) = comp.result
                    && result != key
                {
                    self.cache_unref(result);
                    debug_assert!(self.node(result).is_some_and(|n| n.tracker.ref_count() > 0));
                }
            }
        }

        for key in keys {
            self.unref(key);
        }
        orig_size.saturating_sub(self.table.len())
    }

    /// Counts states referenced only by the table and by composition caches.
    pub(crate) fn num_unused_states(&self) -> usize {
        let mut counts: FxHashMap<StateKey, u32> = FxHashMap::default();

        if self.config.garbage_collect_states {
            for key in self.table.keys() {
                *counts.entry(key).or_default() += 1;
            }
        }
        for (key, record) in &self.records {
            for edge in record.result_edges() {
                if edge.result != key {
                    *counts.entry(edge.result).or_default() += 1;
                }
            }
        }

        let mut num_unused = 0;
        for (key, count) in counts {
            let Some(node) = self.node(key) else {
                continue;
            };
            debug_assert_eq!(count, node.tracker.cache_ref_count());
            debug_assert!(count <= node.tracker.ref_count());
            if count == node.tracker.ref_count() {
                num_unused += 1;
                log::debug!("Unused state: {key:?}:{} = {}", node.tracker.ref_count(), node.data);
            }
        }
        num_unused
    }

    /// Checks table bookkeeping and comparator consistency.
    pub(crate) fn validate(&self) -> bool {
        if self.table.is_empty() {
            return true;
        }
        if self.table.bucketed_len() != self.table.len() {
            log::error!("State table is invalid: hash buckets disagree with the entry list");
            return false;
        }

        for (index, key) in self.table.keys().enumerate() {
            let Some(record) = self.records.get(key) else {
                log::error!("State table entry {index} refers to a destroyed state");
                return false;
            };
            if record.saved_entry != Some(index) {
                log::error!("State {key:?} records table index {:?}, stored at {index}", record.saved_entry);
                return false;
            }
            if !record.node.data.validate_filled_slots() || record.node.data.get(Slot::NONE).is_some() {
                log::error!("State {key:?} has inconsistent filled slots");
                return false;
            }
        }

        let keys: Vec<StateKey> = self.table.keys().collect();
        for pair in keys.windows(2) {
            let a = &self.records[pair[0]].node.data;
            let b = &self.records[pair[1]].node.data;
            let c = a.compare_to(b);
            let ci = b.compare_to(a);
            if c != ci.reverse() {
                log::error!("RenderState::compare_to() not defined properly!\n(a, b): {c:?}\n(b, a): {ci:?}\na = {a}\nb = {b}");
                return false;
            }
            if c == Ordering::Equal {
                log::error!("Two canonical states compare equal: {a} and {b}");
                return false;
            }
        }
        true
    }

    /// Writes every canonical state.
    pub(crate) fn list_states(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{} states:", self.table.len())?;
        for key in self.table.keys() {
            if let Some(node) = self.node(key) {
                node.data.write(out, 2)?;
            }
        }
        Ok(())
    }

    /// Writes a description of every composition cycle reachable from a
    /// canonical state. Returns the number of cycles found.
    pub(crate) fn list_cycles(&mut self, out: &mut dyn fmt::Write) -> Result<usize, fmt::Error> {
        let keys: Vec<StateKey> = self.table.keys().collect();
        let mut visited: FxHashSet<StateKey> = FxHashSet::default();
        let mut desc: Vec<CycleStep> = Vec::new();
        let mut num_cycles = 0;

        for key in keys {
            if !visited.insert(key) {
                continue;
            }

            if self.find_cycle(key, Walk::Forward, Some(&mut desc)) {
                num_cycles += 1;
                writeln!(out, "\nCycle detected of length {}:", desc.len() + 1)?;
                self.write_state(out, key)?;
                for step in desc.iter().rev() {
                    let verb = if step.inverted { "invert composed with" } else { "composed with" };
                    writeln!(out, "{verb} {}", self.describe(step.other))?;
                    write!(out, "produces ")?;
                    self.write_state(out, step.result)?;
                    visited.insert(step.result);
                }
                desc.clear();
                continue;
            }

            if self.find_cycle(key, Walk::Reverse, Some(&mut desc)) {
                num_cycles += 1;
                writeln!(out, "\nReverse cycle detected of length {}:", desc.len() + 1)?;
                for step in &desc {
                    self.write_state(out, step.result)?;
                    self.write_state(out, step.other)?;
                    visited.insert(step.result);
                }
                self.write_state(out, key)?;
                desc.clear();
            }
        }
        Ok(num_cycles)
    }

    fn describe(&self, key: StateKey) -> String {
        match self.node(key) {
            Some(node) => format!("{key:?}:{} {}", node.tracker.ref_count(), node.data),
            None => format!("{key:?}:<destroyed>"),
        }
    }

    fn write_state(&self, out: &mut dyn fmt::Write, key: StateKey) -> fmt::Result {
        writeln!(out, "state {} =", self.describe(key))?;
        match self.node(key) {
            Some(node) => node.data.write(out, 2),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrib::{AttribRegistry, ColorAttrib, DepthWriteAttrib};

    fn data(registry: &AttribRegistry, depth: bool) -> StateData {
        StateData::from_attribs(&[registry.make(DepthWriteAttrib::new(depth))], 0)
    }

    #[test]
    fn test_intern_shares_equal_data() {
        let registry = AttribRegistry::new();
        let mut tables = StateTables::new(StateCacheConfig::default());
        let (a, node, inserted) = tables.intern(data(&registry, false));
        assert!(inserted);
        let (b, _, inserted) = tables.intern(data(&registry, false));
        assert!(!inserted);
        let (c, _, _) = tables.intern(data(&registry, true));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(node.tracker.ref_count(), 2);
        assert_eq!(tables.num_states(), 2);
        assert!(tables.validate());
    }

    #[test]
    fn test_unref_to_zero_removes_from_table() {
        let registry = AttribRegistry::new();
        let mut tables = StateTables::new(StateCacheConfig::default());
        let (a, _, _) = tables.intern(data(&registry, false));
        let (b, _, _) = tables.intern(data(&registry, true));
        assert!(!tables.unref(a));
        assert_eq!(tables.num_states(), 1);
        // The swapped entry keeps a valid index.
        assert!(tables.is_interned(b));
        assert!(tables.validate());
    }

    #[test]
    fn test_store_composition_mirrors_placeholder() {
        let registry = AttribRegistry::new();
        let mut tables = StateTables::new(StateCacheConfig::default());
        let (a, _, _) = tables.intern(data(&registry, false));
        let (b, _, _) = tables.intern(StateData::from_attribs(&[registry.make(ColorAttrib::vertex())], 0));
        let (r, r_node, _) = tables.intern(data(&registry, true));

        assert_eq!(tables.lookup_composition(CacheKind::Compose, a, b), Lookup::Miss);
        assert_eq!(tables.store_composition(CacheKind::Compose, a, b, r), r);
        assert_eq!(tables.lookup_composition(CacheKind::Compose, a, b), Lookup::Hit(r));
        assert_eq!(tables.lookup_composition(CacheKind::Compose, b, a), Lookup::Placeholder);
        assert_eq!(tables.lookup_composition(CacheKind::Invert, a, b), Lookup::Miss);
        assert_eq!(r_node.tracker.cache_ref_count(), 1);
        assert_eq!(tables.num_unused_states(), 0);

        // Dropping `a` purges both entries and the cache reference on `r`.
        tables.unref(a);
        assert_eq!(tables.lookup_composition(CacheKind::Compose, b, a), Lookup::Miss);
        assert_eq!(r_node.tracker.cache_ref_count(), 0);
        assert_eq!(r_node.tracker.ref_count(), 1);
    }
}
