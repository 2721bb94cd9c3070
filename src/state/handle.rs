//! Render State Handle
//!
//! [`RenderState`] is the shared, immutable face of an interned state. Cloning
//! takes a reference without touching the subsystem lock; dropping releases it
//! and, when it was the last one, removes the state from the table and purges
//! its composition cache edges.
//!
//! Every derivation (`add_attrib`, `compose`, ...) returns a new handle and
//! leaves `self` untouched.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::cache::CacheShared;
use super::{StateCache, StateData, StateKey, StateNode};
use crate::attrib::{AttribRef, RenderAttrib, Slot, SlotMask, downcast};

/// Handle to a canonical render state.
pub struct RenderState {
    key: StateKey,
    node: Arc<StateNode>,
    shared: Arc<CacheShared>,
}

impl RenderState {
    /// Wraps a node whose reference for this handle has already been taken.
    pub(crate) fn from_parts(key: StateKey, node: Arc<StateNode>, shared: Arc<CacheShared>) -> Self {
        Self { key, node, shared }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> StateKey {
        self.key
    }

    /// The attribute bundle.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &StateData {
        &self.node.data
    }

    /// The subsystem this state belongs to.
    #[must_use]
    pub fn cache(&self) -> StateCache {
        StateCache::from_shared(Arc::clone(&self.shared))
    }

    // ─── Queries ───────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.node.data.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn has_attrib(&self, slot: Slot) -> bool {
        self.node.data.get(slot).is_some()
    }

    #[inline]
    #[must_use]
    pub fn attrib(&self, slot: Slot) -> Option<&AttribRef> {
        self.node.data.get(slot).map(|a| &a.attrib)
    }

    /// The attribute in `slot`, downcast to its concrete type.
    #[must_use]
    pub fn attrib_as<T: RenderAttrib>(&self, slot: Slot) -> Option<&T> {
        downcast::<T>(self.attrib(slot)?.as_ref())
    }

    /// Priority of the attribute in `slot`; 0 when the slot is empty.
    #[inline]
    #[must_use]
    pub fn priority(&self, slot: Slot) -> i32 {
        self.node.data.get(slot).map_or(0, |a| a.priority)
    }

    #[inline]
    #[must_use]
    pub fn filled_slots(&self) -> SlotMask {
        self.node.data.filled_slots()
    }

    #[inline]
    #[must_use]
    pub fn num_attribs(&self) -> usize {
        self.node.data.num_attribs()
    }

    /// Content order, as used by the interning table.
    #[must_use]
    pub fn compare_to(&self, other: &RenderState) -> Ordering {
        self.node.data.compare_to(&other.node.data)
    }

    /// Order that groups states sharing expensive-to-switch attributes.
    #[must_use]
    pub fn compare_sort(&self, other: &RenderState) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }
        let sorted = self.shared.registry.sorted_slots();
        self.node.data.compare_sort(&other.node.data, &sorted)
    }

    /// Attribute identity order over the slots in `mask`.
    #[must_use]
    pub fn compare_mask(&self, other: &RenderState, mask: SlotMask) -> Ordering {
        self.node.data.compare_mask(&other.node.data, mask)
    }

    #[inline]
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        self.node.data.content_hash()
    }

    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.node.tracker.ref_count()
    }

    #[inline]
    #[must_use]
    pub fn cache_ref_count(&self) -> u32 {
        self.node.tracker.cache_ref_count()
    }

    /// Index of the cull bin this state draws in.
    #[must_use]
    pub fn bin_index(&self) -> usize {
        self.shared.bin_info(&self.node).bin_index
    }

    /// Draw order within the bin, from an explicit cull bin attribute.
    #[must_use]
    pub fn draw_order(&self) -> i32 {
        self.shared.bin_info(&self.node).draw_order
    }

    // ─── Derivations ───────────────────────────────────────────────────────

    /// Returns a state with `attrib` added at `priority`, unless the slot
    /// already holds an attribute with a strictly higher priority, in which
    /// case `self` is returned.
    #[must_use]
    pub fn add_attrib(&self, attrib: &AttribRef, priority: i32) -> RenderState {
        if let Some(existing) = self.node.data.get(attrib.slot())
            && existing.priority > priority
        {
            return self.clone();
        }
        let mut data = self.node.data.clone();
        data.set(Arc::clone(attrib), priority);
        self.shared.return_new(data)
    }

    /// Replaces the attribute in `attrib`'s slot, keeping the slot's priority.
    #[must_use]
    pub fn set_attrib(&self, attrib: &AttribRef) -> RenderState {
        let mut data = self.node.data.clone();
        data.set_keep_priority(Arc::clone(attrib));
        self.shared.return_new(data)
    }

    #[must_use]
    pub fn set_attrib_with_priority(&self, attrib: &AttribRef, priority: i32) -> RenderState {
        let mut data = self.node.data.clone();
        data.set(Arc::clone(attrib), priority);
        self.shared.return_new(data)
    }

    #[must_use]
    pub fn remove_attrib(&self, slot: Slot) -> RenderState {
        if !self.has_attrib(slot) {
            return self.clone();
        }
        if self.num_attribs() == 1 {
            return self.shared.empty_state();
        }
        let mut data = self.node.data.clone();
        data.clear(slot);
        self.shared.return_new(data)
    }

    /// Adds `delta` to every priority, clamping at zero.
    #[must_use]
    pub fn adjust_all_priorities(&self, delta: i32) -> RenderState {
        let mut data = self.node.data.clone();
        data.adjust_all_priorities(delta);
        self.shared.return_new(data)
    }

    /// Net effect of applying `self` and then `other`.
    #[must_use]
    pub fn compose(&self, other: &RenderState) -> RenderState {
        debug_assert!(Arc::ptr_eq(&self.shared, &other.shared), "states from different caches");
        self.shared.compose(self, other)
    }

    /// The state that, composed after `self`, is equivalent to `other`.
    #[must_use]
    pub fn invert_compose(&self, other: &RenderState) -> RenderState {
        debug_assert!(Arc::ptr_eq(&self.shared, &other.shared), "states from different caches");
        self.shared.invert_compose(self, other)
    }

    /// Multi-line listing of the attributes.
    pub fn write(&self, out: &mut dyn fmt::Write, indent: usize) -> fmt::Result {
        self.node.data.write(out, indent)
    }
}

impl Clone for RenderState {
    fn clone(&self) -> Self {
        self.node.tracker.add_ref();
        Self {
            key: self.key,
            node: Arc::clone(&self.node),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for RenderState {
    fn drop(&mut self) {
        self.shared.release(self.key, &self.node);
    }
}

impl PartialEq for RenderState {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for RenderState {}

impl Hash for RenderState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.node.data, f)
    }
}

impl fmt::Debug for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderState")
            .field("key", &self.key)
            .field("refs", &self.ref_count())
            .field("data", &self.node.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::attrib::{ColorAttrib, DepthWriteAttrib, SlotMask, TransparencyAttrib, TransparencyMode};
    use crate::{StateCache, StateCacheConfig};
    use std::cmp::Ordering;

    #[test]
    fn test_clone_and_drop_track_refs() {
        let cache = StateCache::new(StateCacheConfig::default());
        let depth = cache.registry().make(DepthWriteAttrib::new(false));
        let a = cache.make(&[depth], 0);
        assert_eq!(a.ref_count(), 1);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        drop(b);
        assert_eq!(a.ref_count(), 1);
        assert_eq!(cache.num_states(), 2);
        drop(a);
        assert_eq!(cache.num_states(), 1);
    }

    #[test]
    fn test_typed_access() {
        let cache = StateCache::default();
        let reg = cache.registry();
        let state = cache.make(&[reg.make(TransparencyAttrib::new(TransparencyMode::Dual))], 4);
        let attrib = state.attrib_as::<TransparencyAttrib>(TransparencyAttrib::SLOT).unwrap();
        assert_eq!(attrib.mode(), TransparencyMode::Dual);
        assert_eq!(state.priority(TransparencyAttrib::SLOT), 4);
        assert_eq!(state.priority(ColorAttrib::SLOT), 0);
        assert!(state.attrib_as::<ColorAttrib>(TransparencyAttrib::SLOT).is_none());
    }

    #[test]
    fn test_compare_mask_ignores_other_slots() {
        let cache = StateCache::default();
        let reg = cache.registry();
        let color = reg.make(ColorAttrib::vertex());
        let a = cache.make(&[color.clone(), reg.make(DepthWriteAttrib::new(false))], 0);
        let b = cache.make(&[color, reg.make(DepthWriteAttrib::new(true))], 0);

        let color_only = SlotMask::from_slots(&[ColorAttrib::SLOT]);
        assert_eq!(a.compare_mask(&b, color_only), Ordering::Equal);
        let depth_only = SlotMask::from_slots(&[DepthWriteAttrib::SLOT]);
        assert_ne!(a.compare_mask(&b, depth_only), Ordering::Equal);
    }

    #[test]
    fn test_compare_sort() {
        let cache = StateCache::default();
        let reg = cache.registry();
        let a = cache.make(&[reg.make(TransparencyAttrib::new(TransparencyMode::Alpha))], 0);
        let b = cache.make(&[reg.make(DepthWriteAttrib::new(false))], 0);
        assert_eq!(a.compare_sort(&a.clone()), Ordering::Equal);
        assert_eq!(a.compare_sort(&b), b.compare_sort(&a).reverse());
        assert_ne!(a.compare_sort(&b), Ordering::Equal);
    }

    #[test]
    fn test_display_and_write() {
        let cache = StateCache::default();
        assert_eq!(cache.empty_state().to_string(), "S:(empty)");
        let state = cache.make(&[cache.registry().make(DepthWriteAttrib::new(false))], 2);
        assert_eq!(state.to_string(), "S:(DepthWriteAttrib)");
        let mut out = String::new();
        state.write(&mut out, 0).unwrap();
        assert!(out.contains("priority 2"));
    }
}
