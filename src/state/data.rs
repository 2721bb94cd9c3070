//! State Value Contents
//!
//! [`StateData`] is the mutable, uniquely owned *candidate* form of a render
//! state: at most one [`Attribute`] per slot plus a filled-slot mask. Every
//! derivation builds a fresh `StateData` and hands it to the state cache,
//! which either discards it in favour of an equal canonical value or freezes
//! it behind a [`RenderState`](crate::RenderState) handle. Once frozen, no
//! mutating method is reachable.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use rustc_hash::FxHasher;

use crate::attrib::{
    AttribRef, AttribRegistry, MAX_SLOTS, Slot, SlotMask, attrib_addr, compare_attribs,
    short_type_name,
};

/// An attribute placed in a slot, together with its override priority.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub attrib: AttribRef,
    pub priority: i32,
}

impl Attribute {
    #[inline]
    #[must_use]
    pub fn new(attrib: AttribRef, priority: i32) -> Self {
        Self { attrib, priority }
    }

    /// Identity order: attribute value first, then address, then priority.
    /// Two entries are equal only if they share the attribute allocation.
    #[must_use]
    pub fn compare_to(&self, other: &Self) -> Ordering {
        compare_attribs(&self.attrib, &other.attrib)
            .then_with(|| attrib_addr(&self.attrib).cmp(&attrib_addr(&other.attrib)))
            .then(self.priority.cmp(&other.priority))
    }
}

/// Compares two optional slot entries; an empty slot sorts first.
fn compare_entries(a: Option<&Attribute>, b: Option<&Attribute>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.compare_to(b),
    }
}

#[inline]
fn entry_addr(entry: Option<&Attribute>) -> usize {
    entry.map_or(0, |a| attrib_addr(&a.attrib))
}

/// Attribute bundle indexed by slot.
pub struct StateData {
    attributes: [Option<Attribute>; MAX_SLOTS],
    filled_slots: SlotMask,
    hash: OnceLock<u64>,
}

impl Default for StateData {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateData {
    fn clone(&self) -> Self {
        // The clone is about to be modified; its hash is recomputed on demand.
        Self {
            attributes: self.attributes.clone(),
            filled_slots: self.filled_slots,
            hash: OnceLock::new(),
        }
    }
}

impl StateData {
    #[must_use]
    pub fn new() -> Self {
        Self {
            attributes: std::array::from_fn(|_| None),
            filled_slots: SlotMask::EMPTY,
            hash: OnceLock::new(),
        }
    }

    /// Builds a candidate holding `attribs`, all at the same priority.
    /// A later attribute replaces an earlier one in the same slot.
    #[must_use]
    pub fn from_attribs(attribs: &[AttribRef], priority: i32) -> Self {
        let mut data = Self::new();
        for attrib in attribs {
            data.set(attrib.clone(), priority);
        }
        data
    }

    // ─── Mutation (candidate phase only) ───────────────────────────────────

    /// Places `attrib` in its own slot with `priority`.
    pub fn set(&mut self, attrib: AttribRef, priority: i32) {
        let slot = attrib.slot();
        self.put(slot, Attribute::new(attrib, priority));
    }

    /// Places `attrib` in its slot, keeping the priority already there.
    pub fn set_keep_priority(&mut self, attrib: AttribRef) {
        let slot = attrib.slot();
        let priority = self.get(slot).map_or(0, |a| a.priority);
        self.put(slot, Attribute::new(attrib, priority));
    }

    fn put(&mut self, slot: Slot, attribute: Attribute) {
        self.attributes[slot.index()] = Some(attribute);
        self.filled_slots.set_bit(slot);
        self.hash = OnceLock::new();
    }

    /// Empties `slot`, returning what it held.
    pub fn clear(&mut self, slot: Slot) -> Option<Attribute> {
        self.filled_slots.clear_bit(slot);
        self.hash = OnceLock::new();
        self.attributes[slot.index()].take()
    }

    /// Replaces every priority `p` with `max(p + delta, 0)`.
    pub fn adjust_all_priorities(&mut self, delta: i32) {
        for slot in self.filled_slots.iter() {
            if let Some(entry) = self.attributes[slot.index()].as_mut() {
                entry.priority = entry.priority.saturating_add(delta).max(0);
            }
        }
        self.hash = OnceLock::new();
    }

    /// Swaps every attribute for its pooled, canonical instance.
    pub fn uniquify_attribs(&mut self, registry: &AttribRegistry) {
        for slot in self.filled_slots.iter() {
            if let Some(entry) = self.attributes[slot.index()].as_mut() {
                entry.attrib = registry.uniquify(&entry.attrib);
            }
        }
        self.hash = OnceLock::new();
    }

    // ─── Queries ───────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<&Attribute> {
        self.attributes.get(slot.index())?.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filled_slots.is_zero()
    }

    #[inline]
    #[must_use]
    pub fn filled_slots(&self) -> SlotMask {
        self.filled_slots
    }

    #[inline]
    #[must_use]
    pub fn num_attribs(&self) -> usize {
        self.filled_slots.num_on_bits()
    }

    /// Filled slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &Attribute)> + '_ {
        self.filled_slots
            .iter()
            .filter_map(|slot| Some((slot, self.attributes[slot.index()].as_ref()?)))
    }

    /// Checks that the filled-slot mask agrees with the attribute array.
    #[must_use]
    pub fn validate_filled_slots(&self) -> bool {
        self.attributes
            .iter()
            .enumerate()
            .all(|(i, entry)| entry.is_some() == self.filled_slots.get_bit(Slot::from_index(i)))
    }

    // ─── Ordering & hashing ────────────────────────────────────────────────

    /// Total content order used by the interning table.
    #[must_use]
    pub fn compare_to(&self, other: &Self) -> Ordering {
        for slot in (self.filled_slots | other.filled_slots).iter() {
            let c = compare_entries(self.get(slot), other.get(slot));
            if c != Ordering::Equal {
                return c;
            }
        }
        Ordering::Equal
    }

    /// Attribute identity order restricted to `mask`. Priorities are ignored.
    #[must_use]
    pub fn compare_mask(&self, other: &Self, mask: SlotMask) -> Ordering {
        let slots = (self.filled_slots | other.filled_slots) & mask;
        for slot in slots.iter() {
            let c = entry_addr(self.get(slot)).cmp(&entry_addr(other.get(slot)));
            if c != Ordering::Equal {
                return c;
            }
        }
        Ordering::Equal
    }

    /// Attribute identity order walking slots in performance sort order.
    #[must_use]
    pub fn compare_sort(&self, other: &Self, sorted_slots: &[Slot]) -> Ordering {
        for &slot in sorted_slots {
            let c = entry_addr(self.get(slot)).cmp(&entry_addr(other.get(slot)));
            if c != Ordering::Equal {
                return c;
            }
        }
        Ordering::Equal
    }

    /// Hash over (attribute identity, priority) of the filled slots, computed
    /// once.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        *self.hash.get_or_init(|| {
            let mut hasher = FxHasher::default();
            for (slot, entry) in self.iter() {
                slot.hash(&mut hasher);
                attrib_addr(&entry.attrib).hash(&mut hasher);
                entry.priority.hash(&mut hasher);
            }
            hasher.finish()
        })
    }

    // ─── Algebra ───────────────────────────────────────────────────────────

    /// Net effect of applying `self` then `other`.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        let mut result = Self::new();
        for slot in (self.filled_slots | other.filled_slots).iter() {
            let merged = match (self.get(slot), other.get(slot)) {
                (Some(a), None) => a.clone(),
                (None, Some(b)) => b.clone(),
                (Some(a), Some(b)) => {
                    if b.priority < a.priority {
                        a.clone()
                    } else if a.priority < b.priority && a.attrib.lower_attrib_can_override() {
                        b.clone()
                    } else {
                        Attribute::new(a.attrib.compose(&b.attrib), b.priority)
                    }
                }
                (None, None) => continue,
            };
            result.put(slot, merged);
        }
        result
    }

    /// The bundle that, composed after `self`, yields `other`.
    ///
    /// Slots only `self` fills are inverted against the slot default; a slot
    /// without a registered default is dropped.
    #[must_use]
    pub fn invert_compose(&self, other: &Self, registry: &AttribRegistry) -> Self {
        let mut result = Self::new();
        for slot in (self.filled_slots | other.filled_slots).iter() {
            let inverted = match (self.get(slot), other.get(slot)) {
                (None, Some(b)) => b.clone(),
                (Some(a), Some(b)) => Attribute::new(a.attrib.invert_compose(&b.attrib), 0),
                (Some(a), None) => match registry.slot_default(slot) {
                    Some(default) => Attribute::new(a.attrib.invert_compose(&default), 0),
                    None => continue,
                },
                (None, None) => continue,
            };
            result.put(slot, inverted);
        }
        result
    }

    // ─── Output ────────────────────────────────────────────────────────────

    /// Multi-line listing, one attribute per line.
    pub fn write(&self, out: &mut dyn fmt::Write, indent: usize) -> fmt::Result {
        if self.is_empty() {
            return writeln!(out, "{:indent$}(empty)", "");
        }
        for (slot, entry) in self.iter() {
            writeln!(
                out,
                "{:indent$}[{slot}] {:?} (priority {})",
                "", entry.attrib, entry.priority
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for StateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("S:(empty)");
        }
        f.write_str("S:(")?;
        for (i, (_, entry)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(short_type_name(entry.attrib.as_ref()))?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for StateData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(slot, entry)| (slot.index(), entry)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrib::{
        ColorAttrib, ColorScaleAttrib, DepthWriteAttrib, TransparencyAttrib, TransparencyMode,
        downcast,
    };
    use glam::Vec4;
    use std::sync::Arc;

    fn registry() -> AttribRegistry {
        AttribRegistry::new()
    }

    #[test]
    fn test_set_and_clear_keep_mask_consistent() {
        let reg = registry();
        let mut data = StateData::new();
        assert!(data.is_empty());
        data.set(reg.make(DepthWriteAttrib::new(false)), 2);
        data.set(reg.make(ColorAttrib::vertex()), 0);
        assert_eq!(data.num_attribs(), 2);
        assert!(data.validate_filled_slots());

        let removed = data.clear(DepthWriteAttrib::SLOT).unwrap();
        assert_eq!(removed.priority, 2);
        assert_eq!(data.num_attribs(), 1);
        assert!(data.validate_filled_slots());
    }

    #[test]
    fn test_set_keep_priority() {
        let reg = registry();
        let mut data = StateData::new();
        data.set(reg.make(DepthWriteAttrib::new(false)), 7);
        data.set_keep_priority(reg.make(DepthWriteAttrib::new(true)));
        assert_eq!(data.get(DepthWriteAttrib::SLOT).unwrap().priority, 7);
    }

    #[test]
    fn test_adjust_priorities_clamps_at_zero() {
        let reg = registry();
        let mut data = StateData::new();
        data.set(reg.make(DepthWriteAttrib::new(false)), 2);
        data.set(reg.make(ColorAttrib::vertex()), 10);
        data.adjust_all_priorities(-5);
        assert_eq!(data.get(DepthWriteAttrib::SLOT).unwrap().priority, 0);
        assert_eq!(data.get(ColorAttrib::SLOT).unwrap().priority, 5);
    }

    #[test]
    fn test_compare_to_is_antisymmetric() {
        let reg = registry();
        let a = StateData::from_attribs(&[reg.make(DepthWriteAttrib::new(false))], 0);
        let b = StateData::from_attribs(&[reg.make(DepthWriteAttrib::new(true))], 0);
        let c = StateData::from_attribs(&[reg.make(DepthWriteAttrib::new(true))], 1);
        let empty = StateData::new();

        for x in [&a, &b, &c, &empty] {
            assert_eq!(x.compare_to(x), Ordering::Equal);
            for y in [&a, &b, &c, &empty] {
                assert_eq!(x.compare_to(y), y.compare_to(x).reverse());
            }
        }
        assert_eq!(empty.compare_to(&a), Ordering::Less);
    }

    #[test]
    fn test_equal_values_at_different_addresses_differ() {
        let a = StateData::from_attribs(&[Arc::new(ColorAttrib::vertex()) as AttribRef], 0);
        let b = StateData::from_attribs(&[Arc::new(ColorAttrib::vertex()) as AttribRef], 0);
        assert_ne!(a.compare_to(&b), Ordering::Equal);
        assert_eq!(a.compare_to(&b), b.compare_to(&a).reverse());
    }

    #[test]
    fn test_hash_follows_identity_and_priority() {
        let reg = registry();
        let attrib = reg.make(ColorAttrib::vertex());
        let a = StateData::from_attribs(&[attrib.clone()], 0);
        let b = StateData::from_attribs(&[attrib.clone()], 0);
        let c = StateData::from_attribs(&[attrib], 1);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_compose_rules() {
        let reg = registry();
        let off = reg.make(DepthWriteAttrib::new(false));
        let on = reg.make(DepthWriteAttrib::new(true));

        // Higher priority above wins.
        let a = StateData::from_attribs(&[off.clone()], 5);
        let b = StateData::from_attribs(&[on.clone()], 3);
        let r = a.compose(&b);
        assert_eq!(attrib_addr(&r.get(DepthWriteAttrib::SLOT).unwrap().attrib), attrib_addr(&off));
        assert_eq!(r.get(DepthWriteAttrib::SLOT).unwrap().priority, 5);

        // Otherwise the lower attribute is composed on, taking its priority.
        let a = StateData::from_attribs(&[off], 3);
        let b = StateData::from_attribs(&[on.clone()], 5);
        let r = a.compose(&b);
        assert_eq!(attrib_addr(&r.get(DepthWriteAttrib::SLOT).unwrap().attrib), attrib_addr(&on));
        assert_eq!(r.get(DepthWriteAttrib::SLOT).unwrap().priority, 5);
    }

    #[test]
    fn test_compose_lower_can_override() {
        let reg = registry();
        let half = reg.make(ColorScaleAttrib::new(Vec4::splat(0.5)));
        let quarter = reg.make(ColorScaleAttrib::new(Vec4::splat(0.25)));

        // Equal priority: scales multiply.
        let r = StateData::from_attribs(&[half.clone()], 0)
            .compose(&StateData::from_attribs(&[quarter.clone()], 0));
        let scale = downcast::<ColorScaleAttrib>(r.get(ColorScaleAttrib::SLOT).unwrap().attrib.as_ref())
            .unwrap()
            .scale();
        assert_eq!(scale, Vec4::splat(0.125));

        // Higher priority below replaces the accumulated scale.
        let r = StateData::from_attribs(&[half], 1)
            .compose(&StateData::from_attribs(&[quarter.clone()], 5));
        let entry = r.get(ColorScaleAttrib::SLOT).unwrap();
        assert_eq!(attrib_addr(&entry.attrib), attrib_addr(&quarter));
        assert_eq!(entry.priority, 5);
    }

    #[test]
    fn test_invert_compose_uses_slot_default() {
        let reg = registry();
        let alpha = reg.make(TransparencyAttrib::new(TransparencyMode::Alpha));
        let a = StateData::from_attribs(&[alpha], 4);
        let r = a.invert_compose(&StateData::new(), &reg);
        let entry = r.get(TransparencyAttrib::SLOT).unwrap();
        let default = reg.slot_default(TransparencyAttrib::SLOT).unwrap();
        assert_eq!(attrib_addr(&entry.attrib), attrib_addr(&default));
        assert_eq!(entry.priority, 0);
    }

    #[test]
    fn test_display() {
        let reg = registry();
        assert_eq!(StateData::new().to_string(), "S:(empty)");
        let data = StateData::from_attribs(
            &[
                reg.make(TransparencyAttrib::new(TransparencyMode::Alpha)),
                reg.make(ColorAttrib::vertex()),
            ],
            0,
        );
        assert_eq!(data.to_string(), "S:(ColorAttrib TransparencyAttrib)");

        let mut listing = String::new();
        data.write(&mut listing, 2).unwrap();
        assert_eq!(listing.lines().count(), 2);
        assert!(listing.starts_with("  [1]"));
    }
}
