//! Attribute Registry
//!
//! Owns the two attribute-level services the state cache consumes:
//!
//! - **Slot registry**: assigns each attribute category a slot, remembers its
//!   default attribute and its performance sort key.
//! - **Attribute pool**: interns attribute values so that value-equal
//!   attributes share one allocation, which lets render states compare
//!   attributes by pointer.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{
    AttribRef, ColorAttrib, ColorScaleAttrib, CullBinAttrib, DepthWriteAttrib, MAX_SLOTS, Slot,
    TransparencyAttrib, TransparencyMode, compare_attribs,
};
use crate::errors::{Result, StateError};

/// Registration record of one slot.
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub name: String,
    /// Lower sorts first in [`AttribRegistry::sorted_slot`].
    pub sort: i32,
    pub default: AttribRef,
}

#[derive(Default)]
struct SlotTable {
    /// Indexed by slot number; entry 0 is the reserved slot.
    infos: Vec<Option<SlotInfo>>,
    sorted: Vec<Slot>,
}

/// Pool entry ordered by attribute content.
struct Pooled(AttribRef);

impl PartialEq for Pooled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pooled {}

impl PartialOrd for Pooled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pooled {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_attribs(&self.0, &other.0)
    }
}

/// Slot registry and attribute pool.
pub struct AttribRegistry {
    slots: RwLock<SlotTable>,
    pool: Mutex<BTreeSet<Pooled>>,
}

impl Default for AttribRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AttribRegistry {
    /// Creates a registry holding the standard attribute slots.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            slots: RwLock::new(SlotTable {
                infos: vec![None],
                sorted: Vec::new(),
            }),
            pool: Mutex::new(BTreeSet::new()),
        };

        let standard: [(&str, i32, AttribRef); 5] = [
            ("ColorAttrib", 50, Arc::new(ColorAttrib::vertex())),
            ("ColorScaleAttrib", 50, Arc::new(ColorScaleAttrib::identity())),
            (
                "TransparencyAttrib",
                20,
                Arc::new(TransparencyAttrib::new(TransparencyMode::None)),
            ),
            ("CullBinAttrib", 100, Arc::new(CullBinAttrib::default())),
            ("DepthWriteAttrib", 30, Arc::new(DepthWriteAttrib::new(true))),
        ];
        {
            let mut table = registry.slots.write();
            for (name, sort, default) in standard {
                let default = registry.uniquify(&default);
                Self::push_slot(&mut table, name, sort, default);
            }
        }
        debug_assert_eq!(registry.num_slots(), DepthWriteAttrib::SLOT.index() + 1);
        registry
    }

    fn push_slot(table: &mut SlotTable, name: &str, sort: i32, default: AttribRef) -> Slot {
        let slot = Slot::from_index(table.infos.len());
        debug_assert_eq!(default.slot(), slot, "default attribute reports a different slot");
        table.infos.push(Some(SlotInfo {
            name: name.to_owned(),
            sort,
            default,
        }));

        // Stable insert keeps equal sort keys in slot order.
        let pos = table.sorted.partition_point(|s| {
            table.infos[s.index()]
                .as_ref()
                .is_some_and(|info| info.sort <= sort)
        });
        table.sorted.insert(pos, slot);
        slot
    }

    /// Registers a new attribute category.
    ///
    /// `make_default` receives the assigned slot and builds the default
    /// attribute, which must report that slot.
    pub fn register_slot(
        &self,
        name: &str,
        sort: i32,
        make_default: impl FnOnce(Slot) -> AttribRef,
    ) -> Result<Slot> {
        let mut table = self.slots.write();
        if table.infos.len() >= MAX_SLOTS {
            return Err(StateError::SlotsExhausted {
                name: name.to_owned(),
                max: MAX_SLOTS,
            });
        }
        let slot = Slot::from_index(table.infos.len());
        let default = self.uniquify(&make_default(slot));
        Ok(Self::push_slot(&mut table, name, sort, default))
    }

    // ─── Slot queries ──────────────────────────────────────────────────────

    /// Number of slots in use, the reserved slot 0 included.
    #[must_use]
    pub fn num_slots(&self) -> usize {
        self.slots.read().infos.len()
    }

    #[inline]
    #[must_use]
    pub fn max_slots(&self) -> usize {
        MAX_SLOTS
    }

    /// Default attribute of a registered slot.
    #[must_use]
    pub fn slot_default(&self, slot: Slot) -> Option<AttribRef> {
        self.slot_info(slot).map(|info| info.default)
    }

    #[must_use]
    pub fn slot_info(&self, slot: Slot) -> Option<SlotInfo> {
        self.slots.read().infos.get(slot.index()).cloned().flatten()
    }

    #[must_use]
    pub fn num_sorted_slots(&self) -> usize {
        self.slots.read().sorted.len()
    }

    /// The `n`th slot in performance sort order.
    #[must_use]
    pub fn sorted_slot(&self, n: usize) -> Slot {
        self.slots.read().sorted[n]
    }

    /// All registered slots in performance sort order.
    #[must_use]
    pub fn sorted_slots(&self) -> Vec<Slot> {
        self.slots.read().sorted.clone()
    }

    // ─── Attribute pool ────────────────────────────────────────────────────

    /// Returns the canonical instance of `attrib`, adding it to the pool if no
    /// equal attribute is pooled yet.
    pub fn uniquify(&self, attrib: &AttribRef) -> AttribRef {
        let mut pool = self.pool.lock();
        let key = Pooled(Arc::clone(attrib));
        if let Some(existing) = pool.get(&key) {
            return Arc::clone(&existing.0);
        }
        pool.insert(key);
        Arc::clone(attrib)
    }

    /// Convenience for `uniquify(&Arc::new(attrib))`.
    pub fn make<A: super::RenderAttrib>(&self, attrib: A) -> AttribRef {
        self.uniquify(&(Arc::new(attrib) as AttribRef))
    }

    #[must_use]
    pub fn num_attribs(&self) -> usize {
        self.pool.lock().len()
    }

    /// Drops pooled attributes nobody outside the pool references.
    /// Returns the number of attributes freed.
    pub fn garbage_collect(&self) -> usize {
        let mut pool = self.pool.lock();
        let before = pool.len();
        pool.retain(|entry| Arc::strong_count(&entry.0) > 1);
        before - pool.len()
    }
}
