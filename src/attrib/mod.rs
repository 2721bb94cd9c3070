//! Render Attributes
//!
//! A render attribute is one orthogonal piece of render state (a colour, a
//! transparency mode, a cull bin, ...). Every attribute type owns a *slot*:
//! a small integer assigned by the [`AttribRegistry`]. A render state holds at
//! most one attribute per slot.
//!
//! # Identity
//!
//! Attributes are shared as [`AttribRef`] (`Arc<dyn RenderAttrib>`). After
//! they have been passed through [`AttribRegistry::uniquify`], two attributes
//! with equal contents are the same allocation, so render states compare and
//! hash attributes by pointer identity on the hot paths and only fall back to
//! [`RenderAttrib::compare_to`] when building the canonical table.
//!
//! # Implementing an attribute
//!
//! ```rust,ignore
//! #[derive(Debug)]
//! struct FogAttrib { slot: Slot, density: f32 }
//!
//! impl RenderAttrib for FogAttrib {
//!     fn slot(&self) -> Slot { self.slot }
//!     fn compare_to(&self, other: &dyn RenderAttrib) -> Ordering {
//!         let other = downcast::<Self>(other).expect("same attribute type");
//!         self.density.total_cmp(&other.density)
//!     }
//! }
//! ```

pub mod registry;
pub mod standard;

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

pub use registry::AttribRegistry;
pub use standard::{
    ColorAttrib, ColorScaleAttrib, CullBinAttrib, DepthWriteAttrib, TransparencyAttrib,
    TransparencyMode,
};

/// Number of attribute slots a render state can hold (slot 0 included).
pub const MAX_SLOTS: usize = 32;

/// Shared, immutable attribute value.
pub type AttribRef = Arc<dyn RenderAttrib>;

// ─── Slot ────────────────────────────────────────────────────────────────────

/// Attribute category identifier.
///
/// Slot 0 is reserved: an attribute reporting [`Slot::NONE`] never registered
/// its slot, and is stripped from any state it is placed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(pub(crate) u8);

impl Slot {
    /// The reserved, unregistered slot.
    pub const NONE: Slot = Slot(0);

    /// Raw slot number.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index < MAX_SLOTS);
        Self(index as u8)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── SlotMask ────────────────────────────────────────────────────────────────

/// Bit set over attribute slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SlotMask(u32);

impl SlotMask {
    pub const EMPTY: SlotMask = SlotMask(0);

    /// Builds a mask with the given slots set.
    #[must_use]
    pub fn from_slots(slots: &[Slot]) -> Self {
        let mut mask = Self::EMPTY;
        for &slot in slots {
            mask.set_bit(slot);
        }
        mask
    }

    #[inline]
    pub fn set_bit(&mut self, slot: Slot) {
        self.0 |= 1 << slot.0;
    }

    #[inline]
    pub fn clear_bit(&mut self, slot: Slot) {
        self.0 &= !(1 << slot.0);
    }

    #[inline]
    #[must_use]
    pub fn get_bit(self, slot: Slot) -> bool {
        self.0 & (1 << slot.0) != 0
    }

    #[inline]
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub fn num_on_bits(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Lowest set slot, if any.
    #[inline]
    #[must_use]
    pub fn lowest_on_bit(self) -> Option<Slot> {
        if self.0 == 0 {
            None
        } else {
            Some(Slot(self.0.trailing_zeros() as u8))
        }
    }

    /// Iterates the set slots in ascending order.
    #[inline]
    pub fn iter(self) -> SlotMaskIter {
        SlotMaskIter(self)
    }
}

impl BitOr for SlotMask {
    type Output = SlotMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        SlotMask(self.0 | rhs.0)
    }
}

impl BitAnd for SlotMask {
    type Output = SlotMask;

    fn bitand(self, rhs: Self) -> Self::Output {
        SlotMask(self.0 & rhs.0)
    }
}

/// Ascending iterator over the slots of a [`SlotMask`].
pub struct SlotMaskIter(SlotMask);

impl Iterator for SlotMaskIter {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let slot = self.0.lowest_on_bit()?;
        self.0.clear_bit(slot);
        Some(slot)
    }
}

// ─── RenderAttrib ────────────────────────────────────────────────────────────

/// The capability every render attribute exposes to the state cache.
pub trait RenderAttrib: Any + Send + Sync + fmt::Debug {
    /// Slot this attribute type was registered under.
    fn slot(&self) -> Slot;

    /// Total order among attributes of the *same concrete type*.
    ///
    /// Callers guarantee both sides share a type; see [`compare_attribs`] for
    /// the cross-type order.
    fn compare_to(&self, other: &dyn RenderAttrib) -> Ordering;

    /// Net effect of applying `self` then `other`.
    fn compose(&self, other: &AttribRef) -> AttribRef {
        Arc::clone(other)
    }

    /// The attribute that, composed after `self`, yields `other`.
    fn invert_compose(&self, other: &AttribRef) -> AttribRef {
        Arc::clone(other)
    }

    /// Whether an attribute with a *higher* priority below this one in the
    /// graph replaces it outright instead of being composed onto it.
    fn lower_attrib_can_override(&self) -> bool {
        false
    }

    /// Diagnostic type name.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Downcasts an attribute to its concrete type.
#[inline]
#[must_use]
pub fn downcast<T: RenderAttrib>(attrib: &dyn RenderAttrib) -> Option<&T> {
    let any: &dyn Any = attrib;
    any.downcast_ref::<T>()
}

/// Concrete type of an attribute.
#[inline]
#[must_use]
pub fn attrib_type_id(attrib: &dyn RenderAttrib) -> TypeId {
    let any: &dyn Any = attrib;
    any.type_id()
}

/// Address of the attribute allocation, used as its identity.
#[inline]
#[must_use]
pub fn attrib_addr(attrib: &AttribRef) -> usize {
    Arc::as_ptr(attrib).cast::<()>() as usize
}

/// Short diagnostic name (`ColorAttrib` rather than `myth_state::attrib::...`).
#[must_use]
pub fn short_type_name(attrib: &dyn RenderAttrib) -> &'static str {
    let name = attrib.type_name();
    name.rsplit("::").next().unwrap_or(name)
}

/// Content order over attributes of any type: identical pointers are equal,
/// otherwise types are ordered first and same-typed values by
/// [`RenderAttrib::compare_to`].
#[must_use]
pub fn compare_attribs(a: &AttribRef, b: &AttribRef) -> Ordering {
    if attrib_addr(a) == attrib_addr(b) {
        return Ordering::Equal;
    }
    attrib_type_id(a.as_ref())
        .cmp(&attrib_type_id(b.as_ref()))
        .then_with(|| a.compare_to(b.as_ref()))
}
