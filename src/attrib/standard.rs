//! Standard Attributes
//!
//! The attribute types every [`AttribRegistry`](super::AttribRegistry) knows
//! about out of the box. Each lives in a fixed slot:
//!
//! | Slot | Type                   | Composition                          |
//! |------|------------------------|--------------------------------------|
//! | 1    | [`ColorAttrib`]        | replaced by the lower attribute      |
//! | 2    | [`ColorScaleAttrib`]   | multiplied, lower may override       |
//! | 3    | [`TransparencyAttrib`] | replaced by the lower attribute      |
//! | 4    | [`CullBinAttrib`]      | replaced by the lower attribute      |
//! | 5    | [`DepthWriteAttrib`]   | replaced by the lower attribute      |

use std::cmp::Ordering;
use std::sync::Arc;

use glam::Vec4;

use super::{AttribRef, RenderAttrib, Slot, downcast};

fn cmp_vec4(a: Vec4, b: Vec4) -> Ordering {
    a.x.total_cmp(&b.x)
        .then_with(|| a.y.total_cmp(&b.y))
        .then_with(|| a.z.total_cmp(&b.z))
        .then_with(|| a.w.total_cmp(&b.w))
}

/// Same-type downcast for `compare_to` implementations.
///
/// A mismatched type sorts first; `compare_attribs` orders by type before it
/// ever calls `compare_to`.
macro_rules! same_type {
    ($other:expr, $ty:ty) => {
        match downcast::<$ty>($other) {
            Some(other) => other,
            None => return Ordering::Less,
        }
    };
}

// ─── ColorAttrib ─────────────────────────────────────────────────────────────

/// Scene colour: either a flat colour or "use the vertex colours".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttrib {
    color: Option<Vec4>,
}

impl ColorAttrib {
    pub const SLOT: Slot = Slot(1);

    /// Flat colour applied to the whole geometry.
    #[must_use]
    pub fn flat(color: Vec4) -> Self {
        Self { color: Some(color) }
    }

    /// Use the per-vertex colours of the geometry.
    #[must_use]
    pub fn vertex() -> Self {
        Self { color: None }
    }

    #[inline]
    #[must_use]
    pub fn color(&self) -> Option<Vec4> {
        self.color
    }
}

impl RenderAttrib for ColorAttrib {
    fn slot(&self) -> Slot {
        Self::SLOT
    }

    fn compare_to(&self, other: &dyn RenderAttrib) -> Ordering {
        let other = same_type!(other, Self);
        match (self.color, other.color) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => cmp_vec4(a, b),
        }
    }
}

// ─── ColorScaleAttrib ────────────────────────────────────────────────────────

/// Multiplicative colour scale.
///
/// Scales accumulate down the graph, and a scale set lower in the graph with a
/// higher priority replaces the accumulated one instead of multiplying it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScaleAttrib {
    scale: Vec4,
}

impl ColorScaleAttrib {
    pub const SLOT: Slot = Slot(2);

    #[must_use]
    pub fn new(scale: Vec4) -> Self {
        Self { scale }
    }

    #[must_use]
    pub fn identity() -> Self {
        Self { scale: Vec4::ONE }
    }

    #[inline]
    #[must_use]
    pub fn scale(&self) -> Vec4 {
        self.scale
    }

    #[inline]
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.scale == Vec4::ONE
    }
}

impl RenderAttrib for ColorScaleAttrib {
    fn slot(&self) -> Slot {
        Self::SLOT
    }

    fn compare_to(&self, other: &dyn RenderAttrib) -> Ordering {
        let other = same_type!(other, Self);
        cmp_vec4(self.scale, other.scale)
    }

    fn compose(&self, other: &AttribRef) -> AttribRef {
        match downcast::<Self>(other.as_ref()) {
            Some(other) => Arc::new(Self::new(self.scale * other.scale)),
            None => Arc::clone(other),
        }
    }

    fn invert_compose(&self, other: &AttribRef) -> AttribRef {
        let Some(other) = downcast::<Self>(other.as_ref()) else {
            return Arc::clone(other);
        };
        // Zero components cannot be undone; leave them unscaled.
        let inv = |num: f32, den: f32| if den == 0.0 { 1.0 } else { num / den };
        Arc::new(Self::new(Vec4::new(
            inv(other.scale.x, self.scale.x),
            inv(other.scale.y, self.scale.y),
            inv(other.scale.z, self.scale.z),
            inv(other.scale.w, self.scale.w),
        )))
    }

    fn lower_attrib_can_override(&self) -> bool {
        true
    }
}

// ─── TransparencyAttrib ──────────────────────────────────────────────────────

/// How alpha is interpreted when drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransparencyMode {
    /// Opaque; alpha is ignored.
    None,
    /// Classic back-to-front alpha blending.
    Alpha,
    /// Blending with premultiplied colours.
    PremultipliedAlpha,
    /// Multisample alpha-to-coverage.
    Multisample,
    /// Multisample coverage without blending.
    MultisampleMask,
    /// Alpha test against 0.5.
    Binary,
    /// Opaque pass followed by a blended pass.
    Dual,
}

impl TransparencyMode {
    /// Whether geometry in this mode must be drawn back to front.
    #[must_use]
    pub fn needs_sorting(self) -> bool {
        matches!(self, Self::Alpha | Self::PremultipliedAlpha | Self::Dual)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransparencyAttrib {
    mode: TransparencyMode,
}

impl TransparencyAttrib {
    pub const SLOT: Slot = Slot(3);

    #[must_use]
    pub fn new(mode: TransparencyMode) -> Self {
        Self { mode }
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> TransparencyMode {
        self.mode
    }
}

impl RenderAttrib for TransparencyAttrib {
    fn slot(&self) -> Slot {
        Self::SLOT
    }

    fn compare_to(&self, other: &dyn RenderAttrib) -> Ordering {
        let other = same_type!(other, Self);
        self.mode.cmp(&other.mode)
    }
}

// ─── CullBinAttrib ───────────────────────────────────────────────────────────

/// Explicit cull bin assignment. An empty bin name means "no explicit bin".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CullBinAttrib {
    bin_name: String,
    draw_order: i32,
}

impl CullBinAttrib {
    pub const SLOT: Slot = Slot(4);

    #[must_use]
    pub fn new(bin_name: impl Into<String>, draw_order: i32) -> Self {
        Self {
            bin_name: bin_name.into(),
            draw_order,
        }
    }

    #[inline]
    #[must_use]
    pub fn bin_name(&self) -> &str {
        &self.bin_name
    }

    #[inline]
    #[must_use]
    pub fn draw_order(&self) -> i32 {
        self.draw_order
    }
}

impl Default for CullBinAttrib {
    fn default() -> Self {
        Self::new("", 0)
    }
}

impl RenderAttrib for CullBinAttrib {
    fn slot(&self) -> Slot {
        Self::SLOT
    }

    fn compare_to(&self, other: &dyn RenderAttrib) -> Ordering {
        let other = same_type!(other, Self);
        self.draw_order
            .cmp(&other.draw_order)
            .then_with(|| self.bin_name.cmp(&other.bin_name))
    }
}

// ─── DepthWriteAttrib ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthWriteAttrib {
    enabled: bool,
}

impl DepthWriteAttrib {
    pub const SLOT: Slot = Slot(5);

    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    #[inline]
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

impl RenderAttrib for DepthWriteAttrib {
    fn slot(&self) -> Slot {
        Self::SLOT
    }

    fn compare_to(&self, other: &dyn RenderAttrib) -> Ordering {
        let other = same_type!(other, Self);
        self.enabled.cmp(&other.enabled)
    }
}
