#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod attrib;
pub mod bam;
pub mod bins;
pub mod errors;
pub mod settings;
pub mod state;

pub use attrib::{
    AttribRef, AttribRegistry, ColorAttrib, ColorScaleAttrib, CullBinAttrib, DepthWriteAttrib,
    RenderAttrib, Slot, SlotMask, TransparencyAttrib, TransparencyMode,
};
pub use bam::{BamReader, BamWriter, Datagram, DatagramIterator, PendingState};
pub use bins::{BinType, CullBinManager};
pub use errors::StateError;
pub use settings::StateCacheConfig;
pub use state::{Attribute, CacheStats, MAX_PRIORITY, RenderState, StateCache, StateData, StateKey};
