//! Error Types
//!
//! This module defines the error types used by the render-state cache.
//!
//! # Overview
//!
//! Composition, interning and reference counting never fail at runtime: a
//! redundant `add_attrib` is an ordinary return value, and broken invariants
//! are programming errors caught by debug assertions. [`StateError`] therefore
//! only covers the surfaces that deal with external input:
//! - Decoding persisted states
//! - Registering attribute slots
//! - Parsing configuration
//!
//! # Usage
//!
//! Fallible APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, StateError>`.
//!
//! ```rust,ignore
//! use myth_state::errors::Result;
//! use myth_state::bam::DatagramIterator;
//!
//! fn read_count(scan: &mut DatagramIterator<'_>) -> Result<u16> {
//!     scan.get_u16()
//! }
//! ```

use thiserror::Error;

/// The main error type for the render-state cache.
#[derive(Error, Debug)]
pub enum StateError {
    // ========================================================================
    // Serialization Errors
    // ========================================================================
    /// The datagram ended before the expected field.
    #[error("Datagram truncated: needed {needed} bytes at offset {offset}, {remaining} left")]
    Truncated {
        /// Read offset where the field starts
        offset: usize,
        /// Size of the field being read
        needed: usize,
        /// Bytes left in the datagram
        remaining: usize,
    },

    /// An object id recorded during fill-in has no entry in the object table.
    #[error("Unresolved object pointer: id {0}")]
    UnresolvedPointer(u32),

    /// A state holds more attributes than the persisted count field can carry.
    #[error("Too many attributes to encode: {0}")]
    TooManyAttribs(usize),

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// Every attribute slot has been assigned.
    #[error("Attribute slots exhausted: cannot register '{name}' (max {max} slots)")]
    SlotsExhausted {
        /// Name of the slot that failed to register
        name: String,
        /// Maximum number of slots
        max: usize,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Alias for `Result<T, StateError>`.
pub type Result<T> = std::result::Result<T, StateError>;
