//! Persisted States
//!
//! Render states are written as a filled-slot count followed by one
//! `(attribute pointer, priority)` pair per filled slot, in ascending slot
//! order:
//!
//! ```text
//! u16  num_attribs
//! repeat num_attribs:
//!     u32  object id of the attribute (0 = null)
//!     i32  priority
//! ```
//!
//! Attribute values themselves live in an object table kept next to the
//! datagrams. [`BamWriter`] assigns the ids; [`BamReader`] reads a state in
//! two passes: [`BamReader::fillin`] records ids and priorities, and
//! [`BamReader::complete_pointers`] resolves the ids against the object table
//! and interns the result. States that become canonical while loading are
//! held by the reader until [`BamReader::finalize`].
//!
//! All integers are little-endian.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use rustc_hash::FxHashMap;

use crate::attrib::{AttribRef, MAX_SLOTS, attrib_addr};
use crate::errors::{Result, StateError};
use crate::state::{RenderState, StateCache, StateData};

// ─── Datagram ────────────────────────────────────────────────────────────────

/// Growable byte buffer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Datagram {
    data: Vec<u8>,
}

impl Datagram {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Appends `N` zeroed bytes and lets `write` fill them.
    fn put<const N: usize>(&mut self, write: impl FnOnce(&mut [u8])) {
        let start = self.data.len();
        self.data.resize(start + N, 0);
        write(&mut self.data[start..]);
    }

    pub fn add_u16(&mut self, value: u16) {
        self.put::<2>(|buf| LittleEndian::write_u16(buf, value));
    }

    pub fn add_u32(&mut self, value: u32) {
        self.put::<4>(|buf| LittleEndian::write_u32(buf, value));
    }

    pub fn add_i32(&mut self, value: i32) {
        self.put::<4>(|buf| LittleEndian::write_i32(buf, value));
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Datagram({} bytes:", self.data.len())?;
        for byte in &self.data {
            write!(f, " {byte:02x}")?;
        }
        f.write_str(")")
    }
}

/// Read cursor over a datagram.
#[derive(Debug, Clone)]
pub struct DatagramIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> DatagramIterator<'a> {
    #[must_use]
    pub fn new(datagram: &'a Datagram) -> Self {
        Self::from_slice(datagram.as_bytes())
    }

    #[must_use]
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    #[inline]
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    #[must_use]
    pub fn remaining_size(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining_size();
        if remaining < needed {
            return Err(StateError::Truncated {
                offset: self.offset,
                needed,
                remaining,
            });
        }
        let bytes = &self.data[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(bytes)
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }
}

// ─── Writer ──────────────────────────────────────────────────────────────────

/// Assigns object ids to attribute pointers while states are written.
#[derive(Debug, Default)]
pub struct BamWriter {
    ids: FxHashMap<usize, u32>,
    objects: Vec<AttribRef>,
}

impl BamWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the object id of `attrib`, registering it on first sight.
    pub fn write_pointer(&mut self, dg: &mut Datagram, attrib: Option<&AttribRef>) {
        let Some(attrib) = attrib else {
            dg.add_u32(0);
            return;
        };
        let next_id = self.objects.len() as u32 + 1;
        let id = *self.ids.entry(attrib_addr(attrib)).or_insert_with(|| {
            self.objects.push(attrib.clone());
            next_id
        });
        dg.add_u32(id);
    }

    /// Attributes in id order: id `n` is `objects()[n - 1]`.
    #[must_use]
    pub fn objects(&self) -> &[AttribRef] {
        &self.objects
    }

    #[must_use]
    pub fn into_objects(self) -> Vec<AttribRef> {
        self.objects
    }
}

impl RenderState {
    /// Appends this state to `dg`, registering its attributes with `writer`.
    pub fn write_datagram(&self, writer: &mut BamWriter, dg: &mut Datagram) -> Result<()> {
        let num_attribs = self.num_attribs();
        let count = u16::try_from(num_attribs).map_err(|_| StateError::TooManyAttribs(num_attribs))?;
        dg.add_u16(count);
        for (_, entry) in self.data().iter() {
            writer.write_pointer(dg, Some(&entry.attrib));
            dg.add_i32(entry.priority);
        }
        Ok(())
    }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// A state whose attribute pointers have been read but not yet resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingState {
    pointer_ids: Vec<u32>,
    read_priorities: Vec<i32>,
}

impl PendingState {
    #[must_use]
    pub fn num_pointers(&self) -> usize {
        self.pointer_ids.len()
    }
}

/// Reads persisted states back into a [`StateCache`].
pub struct BamReader {
    cache: StateCache,
    finalize_queue: Vec<RenderState>,
}

impl BamReader {
    #[must_use]
    pub fn new(cache: StateCache) -> Self {
        Self {
            cache,
            finalize_queue: Vec::new(),
        }
    }

    /// First pass: records the attribute ids and their priorities.
    pub fn fillin(&mut self, scan: &mut DatagramIterator<'_>) -> Result<PendingState> {
        let num_attribs = scan.get_u16()? as usize;
        let mut pending = PendingState {
            pointer_ids: Vec::with_capacity(num_attribs),
            read_priorities: Vec::with_capacity(num_attribs),
        };
        for _ in 0..num_attribs {
            pending.pointer_ids.push(scan.get_u32()?);
            pending.read_priorities.push(scan.get_i32()?);
        }
        Ok(pending)
    }

    /// Second pass: resolves the ids against `objects` (id `n` is
    /// `objects[n - 1]`) and interns the state.
    ///
    /// Null pointers and attributes reporting an out-of-range slot are
    /// skipped. An id missing from `objects` is an error.
    pub fn complete_pointers(
        &mut self,
        pending: PendingState,
        objects: &[AttribRef],
    ) -> Result<RenderState> {
        let mut data = StateData::new();
        for (id, priority) in pending.pointer_ids.into_iter().zip(pending.read_priorities) {
            if id == 0 {
                continue;
            }
            let attrib = objects
                .get(id as usize - 1)
                .ok_or(StateError::UnresolvedPointer(id))?;
            let slot = attrib.slot().index();
            if slot > 0 && slot < MAX_SLOTS {
                data.set(attrib.clone(), priority);
            }
        }
        Ok(self.change_this(data))
    }

    /// Both passes over one datagram cursor.
    pub fn read_state(
        &mut self,
        scan: &mut DatagramIterator<'_>,
        objects: &[AttribRef],
    ) -> Result<RenderState> {
        let pending = self.fillin(scan)?;
        self.complete_pointers(pending, objects)
    }

    /// Swaps the freshly read value for its canonical instance. A value that
    /// became canonical is held until [`Self::finalize`].
    fn change_this(&mut self, data: StateData) -> RenderState {
        if data.is_empty() {
            return self.cache.empty_state();
        }
        let (state, inserted) = self.cache.shared().return_unique(data);
        if inserted {
            self.finalize_queue.push(state.clone());
        }
        state
    }

    /// Number of states waiting for [`Self::finalize`].
    #[must_use]
    pub fn num_pending_finalize(&self) -> usize {
        self.finalize_queue.len()
    }

    /// Releases the references taken while loading. Returns how many were
    /// released.
    pub fn finalize(&mut self) -> usize {
        let queued = std::mem::take(&mut self.finalize_queue);
        let count = queued.len();
        for state in queued {
            // The loaded state should be owned by someone by now.
            debug_assert!(state.ref_count() > 1, "loaded state {state} was never stored");
            drop(state);
        }
        count
    }
}
