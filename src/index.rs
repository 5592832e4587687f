// SPDX-License-Identifier: MIT OR Apache-2.0

//! The index: a growable, fixed-location table of chunk metadata.

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::primitive::GsdType;

/// One entry in the index: the location, shape, and frame of a single
/// written chunk. `location == 0` marks an unused slot.
///
/// Encoded little-endian, field order below is the wire layout:
/// `frame(8) n(8) location(8) m(4) id(2) kind(1) flags(1) reserved(34)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawIndexEntry {
    pub frame: u64,
    pub n: u64,
    pub location: u64,
    pub m: u32,
    pub id: u16,
    pub kind: u8,
    pub flags: u8,
}

pub const INDEX_ENTRY_SIZE: usize = 64;

const OFF_FRAME: usize = 0;
const OFF_N: usize = 8;
const OFF_LOCATION: usize = 16;
const OFF_M: usize = 24;
const OFF_ID: usize = 28;
const OFF_KIND: usize = 30;
const OFF_FLAGS: usize = 31;

impl RawIndexEntry {
    fn empty() -> Self {
        RawIndexEntry {
            frame: 0,
            n: 0,
            location: 0,
            m: 0,
            id: 0,
            kind: 0,
            flags: 0,
        }
    }

    fn decode(buf: &[u8]) -> Self {
        RawIndexEntry {
            frame: LittleEndian::read_u64(&buf[OFF_FRAME..]),
            n: LittleEndian::read_u64(&buf[OFF_N..]),
            location: LittleEndian::read_u64(&buf[OFF_LOCATION..]),
            m: LittleEndian::read_u32(&buf[OFF_M..]),
            id: LittleEndian::read_u16(&buf[OFF_ID..]),
            kind: buf[OFF_KIND],
            flags: buf[OFF_FLAGS],
        }
    }

    fn encode(&self, out: &mut [u8]) {
        LittleEndian::write_u64(&mut out[OFF_FRAME..], self.frame);
        LittleEndian::write_u64(&mut out[OFF_N..], self.n);
        LittleEndian::write_u64(&mut out[OFF_LOCATION..], self.location);
        LittleEndian::write_u32(&mut out[OFF_M..], self.m);
        LittleEndian::write_u16(&mut out[OFF_ID..], self.id);
        out[OFF_KIND] = self.kind;
        out[OFF_FLAGS] = self.flags;
        // remaining reserved bytes are left zeroed by the caller.
    }
}

/// Encode a run of entries into a freshly allocated byte buffer, ready to
/// hand to a positioned write.
pub(crate) fn encode_entries(entries: &[RawIndexEntry]) -> Vec<u8> {
    let mut buf = vec![0u8; entries.len() * INDEX_ENTRY_SIZE];
    for (i, entry) in entries.iter().enumerate() {
        entry.encode(&mut buf[i * INDEX_ENTRY_SIZE..(i + 1) * INDEX_ENTRY_SIZE]);
    }
    buf
}

fn decode_entries(buf: &[u8], count: u64) -> Vec<RawIndexEntry> {
    (0..count as usize)
        .map(|i| RawIndexEntry::decode(&buf[i * INDEX_ENTRY_SIZE..(i + 1) * INDEX_ENTRY_SIZE]))
        .collect()
}

/// A decoded, validated index entry, the type handed back from
/// [`crate::GsdHandle::find_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub frame: u64,
    pub n: u64,
    pub location: u64,
    pub m: u32,
    pub id: u16,
    pub kind: GsdType,
    pub flags: u8,
}

impl IndexEntry {
    pub fn size(&self) -> u64 {
        self.n * self.m as u64 * self.kind.size_of()
    }

    fn from_raw(raw: &RawIndexEntry) -> Result<Self> {
        Ok(IndexEntry {
            frame: raw.frame,
            n: raw.n,
            location: raw.location,
            m: raw.m,
            id: raw.id,
            kind: GsdType::from_u8_checked(raw.kind)?,
            flags: raw.flags,
        })
    }

    fn to_raw(self) -> RawIndexEntry {
        RawIndexEntry {
            frame: self.frame,
            n: self.n,
            location: self.location,
            m: self.m,
            id: self.id,
            kind: self.kind as u8,
            flags: self.flags,
        }
    }
}

/// Which of the three residency strategies backs the in-memory index,
/// chosen by open mode (spec.md §4.5 / §9).
pub enum IndexStorage {
    /// Read-only: the index region is memory-mapped directly.
    Mapped(Mmap),
    /// Read/write: the whole index lives in a heap buffer.
    Heap(Vec<RawIndexEntry>),
    /// Append: only entries not yet written to disk are staged here, at
    /// position `index_num_entries - index_written_entries`.
    AppendTail(Vec<RawIndexEntry>),
}

impl IndexStorage {
    /// Read the entry at absolute index `idx` (0-based across the whole
    /// index, not relative to any residency window).
    pub fn get(&self, idx: u64, index_written_entries: u64) -> RawIndexEntry {
        match self {
            IndexStorage::Mapped(mmap) => {
                let off = idx as usize * INDEX_ENTRY_SIZE;
                RawIndexEntry::decode(&mmap[off..off + INDEX_ENTRY_SIZE])
            }
            IndexStorage::Heap(v) => v[idx as usize],
            IndexStorage::AppendTail(v) => v[(idx - index_written_entries) as usize],
        }
    }

    /// Stage a freshly-written entry at absolute index `idx`
    /// (`index_num_entries` before it is incremented), the way
    /// `gsd_write_chunk` does `handle->index[slot] = index_entry`.
    ///
    /// `Heap` is fully pre-sized to `index_allocated_entries` (zero-filled),
    /// so this writes into the already-allocated slot. `AppendTail` holds
    /// only the unwritten tail and grows by one element per call, so a plain
    /// `push` lands at the same slot.
    pub fn push(&mut self, idx: u64, entry: RawIndexEntry) {
        match self {
            IndexStorage::Mapped(_) => {
                unreachable!("read-only handles never write chunks")
            }
            IndexStorage::Heap(v) => v[idx as usize] = entry,
            IndexStorage::AppendTail(v) => v.push(entry),
        }
    }
}

/// Read a single entry out of a byte-mapped region at absolute index `idx`.
/// Used during the open-time bootstrap, before an `IndexStorage` exists.
pub(crate) fn entry_at(buf: &[u8], idx: u64) -> RawIndexEntry {
    let off = idx as usize * INDEX_ENTRY_SIZE;
    RawIndexEntry::decode(&buf[off..off + INDEX_ENTRY_SIZE])
}

/// Validate a probed index entry: known type, in-bounds payload, valid id,
/// zero flags. Used both during the open-time bootstrap bisection and can
/// be reused for ad-hoc consistency checks.
pub fn is_entry_valid(
    entry: &RawIndexEntry,
    file_size: u64,
    index_allocated_entries: u64,
    namelist_num_entries: u64,
) -> bool {
    let Some(kind) = GsdType::from_u8(entry.kind) else {
        return false;
    };
    let size = entry.n * entry.m as u64 * kind.size_of();
    if entry.location + size > file_size {
        return false;
    }
    if entry.frame >= index_allocated_entries {
        return false;
    }
    if entry.id as u64 >= namelist_num_entries {
        return false;
    }
    if entry.flags != 0 {
        return false;
    }
    true
}

/// Bootstrap `index_num_entries` from a freshly-opened handle by bisecting
/// for the first `location == 0` slot, validating every probed entry along
/// the way (spec.md §4.4).
pub fn bootstrap_num_entries(
    get: impl Fn(u64) -> RawIndexEntry,
    index_allocated_entries: u64,
    file_size: u64,
    namelist_num_entries: u64,
) -> Result<u64> {
    let first = get(0);
    if first.location != 0
        && !is_entry_valid(&first, file_size, index_allocated_entries, namelist_num_entries)
    {
        return Err(Error::FileCorrupt("index entry 0 is invalid"));
    }
    if first.location == 0 {
        return Ok(0);
    }

    let mut l = 0u64;
    let mut r = index_allocated_entries;
    loop {
        let m = (l + r) / 2;
        let probe = get(m);
        if probe.location != 0 {
            if !is_entry_valid(&probe, file_size, index_allocated_entries, namelist_num_entries)
                || probe.frame < get(l).frame
            {
                return Err(Error::FileCorrupt(
                    "index entry fails validation or frame decreases",
                ));
            }
            l = m;
        } else {
            r = m;
        }
        if r - l <= 1 {
            break;
        }
    }
    Ok(r)
}

pub(crate) fn empty_index_block(n: u64) -> Vec<u8> {
    vec![0u8; n as usize * INDEX_ENTRY_SIZE]
}

pub(crate) fn decode_entry(entry: RawIndexEntry) -> Result<IndexEntry> {
    IndexEntry::from_raw(&entry)
}

pub(crate) fn encode_entry(entry: IndexEntry) -> RawIndexEntry {
    entry.to_raw()
}

pub(crate) fn new_entry_raw() -> RawIndexEntry {
    RawIndexEntry::empty()
}

pub(crate) fn decode_heap(buf: &[u8], count: u64) -> Vec<RawIndexEntry> {
    decode_entries(buf, count)
}
