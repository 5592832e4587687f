// SPDX-License-Identifier: MIT OR Apache-2.0

//! The namelist: a fixed-slot table of ASCII chunk names, plus the sorted
//! in-memory lookup cache built on top of it.

use crate::error::Result;

const NAME_LEN: usize = 64;

/// One 64-byte, NUL-terminated ASCII slot in the on-disk namelist.
#[derive(Clone, Copy)]
pub struct RawNamelistEntry {
    name: [u8; NAME_LEN],
}

pub const NAMELIST_ENTRY_SIZE: usize = NAME_LEN;

impl RawNamelistEntry {
    fn empty() -> Self {
        RawNamelistEntry { name: [0; NAME_LEN] }
    }

    fn decode(buf: &[u8]) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&buf[..NAME_LEN]);
        RawNamelistEntry { name }
    }

    fn encode(&self, out: &mut [u8]) {
        out[..NAME_LEN].copy_from_slice(&self.name);
    }

    fn from_str(s: &str) -> Self {
        let mut name = [0u8; NAME_LEN];
        let bytes = s.as_bytes();
        let n = bytes.len().min(NAME_LEN - 1);
        name[..n].copy_from_slice(&bytes[..n]);
        RawNamelistEntry { name }
    }

    pub fn as_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn is_end_marker(&self) -> bool {
        self.name[0] == 0
    }
}

/// The raw, append-only, fixed-location table. Entirely heap-resident: it
/// is small (≤ 65535 × 64 bytes) so, unlike the index, it is never memory
/// mapped (spec.md §4.5).
pub struct Namelist {
    pub entries: Vec<RawNamelistEntry>,
    pub num_entries: u64,
    pub written_entries: u64,
}

impl Namelist {
    pub fn decode(buf: &[u8], allocated_entries: u64) -> Self {
        let entries: Vec<RawNamelistEntry> = (0..allocated_entries as usize)
            .map(|i| RawNamelistEntry::decode(&buf[i * NAME_LEN..(i + 1) * NAME_LEN]))
            .collect();
        let num_entries = entries
            .iter()
            .position(|e| e.is_end_marker())
            .map(|i| i as u64)
            .unwrap_or(allocated_entries);
        Namelist {
            entries,
            num_entries,
            written_entries: num_entries,
        }
    }

    pub fn append(&mut self, name: &str, allocated_entries: u64) -> Result<u16> {
        if self.num_entries == allocated_entries {
            return Err(crate::error::Error::NamelistFull);
        }
        let id = self.num_entries as u16;
        self.entries[self.num_entries as usize] = RawNamelistEntry::from_str(name);
        self.num_entries += 1;
        Ok(id)
    }

    /// Encode `entries[start..end]` for a positioned write.
    pub fn encode_range(&self, start: u64, end: u64) -> Vec<u8> {
        let mut buf = vec![0u8; (end - start) as usize * NAME_LEN];
        for (i, entry) in self.entries[start as usize..end as usize].iter().enumerate() {
            entry.encode(&mut buf[i * NAME_LEN..(i + 1) * NAME_LEN]);
        }
        buf
    }
}

pub(crate) fn empty_namelist_block(n: u64) -> Vec<u8> {
    vec![0u8; n as usize * NAME_LEN]
}

/// A `(name, id)` pair in the sorted lookup cache.
#[derive(Clone, Debug)]
struct NameIdPair {
    name: String,
    id: u16,
}

/// Sorted name→id lookup cache (spec.md §3 / §9).
///
/// Rebuilt wholesale on open. `push` appends new pairs at the tail in
/// insertion order, *not* sorted order; only `[0, written)` is ever
/// binary-searched, and `resort` (called once a frame's new names have been
/// committed to disk) re-sorts the whole cache and advances `written` to
/// cover it.
#[derive(Default)]
pub struct NameCache {
    entries: Vec<NameIdPair>,
    written: usize,
}

impl NameCache {
    pub fn from_committed(names: impl Iterator<Item = (String, u16)>) -> Self {
        let mut entries: Vec<NameIdPair> =
            names.map(|(name, id)| NameIdPair { name, id }).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let written = entries.len();
        NameCache { entries, written }
    }

    pub fn push(&mut self, name: String, id: u16) {
        self.entries.push(NameIdPair { name, id });
    }

    pub fn resort(&mut self) {
        self.entries.sort_by(|a, b| a.name.cmp(&b.name));
        self.written = self.entries.len();
    }

    /// Binary search the committed prefix for `name`, comparing only the
    /// first `name.len()` bytes of each candidate: an exact-match search
    /// for callers that pass full names, but also usable for prefix
    /// iteration (`find_matching_chunk_name`). Preserves the original's
    /// quirk: on a shared prefix, whichever entry the bisection lands on
    /// first is returned, which is not necessarily the lexically-first
    /// match (spec.md §9).
    pub fn find(&self, name: &str) -> Option<u16> {
        let written = self.written;
        if written == 0 {
            return None;
        }
        let len = name.len();
        let cmp_at = |i: usize| -> std::cmp::Ordering {
            let candidate = self.entries[i].name.as_bytes();
            let bound = len.min(candidate.len());
            name.as_bytes().cmp(&candidate[..bound])
        };

        let mut l = 0usize;
        let mut r = written;
        let base_cmp = cmp_at(0);
        if base_cmp == std::cmp::Ordering::Less {
            return None;
        }
        if base_cmp == std::cmp::Ordering::Equal {
            return Some(self.entries[0].id);
        }
        loop {
            let m = (l + r) / 2;
            match cmp_at(m) {
                std::cmp::Ordering::Less => r = m,
                std::cmp::Ordering::Equal => return Some(self.entries[m].id),
                std::cmp::Ordering::Greater => l = m,
            }
            if r - l <= 1 {
                break;
            }
        }
        None
    }

    /// Index of `name` within the sorted committed prefix, for resuming
    /// `find_matching_chunk_name` iteration after a previous hit.
    fn position_of(&self, name: &str) -> Option<usize> {
        let id = self.find(name)?;
        self.entries[..self.written].iter().position(|e| e.id == id)
    }

    /// First committed name with the given prefix at or after `start`
    /// (by position in the sorted cache, not insertion order).
    pub fn find_matching(&self, prefix: &str, prev: Option<&str>) -> Option<&str> {
        if self.written == 0 {
            return None;
        }
        let start = match prev {
            None => 0,
            Some(p) => self.position_of(p)? + 1,
        };
        self.entries[start..self.written]
            .iter()
            .find(|e| e.name.as_bytes().starts_with(prefix.as_bytes()))
            .map(|e| e.name.as_str())
    }
}
