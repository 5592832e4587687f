// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`GsdHandle`]: the open file plus everything cached about its layout.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::Path;

use memmap2::MmapOptions;
use tracing::debug;

use crate::error::{Error, Result};
use crate::header::{Header, HEADER_SIZE};
use crate::index::{self, IndexEntry, IndexStorage, RawIndexEntry, INDEX_ENTRY_SIZE};
use crate::namelist::{self, NameCache, Namelist, NAMELIST_ENTRY_SIZE};
use crate::primitive::{GsdType, COPY_BUFFER_SIZE};

/// How a file was opened, mirroring `gsd_open_flag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    ReadOnly,
    ReadWrite,
    /// Like `ReadWrite`, but the index is never fully resident: only the
    /// entries written since open are kept in memory (spec.md §4.5).
    Append,
}

/// An open GSD file.
///
/// Not `Sync`: every operation takes `&mut self` or touches interior state
/// that assumes single-threaded access, matching the reference
/// implementation's concurrency model (spec.md §5). Share a handle across
/// threads behind your own `Mutex` if you need to.
pub struct GsdHandle {
    file: File,
    mode: OpenFlag,
    header: Header,
    file_size: u64,
    cur_frame: u64,
    index_num_entries: u64,
    index_written_entries: u64,
    storage: IndexStorage,
    namelist: Namelist,
    name_cache: NameCache,
}

fn initialize_file(
    file: &mut File,
    application: &str,
    schema: &str,
    schema_version: u32,
) -> Result<()> {
    file.set_len(0)?;
    let header = Header::new(application, schema, schema_version);
    crate::io::write_full_at(file, 0, &header.encode())?;
    let index_block = index::empty_index_block(header.index_allocated_entries);
    crate::io::write_full_at(file, HEADER_SIZE as u64, &index_block)?;
    let namelist_block = namelist::empty_namelist_block(header.namelist_allocated_entries);
    crate::io::write_full_at(file, header.namelist_location, &namelist_block)?;
    file.sync_all()?;
    Ok(())
}

/// Load everything after the header has been validated: index residency,
/// namelist, name cache, and the open-time bootstrap bisections.
fn load_state(mut file: File, mode: OpenFlag) -> Result<GsdHandle> {
    let mut header_buf = [0u8; HEADER_SIZE];
    let n = crate::io::read_full_at(&file, 0, &mut header_buf)?;
    if n != HEADER_SIZE {
        return Err(Error::NotAGsdFile);
    }
    let header = Header::decode(&header_buf)?;

    let file_size = file.seek(SeekFrom::End(0))?;

    let index_bytes_len = header.index_allocated_entries * INDEX_ENTRY_SIZE as u64;
    if header.index_location + index_bytes_len > file_size {
        return Err(Error::FileCorrupt("index extends past end of file"));
    }
    let namelist_bytes_len = header.namelist_allocated_entries * NAMELIST_ENTRY_SIZE as u64;
    if header.namelist_location + namelist_bytes_len > file_size {
        return Err(Error::FileCorrupt("namelist extends past end of file"));
    }

    let mut namelist_buf = vec![0u8; namelist_bytes_len as usize];
    crate::io::read_exact_at(&file, header.namelist_location, &mut namelist_buf)?;
    let namelist = Namelist::decode(&namelist_buf, header.namelist_allocated_entries);

    let name_cache = NameCache::from_committed(
        namelist.entries[..namelist.num_entries as usize]
            .iter()
            .enumerate()
            .map(|(i, e)| (e.as_str().to_string(), i as u16)),
    );

    let (storage, index_num_entries, last_frame) = match mode {
        OpenFlag::ReadOnly => {
            // SAFETY: the mapped region is only read through `RawIndexEntry`
            // decoding; concurrent external mutation of the file is the
            // caller's problem, same as for the reference implementation.
            let mmap = unsafe {
                MmapOptions::new()
                    .offset(header.index_location)
                    .len(index_bytes_len as usize)
                    .map(&file)?
            };
            let num_entries = index::bootstrap_num_entries(
                |i| index::entry_at(&mmap, i),
                header.index_allocated_entries,
                file_size,
                namelist.num_entries,
            )?;
            let last = if num_entries == 0 {
                0
            } else {
                index::entry_at(&mmap, num_entries - 1).frame
            };
            (IndexStorage::Mapped(mmap), num_entries, last)
        }
        OpenFlag::ReadWrite => {
            let mut buf = vec![0u8; index_bytes_len as usize];
            crate::io::read_exact_at(&file, header.index_location, &mut buf)?;
            let entries = index::decode_heap(&buf, header.index_allocated_entries);
            let num_entries = index::bootstrap_num_entries(
                |i| entries[i as usize],
                header.index_allocated_entries,
                file_size,
                namelist.num_entries,
            )?;
            let last = if num_entries == 0 {
                0
            } else {
                entries[(num_entries - 1) as usize].frame
            };
            (IndexStorage::Heap(entries), num_entries, last)
        }
        OpenFlag::Append => {
            let num_entries;
            let last;
            {
                let mmap = unsafe {
                    MmapOptions::new()
                        .offset(header.index_location)
                        .len(index_bytes_len as usize)
                        .map(&file)?
                };
                num_entries = index::bootstrap_num_entries(
                    |i| index::entry_at(&mmap, i),
                    header.index_allocated_entries,
                    file_size,
                    namelist.num_entries,
                )?;
                last = if num_entries == 0 {
                    0
                } else {
                    index::entry_at(&mmap, num_entries - 1).frame
                };
                // mmap dropped at the end of this block: append mode only
                // needs it for this one-time bootstrap scan.
            }
            (IndexStorage::AppendTail(Vec::new()), num_entries, last)
        }
    };

    let cur_frame = if index_num_entries == 0 { 0 } else { last_frame + 1 };

    debug!(
        mode = ?mode,
        index_num_entries,
        namelist_num_entries = namelist.num_entries,
        cur_frame,
        "gsd file opened"
    );

    Ok(GsdHandle {
        file,
        mode,
        header,
        file_size,
        cur_frame,
        index_num_entries,
        index_written_entries: index_num_entries,
        storage,
        namelist,
        name_cache,
    })
}

impl GsdHandle {
    /// Create a new, empty GSD file at `path`, truncating any existing
    /// contents. The file is not left open; call [`GsdHandle::open`]
    /// afterward, or use [`GsdHandle::create_and_open`].
    pub fn create(
        path: impl AsRef<Path>,
        application: &str,
        schema: &str,
        schema_version: u32,
    ) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        initialize_file(&mut file, application, schema, schema_version)
    }

    /// Create a new GSD file and open it in one step.
    ///
    /// `flags` must be [`OpenFlag::ReadWrite`] or [`OpenFlag::Append`]; a
    /// freshly created file cannot usefully be opened read-only.
    pub fn create_and_open(
        path: impl AsRef<Path>,
        application: &str,
        schema: &str,
        schema_version: u32,
        flags: OpenFlag,
        exclusive: bool,
    ) -> Result<Self> {
        if flags == OpenFlag::ReadOnly {
            return Err(Error::FileMustBeWritable);
        }
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if exclusive {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        let mut file = options.open(path)?;
        initialize_file(&mut file, application, schema, schema_version)?;
        load_state(file, flags)
    }

    /// Open an existing GSD file.
    pub fn open(path: impl AsRef<Path>, flags: OpenFlag) -> Result<Self> {
        let file = match flags {
            OpenFlag::ReadOnly => OpenOptions::new().read(true).open(path)?,
            OpenFlag::ReadWrite | OpenFlag::Append => {
                OpenOptions::new().read(true).write(true).open(path)?
            }
        };
        load_state(file, flags)
    }

    /// Wipe all frames and chunks from the file, preserving `application`,
    /// `schema`, and `schema_version` from the current header.
    pub fn truncate(&mut self) -> Result<()> {
        if self.mode == OpenFlag::ReadOnly {
            return Err(Error::FileMustBeWritable);
        }
        let application = self.header.application().to_string();
        let schema = self.header.schema().to_string();
        let schema_version = self.header.schema_version;
        initialize_file(&mut self.file, &application, &schema, schema_version)?;
        let file = self.file.try_clone()?;
        *self = load_state(file, self.mode)?;
        Ok(())
    }

    /// Number of frames committed by [`GsdHandle::end_frame`] so far.
    pub fn nframes(&self) -> u64 {
        self.cur_frame
    }

    /// Stage a chunk's data for the current (not-yet-committed) frame.
    pub fn write_chunk(
        &mut self,
        name: &str,
        kind: GsdType,
        n: u64,
        m: u32,
        flags: u8,
        data: &[u8],
    ) -> Result<()> {
        if self.mode == OpenFlag::ReadOnly {
            return Err(Error::FileMustBeWritable);
        }
        if n == 0 {
            return Err(Error::InvalidArgument("N must be nonzero"));
        }
        if m == 0 {
            return Err(Error::InvalidArgument("M must be nonzero"));
        }
        if flags != 0 {
            return Err(Error::InvalidArgument("flags must be zero"));
        }
        let expected_len = n * m as u64 * kind.size_of();
        if data.len() as u64 != expected_len {
            return Err(Error::InvalidArgument(
                "data length does not match N * M * sizeof(type)",
            ));
        }

        let id = match self.name_cache.find(name) {
            Some(id) => id,
            None => {
                let id = self
                    .namelist
                    .append(name, self.header.namelist_allocated_entries)?;
                self.name_cache.push(name.to_string(), id);
                id
            }
        };

        let location = self.file_size;
        crate::io::write_full_at(&mut self.file, location, data)?;
        self.file_size += data.len() as u64;

        if self.index_num_entries >= self.header.index_allocated_entries {
            self.expand_index()?;
        }

        let raw = index::encode_entry(IndexEntry {
            frame: self.cur_frame,
            n,
            location,
            m,
            id,
            kind,
            flags,
        });
        self.storage.push(self.index_num_entries, raw);
        self.index_num_entries += 1;
        Ok(())
    }

    /// Double the on-disk index capacity, relocating it to the end of the
    /// file and rewriting the header to point at the new location
    /// (spec.md §4.4). Crash-safe: the header is only updated, and only
    /// fsynced, after the new block is fully written and fsynced.
    fn expand_index(&mut self) -> Result<()> {
        let old_size = self.header.index_allocated_entries;
        let new_size = old_size * 2;
        let new_location = self.file.seek(SeekFrom::End(0))?;

        match &mut self.storage {
            IndexStorage::Heap(entries) => {
                entries.resize(new_size as usize, index::new_entry_raw());
                let bytes = index::encode_entries(entries);
                crate::io::write_full_at(&mut self.file, new_location, &bytes)?;
            }
            IndexStorage::AppendTail(_) => {
                let old_location = self.header.index_location;
                let old_bytes = old_size * INDEX_ENTRY_SIZE as u64;
                let mut buf = vec![0u8; COPY_BUFFER_SIZE];
                let mut copied = 0u64;
                while copied < old_bytes {
                    let chunk = (old_bytes - copied).min(COPY_BUFFER_SIZE as u64) as usize;
                    crate::io::read_exact_at(
                        &self.file,
                        old_location + copied,
                        &mut buf[..chunk],
                    )?;
                    crate::io::write_full_at(
                        &mut self.file,
                        new_location + copied,
                        &buf[..chunk],
                    )?;
                    copied += chunk as u64;
                }
                buf.iter_mut().for_each(|b| *b = 0);
                let new_bytes = new_size * INDEX_ENTRY_SIZE as u64;
                while copied < new_bytes {
                    let chunk = (new_bytes - copied).min(COPY_BUFFER_SIZE as u64) as usize;
                    crate::io::write_full_at(
                        &mut self.file,
                        new_location + copied,
                        &buf[..chunk],
                    )?;
                    copied += chunk as u64;
                }
            }
            IndexStorage::Mapped(_) => unreachable!("read-only handles never expand the index"),
        }

        self.header.index_allocated_entries = new_size;
        self.header.index_location = new_location;
        self.file_size = new_location + new_size * INDEX_ENTRY_SIZE as u64;

        self.file.sync_all()?;
        crate::io::write_full_at(&mut self.file, 0, &self.header.encode())?;
        self.file.sync_all()?;
        debug!(old_size, new_size, new_location, "index expanded");
        Ok(())
    }

    /// Commit the staged frame: flush unwritten index entries and any new
    /// namelist entries to disk, then advance to the next frame.
    ///
    /// Index entries are written without an fsync of their own; they only
    /// become durable once the *next* frame's commit (or the namelist
    /// fsync below, or `expand_index`) forces one, matching the reference
    /// implementation exactly (spec.md §9).
    pub fn end_frame(&mut self) -> Result<()> {
        if self.mode == OpenFlag::ReadOnly {
            return Err(Error::FileMustBeWritable);
        }
        self.cur_frame += 1;

        let unwritten = self.index_num_entries - self.index_written_entries;
        if unwritten > 0 {
            let write_pos =
                self.header.index_location + self.index_written_entries * INDEX_ENTRY_SIZE as u64;
            let entries: Vec<RawIndexEntry> = match &self.storage {
                IndexStorage::Heap(v) => {
                    v[self.index_written_entries as usize..self.index_num_entries as usize]
                        .to_vec()
                }
                IndexStorage::AppendTail(v) => v.clone(),
                IndexStorage::Mapped(_) => unreachable!("read-only handles never write chunks"),
            };
            let bytes = index::encode_entries(&entries);
            crate::io::write_full_at(&mut self.file, write_pos, &bytes)?;
            self.index_written_entries = self.index_num_entries;
            if let IndexStorage::AppendTail(v) = &mut self.storage {
                v.clear();
            }
        }

        let new_names = self.namelist.num_entries - self.namelist.written_entries;
        if new_names > 0 {
            let write_pos = self.header.namelist_location
                + self.namelist.written_entries * NAMELIST_ENTRY_SIZE as u64;
            let bytes = self
                .namelist
                .encode_range(self.namelist.written_entries, self.namelist.num_entries);
            crate::io::write_full_at(&mut self.file, write_pos, &bytes)?;
            self.namelist.written_entries = self.namelist.num_entries;
            self.name_cache.resort();
            self.file.sync_all()?;
        }

        debug!(frame = self.cur_frame, unwritten, new_names, "frame ended");
        Ok(())
    }

    /// Find the entry for `name` in `frame`, or `None` if no such chunk was
    /// written. Always `None` on an append-mode handle, mirroring the
    /// reference implementation: it is not an error to ask, it simply
    /// cannot see frames it hasn't committed itself (spec.md §4.6).
    pub fn find_chunk(&self, frame: u64, name: &str) -> Result<Option<IndexEntry>> {
        if self.mode == OpenFlag::Append {
            return Ok(None);
        }
        if frame >= self.cur_frame || self.index_num_entries == 0 {
            return Ok(None);
        }
        let Some(match_id) = self.name_cache.find(name) else {
            return Ok(None);
        };

        let mut l = 0u64;
        let mut r = self.index_num_entries;
        loop {
            let m = (l + r) / 2;
            let entry = self.storage.get(m, self.index_written_entries);
            if frame < entry.frame {
                r = m;
            } else {
                l = m;
            }
            if r - l <= 1 {
                break;
            }
        }

        let mut cur = l as i64;
        while cur >= 0 {
            let entry = self.storage.get(cur as u64, self.index_written_entries);
            if entry.frame != frame {
                break;
            }
            if entry.id == match_id {
                return Ok(Some(index::decode_entry(entry)?));
            }
            cur -= 1;
        }
        Ok(None)
    }

    /// Read a chunk's payload, previously located via [`GsdHandle::find_chunk`].
    pub fn read_chunk(&self, entry: &IndexEntry, dst: &mut [u8]) -> Result<()> {
        if self.mode == OpenFlag::Append {
            return Err(Error::FileMustBeReadable);
        }
        let size = entry.size();
        if size == 0 {
            return Err(Error::FileCorrupt("entry size is zero"));
        }
        if entry.location == 0 {
            return Err(Error::FileCorrupt("entry location is unset"));
        }
        if entry.location + size > self.file_size {
            return Err(Error::FileCorrupt("chunk extends past end of file"));
        }
        if dst.len() as u64 != size {
            return Err(Error::InvalidArgument("destination buffer size mismatch"));
        }
        crate::io::read_exact_at(&self.file, entry.location, dst)?;
        Ok(())
    }

    /// Iterate committed chunk names with the given prefix, resuming after
    /// `prev` (by position in the sorted name cache, not insertion order).
    pub fn find_matching_chunk_name(&self, prefix: &str, prev: Option<&str>) -> Option<&str> {
        self.name_cache.find_matching(prefix, prev)
    }

    pub fn application(&self) -> &str {
        self.header.application()
    }

    pub fn schema(&self) -> &str {
        self.header.schema()
    }

    pub fn schema_version(&self) -> u32 {
        self.header.schema_version
    }
}

impl Drop for GsdHandle {
    fn drop(&mut self) {
        // Buffers, the mmap (if any), and the file descriptor are all freed
        // unconditionally by their own `Drop` impls; there is no partial-free
        // path to get wrong here, unlike the handle-zeroing branches in the
        // reference implementation's close routine (spec.md §9).
        debug!(mode = ?self.mode, "gsd file closed");
    }
}
