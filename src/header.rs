// SPDX-License-Identifier: MIT OR Apache-2.0

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Magic value identifying a GSD file.
pub const MAGIC: u64 = 0x65DF_65DF_65DF_65DF;

/// Initial index allocation, in entries.
pub const INITIAL_INDEX_SIZE: u64 = 128;

/// Initial namelist allocation, in entries. Effectively the namelist's
/// permanent capacity: there is no growth protocol for it (spec.md §9).
pub const INITIAL_NAMELIST_SIZE: u64 = 65535;

const APPLICATION_LEN: usize = 64;
const SCHEMA_LEN: usize = 64;
const RESERVED_LEN: usize = 80;

/// Size of the fixed on-disk header, in bytes.
pub const HEADER_SIZE: usize = 8 * 5 + 4 * 2 + APPLICATION_LEN + SCHEMA_LEN + RESERVED_LEN;

const _: () = assert!(HEADER_SIZE == 256);

const OFF_MAGIC: usize = 0;
const OFF_INDEX_LOCATION: usize = 8;
const OFF_NAMELIST_LOCATION: usize = 16;
const OFF_INDEX_ALLOCATED: usize = 24;
const OFF_NAMELIST_ALLOCATED: usize = 32;
const OFF_SCHEMA_VERSION: usize = 40;
const OFF_GSD_VERSION: usize = 44;
const OFF_APPLICATION: usize = 48;
const OFF_SCHEMA: usize = OFF_APPLICATION + APPLICATION_LEN;
const OFF_RESERVED: usize = OFF_SCHEMA + SCHEMA_LEN;

/// The fixed 256-byte on-disk header at file offset 0.
///
/// Field order and sizes below are byte-exact and must not be reordered:
/// they are the wire format, not merely an in-memory convenience struct.
/// `encode`/`decode` do the little-endian packing explicitly rather than
/// relying on in-memory struct layout.
#[derive(Clone, Debug)]
pub struct Header {
    pub index_location: u64,
    pub namelist_location: u64,
    pub index_allocated_entries: u64,
    pub namelist_allocated_entries: u64,
    pub schema_version: u32,
    pub gsd_version: u32,
    application: [u8; APPLICATION_LEN],
    schema: [u8; SCHEMA_LEN],
}

/// Packs `major.minor` the way `gsd_make_version` does: major in the high
/// 16 bits, minor in the low 16 bits of a u32.
pub fn make_version(major: u16, minor: u16) -> u32 {
    (major as u32) << 16 | minor as u32
}

pub fn split_version(version: u32) -> (u16, u16) {
    ((version >> 16) as u16, (version & 0xFFFF) as u16)
}

fn pack_fixed_string(s: &str, out: &mut [u8]) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(out.len() - 1);
    out[..n].copy_from_slice(&bytes[..n]);
    out[n..].fill(0);
}

fn unpack_fixed_string(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).unwrap_or("")
}

impl Header {
    pub fn new(application: &str, schema: &str, schema_version: u32) -> Self {
        let index_location = HEADER_SIZE as u64;
        let namelist_location =
            index_location + INITIAL_INDEX_SIZE * crate::index::INDEX_ENTRY_SIZE as u64;
        let mut header = Header {
            index_location,
            namelist_location,
            index_allocated_entries: INITIAL_INDEX_SIZE,
            namelist_allocated_entries: INITIAL_NAMELIST_SIZE,
            schema_version,
            gsd_version: make_version(1, 0),
            application: [0; APPLICATION_LEN],
            schema: [0; SCHEMA_LEN],
        };
        pack_fixed_string(application, &mut header.application);
        pack_fixed_string(schema, &mut header.schema);
        header
    }

    pub fn application(&self) -> &str {
        unpack_fixed_string(&self.application)
    }

    pub fn schema(&self) -> &str {
        unpack_fixed_string(&self.schema)
    }

    /// Validate magic and version range: `0.3` exactly, or `>= 1.0` and `< 2.0`.
    fn validate(magic: u64, gsd_version: u32) -> Result<()> {
        if magic != MAGIC {
            return Err(Error::NotAGsdFile);
        }
        let v03 = make_version(0, 3);
        let v10 = make_version(1, 0);
        let v20 = make_version(2, 0);
        if gsd_version != v03 && (gsd_version < v10 || gsd_version >= v20) {
            let (major, minor) = split_version(gsd_version);
            return Err(Error::InvalidVersion { major, minor });
        }
        Ok(())
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        LittleEndian::write_u64(&mut buf[OFF_MAGIC..], MAGIC);
        LittleEndian::write_u64(&mut buf[OFF_INDEX_LOCATION..], self.index_location);
        LittleEndian::write_u64(&mut buf[OFF_NAMELIST_LOCATION..], self.namelist_location);
        LittleEndian::write_u64(&mut buf[OFF_INDEX_ALLOCATED..], self.index_allocated_entries);
        LittleEndian::write_u64(
            &mut buf[OFF_NAMELIST_ALLOCATED..],
            self.namelist_allocated_entries,
        );
        LittleEndian::write_u32(&mut buf[OFF_SCHEMA_VERSION..], self.schema_version);
        LittleEndian::write_u32(&mut buf[OFF_GSD_VERSION..], self.gsd_version);
        buf[OFF_APPLICATION..OFF_APPLICATION + APPLICATION_LEN].copy_from_slice(&self.application);
        buf[OFF_SCHEMA..OFF_SCHEMA + SCHEMA_LEN].copy_from_slice(&self.schema);
        // OFF_RESERVED.. is left zeroed.
        let _ = OFF_RESERVED;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != HEADER_SIZE {
            return Err(Error::NotAGsdFile);
        }
        let magic = LittleEndian::read_u64(&buf[OFF_MAGIC..]);
        let gsd_version = LittleEndian::read_u32(&buf[OFF_GSD_VERSION..]);
        Self::validate(magic, gsd_version)?;

        let mut application = [0u8; APPLICATION_LEN];
        application.copy_from_slice(&buf[OFF_APPLICATION..OFF_APPLICATION + APPLICATION_LEN]);
        let mut schema = [0u8; SCHEMA_LEN];
        schema.copy_from_slice(&buf[OFF_SCHEMA..OFF_SCHEMA + SCHEMA_LEN]);

        Ok(Header {
            index_location: LittleEndian::read_u64(&buf[OFF_INDEX_LOCATION..]),
            namelist_location: LittleEndian::read_u64(&buf[OFF_NAMELIST_LOCATION..]),
            index_allocated_entries: LittleEndian::read_u64(&buf[OFF_INDEX_ALLOCATED..]),
            namelist_allocated_entries: LittleEndian::read_u64(&buf[OFF_NAMELIST_ALLOCATED..]),
            schema_version: LittleEndian::read_u32(&buf[OFF_SCHEMA_VERSION..]),
            gsd_version,
            application,
            schema,
        })
    }
}
