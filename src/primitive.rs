// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{Error, Result};

/// Primitive element types a chunk's N×M array may hold.
///
/// The discriminant is the on-disk `type` byte in an index entry, so the
/// explicit values below are load-bearing, not cosmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GsdType {
    U8 = 0,
    I8 = 1,
    U16 = 2,
    I16 = 3,
    U32 = 4,
    I32 = 5,
    U64 = 6,
    I64 = 7,
    F32 = 8,
    F64 = 9,
}

impl GsdType {
    /// Size in bytes of one element, or 0 for an unrecognized code; callers
    /// treat 0 as "corrupt or invalid," matching `gsd_sizeof_type`.
    pub fn size_of(self) -> u64 {
        match self {
            GsdType::U8 | GsdType::I8 => 1,
            GsdType::U16 | GsdType::I16 => 2,
            GsdType::U32 | GsdType::I32 | GsdType::F32 => 4,
            GsdType::U64 | GsdType::I64 | GsdType::F64 => 8,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(GsdType::U8),
            1 => Some(GsdType::I8),
            2 => Some(GsdType::U16),
            3 => Some(GsdType::I16),
            4 => Some(GsdType::U32),
            5 => Some(GsdType::I32),
            6 => Some(GsdType::U64),
            7 => Some(GsdType::I64),
            8 => Some(GsdType::F32),
            9 => Some(GsdType::F64),
            _ => None,
        }
    }

    pub(crate) fn from_u8_checked(raw: u8) -> Result<Self> {
        Self::from_u8(raw).ok_or(Error::FileCorrupt("unknown chunk type"))
    }
}

/// Size of the temporary copy buffer used to relocate the index in append
/// mode (§4.4 expansion protocol).
pub const COPY_BUFFER_SIZE: usize = 16 * 1024;
