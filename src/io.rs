// SPDX-License-Identifier: MIT OR Apache-2.0

//! Positioned, retrying full-read and full-write primitives.
//!
//! `pread`/`pwrite` (and their Windows equivalents) do not guarantee a
//! single call transfers the whole buffer, and some platforms reject very
//! large transfers outright. These helpers loop until the requested byte
//! count has moved, chunking to stay under platform limits.

use positioned_io::{ReadAt, WriteAt};

use crate::error::{Error, Result};

cfg_if::cfg_if! {
    if #[cfg(any(windows, target_os = "macos"))] {
        // Windows and macOS raise an error for single transfers larger than
        // INT_MAX; stay well clear of that.
        const MAX_SINGLE_TRANSFER: usize = (i32::MAX / 2) as usize;
    } else {
        const MAX_SINGLE_TRANSFER: usize = usize::MAX;
    }
}

/// Read exactly `buf.len()` bytes starting at `offset`, looping over short
/// reads. A zero-length read before `buf` is filled is treated as EOF: the
/// function returns the number of bytes actually read rather than erroring.
pub fn read_full_at<R: ReadAt>(reader: &R, offset: u64, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        let to_read = (buf.len() - total).min(MAX_SINGLE_TRANSFER);
        let bytes_read = reader.read_at(offset + total as u64, &mut buf[total..total + to_read])?;
        if bytes_read == 0 {
            return Ok(total);
        }
        total += bytes_read;
    }
    Ok(total)
}

/// Read exactly `buf.len()` bytes, failing with [`Error::Io`] on short read.
pub fn read_exact_at<R: ReadAt>(reader: &R, offset: u64, buf: &mut [u8]) -> Result<()> {
    let n = read_full_at(reader, offset, buf)?;
    if n != buf.len() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "short read",
        )));
    }
    Ok(())
}

/// Write exactly `buf.len()` bytes starting at `offset`, looping over short
/// writes. Any short write that does not advance is an IO error.
pub fn write_full_at<W: WriteAt>(writer: &mut W, offset: u64, buf: &[u8]) -> Result<()> {
    let mut total = 0usize;
    while total < buf.len() {
        let to_write = (buf.len() - total).min(MAX_SINGLE_TRANSFER);
        let bytes_written = writer.write_at(offset + total as u64, &buf[total..total + to_write])?;
        if bytes_written == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write returned zero bytes",
            )));
        }
        total += bytes_written;
    }
    Ok(())
}
