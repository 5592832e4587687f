// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reader/writer for General Simulation Data (GSD) container files.
//!
//! A GSD file is an append-only log of *frames*. Each frame is a collection
//! of named, shaped chunks of primitive numeric data: an N×M array of one
//! of the [`GsdType`] element types. Chunks are written with
//! [`GsdHandle::write_chunk`] and only become visible to readers once
//! [`GsdHandle::end_frame`] commits the frame; readers look chunks up by
//! frame and name with [`GsdHandle::find_chunk`] and pull their bytes with
//! [`GsdHandle::read_chunk`].
//!
//! A [`GsdHandle`] is not [`Sync`]: it caches mutable state (the current
//! frame, pending index entries, the name lookup cache) with no internal
//! locking, the same way the reference implementation this crate's wire
//! format is compatible with does. Wrap a handle in your own `Mutex` to
//! share it across threads.

mod error;
mod handle;
mod header;
mod index;
mod io;
mod namelist;
mod primitive;

pub use error::{Error, Result};
pub use handle::{GsdHandle, OpenFlag};
pub use header::{make_version, split_version};
pub use index::IndexEntry;
pub use primitive::GsdType;
