// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// Errors produced by the GSD container engine.
///
/// Mirrors the status-code taxonomy of the reference implementation: every
/// fallible operation maps to exactly one of these variants rather than a
/// generic IO failure, so callers can distinguish "this file is corrupt"
/// from "the disk is full."
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("not a GSD file")]
    NotAGsdFile,

    #[error("invalid GSD file version {major}.{minor}")]
    InvalidVersion { major: u16, minor: u16 },

    #[error("file corrupt: {0}")]
    FileCorrupt(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("file must be writable")]
    FileMustBeWritable,

    #[error("file must be readable")]
    FileMustBeReadable,

    #[error("namelist is full")]
    NamelistFull,
}

pub type Result<T> = std::result::Result<T, Error>;
