//! Closed error taxonomy shared by every fallible archive operation.
//!
//! An [`ArchiveResult`] carries either a value or exactly one
//! [`ArchiveError`]; there is no "no error" failure.  I/O failures keep
//! their `std::io::Error` as the source so callers can still inspect the
//! OS-level cause.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("File not found in archive: {0}")]
    FileNotFound(String),
    #[error("File already exists in archive: {0}")]
    FileExists(String),
    #[error("Cannot open {path}: {source}")]
    FileOpen {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Read error: {0}")]
    FileRead(#[source] io::Error),
    #[error("Write error: {0}")]
    FileWrite(#[source] io::Error),
    #[error("Bad filename: {0}")]
    BadFilename(String),
    #[error("Bad path: {0}")]
    BadPath(String),
    #[error("Bad block {index}: {reason}")]
    BadBlock { index: u64, reason: String },
    #[error("Bad archive: {0}")]
    BadArchive(String),
    #[error("Bad processor: {0}")]
    BadProcessor(String),
    #[error("Chain starting at block {first} exceeds {limit} blocks")]
    BadBlockCount { first: u64, limit: u64 },
    #[error("Block index {index} out of range (archive has {num_blocks} blocks)")]
    BadBlockIndex { index: u64, num_blocks: u64 },
    #[error("Block {index} declares {len} payload bytes (capacity {capacity})")]
    BadBlockLength { index: u64, len: u64, capacity: usize },
}

/// Plain discriminant of an [`ArchiveError`], for matching on the taxonomy
/// without caring about the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FileNotFound,
    FileExists,
    FileOpenError,
    FileReadError,
    FileWriteError,
    BadFilename,
    BadPath,
    BadBlock,
    BadArchive,
    BadProcessor,
    BadBlockCount,
    BadBlockIndex,
    BadBlockLength,
}

impl ArchiveError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ArchiveError::FileNotFound(_)        => ErrorCode::FileNotFound,
            ArchiveError::FileExists(_)          => ErrorCode::FileExists,
            ArchiveError::FileOpen { .. }        => ErrorCode::FileOpenError,
            ArchiveError::FileRead(_)            => ErrorCode::FileReadError,
            ArchiveError::FileWrite(_)           => ErrorCode::FileWriteError,
            ArchiveError::BadFilename(_)         => ErrorCode::BadFilename,
            ArchiveError::BadPath(_)             => ErrorCode::BadPath,
            ArchiveError::BadBlock { .. }        => ErrorCode::BadBlock,
            ArchiveError::BadArchive(_)          => ErrorCode::BadArchive,
            ArchiveError::BadProcessor(_)        => ErrorCode::BadProcessor,
            ArchiveError::BadBlockCount { .. }   => ErrorCode::BadBlockCount,
            ArchiveError::BadBlockIndex { .. }   => ErrorCode::BadBlockIndex,
            ArchiveError::BadBlockLength { .. }  => ErrorCode::BadBlockLength,
        }
    }

    pub(crate) fn open<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        ArchiveError::FileOpen { path: path.into(), source }
    }

    pub(crate) fn bad_block<S: Into<String>>(index: u64, reason: S) -> Self {
        ArchiveError::BadBlock { index, reason: reason.into() }
    }
}
