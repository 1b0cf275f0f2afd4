//! Error types for sedimentdb
//!
//! This module defines every error a public operation can return. We use
//! `thiserror` for `Display`/`std::error::Error` derivation, following the
//! same constructor-plus-classification-method convention used throughout
//! this codebase's larger error types.

use std::io;
use thiserror::Error;

/// Result type alias for sedimentdb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds returned by sedimentdb.
#[derive(Debug, Error)]
pub enum Error {
    /// A key was empty where a non-empty key is required.
    #[error("key must not be empty")]
    KeyEmpty,

    /// A lookup by key found nothing, in a context where that is an error
    /// rather than an `Option::None`.
    #[error("key not found")]
    KeyNotFound,

    /// The directory lock is already held by another `Database` instance.
    #[error("database directory is already in use")]
    DirectoryInUse,

    /// A record position referenced a segment id that is not open.
    #[error("segment {0} not found")]
    SegmentNotFound(u32),

    /// A record failed CRC validation.
    #[error("invalid CRC for record at offset {0}")]
    InvalidCRC(u64),

    /// An operation was attempted after the database was closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// An operation was attempted on an already-committed batch.
    #[error("batch is closed")]
    BatchClosed,

    /// A merge was requested while one was already running.
    #[error("merge already in progress")]
    MergeInProgress,

    /// The requested operation is not supported by the current configuration.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether retrying the same operation might succeed without caller
    /// intervention.
    ///
    /// Only the generic I/O variant is retryable; corruption and
    /// directory-contention errors need the caller (or a reopen) to act
    /// first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Whether this error indicates on-disk corruption rather than a
    /// misuse or contention error.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::InvalidCRC(_))
    }
}
