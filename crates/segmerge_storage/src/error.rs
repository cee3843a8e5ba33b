//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The named file does not exist.
    #[error("file not found: {name}")]
    FileNotFound {
        /// The missing file name.
        name: String,
    },

    /// A file with this name already exists (files are write-once).
    #[error("file already exists: {name}")]
    FileAlreadyExists {
        /// The conflicting file name.
        name: String,
    },

    /// Attempted to read beyond the end of a file.
    #[error("read past EOF in {name}: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The file being read.
        name: String,
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current file size.
        size: u64,
    },

    /// The data read from a file is structurally invalid.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A lock could not be acquired.
    #[error("lock obtain failed for {name}: {reason}")]
    LockObtainFailed {
        /// The lock name.
        name: String,
        /// Why the lock could not be acquired.
        reason: String,
    },

    /// A rate-limited write observed that its owning operation was aborted.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The directory or stream is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Creates a file-not-found error.
    pub fn file_not_found(name: impl Into<String>) -> Self {
        Self::FileNotFound { name: name.into() }
    }

    /// Creates a file-already-exists error.
    pub fn file_already_exists(name: impl Into<String>) -> Self {
        Self::FileAlreadyExists { name: name.into() }
    }

    /// Creates a lock-obtain-failed error.
    pub fn lock_obtain_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LockObtainFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Maps an I/O error for `name`, turning `NotFound`/`AlreadyExists`
    /// into their dedicated variants.
    pub(crate) fn from_io(err: io::Error, name: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::file_not_found(name),
            io::ErrorKind::AlreadyExists => Self::file_already_exists(name),
            _ => Self::Io(err),
        }
    }
}
