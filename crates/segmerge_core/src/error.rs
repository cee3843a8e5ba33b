//! Error types for segmerge core.

use segmerge_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in segmerge core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage (directory) error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A structural invariant was violated while parsing index files.
    #[error("corrupt index ({resource}): {message}")]
    CorruptIndex {
        /// The file or resource being read.
        resource: String,
        /// Description of the corruption.
        message: String,
    },

    /// The index was written by a version that is no longer supported.
    #[error("index format too old ({resource}): {message}")]
    IndexFormatTooOld {
        /// The file or resource being read.
        resource: String,
        /// Description of the version problem.
        message: String,
    },

    /// The index was written by a newer version.
    #[error("index format too new ({resource}): version {version} > max {max}")]
    IndexFormatTooNew {
        /// The file or resource being read.
        resource: String,
        /// The version found.
        version: i32,
        /// The newest version supported.
        max: i32,
    },

    /// No commit point was found in the directory.
    #[error("no segments_N file found in {listing:?}")]
    IndexNotFound {
        /// The directory listing that was searched.
        listing: Vec<String>,
    },

    /// A file footer checksum did not match its contents.
    #[error("checksum mismatch in {resource}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// The file being verified.
        resource: String,
        /// Checksum stored in the footer.
        expected: u32,
        /// Checksum computed over the contents.
        actual: u32,
    },

    /// A merge was aborted. Benign; never reported as a failure.
    #[error("merge aborted: {reason}")]
    MergeAborted {
        /// Why the merge was aborted.
        reason: String,
    },

    /// A merge failed unexpectedly.
    #[error("merge of [{segments}] failed: {source}")]
    MergeException {
        /// Names of the segments being merged.
        segments: String,
        /// The underlying failure.
        source: Box<CoreError>,
    },

    /// The component was already closed.
    #[error("{what} is already closed")]
    AlreadyClosed {
        /// The closed component.
        what: String,
    },

    /// An argument was out of range.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a corrupt index error.
    pub fn corrupt(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptIndex {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates an index-format-too-old error.
    pub fn too_old(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IndexFormatTooOld {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates a merge aborted error.
    pub fn merge_aborted(reason: impl Into<String>) -> Self {
        Self::MergeAborted {
            reason: reason.into(),
        }
    }

    /// Wraps a worker failure with the names of the segments it was merging.
    pub fn merge_exception(segments: impl Into<String>, source: CoreError) -> Self {
        Self::MergeException {
            segments: segments.into(),
            source: Box::new(source),
        }
    }

    /// Creates an already-closed error.
    pub fn already_closed(what: impl Into<String>) -> Self {
        Self::AlreadyClosed { what: what.into() }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns `true` if this error means a merge was aborted, either
    /// directly or through an aborted rate-limited write.
    #[must_use]
    pub fn is_merge_aborted(&self) -> bool {
        matches!(
            self,
            Self::MergeAborted { .. } | Self::Storage(StorageError::Aborted(_))
        )
    }

    /// Returns `true` if this error indicates the index files are damaged.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptIndex { .. }
                | Self::ChecksumMismatch { .. }
                | Self::Storage(StorageError::Corrupted(_))
                | Self::Storage(StorageError::ReadPastEnd { .. })
        )
    }
}
