//! Directory trait definition.

use crate::checksum::ChecksumIndexInput;
use crate::data::{DataInput, DataOutput};
use crate::error::StorageResult;
use std::fmt::Debug;

/// A flat namespace of write-once files.
///
/// Directories do not interpret the files they hold: the commit ledger and
/// codecs own every format. Segment files are created once, never modified,
/// and deleted only when no commit references them.
///
/// # Invariants
///
/// - `create_output` fails with `FileAlreadyExists` if the name is taken
/// - `list_all` returns names sorted; it may be weakly consistent while
///   other threads create/rename/delete files
/// - `sync` makes the named files' contents durable
/// - `sync_meta_data` makes prior creations, renames and deletions durable
/// - Directories must be `Send + Sync`; merge threads share them
pub trait Directory: Send + Sync + Debug {
    /// Returns all file names in the directory, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list_all(&self) -> StorageResult<Vec<String>>;

    /// Returns the length in bytes of a file.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the file does not exist.
    fn file_length(&self, name: &str) -> StorageResult<u64>;

    /// Creates a new file for sequential writing.
    ///
    /// # Errors
    ///
    /// Returns `FileAlreadyExists` if the name is already taken.
    fn create_output(&self, name: &str) -> StorageResult<Box<dyn IndexOutput>>;

    /// Opens an existing file for reading.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the file does not exist.
    fn open_input(&self, name: &str) -> StorageResult<Box<dyn IndexInput>>;

    /// Deletes a file.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the file does not exist.
    fn delete_file(&self, name: &str) -> StorageResult<()>;

    /// Atomically renames `source` to `dest`.
    ///
    /// The rename is not durable until [`Directory::sync_meta_data`] returns.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if `source` does not exist.
    fn rename(&self, source: &str, dest: &str) -> StorageResult<()>;

    /// Makes the contents of the named files durable.
    ///
    /// # Errors
    ///
    /// Returns an error if any file is missing or the sync fails.
    fn sync(&self, names: &[&str]) -> StorageResult<()>;

    /// Makes directory metadata (creations, renames, deletions) durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync_meta_data(&self) -> StorageResult<()>;

    /// Acquires an exclusive lock with the given name.
    ///
    /// The lock is released when the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns `LockObtainFailed` if the lock is already held.
    fn obtain_lock(&self, name: &str) -> StorageResult<Box<dyn DirectoryLock>>;

    /// Opens a file wrapped in a CRC32-computing reader.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the file does not exist.
    fn open_checksum_input(&self, name: &str) -> StorageResult<ChecksumIndexInput> {
        Ok(ChecksumIndexInput::new(self.open_input(name)?))
    }

    /// Deletes files, ignoring any errors.
    ///
    /// Used on rollback paths where the original error must be preserved.
    fn delete_files_ignoring_errors(&self, names: &[&str]) {
        for name in names {
            let _ = self.delete_file(name);
        }
    }
}

/// A sequential writer for a single file.
pub trait IndexOutput: DataOutput + Send + Debug {
    /// Returns the name of the file being written.
    fn name(&self) -> &str;

    /// Returns the number of bytes written so far.
    fn file_pointer(&self) -> u64;

    /// Returns the CRC32 of all bytes written so far.
    fn checksum(&self) -> u32;

    /// Flushes and closes the file, publishing its contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    fn close(self: Box<Self>) -> StorageResult<()>;
}

/// A random-access reader for a single file.
pub trait IndexInput: DataInput + Send + Debug {
    /// Returns the name of the file being read.
    fn name(&self) -> &str;

    /// Returns the length of the file.
    fn length(&self) -> u64;

    /// Returns the current read position.
    fn file_pointer(&self) -> u64;

    /// Moves the read position.
    ///
    /// # Errors
    ///
    /// Returns `ReadPastEnd` if `pos` is beyond the end of the file.
    fn seek(&mut self, pos: u64) -> StorageResult<()>;
}

/// An exclusive lock held on a directory. Released on drop.
pub trait DirectoryLock: Send + Debug {
    /// Verifies the lock is still held.
    ///
    /// # Errors
    ///
    /// Returns `LockObtainFailed` if the lock was lost.
    fn ensure_valid(&self) -> StorageResult<()>;
}
