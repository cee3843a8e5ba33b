//! Fault injection for directories.
//!
//! [`FaultyDirectory`] wraps another [`Directory`] and fails selected
//! operations on demand, so commit and recovery paths can be exercised
//! without a real crash.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segmerge_testkit::FaultyDirectory;
//!
//! let dir = FaultyDirectory::new(Arc::new(RamDirectory::new()));
//! dir.set_fail_on_rename(true);
//! assert!(infos.commit(&dir).is_err());
//! ```

use parking_lot::Mutex;
use segmerge_storage::{Directory, DirectoryLock, IndexInput, IndexOutput, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Operations a [`FaultyDirectory`] can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `rename` fails.
    Rename,
    /// `sync` fails.
    Sync,
    /// `sync_meta_data` fails.
    SyncMetaData,
    /// `create_output` fails for names with the configured prefix.
    Create,
}

/// A directory wrapper that can simulate I/O failures and racing writers.
#[derive(Debug)]
pub struct FaultyDirectory {
    inner: Arc<dyn Directory>,
    fail_rename: AtomicBool,
    fail_sync: AtomicBool,
    fail_sync_meta_data: AtomicBool,
    fail_create_prefix: Mutex<Option<String>>,
    /// Remaining `list_all` calls that report a phantom file.
    racing_listings: AtomicUsize,
    list_calls: AtomicUsize,
    injected: AtomicUsize,
}

impl FaultyDirectory {
    /// Wraps `inner` with no faults armed.
    pub fn new(inner: Arc<dyn Directory>) -> Self {
        Self {
            inner,
            fail_rename: AtomicBool::new(false),
            fail_sync: AtomicBool::new(false),
            fail_sync_meta_data: AtomicBool::new(false),
            fail_create_prefix: Mutex::new(None),
            racing_listings: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            injected: AtomicUsize::new(0),
        }
    }

    /// Returns the wrapped directory.
    pub fn inner(&self) -> &Arc<dyn Directory> {
        &self.inner
    }

    /// Sets whether `rename` fails.
    pub fn set_fail_on_rename(&self, fail: bool) {
        self.fail_rename.store(fail, Ordering::SeqCst);
    }

    /// Sets whether `sync` fails.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Sets whether `sync_meta_data` fails.
    pub fn set_fail_on_sync_meta_data(&self, fail: bool) {
        self.fail_sync_meta_data.store(fail, Ordering::SeqCst);
    }

    /// Makes `create_output` fail for names starting with `prefix`, or
    /// never with `None`.
    pub fn fail_creates_with_prefix(&self, prefix: Option<&str>) {
        *self.fail_create_prefix.lock() = prefix.map(str::to_string);
    }

    /// Makes the next `calls` listings each report a different phantom
    /// file, as if another writer were creating and deleting files.
    pub fn race_listings(&self, calls: usize) {
        self.racing_listings.store(calls, Ordering::SeqCst);
    }

    /// Returns how many times `list_all` was called.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Returns how many faults were injected.
    pub fn injected_faults(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    /// Disarms every fault.
    pub fn reset(&self) {
        self.set_fail_on_rename(false);
        self.set_fail_on_sync(false);
        self.set_fail_on_sync_meta_data(false);
        self.fail_creates_with_prefix(None);
        self.race_listings(0);
    }

    fn check(&self, armed: &AtomicBool, fault: Fault, name: &str) -> StorageResult<()> {
        if armed.load(Ordering::SeqCst) {
            return Err(self.inject(fault, name));
        }
        Ok(())
    }

    fn inject(&self, fault: Fault, name: &str) -> StorageError {
        self.injected.fetch_add(1, Ordering::SeqCst);
        StorageError::Io(io::Error::other(format!("injected {fault:?} failure on {name}")))
    }
}

impl Directory for FaultyDirectory {
    fn list_all(&self) -> StorageResult<Vec<String>> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut files = self.inner.list_all()?;
        let racing = self
            .racing_listings
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if racing {
            files.push(format!("_race{call}.tmp"));
            files.sort();
        }
        Ok(files)
    }

    fn file_length(&self, name: &str) -> StorageResult<u64> {
        self.inner.file_length(name)
    }

    fn create_output(&self, name: &str) -> StorageResult<Box<dyn IndexOutput>> {
        let fails = self
            .fail_create_prefix
            .lock()
            .as_deref()
            .is_some_and(|prefix| name.starts_with(prefix));
        if fails {
            return Err(self.inject(Fault::Create, name));
        }
        self.inner.create_output(name)
    }

    fn open_input(&self, name: &str) -> StorageResult<Box<dyn IndexInput>> {
        self.inner.open_input(name)
    }

    fn delete_file(&self, name: &str) -> StorageResult<()> {
        self.inner.delete_file(name)
    }

    fn rename(&self, source: &str, dest: &str) -> StorageResult<()> {
        self.check(&self.fail_rename, Fault::Rename, source)?;
        self.inner.rename(source, dest)
    }

    fn sync(&self, names: &[&str]) -> StorageResult<()> {
        self.check(&self.fail_sync, Fault::Sync, &names.join(","))?;
        self.inner.sync(names)
    }

    fn sync_meta_data(&self) -> StorageResult<()> {
        self.check(&self.fail_sync_meta_data, Fault::SyncMetaData, "directory")?;
        self.inner.sync_meta_data()
    }

    fn obtain_lock(&self, name: &str) -> StorageResult<Box<dyn DirectoryLock>> {
        self.inner.obtain_lock(name)
    }
}
