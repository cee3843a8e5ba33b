//! In-memory directory for testing.

use crate::data::{DataInput, DataOutput};
use crate::directory::{Directory, DirectoryLock, IndexInput, IndexOutput};
use crate::error::{StorageError, StorageResult};
use crc32fast::Hasher;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

type FileMap = Arc<RwLock<BTreeMap<String, Arc<Vec<u8>>>>>;

/// An in-memory directory.
///
/// This directory keeps every file in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral indexes that don't need persistence
///
/// A file becomes visible in [`Directory::list_all`] as soon as it is
/// created; its contents are published when the output is closed.
///
/// # Thread Safety
///
/// This directory is thread-safe and can be shared across merge threads.
///
/// # Example
///
/// ```rust
/// use segmerge_storage::{DataOutput, Directory, RamDirectory};
///
/// let dir = RamDirectory::new();
/// let mut out = dir.create_output("_0.si").unwrap();
/// out.write_i32(42).unwrap();
/// out.close().unwrap();
/// assert_eq!(dir.file_length("_0.si").unwrap(), 4);
/// ```
#[derive(Debug, Default, Clone)]
pub struct RamDirectory {
    files: FileMap,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl RamDirectory {
    /// Creates a new empty in-memory directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a file's current contents.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn file_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().get(name).map(|data| data.as_ref().clone())
    }

    /// Overwrites (or creates) a file with raw bytes.
    ///
    /// Useful for testing corruption and recovery scenarios.
    pub fn put_file_bytes(&self, name: &str, data: Vec<u8>) {
        self.files.write().insert(name.to_string(), Arc::new(data));
    }

    /// Returns the total bytes held by all files.
    #[must_use]
    pub fn ram_bytes_used(&self) -> u64 {
        self.files.read().values().map(|d| d.len() as u64).sum()
    }
}

impl Directory for RamDirectory {
    fn list_all(&self) -> StorageResult<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn file_length(&self, name: &str) -> StorageResult<u64> {
        self.files
            .read()
            .get(name)
            .map(|d| d.len() as u64)
            .ok_or_else(|| StorageError::file_not_found(name))
    }

    fn create_output(&self, name: &str) -> StorageResult<Box<dyn IndexOutput>> {
        let mut files = self.files.write();
        if files.contains_key(name) {
            return Err(StorageError::file_already_exists(name));
        }
        files.insert(name.to_string(), Arc::new(Vec::new()));
        Ok(Box::new(RamOutput {
            name: name.to_string(),
            buffer: Vec::new(),
            hasher: Hasher::new(),
            files: Arc::clone(&self.files),
        }))
    }

    fn open_input(&self, name: &str) -> StorageResult<Box<dyn IndexInput>> {
        let data = self
            .files
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::file_not_found(name))?;
        Ok(Box::new(RamInput {
            name: name.to_string(),
            data,
            pos: 0,
        }))
    }

    fn delete_file(&self, name: &str) -> StorageResult<()> {
        self.files
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::file_not_found(name))
    }

    fn rename(&self, source: &str, dest: &str) -> StorageResult<()> {
        let mut files = self.files.write();
        let data = files
            .remove(source)
            .ok_or_else(|| StorageError::file_not_found(source))?;
        files.insert(dest.to_string(), data);
        Ok(())
    }

    fn sync(&self, names: &[&str]) -> StorageResult<()> {
        let files = self.files.read();
        for name in names {
            if !files.contains_key(*name) {
                return Err(StorageError::file_not_found(*name));
            }
        }
        Ok(())
    }

    fn sync_meta_data(&self) -> StorageResult<()> {
        // In-memory directory has no metadata to sync
        Ok(())
    }

    fn obtain_lock(&self, name: &str) -> StorageResult<Box<dyn DirectoryLock>> {
        let mut locks = self.locks.lock();
        if !locks.insert(name.to_string()) {
            return Err(StorageError::lock_obtain_failed(name, "lock held by this process"));
        }
        Ok(Box::new(RamLock {
            name: name.to_string(),
            locks: Arc::clone(&self.locks),
        }))
    }
}

#[derive(Debug)]
struct RamOutput {
    name: String,
    buffer: Vec<u8>,
    hasher: Hasher,
    files: FileMap,
}

impl DataOutput for RamOutput {
    fn write_byte(&mut self, b: u8) -> StorageResult<()> {
        self.buffer.push(b);
        self.hasher.update(&[b]);
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> StorageResult<()> {
        self.buffer.extend_from_slice(bytes);
        self.hasher.update(bytes);
        Ok(())
    }
}

impl IndexOutput for RamOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_pointer(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn close(self: Box<Self>) -> StorageResult<()> {
        let RamOutput {
            name,
            buffer,
            files,
            ..
        } = *self;
        let mut files = files.write();
        // A file deleted or renamed away while open stays gone.
        if let Some(slot) = files.get_mut(&name) {
            *slot = Arc::new(buffer);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct RamInput {
    name: String,
    data: Arc<Vec<u8>>,
    pos: usize,
}

impl DataInput for RamInput {
    fn read_byte(&mut self) -> StorageResult<u8> {
        let b = *self.data.get(self.pos).ok_or_else(|| StorageError::ReadPastEnd {
            name: self.name.clone(),
            offset: self.pos as u64,
            len: 1,
            size: self.data.len() as u64,
        })?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> StorageResult<()> {
        let end = self.pos.saturating_add(buf.len());
        if end > self.data.len() {
            return Err(StorageError::ReadPastEnd {
                name: self.name.clone(),
                offset: self.pos as u64,
                len: buf.len(),
                size: self.data.len() as u64,
            });
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}

impl IndexInput for RamInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn file_pointer(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, pos: u64) -> StorageResult<()> {
        if pos > self.data.len() as u64 {
            return Err(StorageError::ReadPastEnd {
                name: self.name.clone(),
                offset: pos,
                len: 0,
                size: self.data.len() as u64,
            });
        }
        self.pos = pos as usize;
        Ok(())
    }
}

#[derive(Debug)]
struct RamLock {
    name: String,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl DirectoryLock for RamLock {
    fn ensure_valid(&self) -> StorageResult<()> {
        if self.locks.lock().contains(&self.name) {
            Ok(())
        } else {
            Err(StorageError::lock_obtain_failed(&self.name, "lock was released"))
        }
    }
}

impl Drop for RamLock {
    fn drop(&mut self) {
        self.locks.lock().remove(&self.name);
    }
}
