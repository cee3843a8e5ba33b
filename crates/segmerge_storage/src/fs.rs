//! File-system directory for persistent indexes.

use crate::data::{DataInput, DataOutput};
use crate::directory::{Directory, DirectoryLock, IndexInput, IndexOutput};
use crate::error::{StorageError, StorageResult};
use crc32fast::Hasher;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A directory backed by an OS directory.
///
/// Each index file is a regular file inside `path`. Subdirectories are
/// ignored by [`Directory::list_all`].
///
/// # Durability
///
/// - `sync()` calls `File::sync_all()` on every named file
/// - `sync_meta_data()` fsyncs the directory itself (Unix only; a no-op
///   elsewhere)
///
/// # Example
///
/// ```no_run
/// use segmerge_storage::{Directory, FsDirectory};
/// use std::path::Path;
///
/// let dir = FsDirectory::open_with_create_dirs(Path::new("index")).unwrap();
/// let files = dir.list_all().unwrap();
/// ```
#[derive(Debug)]
pub struct FsDirectory {
    path: PathBuf,
}

impl FsDirectory {
    /// Opens an existing directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` does not exist or is not a directory.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let meta = fs::metadata(path).map_err(|e| StorageError::from_io(e, &path.display().to_string()))?;
        if !meta.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a directory: {}", path.display()),
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Opens a directory, creating it and its parents if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        Self::open(path)
    }

    /// Returns the path of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Directory for FsDirectory {
    fn list_all(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_length(&self, name: &str) -> StorageResult<u64> {
        let meta = fs::metadata(self.resolve(name)).map_err(|e| StorageError::from_io(e, name))?;
        Ok(meta.len())
    }

    fn create_output(&self, name: &str) -> StorageResult<Box<dyn IndexOutput>> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.resolve(name))
            .map_err(|e| StorageError::from_io(e, name))?;
        Ok(Box::new(FsOutput {
            name: name.to_string(),
            writer: BufWriter::new(file),
            hasher: Hasher::new(),
            pos: 0,
        }))
    }

    fn open_input(&self, name: &str) -> StorageResult<Box<dyn IndexInput>> {
        let file = File::open(self.resolve(name)).map_err(|e| StorageError::from_io(e, name))?;
        let length = file.metadata()?.len();
        Ok(Box::new(FsInput {
            name: name.to_string(),
            file,
            length,
            pos: 0,
        }))
    }

    fn delete_file(&self, name: &str) -> StorageResult<()> {
        fs::remove_file(self.resolve(name)).map_err(|e| StorageError::from_io(e, name))
    }

    fn rename(&self, source: &str, dest: &str) -> StorageResult<()> {
        fs::rename(self.resolve(source), self.resolve(dest))
            .map_err(|e| StorageError::from_io(e, source))
    }

    fn sync(&self, names: &[&str]) -> StorageResult<()> {
        for name in names {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(self.resolve(name))
                .map_err(|e| StorageError::from_io(e, name))?;
            file.sync_all()?;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_meta_data(&self) -> StorageResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_meta_data(&self) -> StorageResult<()> {
        Ok(())
    }

    fn obtain_lock(&self, name: &str) -> StorageResult<Box<dyn DirectoryLock>> {
        let path = self.resolve(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // Non-blocking; a second holder fails immediately
        if let Err(e) = file.try_lock_exclusive() {
            return Err(StorageError::lock_obtain_failed(name, e.to_string()));
        }

        Ok(Box::new(FsLock {
            name: name.to_string(),
            path,
            file,
        }))
    }
}

#[derive(Debug)]
struct FsOutput {
    name: String,
    writer: BufWriter<File>,
    hasher: Hasher,
    pos: u64,
}

impl DataOutput for FsOutput {
    fn write_byte(&mut self, b: u8) -> StorageResult<()> {
        self.write_bytes(&[b])
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> StorageResult<()> {
        self.writer.write_all(bytes)?;
        self.hasher.update(bytes);
        self.pos += bytes.len() as u64;
        Ok(())
    }
}

impl IndexOutput for FsOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_pointer(&self) -> u64 {
        self.pos
    }

    fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn close(mut self: Box<Self>) -> StorageResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug)]
struct FsInput {
    name: String,
    file: File,
    length: u64,
    pos: u64,
}

impl DataInput for FsInput {
    fn read_byte(&mut self) -> StorageResult<u8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        Ok(b[0])
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> StorageResult<()> {
        let end = self.pos.saturating_add(buf.len() as u64);
        if end > self.length {
            return Err(StorageError::ReadPastEnd {
                name: self.name.clone(),
                offset: self.pos,
                len: buf.len(),
                size: self.length,
            });
        }
        self.file.read_exact(buf)?;
        self.pos = end;
        Ok(())
    }
}

impl IndexInput for FsInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn file_pointer(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> StorageResult<()> {
        if pos > self.length {
            return Err(StorageError::ReadPastEnd {
                name: self.name.clone(),
                offset: pos,
                len: 0,
                size: self.length,
            });
        }
        self.file.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }
}

#[derive(Debug)]
struct FsLock {
    name: String,
    path: PathBuf,
    file: File,
}

impl DirectoryLock for FsLock {
    fn ensure_valid(&self) -> StorageResult<()> {
        if self.path.exists() {
            Ok(())
        } else {
            Err(StorageError::lock_obtain_failed(
                &self.name,
                "lock file was removed externally",
            ))
        }
    }
}

impl Drop for FsLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fs_open_missing_fails() {
        let temp = tempdir().unwrap();
        assert!(FsDirectory::open(&temp.path().join("nope")).is_err());
    }

    #[test]
    fn fs_create_dirs() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a").join("b");
        let dir = FsDirectory::open_with_create_dirs(&path).unwrap();
        assert!(path.is_dir());
        assert!(dir.list_all().unwrap().is_empty());
    }

    #[test]
    fn fs_write_and_read() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();

        let mut out = dir.create_output("_0.si").unwrap();
        out.write_i32(7).unwrap();
        out.write_string("segment").unwrap();
        assert_eq!(out.file_pointer(), 12);
        out.close().unwrap();

        assert_eq!(dir.file_length("_0.si").unwrap(), 12);
        let mut input = dir.open_input("_0.si").unwrap();
        assert_eq!(input.read_i32().unwrap(), 7);
        assert_eq!(input.read_string().unwrap(), "segment");
        assert!(matches!(
            input.read_byte(),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn fs_create_existing_fails() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();
        dir.create_output("x").unwrap().close().unwrap();
        assert!(matches!(
            dir.create_output("x"),
            Err(StorageError::FileAlreadyExists { .. })
        ));
    }

    #[test]
    fn fs_missing_file_maps_to_not_found() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();
        assert!(matches!(
            dir.open_input("missing"),
            Err(StorageError::FileNotFound { .. })
        ));
        assert!(matches!(
            dir.delete_file("missing"),
            Err(StorageError::FileNotFound { .. })
        ));
    }

    #[test]
    fn fs_rename_sync_and_list() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();
        std::fs::create_dir(temp.path().join("subdir")).unwrap();

        let mut out = dir.create_output("pending_segments_1").unwrap();
        out.write_bytes(b"abc").unwrap();
        out.close().unwrap();
        dir.sync(&["pending_segments_1"]).unwrap();

        dir.rename("pending_segments_1", "segments_1").unwrap();
        dir.sync_meta_data().unwrap();
        assert_eq!(dir.list_all().unwrap(), vec!["segments_1".to_string()]);
    }

    #[test]
    fn fs_lock_prevents_second_holder() {
        let temp = tempdir().unwrap();
        let dir = FsDirectory::open(temp.path()).unwrap();

        let lock = dir.obtain_lock("write.lock").unwrap();
        lock.ensure_valid().unwrap();
        assert!(matches!(
            dir.obtain_lock("write.lock"),
            Err(StorageError::LockObtainFailed { .. })
        ));

        drop(lock);
        assert!(dir.obtain_lock("write.lock").is_ok());
    }
}
