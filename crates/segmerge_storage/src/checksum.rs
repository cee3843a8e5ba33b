//! CRC32-computing input wrapper.

use crate::data::DataInput;
use crate::directory::IndexInput;
use crate::error::StorageResult;
use crc32fast::Hasher;

/// Reads sequentially from an [`IndexInput`] while accumulating a CRC32 of
/// every byte consumed. Used to verify file footers.
#[derive(Debug)]
pub struct ChecksumIndexInput {
    inner: Box<dyn IndexInput>,
    hasher: Hasher,
}

impl ChecksumIndexInput {
    /// Wraps an input positioned at the start of the file.
    #[must_use]
    pub fn new(inner: Box<dyn IndexInput>) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
        }
    }

    /// Returns the CRC32 of all bytes read so far.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Returns the name of the underlying file.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns the length of the underlying file.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.inner.length()
    }

    /// Returns the current read position.
    #[must_use]
    pub fn file_pointer(&self) -> u64 {
        self.inner.file_pointer()
    }
}

impl DataInput for ChecksumIndexInput {
    fn read_byte(&mut self) -> StorageResult<u8> {
        let b = self.inner.read_byte()?;
        self.hasher.update(&[b]);
        Ok(b)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> StorageResult<()> {
        self.inner.read_bytes(buf)?;
        self.hasher.update(buf);
        Ok(())
    }
}
