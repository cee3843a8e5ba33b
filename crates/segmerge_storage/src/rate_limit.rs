//! Write throttling for merge outputs.

use crate::checksum::ChecksumIndexInput;
use crate::data::DataOutput;
use crate::directory::{Directory, DirectoryLock, IndexInput, IndexOutput};
use crate::error::StorageResult;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Throttles the rate at which bytes are written.
///
/// Implementations must be thread-safe: the rate may be changed by one thread
/// while another thread is paused inside [`RateLimiter::pause`].
pub trait RateLimiter: Send + Sync + Debug {
    /// Returns the current target rate in MB/s. `f64::INFINITY` means
    /// unlimited; `0.0` means stopped.
    fn mb_per_sec(&self) -> f64;

    /// Returns how many bytes a writer should accumulate before calling
    /// [`RateLimiter::pause`] again.
    fn min_pause_check_bytes(&self) -> u64;

    /// Blocks as long as needed to keep the rate under target, given that
    /// `bytes` were written since the last call. Returns the time paused.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Aborted` if the owning operation was aborted.
    fn pause(&self, bytes: u64) -> StorageResult<Duration>;
}

/// An [`IndexOutput`] that calls [`RateLimiter::pause`] every
/// `min_pause_check_bytes` written.
#[derive(Debug)]
pub struct RateLimitedOutput {
    inner: Box<dyn IndexOutput>,
    limiter: Arc<dyn RateLimiter>,
    bytes_since_last_pause: u64,
    current_min_pause_check_bytes: u64,
}

impl RateLimitedOutput {
    /// Wraps an output with a limiter.
    #[must_use]
    pub fn new(inner: Box<dyn IndexOutput>, limiter: Arc<dyn RateLimiter>) -> Self {
        let current_min_pause_check_bytes = limiter.min_pause_check_bytes();
        Self {
            inner,
            limiter,
            bytes_since_last_pause: 0,
            current_min_pause_check_bytes,
        }
    }

    fn check_rate(&mut self) -> StorageResult<()> {
        if self.bytes_since_last_pause > self.current_min_pause_check_bytes {
            self.limiter.pause(self.bytes_since_last_pause)?;
            self.bytes_since_last_pause = 0;
            // The rate may have changed while we were paused
            self.current_min_pause_check_bytes = self.limiter.min_pause_check_bytes();
        }
        Ok(())
    }
}

impl DataOutput for RateLimitedOutput {
    fn write_byte(&mut self, b: u8) -> StorageResult<()> {
        self.bytes_since_last_pause += 1;
        self.check_rate()?;
        self.inner.write_byte(b)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> StorageResult<()> {
        self.bytes_since_last_pause += bytes.len() as u64;
        self.check_rate()?;
        self.inner.write_bytes(bytes)
    }
}

impl IndexOutput for RateLimitedOutput {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn file_pointer(&self) -> u64 {
        self.inner.file_pointer()
    }

    fn checksum(&self) -> u32 {
        self.inner.checksum()
    }

    fn close(self: Box<Self>) -> StorageResult<()> {
        self.inner.close()
    }
}

/// A [`Directory`] whose outputs are throttled by a shared [`RateLimiter`].
///
/// Only writes are throttled; every other operation is delegated unchanged.
#[derive(Debug, Clone)]
pub struct RateLimitedDirectory {
    inner: Arc<dyn Directory>,
    limiter: Arc<dyn RateLimiter>,
}

impl RateLimitedDirectory {
    /// Wraps `inner` so that all outputs are throttled by `limiter`.
    #[must_use]
    pub fn new(inner: Arc<dyn Directory>, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    /// Returns the limiter applied to outputs.
    #[must_use]
    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    /// Returns the wrapped directory.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Directory> {
        &self.inner
    }
}

impl Directory for RateLimitedDirectory {
    fn list_all(&self) -> StorageResult<Vec<String>> {
        self.inner.list_all()
    }

    fn file_length(&self, name: &str) -> StorageResult<u64> {
        self.inner.file_length(name)
    }

    fn create_output(&self, name: &str) -> StorageResult<Box<dyn IndexOutput>> {
        let out = self.inner.create_output(name)?;
        Ok(Box::new(RateLimitedOutput::new(out, Arc::clone(&self.limiter))))
    }

    fn open_input(&self, name: &str) -> StorageResult<Box<dyn IndexInput>> {
        self.inner.open_input(name)
    }

    fn delete_file(&self, name: &str) -> StorageResult<()> {
        self.inner.delete_file(name)
    }

    fn rename(&self, source: &str, dest: &str) -> StorageResult<()> {
        self.inner.rename(source, dest)
    }

    fn sync(&self, names: &[&str]) -> StorageResult<()> {
        self.inner.sync(names)
    }

    fn sync_meta_data(&self) -> StorageResult<()> {
        self.inner.sync_meta_data()
    }

    fn obtain_lock(&self, name: &str) -> StorageResult<Box<dyn DirectoryLock>> {
        self.inner.obtain_lock(name)
    }

    fn open_checksum_input(&self, name: &str) -> StorageResult<ChecksumIndexInput> {
        self.inner.open_checksum_input(name)
    }
}
