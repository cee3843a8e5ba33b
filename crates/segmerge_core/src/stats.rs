//! Merge statistics.
//!
//! Counters are updated by the merge scheduler and can be read at any time
//! while merges are in progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Merge scheduler statistics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct MergeStats {
    /// Total number of merge workers started.
    merges_started: AtomicU64,
    /// Total number of merges that completed successfully.
    merges_completed: AtomicU64,
    /// Total number of merges that were aborted.
    merges_aborted: AtomicU64,
    /// Total number of merges that failed.
    merges_failed: AtomicU64,
    /// Total number of times a producer was stalled.
    stalls: AtomicU64,
    /// Total time producers spent stalled, in microseconds.
    stalled_micros: AtomicU64,
    /// Total input bytes of completed merges.
    bytes_merged: AtomicU64,
}

impl MergeStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_merge_start(&self) {
        self.merges_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_merge_complete(&self, bytes: u64) {
        self.merges_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_merged.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_merge_abort(&self) {
        self.merges_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_merge_failure(&self) {
        self.merges_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stall(&self, waited: Duration) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.stalled_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Returns the total number of merges started.
    pub fn merges_started(&self) -> u64 {
        self.merges_started.load(Ordering::Relaxed)
    }

    /// Returns the total number of merges completed.
    pub fn merges_completed(&self) -> u64 {
        self.merges_completed.load(Ordering::Relaxed)
    }

    /// Returns the total number of merges aborted.
    pub fn merges_aborted(&self) -> u64 {
        self.merges_aborted.load(Ordering::Relaxed)
    }

    /// Returns the total number of merges that failed.
    pub fn merges_failed(&self) -> u64 {
        self.merges_failed.load(Ordering::Relaxed)
    }

    /// Returns how many times a producer was stalled.
    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    /// Returns the total time producers spent stalled.
    pub fn stalled_time(&self) -> Duration {
        Duration::from_micros(self.stalled_micros.load(Ordering::Relaxed))
    }

    /// Returns the total input bytes of completed merges.
    pub fn bytes_merged(&self) -> u64 {
        self.bytes_merged.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> MergeStatsSnapshot {
        MergeStatsSnapshot {
            merges_started: self.merges_started(),
            merges_completed: self.merges_completed(),
            merges_aborted: self.merges_aborted(),
            merges_failed: self.merges_failed(),
            stalls: self.stalls(),
            stalled_time: self.stalled_time(),
            bytes_merged: self.bytes_merged(),
        }
    }
}

/// A point-in-time snapshot of merge statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeStatsSnapshot {
    /// Total number of merges started.
    pub merges_started: u64,
    /// Total number of merges completed.
    pub merges_completed: u64,
    /// Total number of merges aborted.
    pub merges_aborted: u64,
    /// Total number of merges that failed.
    pub merges_failed: u64,
    /// Total number of producer stalls.
    pub stalls: u64,
    /// Total time producers spent stalled.
    pub stalled_time: Duration,
    /// Total input bytes of completed merges.
    pub bytes_merged: u64,
}
