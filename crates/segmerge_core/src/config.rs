//! Merge policy and merge scheduler configuration.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

const MB: f64 = 1024.0 * 1024.0;

/// Configuration for [`TieredMergePolicy`](crate::merge::TieredMergePolicy).
#[derive(Debug, Clone, PartialEq)]
pub struct TieredMergePolicyConfig {
    /// Maximum size of a segment produced by a natural merge, in MB.
    pub max_merged_segment_mb: f64,

    /// Segments smaller than this are rounded up to it when scoring and
    /// when computing tier sizes, in MB.
    pub floor_segment_mb: f64,

    /// Number of segments allowed per tier.
    pub segments_per_tier: f64,

    /// Maximum number of segments merged at once by a natural merge.
    pub max_merge_at_once: usize,

    /// Maximum number of segments merged at once by a forced merge.
    pub max_merge_at_once_explicit: usize,

    /// Percentage of deleted docs tolerated before too-large segments are
    /// pulled back into merging.
    pub deletes_pct_allowed: f64,

    /// A segment is eligible for a forced-deletes merge above this
    /// percentage of deleted docs.
    pub force_merge_deletes_pct_allowed: f64,

    /// Number of segments the index should keep to allow searching them
    /// concurrently.
    pub target_search_concurrency: usize,
}

impl Default for TieredMergePolicyConfig {
    fn default() -> Self {
        Self {
            max_merged_segment_mb: 5.0 * 1024.0, // 5 GB
            floor_segment_mb: 16.0,
            segments_per_tier: 10.0,
            max_merge_at_once: 10,
            max_merge_at_once_explicit: 30,
            deletes_pct_allowed: 20.0,
            force_merge_deletes_pct_allowed: 10.0,
            target_search_concurrency: 1,
        }
    }
}

impl TieredMergePolicyConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum merged segment size in MB.
    #[must_use]
    pub const fn max_merged_segment_mb(mut self, mb: f64) -> Self {
        self.max_merged_segment_mb = mb;
        self
    }

    /// Sets the floor segment size in MB.
    #[must_use]
    pub const fn floor_segment_mb(mut self, mb: f64) -> Self {
        self.floor_segment_mb = mb;
        self
    }

    /// Sets the number of segments allowed per tier.
    #[must_use]
    pub const fn segments_per_tier(mut self, count: f64) -> Self {
        self.segments_per_tier = count;
        self
    }

    /// Sets the maximum number of segments merged at once.
    #[must_use]
    pub const fn max_merge_at_once(mut self, count: usize) -> Self {
        self.max_merge_at_once = count;
        self
    }

    /// Sets the maximum number of segments merged at once by forced merges.
    #[must_use]
    pub const fn max_merge_at_once_explicit(mut self, count: usize) -> Self {
        self.max_merge_at_once_explicit = count;
        self
    }

    /// Sets the allowed percentage of deleted docs.
    #[must_use]
    pub const fn deletes_pct_allowed(mut self, pct: f64) -> Self {
        self.deletes_pct_allowed = pct;
        self
    }

    /// Sets the deleted-docs threshold for forced-deletes merges.
    #[must_use]
    pub const fn force_merge_deletes_pct_allowed(mut self, pct: f64) -> Self {
        self.force_merge_deletes_pct_allowed = pct;
        self
    }

    /// Sets the target search concurrency.
    #[must_use]
    pub const fn target_search_concurrency(mut self, count: usize) -> Self {
        self.target_search_concurrency = count;
        self
    }

    /// Returns the effective merge factor: the smaller of
    /// `max_merge_at_once` and `segments_per_tier`.
    #[must_use]
    pub fn merge_factor(&self) -> usize {
        (self.max_merge_at_once as f64).min(self.segments_per_tier) as usize
    }

    /// Returns the maximum merged segment size in bytes.
    #[must_use]
    pub fn max_merged_segment_bytes(&self) -> u64 {
        mb_to_bytes(self.max_merged_segment_mb)
    }

    /// Returns the floor segment size in bytes.
    #[must_use]
    pub fn floor_segment_bytes(&self) -> u64 {
        mb_to_bytes(self.floor_segment_mb)
    }

    /// Validates all settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` naming the first setting out of range.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_merged_segment_mb.is_nan() || self.max_merged_segment_mb < 0.0 {
            return Err(CoreError::invalid_argument(format!(
                "max_merged_segment_mb must be >= 0 (got {})",
                self.max_merged_segment_mb
            )));
        }
        if self.floor_segment_mb.is_nan() || self.floor_segment_mb <= 0.0 {
            return Err(CoreError::invalid_argument(format!(
                "floor_segment_mb must be > 0 (got {})",
                self.floor_segment_mb
            )));
        }
        if self.segments_per_tier.is_nan() || self.segments_per_tier < 2.0 {
            return Err(CoreError::invalid_argument(format!(
                "segments_per_tier must be >= 2 (got {})",
                self.segments_per_tier
            )));
        }
        if self.max_merge_at_once < 2 {
            return Err(CoreError::invalid_argument(format!(
                "max_merge_at_once must be >= 2 (got {})",
                self.max_merge_at_once
            )));
        }
        if self.max_merge_at_once_explicit < 2 {
            return Err(CoreError::invalid_argument(format!(
                "max_merge_at_once_explicit must be >= 2 (got {})",
                self.max_merge_at_once_explicit
            )));
        }
        if !(5.0..=50.0).contains(&self.deletes_pct_allowed) {
            return Err(CoreError::invalid_argument(format!(
                "deletes_pct_allowed must be between 5 and 50 (got {})",
                self.deletes_pct_allowed
            )));
        }
        if !(0.0..=100.0).contains(&self.force_merge_deletes_pct_allowed) {
            return Err(CoreError::invalid_argument(format!(
                "force_merge_deletes_pct_allowed must be between 0 and 100 (got {})",
                self.force_merge_deletes_pct_allowed
            )));
        }
        if self.target_search_concurrency < 1 {
            return Err(CoreError::invalid_argument(
                "target_search_concurrency must be >= 1 (got 0)",
            ));
        }
        Ok(())
    }
}

/// Configuration for [`ConcurrentMergeScheduler`](crate::merge::ConcurrentMergeScheduler).
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSchedulerConfig {
    /// Maximum number of merge threads running with an unpaused rate.
    pub max_thread_count: usize,

    /// Maximum number of merges that may be outstanding before producers
    /// are stalled.
    pub max_merge_count: usize,

    /// Whether the IO rate of big merges adapts to the merge backlog.
    pub auto_io_throttle: bool,

    /// IO rate for forced merges in MB/s. `f64::INFINITY` means unlimited.
    pub force_merge_mb_per_sec: f64,

    /// How long a stalled producer waits before re-checking.
    pub stall_poll_interval: Duration,

    /// How long an idle intra-merge executor thread lives.
    pub executor_keep_alive: Duration,
}

impl Default for MergeSchedulerConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let max_thread_count = (cores / 2).clamp(1, 4);
        Self {
            max_thread_count,
            max_merge_count: max_thread_count + 5,
            auto_io_throttle: true,
            force_merge_mb_per_sec: f64::INFINITY,
            stall_poll_interval: Duration::from_millis(250),
            executor_keep_alive: Duration::from_secs(60),
        }
    }
}

impl MergeSchedulerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets both the maximum merge count and the maximum thread count.
    #[must_use]
    pub const fn max_merges_and_threads(mut self, merges: usize, threads: usize) -> Self {
        self.max_merge_count = merges;
        self.max_thread_count = threads;
        self
    }

    /// Sets whether adaptive IO throttling is enabled.
    #[must_use]
    pub const fn auto_io_throttle(mut self, value: bool) -> Self {
        self.auto_io_throttle = value;
        self
    }

    /// Sets the forced merge IO rate in MB/s.
    #[must_use]
    pub const fn force_merge_mb_per_sec(mut self, mb: f64) -> Self {
        self.force_merge_mb_per_sec = mb;
        self
    }

    /// Sets how long stalled producers wait between checks.
    #[must_use]
    pub const fn stall_poll_interval(mut self, interval: Duration) -> Self {
        self.stall_poll_interval = interval;
        self
    }

    /// Sets the idle keep-alive of intra-merge executor threads.
    #[must_use]
    pub const fn executor_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.executor_keep_alive = keep_alive;
        self
    }

    /// Validates all settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a count is zero or if
    /// `max_thread_count > max_merge_count`.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_thread_count < 1 {
            return Err(CoreError::invalid_argument("max_thread_count must be >= 1"));
        }
        if self.max_merge_count < 1 {
            return Err(CoreError::invalid_argument("max_merge_count must be >= 1"));
        }
        if self.max_thread_count > self.max_merge_count {
            return Err(CoreError::invalid_argument(format!(
                "max_thread_count ({}) must be <= max_merge_count ({})",
                self.max_thread_count, self.max_merge_count
            )));
        }
        if self.force_merge_mb_per_sec.is_nan() || self.force_merge_mb_per_sec <= 0.0 {
            return Err(CoreError::invalid_argument(format!(
                "force_merge_mb_per_sec must be > 0 (got {})",
                self.force_merge_mb_per_sec
            )));
        }
        Ok(())
    }
}

fn mb_to_bytes(mb: f64) -> u64 {
    let bytes = mb * MB;
    if bytes >= u64::MAX as f64 {
        u64::MAX
    } else {
        bytes as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_config() {
        let config = TieredMergePolicyConfig::default();
        assert_eq!(config.merge_factor(), 10);
        assert_eq!(config.max_merged_segment_bytes(), 5 * 1024 * 1024 * 1024);
        assert_eq!(config.floor_segment_bytes(), 16 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn merge_factor_is_min_of_tier_and_at_once() {
        let config = TieredMergePolicyConfig::new()
            .segments_per_tier(4.0)
            .max_merge_at_once(8);
        assert_eq!(config.merge_factor(), 4);
    }

    #[test]
    fn policy_validation_rejects_out_of_range() {
        let bad = [
            TieredMergePolicyConfig::new().segments_per_tier(1.5),
            TieredMergePolicyConfig::new().max_merge_at_once(1),
            TieredMergePolicyConfig::new().deletes_pct_allowed(60.0),
            TieredMergePolicyConfig::new().deletes_pct_allowed(4.0),
            TieredMergePolicyConfig::new().force_merge_deletes_pct_allowed(101.0),
            TieredMergePolicyConfig::new().target_search_concurrency(0),
            TieredMergePolicyConfig::new().floor_segment_mb(0.0),
            TieredMergePolicyConfig::new().max_merged_segment_mb(f64::NAN),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(CoreError::InvalidArgument { .. })),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn default_scheduler_config() {
        let config = MergeSchedulerConfig::default();
        assert!(config.max_thread_count >= 1 && config.max_thread_count <= 4);
        assert_eq!(config.max_merge_count, config.max_thread_count + 5);
        assert!(config.auto_io_throttle);
        assert!(config.force_merge_mb_per_sec.is_infinite());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn scheduler_rejects_more_threads_than_merges() {
        let config = MergeSchedulerConfig::new().max_merges_and_threads(1, 2);
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidArgument { .. })
        ));
    }
}
