//! Per-merge I/O throttling.

use parking_lot::{Condvar, Mutex};
use segmerge_storage::{RateLimiter, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MIN_PAUSE_CHECK: Duration = Duration::from_millis(5);
const MIN_PAUSE: Duration = Duration::from_millis(2);
const MAX_PAUSE: Duration = Duration::from_millis(250);
const MIB: f64 = 1024.0 * 1024.0;

/// Why a merge thread was paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PauseReason {
    /// The rate was set to zero.
    Stopped,
    /// Throttled to stay under the rate.
    Paused,
    /// Any other wait.
    Other,
}

impl PauseReason {
    fn index(self) -> usize {
        match self {
            Self::Stopped => 0,
            Self::Paused => 1,
            Self::Other => 2,
        }
    }
}

/// Abort flag and pause bookkeeping of a running merge.
#[derive(Debug, Default)]
pub struct OneMergeProgress {
    aborted: AtomicBool,
    pause_lock: Mutex<()>,
    pausing: Condvar,
    pause_nanos: [AtomicU64; 3],
}

impl OneMergeProgress {
    /// Creates progress for a merge that has not been aborted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Aborts the merge and wakes it if paused.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.wakeup();
    }

    /// Returns `true` once aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Fails with `Aborted` once aborted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Aborted`] if the merge was aborted.
    pub fn check_aborted(&self) -> StorageResult<()> {
        if self.is_aborted() {
            return Err(StorageError::Aborted("merge is aborted".to_string()));
        }
        Ok(())
    }

    /// Blocks for up to `pause`, returning early when the merge is aborted,
    /// woken, or `condition` stops holding. The time spent is recorded under
    /// `reason`.
    pub fn pause_nanos(&self, pause: Duration, reason: PauseReason, condition: impl Fn() -> bool) {
        let start = Instant::now();
        let deadline = start + pause;
        {
            let mut guard = self.pause_lock.lock();
            while Instant::now() < deadline && !self.is_aborted() && condition() {
                if self.pausing.wait_until(&mut guard, deadline).timed_out() {
                    break;
                }
            }
        }
        let elapsed = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.pause_nanos[reason.index()].fetch_add(elapsed, Ordering::Relaxed);
    }

    /// Wakes a paused merge thread so it re-evaluates its pause.
    pub fn wakeup(&self) {
        let _guard = self.pause_lock.lock();
        self.pausing.notify_all();
    }

    /// Returns the total pause time for `reason`.
    #[must_use]
    pub fn pause_time(&self, reason: PauseReason) -> Duration {
        Duration::from_nanos(self.pause_nanos[reason.index()].load(Ordering::Relaxed))
    }
}

/// Throttles the writes of a single merge to a target MB/s.
///
/// The rate may be changed at any time from another thread; a merge
/// currently paused notices the change immediately. A rate of zero stops
/// the merge until the rate is raised or the merge aborted.
#[derive(Debug)]
pub struct MergeRateLimiter {
    progress: Arc<OneMergeProgress>,
    mb_per_sec: AtomicU64,
    min_pause_check_bytes: AtomicU64,
    total_bytes_written: AtomicU64,
    last: Mutex<Instant>,
}

impl MergeRateLimiter {
    /// Creates an unlimited rate limiter.
    #[must_use]
    pub fn new(progress: Arc<OneMergeProgress>) -> Self {
        let limiter = Self {
            progress,
            mb_per_sec: AtomicU64::new(f64::INFINITY.to_bits()),
            min_pause_check_bytes: AtomicU64::new(0),
            total_bytes_written: AtomicU64::new(0),
            last: Mutex::new(Instant::now()),
        };
        limiter.set_mb_per_sec(f64::INFINITY);
        limiter
    }

    /// Returns the progress this limiter reports to.
    #[must_use]
    pub fn progress(&self) -> &Arc<OneMergeProgress> {
        &self.progress
    }

    /// Sets the rate. `f64::INFINITY` disables throttling and `0.0` stops
    /// the merge. Negative or NaN rates are treated as zero.
    pub fn set_mb_per_sec(&self, mb_per_sec: f64) {
        let rate = if mb_per_sec.is_nan() || mb_per_sec < 0.0 { 0.0 } else { mb_per_sec };
        self.mb_per_sec.store(rate.to_bits(), Ordering::Release);
        let check = (MIN_PAUSE_CHECK.as_secs_f64() * rate * MIB).min(MIB);
        // float to int casts saturate
        self.min_pause_check_bytes.store(check as u64, Ordering::Release);
        self.progress.wakeup();
    }

    /// Returns the total bytes passed to [`RateLimiter::pause`].
    #[must_use]
    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written.load(Ordering::Relaxed)
    }

    /// Returns `true` while the rate is zero.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.mb_per_sec() == 0.0
    }

    fn rate_bits(&self) -> u64 {
        self.mb_per_sec.load(Ordering::Acquire)
    }

    /// Pauses once if writing `bytes` since the last pause exceeded the
    /// rate. Returns the time paused, or `None` when no pause was needed.
    fn maybe_pause(&self, bytes: u64, now: Instant) -> StorageResult<Option<Duration>> {
        self.progress.check_aborted()?;

        let bits = self.rate_bits();
        let rate = f64::from_bits(bits);
        let seconds = (bytes as f64 / MIB) / rate;

        let mut last = self.last.lock();
        let elapsed = now.saturating_duration_since(*last).as_secs_f64();
        let wanted = seconds - elapsed;
        if wanted.is_nan() || wanted <= MIN_PAUSE.as_secs_f64() {
            *last = now;
            return Ok(None);
        }
        drop(last);

        let pause = if wanted >= MAX_PAUSE.as_secs_f64() {
            MAX_PAUSE
        } else {
            Duration::from_secs_f64(wanted)
        };
        let reason = if rate == 0.0 { PauseReason::Stopped } else { PauseReason::Paused };
        let start = Instant::now();
        self.progress.pause_nanos(pause, reason, || self.rate_bits() == bits);
        Ok(Some(start.elapsed()))
    }
}

impl RateLimiter for MergeRateLimiter {
    fn mb_per_sec(&self) -> f64 {
        f64::from_bits(self.rate_bits())
    }

    fn min_pause_check_bytes(&self) -> u64 {
        self.min_pause_check_bytes.load(Ordering::Acquire)
    }

    fn pause(&self, bytes: u64) -> StorageResult<Duration> {
        self.total_bytes_written.fetch_add(bytes, Ordering::Relaxed);
        let mut paused = Duration::ZERO;
        while let Some(delta) = self.maybe_pause(bytes, Instant::now())? {
            paused += delta;
        }
        Ok(paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn limiter() -> Arc<MergeRateLimiter> {
        Arc::new(MergeRateLimiter::new(Arc::new(OneMergeProgress::new())))
    }

    #[test]
    fn unlimited_never_pauses() {
        let limiter = limiter();
        assert!(limiter.mb_per_sec().is_infinite());
        assert_eq!(limiter.min_pause_check_bytes(), 1024 * 1024);
        assert_eq!(limiter.pause(64 * 1024 * 1024).unwrap(), Duration::ZERO);
        assert_eq!(limiter.total_bytes_written(), 64 * 1024 * 1024);
    }

    #[test]
    fn min_pause_check_bytes_follows_rate() {
        let limiter = limiter();
        limiter.set_mb_per_sec(100.0);
        // 5ms at 100 MB/s is 0.5 MiB
        assert_eq!(limiter.min_pause_check_bytes(), 512 * 1024);
        limiter.set_mb_per_sec(0.0);
        assert_eq!(limiter.min_pause_check_bytes(), 0);
        assert!(limiter.is_stopped());
    }

    #[test]
    fn slow_rate_pauses() {
        let limiter = limiter();
        limiter.set_mb_per_sec(10.0);
        // 1 MiB at 10 MB/s needs ~100ms
        let paused = limiter.pause(1024 * 1024).unwrap();
        assert!(paused >= Duration::from_millis(50), "{paused:?}");
        assert!(limiter.progress().pause_time(PauseReason::Paused) >= Duration::from_millis(50));
    }

    #[test]
    fn abort_interrupts_stopped_merge() {
        let limiter = limiter();
        limiter.set_mb_per_sec(0.0);
        let worker = {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || limiter.pause(1024))
        };
        thread::sleep(Duration::from_millis(50));
        limiter.progress().abort();
        let result = worker.join().unwrap();
        assert!(matches!(result, Err(StorageError::Aborted(_))));
        assert!(limiter.progress().pause_time(PauseReason::Stopped) > Duration::ZERO);
    }

    #[test]
    fn raising_rate_resumes_stopped_merge() {
        let limiter = limiter();
        limiter.set_mb_per_sec(0.0);
        let worker = {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || limiter.pause(1024))
        };
        thread::sleep(Duration::from_millis(50));
        limiter.set_mb_per_sec(f64::INFINITY);
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn aborted_merge_fails_fast() {
        let progress = OneMergeProgress::new();
        progress.abort();
        assert!(progress.check_aborted().is_err());
        let start = Instant::now();
        progress.pause_nanos(Duration::from_secs(5), PauseReason::Other, || true);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
