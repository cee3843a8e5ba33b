//! A merge scheduler that runs each merge on its own thread.

use super::{
    run_merge, IntraMergeExecutor, IntraMergeTask, LoggingExceptionHandler, MergeExceptionHandler, MergeScheduler,
    MergeSource,
};
use crate::config::MergeSchedulerConfig;
use crate::error::{CoreError, CoreResult};
use crate::merge::{MergeState, MergeTrigger, OneMerge};
use crate::stats::MergeStats;
use parking_lot::{Condvar, Mutex, MutexGuard};
use segmerge_storage::{Directory, RateLimiter};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const START_MB_PER_SEC: f64 = 20.0;
const MIN_MERGE_MB_PER_SEC: f64 = 5.0;
const MAX_MERGE_MB_PER_SEC: f64 = 10240.0;
const MIN_BIG_MERGE_BYTES: u64 = 50 * 1024 * 1024;
const BACKLOG_AGE: Duration = Duration::from_secs(3);

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// `(scheduler id, task id)` of the merge running on this thread.
    static CURRENT_TASK: Cell<Option<(u64, u64)>> = const { Cell::new(None) };
}

#[derive(Debug)]
struct Worker {
    task_id: u64,
    merge: Arc<OneMerge>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct State {
    workers: Vec<Worker>,
    /// Handles of exited workers, joined by `sync`.
    finished: Vec<JoinHandle<()>>,
    target_mb_per_sec: f64,
    next_task_id: u64,
    closed: bool,
    merge_exception: Option<CoreError>,
}

#[derive(Debug)]
struct Shared {
    id: u64,
    config: MergeSchedulerConfig,
    state: Mutex<State>,
    changed: Condvar,
    handler: Box<dyn MergeExceptionHandler>,
    suppress_exceptions: AtomicBool,
    stats: MergeStats,
    executor: IntraMergeExecutor,
}

/// Runs every merge on a dedicated thread.
///
/// At most `max_thread_count` big merges write at full rate; additional big
/// merges are paused, largest first. Once `max_merge_count` merges are
/// outstanding, callers of [`MergeScheduler::merge`] are stalled until a
/// merge finishes.
///
/// With auto IO throttle on, merges of 50 MB or more share a target rate
/// that rises by 20% while merges back up and decays by 10% otherwise.
///
/// # Example
///
/// ```rust
/// use segmerge_core::config::MergeSchedulerConfig;
/// use segmerge_core::merge::{ConcurrentMergeScheduler, MergeScheduler};
///
/// let config = MergeSchedulerConfig::new().max_merges_and_threads(4, 2);
/// let scheduler = ConcurrentMergeScheduler::new(config).unwrap();
/// scheduler.close().unwrap();
/// ```
pub struct ConcurrentMergeScheduler {
    shared: Arc<Shared>,
}

impl ConcurrentMergeScheduler {
    /// Creates a scheduler that logs merge failures.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn new(config: MergeSchedulerConfig) -> CoreResult<Self> {
        Self::with_exception_handler(config, Box::new(LoggingExceptionHandler))
    }

    /// Creates a scheduler that routes merge failures to `handler`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn with_exception_handler(
        config: MergeSchedulerConfig,
        handler: Box<dyn MergeExceptionHandler>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let executor = IntraMergeExecutor::new(config.executor_keep_alive);
        Ok(Self {
            shared: Arc::new(Shared {
                id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
                config,
                state: Mutex::new(State {
                    workers: Vec::new(),
                    finished: Vec::new(),
                    target_mb_per_sec: START_MB_PER_SEC,
                    next_task_id: 1,
                    closed: false,
                    merge_exception: None,
                }),
                changed: Condvar::new(),
                handler,
                suppress_exceptions: AtomicBool::new(false),
                stats: MergeStats::new(),
                executor,
            }),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &MergeSchedulerConfig {
        &self.shared.config
    }

    /// Returns merge statistics.
    #[must_use]
    pub fn stats(&self) -> &MergeStats {
        &self.shared.stats
    }

    /// Returns the current target rate for big merges in MB/s.
    #[must_use]
    pub fn target_mb_per_sec(&self) -> f64 {
        self.shared.state.lock().target_mb_per_sec
    }

    /// Returns the number of live, non-aborted merge threads.
    #[must_use]
    pub fn merge_thread_count(&self) -> usize {
        let state = self.shared.state.lock();
        self.shared.merge_thread_count(&state)
    }

    /// Drops merge failures instead of routing them to the handler.
    /// Intended for tests that provoke failures on purpose.
    pub fn set_suppress_exceptions(&self, suppress: bool) {
        self.shared.suppress_exceptions.store(suppress, Ordering::Relaxed);
    }

    /// Returns `true` if the calling thread is one of this scheduler's merge
    /// threads.
    #[must_use]
    pub fn is_merge_thread(&self) -> bool {
        self.shared.current_task().is_some()
    }
}

impl fmt::Debug for ConcurrentMergeScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentMergeScheduler")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl MergeScheduler for ConcurrentMergeScheduler {
    fn initialize(&self, _directory: &Arc<dyn Directory>) -> CoreResult<()> {
        if self.shared.state.lock().closed {
            return Err(CoreError::already_closed("merge scheduler"));
        }
        debug!(
            scheduler = self.shared.id,
            max_thread_count = self.shared.config.max_thread_count,
            max_merge_count = self.shared.config.max_merge_count,
            auto_io_throttle = self.shared.config.auto_io_throttle,
            "merge scheduler initialized"
        );
        Ok(())
    }

    fn merge(&self, source: Arc<dyn MergeSource>, trigger: MergeTrigger) -> CoreResult<()> {
        self.shared.merge(source, trigger)
    }

    fn sync(&self) -> CoreResult<()> {
        self.shared.join_workers();
        if self.is_merge_thread() {
            return Ok(());
        }
        self.take_merge_exception().map_or(Ok(()), Err)
    }

    fn close(&self) -> CoreResult<()> {
        {
            let mut state = self.shared.state.lock();
            if !state.closed {
                state.closed = true;
                info!(scheduler = self.shared.id, running = state.workers.len(), "closing merge scheduler");
            }
        }
        let result = self.sync();
        self.shared.executor.shutdown();
        result
    }

    fn take_merge_exception(&self) -> Option<CoreError> {
        self.shared.state.lock().merge_exception.take()
    }

    fn execute_intra_merge(&self, task: IntraMergeTask) -> CoreResult<()> {
        let budget = {
            let state = self.shared.state.lock();
            self.shared
                .config
                .max_thread_count
                .saturating_sub(state.workers.len())
                .saturating_sub(1)
        };
        let shared = Arc::clone(&self.shared);
        self.shared
            .executor
            .execute(budget, task, move |err| shared.handle_failure("intra-merge task", err))
    }
}

impl Shared {
    fn current_task(&self) -> Option<u64> {
        CURRENT_TASK
            .with(Cell::get)
            .filter(|(scheduler, _)| *scheduler == self.id)
            .map(|(_, task)| task)
    }

    /// Live, non-aborted workers other than the calling one.
    fn merge_thread_count(&self, state: &State) -> usize {
        let current = self.current_task();
        state
            .workers
            .iter()
            .filter(|w| Some(w.task_id) != current && !w.merge.is_aborted())
            .count()
    }

    fn merge(self: &Arc<Self>, source: Arc<dyn MergeSource>, trigger: MergeTrigger) -> CoreResult<()> {
        let mut state = self.state.lock();
        if self.current_task().is_none() {
            if let Some(err) = state.merge_exception.take() {
                return Err(err);
            }
        }
        if state.closed {
            return Err(CoreError::already_closed("merge scheduler"));
        }
        if trigger == MergeTrigger::Closing {
            state.target_mb_per_sec = MAX_MERGE_MB_PER_SEC;
            self.update_merge_threads(&mut state);
        }

        loop {
            if !self.maybe_stall(&mut state, source.as_ref()) {
                debug!(scheduler = self.id, "merge thread at the limit; leaving pending merges to others");
                break;
            }
            let Some(merge) = source.next_merge() else {
                break;
            };

            let task_id = state.next_task_id;
            state.next_task_id += 1;
            state.workers.push(Worker {
                task_id,
                merge: Arc::clone(&merge),
                handle: None,
            });
            self.update_io_throttle(&mut state, &merge, Instant::now());

            let spawned = thread::Builder::new().name(format!("segmerge-merge-{task_id}")).spawn({
                let shared = Arc::clone(self);
                let source = Arc::clone(&source);
                let merge = Arc::clone(&merge);
                move || shared.run_worker(task_id, source, merge)
            });
            match spawned {
                Ok(handle) => {
                    if let Some(worker) = state.workers.iter_mut().find(|w| w.task_id == task_id) {
                        worker.handle = Some(handle);
                    }
                    self.stats.record_merge_start();
                    debug!(scheduler = self.id, task_id, %trigger, merge = %merge, "launched merge thread");
                }
                Err(err) => {
                    state.workers.retain(|w| w.task_id != task_id);
                    merge.mark_finished(MergeState::Failed);
                    source.on_merge_finished(&merge);
                    self.update_merge_threads(&mut state);
                    return Err(err.into());
                }
            }
            self.update_merge_threads(&mut state);
        }
        Ok(())
    }

    /// Blocks while too many merges are outstanding. Returns `false` if the
    /// caller is a merge thread, which must not start another merge.
    fn maybe_stall(&self, state: &mut MutexGuard<'_, State>, source: &dyn MergeSource) -> bool {
        let mut stalled_since = None;
        let mut proceed = true;
        while source.has_pending_merges() && self.merge_thread_count(state) >= self.config.max_merge_count {
            if self.current_task().is_some() {
                proceed = false;
                break;
            }
            if stalled_since.is_none() {
                debug!(
                    scheduler = self.id,
                    max_merge_count = self.config.max_merge_count,
                    "too many merges running; stalling"
                );
                stalled_since = Some(Instant::now());
            }
            self.changed.wait_for(state, self.config.stall_poll_interval);
        }
        if let Some(since) = stalled_since {
            self.stats.record_stall(since.elapsed());
        }
        proceed
    }

    /// Pauses the largest big merges beyond `max_thread_count` and assigns
    /// every other merge its rate.
    fn update_merge_threads(&self, state: &mut State) {
        let mut active: Vec<&Worker> = state.workers.iter().collect();
        active.sort_by(|a, b| b.merge.estimated_merge_bytes().cmp(&a.merge.estimated_merge_bytes()));

        let big_merge_count = active
            .iter()
            .rposition(|w| w.merge.estimated_merge_bytes() > MIN_BIG_MERGE_BYTES)
            .map_or(0, |idx| idx + 1);
        let paused = big_merge_count.saturating_sub(self.config.max_thread_count);

        for (idx, worker) in active.iter().enumerate() {
            let merge = &worker.merge;
            let rate = if idx < paused {
                0.0
            } else if merge.is_forced() {
                self.config.force_merge_mb_per_sec
            } else if !self.config.auto_io_throttle || merge.estimated_merge_bytes() < MIN_BIG_MERGE_BYTES {
                f64::INFINITY
            } else {
                state.target_mb_per_sec
            };
            let limiter = merge.rate_limiter();
            let current = limiter.mb_per_sec();
            if current.to_bits() != rate.to_bits() {
                debug!(
                    task_id = worker.task_id,
                    merge = %merge,
                    from = current,
                    to = rate,
                    "changing merge rate"
                );
                limiter.set_mb_per_sec(rate);
            }
        }
    }

    /// Adjusts the shared target rate when a big merge starts.
    fn update_io_throttle(&self, state: &mut State, merge: &Arc<OneMerge>, now: Instant) {
        if !self.config.auto_io_throttle || merge.estimated_merge_bytes() < MIN_BIG_MERGE_BYTES {
            return;
        }

        let new_backlog = is_backlog(&state.workers, merge, now);
        let cur_backlog = !new_backlog
            && (state.workers.len() > self.config.max_thread_count
                || state.workers.iter().any(|w| is_backlog(&state.workers, &w.merge, now)));

        let previous = state.target_mb_per_sec;
        state.target_mb_per_sec = if new_backlog || cur_backlog {
            (previous * 1.20).min(MAX_MERGE_MB_PER_SEC)
        } else {
            (previous / 1.10).max(MIN_MERGE_MB_PER_SEC)
        };
        debug!(
            new_backlog,
            cur_backlog,
            from = previous,
            to = state.target_mb_per_sec,
            "updated merge io throttle"
        );

        let rate = if merge.is_forced() {
            self.config.force_merge_mb_per_sec
        } else {
            state.target_mb_per_sec
        };
        merge.rate_limiter().set_mb_per_sec(rate);
    }

    fn run_worker(self: Arc<Self>, task_id: u64, source: Arc<dyn MergeSource>, merge: Arc<OneMerge>) {
        CURRENT_TASK.with(|cell| cell.set(Some((self.id, task_id))));

        match run_merge(source.as_ref(), &merge) {
            Ok(()) => {
                self.stats.record_merge_complete(merge.total_merge_bytes());
                debug!(task_id, merge = %merge, "merge finished");
                match self.merge(source, MergeTrigger::MergeFinished) {
                    Ok(()) | Err(CoreError::AlreadyClosed { .. }) => {}
                    Err(err) => self.handle_failure(&merge.seg_string(), err),
                }
            }
            Err(err) if merge.state() == MergeState::Aborted => {
                self.stats.record_merge_abort();
                debug!(task_id, merge = %merge, error = %err, "merge aborted");
            }
            Err(err) => {
                self.stats.record_merge_failure();
                self.handle_failure(&merge.seg_string(), err);
            }
        }

        let mut state = self.state.lock();
        if let Some(pos) = state.workers.iter().position(|w| w.task_id == task_id) {
            let worker = state.workers.remove(pos);
            if let Some(handle) = worker.handle {
                state.finished.push(handle);
            }
        }
        self.update_merge_threads(&mut state);
        self.changed.notify_all();
    }

    fn handle_failure(&self, segments: &str, err: CoreError) {
        if self.suppress_exceptions.load(Ordering::Relaxed) {
            debug!(segments, error = %err, "suppressed merge failure");
            return;
        }
        if let Some(fatal) = self.handler.handle_merge_exception(segments, err) {
            self.record_fatal(fatal);
        }
    }

    fn record_fatal(&self, err: CoreError) {
        let mut state = self.state.lock();
        if state.merge_exception.is_none() {
            state.merge_exception = Some(err);
        } else {
            warn!(error = %err, "merge failure dropped; an earlier one is still unreported");
        }
    }

    /// Waits until every worker other than the caller has exited, then
    /// joins their threads outside the lock.
    fn join_workers(&self) {
        let current = self.current_task();
        let handles = {
            let mut state = self.state.lock();
            while state.workers.iter().any(|w| Some(w.task_id) != current) {
                self.changed.wait_for(&mut state, self.config.stall_poll_interval);
            }
            std::mem::take(&mut state.finished)
        };
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                warn!("merge thread panicked");
            }
        }
    }
}

/// Returns `true` if another big merge of similar size has been running for
/// more than three seconds.
fn is_backlog(workers: &[Worker], merge: &Arc<OneMerge>, now: Instant) -> bool {
    let merge_bytes = merge.estimated_merge_bytes() as f64;
    workers.iter().any(|w| {
        let Some(started) = w.merge.started_at() else {
            return false;
        };
        if Arc::ptr_eq(&w.merge, merge)
            || w.merge.estimated_merge_bytes() < MIN_BIG_MERGE_BYTES
            || now.saturating_duration_since(started) <= BACKLOG_AGE
        {
            return false;
        }
        let ratio = w.merge.estimated_merge_bytes() as f64 / merge_bytes;
        ratio > 0.3 && ratio < 3.0
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{merge_of, Behavior, QueueSource};
    use super::*;
    use std::sync::mpsc;

    const MB: u64 = 1024 * 1024;

    fn scheduler(merges: usize, threads: usize) -> ConcurrentMergeScheduler {
        ConcurrentMergeScheduler::new(MergeSchedulerConfig::new().max_merges_and_threads(merges, threads)).unwrap()
    }

    #[derive(Debug, Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
    }

    impl MergeExceptionHandler for Arc<RecordingHandler> {
        fn handle_merge_exception(&self, segments: &str, error: CoreError) -> Option<CoreError> {
            self.seen.lock().push(segments.to_string());
            Some(CoreError::merge_exception(segments, error))
        }
    }

    #[test]
    fn runs_all_pending_merges() {
        let cms = scheduler(6, 2);
        let source = QueueSource::new(Behavior::Succeed);
        for i in 0..5 {
            source.push(merge_of(&format!("_{i}"), MB));
        }
        cms.merge(source.clone(), MergeTrigger::SegmentFlush).unwrap();
        cms.sync().unwrap();

        let finished = source.finished.lock();
        assert_eq!(finished.len(), 5);
        assert!(finished.iter().all(|m| m.state() == MergeState::Completed));
        assert_eq!(cms.stats().merges_started(), 5);
        assert_eq!(cms.stats().merges_completed(), 5);
        assert_eq!(cms.merge_thread_count(), 0);
    }

    #[test]
    fn stalls_producer_at_max_merge_count() {
        let cms = scheduler(1, 1);
        let source = QueueSource::new(Behavior::Sleep(Duration::from_millis(100)));
        source.push(merge_of("_0", MB));
        source.push(merge_of("_1", MB));
        source.push(merge_of("_2", MB));

        cms.merge(source.clone(), MergeTrigger::SegmentFlush).unwrap();
        cms.sync().unwrap();

        assert_eq!(source.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(source.finished.lock().len(), 3);
        assert!(cms.stats().stalls() >= 1);
    }

    #[test]
    fn close_joins_running_merges() {
        let cms = scheduler(4, 2);
        let source = QueueSource::new(Behavior::Sleep(Duration::from_millis(50)));
        source.push(merge_of("_0", MB));
        source.push(merge_of("_1", MB));
        cms.merge(source.clone(), MergeTrigger::FullFlush).unwrap();
        cms.close().unwrap();

        assert_eq!(source.finished.lock().len(), 2);
        assert!(matches!(
            cms.merge(source.clone(), MergeTrigger::SegmentFlush),
            Err(CoreError::AlreadyClosed { .. })
        ));
    }

    #[test]
    fn aborted_merge_is_not_a_failure() {
        let cms = scheduler(2, 1);
        let source = QueueSource::new(Behavior::WaitForAbort);
        let merge = source.push(merge_of("_0", MB));
        cms.merge(source.clone(), MergeTrigger::SegmentFlush).unwrap();
        merge.abort();
        cms.close().unwrap();

        assert_eq!(merge.state(), MergeState::Aborted);
        assert_eq!(cms.stats().merges_aborted(), 1);
        assert_eq!(cms.stats().merges_failed(), 0);
        assert!(cms.take_merge_exception().is_none());
    }

    #[test]
    fn failure_goes_to_handler_and_surfaces_once() {
        let handler = Arc::new(RecordingHandler::default());
        let cms = ConcurrentMergeScheduler::with_exception_handler(
            MergeSchedulerConfig::new().max_merges_and_threads(2, 1),
            Box::new(Arc::clone(&handler)),
        )
        .unwrap();
        let source = QueueSource::new(Behavior::Fail);
        source.push(merge_of("_0", MB));
        cms.merge(source.clone(), MergeTrigger::SegmentFlush).unwrap();

        let err = cms.sync().unwrap_err();
        assert!(matches!(err, CoreError::MergeException { .. }));
        assert_eq!(handler.seen.lock().len(), 1);
        assert!(handler.seen.lock()[0].starts_with("_0("));
        assert_eq!(source.finished.lock()[0].state(), MergeState::Failed);
        assert_eq!(cms.stats().merges_failed(), 1);
        cms.close().unwrap();
    }

    #[test]
    fn suppressed_failures_are_dropped() {
        let cms = scheduler(2, 1);
        cms.set_suppress_exceptions(true);
        let source = QueueSource::new(Behavior::Fail);
        source.push(merge_of("_0", MB));
        cms.merge(source.clone(), MergeTrigger::SegmentFlush).unwrap();
        cms.close().unwrap();
        assert_eq!(cms.stats().merges_failed(), 1);
    }

    #[test]
    fn merge_aborted_before_start_is_skipped() {
        let cms = scheduler(2, 1);
        let source = QueueSource::new(Behavior::Succeed);
        let merge = source.push(merge_of("_0", MB));
        merge.abort();
        cms.merge(source.clone(), MergeTrigger::SegmentFlush).unwrap();
        cms.close().unwrap();
        assert_eq!(merge.state(), MergeState::Aborted);
        assert_eq!(source.max_running.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn largest_big_merges_are_paused() {
        let cms = scheduler(3, 1);
        let mut state = cms.shared.state.lock();
        for (task_id, bytes) in [(1, 300 * MB), (2, 100 * MB), (3, 200 * MB)] {
            state.workers.push(Worker {
                task_id,
                merge: Arc::new(merge_of(&format!("_{task_id}"), bytes)),
                handle: None,
            });
        }
        cms.shared.update_merge_threads(&mut state);

        let rate = |task: u64| {
            state.workers.iter().find(|w| w.task_id == task).unwrap().merge.rate_limiter().mb_per_sec()
        };
        assert_eq!(rate(1), 0.0);
        assert_eq!(rate(3), 0.0);
        assert_eq!(rate(2), START_MB_PER_SEC);
    }

    #[test]
    fn small_and_forced_merges_get_their_own_rates() {
        let cms = ConcurrentMergeScheduler::new(
            MergeSchedulerConfig::new().max_merges_and_threads(3, 2).force_merge_mb_per_sec(40.0),
        )
        .unwrap();
        let mut state = cms.shared.state.lock();
        state.workers.push(Worker {
            task_id: 1,
            merge: Arc::new(merge_of("_1", MB)),
            handle: None,
        });
        state.workers.push(Worker {
            task_id: 2,
            merge: Arc::new(merge_of("_2", 100 * MB).with_max_num_segments(1)),
            handle: None,
        });
        cms.shared.update_merge_threads(&mut state);
        assert!(state.workers[0].merge.rate_limiter().mb_per_sec().is_infinite());
        assert_eq!(state.workers[1].merge.rate_limiter().mb_per_sec(), 40.0);
    }

    #[test]
    fn io_throttle_follows_backlog() {
        let cms = scheduler(3, 2);
        let mut state = cms.shared.state.lock();
        let now = Instant::now();

        let lone = Arc::new(merge_of("_0", 100 * MB));
        state.workers.push(Worker {
            task_id: 1,
            merge: Arc::clone(&lone),
            handle: None,
        });
        cms.shared.update_io_throttle(&mut state, &lone, now);
        assert!((state.target_mb_per_sec - START_MB_PER_SEC / 1.10).abs() < 1e-9);
        assert!((lone.rate_limiter().mb_per_sec() - state.target_mb_per_sec).abs() < 1e-9);

        lone.mark_running();
        let later = now + Duration::from_secs(5);
        let similar = Arc::new(merge_of("_1", 120 * MB));
        let before = state.target_mb_per_sec;
        cms.shared.update_io_throttle(&mut state, &similar, later);
        assert!((state.target_mb_per_sec - before * 1.20).abs() < 1e-9);

        let small = Arc::new(merge_of("_2", MB));
        let before = state.target_mb_per_sec;
        cms.shared.update_io_throttle(&mut state, &small, later);
        assert_eq!(state.target_mb_per_sec, before);
    }

    #[test]
    fn closing_raises_target_to_max() {
        let cms = scheduler(2, 1);
        let source = QueueSource::new(Behavior::Succeed);
        cms.merge(source, MergeTrigger::Closing).unwrap();
        assert_eq!(cms.target_mb_per_sec(), MAX_MERGE_MB_PER_SEC);
    }

    #[test]
    fn intra_merge_runs_inline_without_budget() {
        let cms = scheduler(1, 1);
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();
        cms.execute_intra_merge(Box::new(move || {
            tx.send(thread::current().id()).unwrap();
            Ok(())
        }))
        .unwrap();
        assert_eq!(rx.recv().unwrap(), caller);
        assert!(cms.execute_intra_merge(Box::new(|| Err(CoreError::invalid_operation("x")))).is_err());
    }

    #[test]
    fn intra_merge_uses_pool_when_budget_allows() {
        let cms = scheduler(4, 4);
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();
        cms.execute_intra_merge(Box::new(move || {
            tx.send(thread::current().id()).unwrap();
            Ok(())
        }))
        .unwrap();
        assert_ne!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), caller);

        cms.execute_intra_merge(Box::new(|| Err(CoreError::invalid_operation("sub-task failed"))))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = loop {
            if let Some(err) = cms.take_merge_exception() {
                break err;
            }
            assert!(Instant::now() < deadline, "sub-task failure never reported");
            thread::sleep(Duration::from_millis(5));
        };
        assert!(matches!(err, CoreError::MergeException { .. }));
        cms.close().unwrap();
    }

    #[test]
    fn is_merge_thread_only_inside_workers() {
        let cms = scheduler(1, 1);
        assert!(!cms.is_merge_thread());
    }
}
