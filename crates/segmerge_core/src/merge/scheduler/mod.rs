//! Merge schedulers: run the merges a [`MergeSource`] hands out.

mod concurrent;
mod executor;
mod serial;

pub use concurrent::ConcurrentMergeScheduler;
pub use executor::IntraMergeExecutor;
pub use serial::SerialMergeScheduler;

use super::{MergeState, MergeTrigger, OneMerge};
use crate::error::{CoreError, CoreResult};
use segmerge_storage::{Directory, RateLimitedDirectory, RateLimiter};
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// A sub-task of a running merge.
pub type IntraMergeTask = Box<dyn FnOnce() -> CoreResult<()> + Send + 'static>;

/// The owner of pending merges, typically the segment manager.
pub trait MergeSource: Send + Sync {
    /// Takes the next pending merge, if any.
    fn next_merge(&self) -> Option<Arc<OneMerge>>;

    /// Called exactly once for every merge taken from
    /// [`MergeSource::next_merge`], whether it completed, failed or was
    /// aborted.
    fn on_merge_finished(&self, merge: &Arc<OneMerge>);

    /// Returns `true` if merges are waiting to be taken.
    fn has_pending_merges(&self) -> bool;

    /// Performs the merge on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `MergeAborted` if the merge was aborted, or the failure.
    fn merge(&self, merge: &Arc<OneMerge>) -> CoreResult<()>;
}

/// Runs merges, possibly in the background.
pub trait MergeScheduler: Send + Sync + Debug {
    /// Prepares the scheduler for merging into `directory`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` if the scheduler was closed.
    fn initialize(&self, directory: &Arc<dyn Directory>) -> CoreResult<()> {
        let _ = directory;
        Ok(())
    }

    /// Runs every merge `source` has pending.
    ///
    /// # Errors
    ///
    /// Returns a previously recorded merge failure, or `AlreadyClosed`.
    fn merge(&self, source: Arc<dyn MergeSource>, trigger: MergeTrigger) -> CoreResult<()>;

    /// Waits for all running merges to finish.
    ///
    /// # Errors
    ///
    /// Returns a recorded merge failure.
    fn sync(&self) -> CoreResult<()>;

    /// Stops accepting merges and waits for running ones to finish.
    ///
    /// # Errors
    ///
    /// Returns a recorded merge failure.
    fn close(&self) -> CoreResult<()>;

    /// Takes the first unreported merge failure.
    fn take_merge_exception(&self) -> Option<CoreError> {
        None
    }

    /// Returns `directory` with writes throttled by `merge`'s rate limiter.
    fn wrap_for_merge(&self, merge: &OneMerge, directory: Arc<dyn Directory>) -> Arc<dyn Directory> {
        let limiter: Arc<dyn RateLimiter> = merge.rate_limiter().clone();
        Arc::new(RateLimitedDirectory::new(directory, limiter))
    }

    /// Runs a sub-task of a merge. The default runs it inline.
    ///
    /// # Errors
    ///
    /// Returns the task's error when it ran inline.
    fn execute_intra_merge(&self, task: IntraMergeTask) -> CoreResult<()> {
        task()
    }
}

/// Receives merge failures other than aborts.
pub trait MergeExceptionHandler: Send + Sync + Debug {
    /// Handles the failure of the merge of `segments`. Returns the error to
    /// record as fatal, or `None` to drop it.
    fn handle_merge_exception(&self, segments: &str, error: CoreError) -> Option<CoreError>;
}

/// Logs merge failures and records them as fatal.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExceptionHandler;

impl MergeExceptionHandler for LoggingExceptionHandler {
    fn handle_merge_exception(&self, segments: &str, error: CoreError) -> Option<CoreError> {
        error!(segments, error = %error, "merge failed");
        Some(CoreError::merge_exception(segments, error))
    }
}

/// Runs `merge` on the calling thread, records its terminal state and
/// reports it finished to `source`.
fn run_merge(source: &dyn MergeSource, merge: &Arc<OneMerge>) -> CoreResult<()> {
    let result = if merge.is_aborted() {
        Err(CoreError::merge_aborted("aborted before it started"))
    } else {
        merge.mark_running();
        panic::catch_unwind(AssertUnwindSafe(|| source.merge(merge)))
            .unwrap_or_else(|_| Err(CoreError::invalid_operation("merge panicked")))
    };
    let state = match &result {
        Ok(()) => MergeState::Completed,
        Err(err) if err.is_merge_aborted() || merge.is_aborted() => MergeState::Aborted,
        Err(_) => MergeState::Failed,
    };
    merge.mark_finished(state);
    source.on_merge_finished(merge);
    match result {
        Ok(()) if merge.state() == MergeState::Failed => Err(CoreError::invalid_operation(format!(
            "merge {merge} could not be applied"
        ))),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::segment::{SegmentCommitInfo, SegmentInfo};
    use crate::types::random_id;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// How a [`QueueSource`] performs a merge.
    #[derive(Debug, Clone)]
    pub(crate) enum Behavior {
        Succeed,
        Sleep(Duration),
        Fail,
        /// Blocks until the merge is aborted.
        WaitForAbort,
    }

    /// A merge source backed by a queue.
    #[derive(Debug)]
    pub(crate) struct QueueSource {
        pub pending: Mutex<VecDeque<Arc<OneMerge>>>,
        pub finished: Mutex<Vec<Arc<OneMerge>>>,
        pub behavior: Behavior,
        pub running: AtomicUsize,
        pub max_running: AtomicUsize,
    }

    impl QueueSource {
        pub(crate) fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                pending: Mutex::new(VecDeque::new()),
                finished: Mutex::new(Vec::new()),
                behavior,
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            })
        }

        pub(crate) fn push(&self, merge: OneMerge) -> Arc<OneMerge> {
            let merge = Arc::new(merge);
            self.pending.lock().push_back(Arc::clone(&merge));
            merge
        }
    }

    impl MergeSource for QueueSource {
        fn next_merge(&self) -> Option<Arc<OneMerge>> {
            self.pending.lock().pop_front()
        }

        fn on_merge_finished(&self, merge: &Arc<OneMerge>) {
            self.finished.lock().push(Arc::clone(merge));
        }

        fn has_pending_merges(&self) -> bool {
            !self.pending.lock().is_empty()
        }

        fn merge(&self, merge: &Arc<OneMerge>) -> CoreResult<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            let result = match &self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Sleep(d) => {
                    std::thread::sleep(*d);
                    Ok(())
                }
                Behavior::Fail => Err(CoreError::corrupt("_x.si", "boom")),
                Behavior::WaitForAbort => {
                    while !merge.is_aborted() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(CoreError::merge_aborted("aborted"))
                }
            };
            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// A merge of one segment of `bytes`.
    pub(crate) fn merge_of(name: &str, bytes: u64) -> OneMerge {
        let info = SegmentInfo::new(name, 10, "Segmerge10", random_id())
            .unwrap()
            .with_size_in_bytes(bytes);
        OneMerge::new(vec![SegmentCommitInfo::new(Arc::new(info))])
    }
}
