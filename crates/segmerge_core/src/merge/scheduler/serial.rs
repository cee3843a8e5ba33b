//! A merge scheduler that runs merges on the calling thread.

use super::{run_merge, MergeScheduler, MergeSource};
use crate::error::{CoreError, CoreResult};
use crate::merge::{MergeState, MergeTrigger};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Runs pending merges one at a time on the thread that calls
/// [`MergeScheduler::merge`]. Concurrent callers queue up behind each other.
#[derive(Debug, Default)]
pub struct SerialMergeScheduler {
    running: Mutex<()>,
    closed: AtomicBool,
}

impl SerialMergeScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MergeScheduler for SerialMergeScheduler {
    fn merge(&self, source: Arc<dyn MergeSource>, trigger: MergeTrigger) -> CoreResult<()> {
        let _running = self.running.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::already_closed("merge scheduler"));
        }
        while let Some(merge) = source.next_merge() {
            debug!(%trigger, merge = %merge, "running merge");
            if let Err(err) = run_merge(source.as_ref(), &merge) {
                if merge.state() == MergeState::Failed {
                    return Err(err);
                }
                debug!(merge = %merge, error = %err, "merge aborted");
            }
        }
        Ok(())
    }

    fn sync(&self) -> CoreResult<()> {
        drop(self.running.lock());
        Ok(())
    }

    fn close(&self) -> CoreResult<()> {
        self.closed.store(true, Ordering::Release);
        self.sync()
    }
}
