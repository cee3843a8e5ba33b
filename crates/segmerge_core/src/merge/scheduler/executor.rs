//! Thread pool for sub-tasks of a single merge.

use super::IntraMergeTask;
use crate::error::{CoreError, CoreResult};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug)]
struct Pool {
    /// `None` once shut down.
    sender: Option<Sender<Job>>,
    receiver: Receiver<Job>,
    threads: Vec<JoinHandle<()>>,
    next_thread_id: usize,
}

/// Decrements the active count when a pooled job ends, even by panic.
struct ActivePermit(Arc<AtomicUsize>);

impl Drop for ActivePermit {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A lazily grown pool of threads that merges use to parallelize their own
/// work.
///
/// Jobs are handed to idle threads over a rendezvous channel; when no thread
/// is idle a new one is started. Idle threads exit after the keep-alive.
/// Callers pass a budget: once that many jobs are active the job runs inline
/// on the caller instead.
#[derive(Debug)]
pub struct IntraMergeExecutor {
    keep_alive: Duration,
    active: Arc<AtomicUsize>,
    pool: Mutex<Pool>,
}

impl IntraMergeExecutor {
    /// Creates an executor whose idle threads live for `keep_alive`.
    #[must_use]
    pub fn new(keep_alive: Duration) -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            keep_alive,
            active: Arc::new(AtomicUsize::new(0)),
            pool: Mutex::new(Pool {
                sender: Some(sender),
                receiver,
                threads: Vec::new(),
                next_thread_id: 1,
            }),
        }
    }

    /// Returns the number of jobs running on pool threads.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Runs `task` on a pool thread if fewer than `budget` jobs are active,
    /// otherwise on the calling thread. A pooled task's error is passed to
    /// `on_error`.
    ///
    /// # Errors
    ///
    /// Returns the task's error when it ran inline, or an I/O error if a
    /// pool thread could not be started.
    pub fn execute(
        &self,
        budget: usize,
        task: IntraMergeTask,
        on_error: impl FnOnce(CoreError) + Send + 'static,
    ) -> CoreResult<()> {
        let mut pool = self.pool.lock();
        let Some(sender) = pool.sender.clone() else {
            drop(pool);
            return task();
        };
        if !self.try_acquire(budget) {
            drop(pool);
            return task();
        }

        let permit = ActivePermit(Arc::clone(&self.active));
        let job: Job = Box::new(move || {
            let _permit = permit;
            if let Err(err) = task() {
                on_error(err);
            }
        });

        let job = match sender.try_send(job) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(job) | TrySendError::Disconnected(job)) => job,
        };

        pool.threads.retain(|handle| !handle.is_finished());
        let id = pool.next_thread_id;
        pool.next_thread_id += 1;
        let receiver = pool.receiver.clone();
        let keep_alive = self.keep_alive;
        let handle = thread::Builder::new()
            .name(format!("segmerge-intra-merge-{id}"))
            .spawn(move || {
                job();
                while let Ok(job) = receiver.recv_timeout(keep_alive) {
                    job();
                }
                debug!(thread = id, "intra-merge thread exiting");
            })?;
        pool.threads.push(handle);
        Ok(())
    }

    fn try_acquire(&self, budget: usize) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < budget).then_some(n + 1))
            .is_ok()
    }

    /// Stops accepting pooled jobs and joins the pool threads. Later calls
    /// to [`IntraMergeExecutor::execute`] run inline.
    pub fn shutdown(&self) {
        let threads = {
            let mut pool = self.pool.lock();
            pool.sender = None;
            std::mem::take(&mut pool.threads)
        };
        let me = thread::current().id();
        for handle in threads {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                warn!("intra-merge thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn zero_budget_runs_inline() {
        let executor = IntraMergeExecutor::new(Duration::from_secs(1));
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        executor
            .execute(
                0,
                Box::new(move || {
                    tx.send(thread::current().id()).unwrap();
                    Ok(())
                }),
                |_| {},
            )
            .unwrap();
        assert_eq!(rx.recv().unwrap(), caller);
        assert_eq!(executor.active_count(), 0);
    }

    #[test]
    fn inline_error_is_returned() {
        let executor = IntraMergeExecutor::new(Duration::from_secs(1));
        let result = executor.execute(0, Box::new(|| Err(CoreError::invalid_operation("boom"))), |_| {
            panic!("inline errors are returned, not routed")
        });
        assert!(result.is_err());
    }

    #[test]
    fn pooled_job_runs_elsewhere_and_reports_errors() {
        let executor = IntraMergeExecutor::new(Duration::from_secs(5));
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        executor
            .execute(
                2,
                Box::new(move || {
                    tx.send(thread::current().id()).unwrap();
                    Ok(())
                }),
                |_| {},
            )
            .unwrap();
        assert_ne!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), caller);

        let (err_tx, err_rx) = mpsc::channel();
        executor
            .execute(2, Box::new(|| Err(CoreError::invalid_operation("boom"))), move |err| {
                err_tx.send(err.to_string()).unwrap();
            })
            .unwrap();
        assert!(err_rx.recv_timeout(Duration::from_secs(5)).unwrap().contains("boom"));

        executor.shutdown();
        assert_eq!(executor.active_count(), 0);
    }

    #[test]
    fn budget_caps_active_jobs() {
        let executor = IntraMergeExecutor::new(Duration::from_secs(5));
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        let (started_tx, started_rx) = mpsc::channel();

        let rx = release_rx.clone();
        let started = started_tx.clone();
        executor
            .execute(
                1,
                Box::new(move || {
                    started.send(thread::current().id()).unwrap();
                    rx.recv().unwrap();
                    Ok(())
                }),
                |_| {},
            )
            .unwrap();
        let pooled = started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(executor.active_count(), 1);

        executor
            .execute(
                1,
                Box::new(move || {
                    started_tx.send(thread::current().id()).unwrap();
                    Ok(())
                }),
                |_| {},
            )
            .unwrap();
        let inline = started_rx.recv().unwrap();
        assert_ne!(inline, pooled);
        assert_eq!(inline, thread::current().id());

        release_tx.send(()).unwrap();
        executor.shutdown();
    }

    #[test]
    fn runs_inline_after_shutdown() {
        let executor = IntraMergeExecutor::new(Duration::from_secs(1));
        executor.shutdown();
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        executor
            .execute(
                4,
                Box::new(move || {
                    tx.send(thread::current().id()).unwrap();
                    Ok(())
                }),
                |_| {},
            )
            .unwrap();
        assert_eq!(rx.recv().unwrap(), caller);
    }
}
