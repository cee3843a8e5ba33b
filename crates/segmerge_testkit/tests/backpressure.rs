//! Merge scheduler back-pressure tests.

use parking_lot::Mutex;
use segmerge_core::merge::{MergeScheduler, MergeSource, MergeState, MergeTrigger};
use segmerge_core::{
    ConcurrentMergeScheduler, CoreResult, MergeSchedulerConfig, OneMerge, SegmentCommitInfo, SegmentInfo,
};
use segmerge_core::types::random_id;
use segmerge_testkit::init_tracing;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Hands out queued merges; each merge sleeps for `duration`.
#[derive(Debug)]
struct SlowSource {
    duration: Duration,
    pending: Mutex<VecDeque<Arc<OneMerge>>>,
    finished: Mutex<Vec<Arc<OneMerge>>>,
}

impl SlowSource {
    fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            pending: Mutex::new(VecDeque::new()),
            finished: Mutex::new(Vec::new()),
        })
    }

    fn push(&self, name: &str) -> Arc<OneMerge> {
        let info = SegmentInfo::new(name, 10, "Segmerge10", random_id()).unwrap();
        let merge = Arc::new(OneMerge::new(vec![SegmentCommitInfo::new(Arc::new(info))]));
        self.pending.lock().push_back(Arc::clone(&merge));
        merge
    }

    fn is_finished(&self, merge: &Arc<OneMerge>) -> bool {
        self.finished.lock().iter().any(|m| Arc::ptr_eq(m, merge))
    }
}

impl MergeSource for SlowSource {
    fn next_merge(&self) -> Option<Arc<OneMerge>> {
        self.pending.lock().pop_front()
    }

    fn on_merge_finished(&self, merge: &Arc<OneMerge>) {
        self.finished.lock().push(Arc::clone(merge));
    }

    fn has_pending_merges(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    fn merge(&self, _merge: &Arc<OneMerge>) -> CoreResult<()> {
        thread::sleep(self.duration);
        Ok(())
    }
}

fn single_slot_scheduler() -> ConcurrentMergeScheduler {
    let config = MergeSchedulerConfig::new()
        .max_merges_and_threads(1, 1)
        .stall_poll_interval(Duration::from_millis(10));
    ConcurrentMergeScheduler::new(config).unwrap()
}

#[test]
fn submitter_blocks_until_running_merge_finishes() {
    init_tracing();
    let scheduler = single_slot_scheduler();
    let source = SlowSource::new(Duration::from_millis(300));
    let first = source.push("_0");
    let second = source.push("_1");

    let started = Instant::now();
    scheduler.merge(source.clone(), MergeTrigger::SegmentFlush).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert!(source.is_finished(&first));
    assert!(scheduler.stats().stalls() >= 1);
    assert!(scheduler.stats().stalled_time() > Duration::ZERO);

    scheduler.sync().unwrap();
    assert!(source.is_finished(&second));
    assert_eq!(first.state(), MergeState::Completed);
    assert_eq!(second.state(), MergeState::Completed);
    scheduler.close().unwrap();
}

#[test]
fn submitter_does_not_block_without_backlog() {
    let scheduler = single_slot_scheduler();
    let source = SlowSource::new(Duration::from_millis(300));
    let only = source.push("_0");

    let started = Instant::now();
    scheduler.merge(source.clone(), MergeTrigger::SegmentFlush).unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(scheduler.stats().stalls(), 0);

    scheduler.close().unwrap();
    assert!(source.is_finished(&only));
}

#[test]
fn wider_scheduler_runs_merges_side_by_side() {
    let config = MergeSchedulerConfig::new().max_merges_and_threads(4, 4);
    let scheduler = ConcurrentMergeScheduler::new(config).unwrap();
    let source = SlowSource::new(Duration::from_millis(200));
    for i in 0..4 {
        source.push(&format!("_{i}"));
    }

    let started = Instant::now();
    scheduler.merge(source.clone(), MergeTrigger::SegmentFlush).unwrap();
    scheduler.sync().unwrap();
    assert!(started.elapsed() < Duration::from_millis(700));
    assert_eq!(source.finished.lock().len(), 4);
    assert_eq!(scheduler.stats().stalls(), 0);
    scheduler.close().unwrap();
}
