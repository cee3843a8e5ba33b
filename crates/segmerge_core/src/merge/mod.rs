//! Segment merging.
//!
//! A [`MergePolicy`] decides which segments to merge and returns a
//! [`MergeSpecification`] of [`OneMerge`]s. The owner registers those
//! merges and hands them to a [`MergeScheduler`], which runs them on worker
//! threads and throttles their I/O through each merge's
//! [`MergeRateLimiter`].
//!
//! ## Invariants
//!
//! - A segment is claimed by at most one in-flight merge
//! - Policies and schedulers never write the ledger; the owner applies a
//!   finished merge through its `on_merge_finished` callback
//! - An aborted merge is a benign terminal state

mod policy;
mod rate_limiter;
pub mod scheduler;
mod tiered;

pub use policy::{MergeContext, MergePolicy, NoMergePolicy, SimpleMergeContext};
pub use rate_limiter::{MergeRateLimiter, OneMergeProgress, PauseReason};
pub use scheduler::{
    ConcurrentMergeScheduler, IntraMergeExecutor, LoggingExceptionHandler, MergeExceptionHandler, MergeScheduler,
    MergeSource, SerialMergeScheduler,
};
pub use tiered::TieredMergePolicy;

use crate::segment::{SegmentCommitInfo, SegmentInfo};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// What caused a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeTrigger {
    /// A new segment was flushed.
    SegmentFlush,
    /// All pending segments were flushed.
    FullFlush,
    /// An explicit request such as a forced merge.
    Explicit,
    /// A previous merge finished.
    MergeFinished,
    /// The owner is closing.
    Closing,
    /// A commit is in progress.
    Commit,
}

impl fmt::Display for MergeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SegmentFlush => "segment_flush",
            Self::FullFlush => "full_flush",
            Self::Explicit => "explicit",
            Self::MergeFinished => "merge_finished",
            Self::Closing => "closing",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    /// Selected but not started.
    Pending,
    /// Running on a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Cancelled.
    Aborted,
    /// Failed with an error.
    Failed,
}

impl MergeState {
    /// Returns `true` for completed, aborted and failed merges.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

/// A single merge: an immutable snapshot of input segments plus the
/// progress of merging them.
///
/// Shared as `Arc<OneMerge>` between the policy's caller, the scheduler and
/// the worker running it.
#[derive(Debug)]
pub struct OneMerge {
    segments: Vec<SegmentCommitInfo>,
    total_max_doc: i64,
    estimated_merge_bytes: u64,
    total_merge_bytes: u64,
    max_num_segments: Option<usize>,
    rate_limiter: Arc<MergeRateLimiter>,
    state: Mutex<MergeState>,
    started_at: Mutex<Option<Instant>>,
    merge_info: Mutex<Option<SegmentCommitInfo>>,
}

impl OneMerge {
    /// Creates a merge of `segments`. The estimated size defaults to the
    /// raw size of the inputs.
    #[must_use]
    pub fn new(segments: Vec<SegmentCommitInfo>) -> Self {
        let total_merge_bytes = segments.iter().map(SegmentCommitInfo::size_in_bytes).sum();
        let total_max_doc = segments.iter().map(|s| i64::from(s.info().max_doc())).sum();
        Self {
            segments,
            total_max_doc,
            estimated_merge_bytes: total_merge_bytes,
            total_merge_bytes,
            max_num_segments: None,
            rate_limiter: Arc::new(MergeRateLimiter::new(Arc::new(OneMergeProgress::new()))),
            state: Mutex::new(MergeState::Pending),
            started_at: Mutex::new(None),
            merge_info: Mutex::new(None),
        }
    }

    /// Sets the expected size of the merged segment.
    #[must_use]
    pub fn with_estimated_merge_bytes(mut self, bytes: u64) -> Self {
        self.estimated_merge_bytes = bytes;
        self
    }

    /// Marks this as part of a forced merge down to `max` segments.
    #[must_use]
    pub fn with_max_num_segments(mut self, max: usize) -> Self {
        self.max_num_segments = Some(max);
        self
    }

    /// Returns the input segments.
    #[must_use]
    pub fn segments(&self) -> &[SegmentCommitInfo] {
        &self.segments
    }

    /// Returns the sum of the inputs' `max_doc`.
    #[must_use]
    pub fn total_max_doc(&self) -> i64 {
        self.total_max_doc
    }

    /// Returns the expected size of the merged segment, discounting deletes.
    #[must_use]
    pub fn estimated_merge_bytes(&self) -> u64 {
        self.estimated_merge_bytes
    }

    /// Returns the raw size of the inputs.
    #[must_use]
    pub fn total_merge_bytes(&self) -> u64 {
        self.total_merge_bytes
    }

    /// Returns the target segment count if this is a forced merge.
    #[must_use]
    pub fn max_num_segments(&self) -> Option<usize> {
        self.max_num_segments
    }

    /// Returns `true` if this merge belongs to a forced merge.
    #[must_use]
    pub fn is_forced(&self) -> bool {
        self.max_num_segments.is_some()
    }

    /// Returns the rate limiter throttling this merge's writes.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<MergeRateLimiter> {
        &self.rate_limiter
    }

    /// Returns the progress tracker.
    #[must_use]
    pub fn progress(&self) -> &Arc<OneMergeProgress> {
        self.rate_limiter.progress()
    }

    /// Requests cancellation. A paused merge is woken.
    pub fn abort(&self) {
        self.rate_limiter.progress().abort();
    }

    /// Returns `true` once [`OneMerge::abort`] was called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.rate_limiter.progress().is_aborted()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> MergeState {
        *self.state.lock()
    }

    /// Returns when the merge started running.
    #[must_use]
    pub fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock()
    }

    pub(crate) fn mark_running(&self) {
        *self.state.lock() = MergeState::Running;
        *self.started_at.lock() = Some(Instant::now());
    }

    pub(crate) fn mark_finished(&self, state: MergeState) {
        *self.state.lock() = state;
    }

    /// Records the segment produced by this merge.
    pub fn set_merge_info(&self, info: SegmentCommitInfo) {
        *self.merge_info.lock() = Some(info);
    }

    /// Returns the segment produced by this merge, once set.
    #[must_use]
    pub fn merge_info(&self) -> Option<SegmentCommitInfo> {
        self.merge_info.lock().clone()
    }

    /// Returns the descriptor of the produced segment, once set.
    #[must_use]
    pub fn merged_segment(&self) -> Option<Arc<SegmentInfo>> {
        self.merge_info.lock().as_ref().map(|s| Arc::clone(s.info()))
    }

    /// Returns the input segments as a space-separated string.
    #[must_use]
    pub fn seg_string(&self) -> String {
        self.segments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for OneMerge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.seg_string())?;
        if let Some(max) = self.max_num_segments {
            write!(f, " [maxNumSegments={max}]")?;
        }
        if self.is_aborted() {
            f.write_str(" [ABORTED]")?;
        }
        Ok(())
    }
}

/// The merges proposed by one policy call.
#[derive(Debug, Default, Clone)]
pub struct MergeSpecification {
    merges: Vec<Arc<OneMerge>>,
}

impl MergeSpecification {
    /// Creates an empty specification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a merge.
    pub fn add(&mut self, merge: OneMerge) {
        self.merges.push(Arc::new(merge));
    }

    /// Returns the merges.
    #[must_use]
    pub fn merges(&self) -> &[Arc<OneMerge>] {
        &self.merges
    }

    /// Returns the number of merges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.merges.len()
    }

    /// Returns `true` if there are no merges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.merges.is_empty()
    }
}

impl IntoIterator for MergeSpecification {
    type Item = Arc<OneMerge>;
    type IntoIter = std::vec::IntoIter<Arc<OneMerge>>;

    fn into_iter(self) -> Self::IntoIter {
        self.merges.into_iter()
    }
}

impl fmt::Display for MergeSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MergeSpec:")?;
        for (i, merge) in self.merges.iter().enumerate() {
            write!(f, "\n  {}: {merge}", i + 1)?;
        }
        Ok(())
    }
}

/// Score of a merge candidate; lower is better.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeScore {
    /// The score.
    pub score: f64,
    /// How the score was computed.
    pub explanation: String,
}
