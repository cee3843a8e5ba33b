//! The merge policy seam.

use super::{MergeSpecification, MergeTrigger};
use crate::error::CoreResult;
use crate::ledger::SegmentInfos;
use crate::segment::SegmentCommitInfo;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

/// What a policy may ask its owner about segments.
pub trait MergeContext {
    /// Returns the number of deleted documents a merge of `info` would
    /// reclaim.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete count cannot be determined.
    fn num_deletes_to_merge(&self, info: &SegmentCommitInfo) -> CoreResult<i32>;

    /// Returns the on-disk size of `info` in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size_in_bytes(&self, info: &SegmentCommitInfo) -> CoreResult<u64>;

    /// Returns the names of segments claimed by in-flight merges.
    fn merging_segments(&self) -> &HashSet<String>;
}

/// A [`MergeContext`] backed by the segment metadata and a snapshot of the
/// merging set.
#[derive(Debug, Default, Clone)]
pub struct SimpleMergeContext {
    merging: HashSet<String>,
}

impl SimpleMergeContext {
    /// Creates a context in which `merging` segments are in flight.
    #[must_use]
    pub fn new(merging: HashSet<String>) -> Self {
        Self { merging }
    }
}

impl MergeContext for SimpleMergeContext {
    fn num_deletes_to_merge(&self, info: &SegmentCommitInfo) -> CoreResult<i32> {
        Ok(info.del_count())
    }

    fn size_in_bytes(&self, info: &SegmentCommitInfo) -> CoreResult<u64> {
        Ok(info.size_in_bytes())
    }

    fn merging_segments(&self) -> &HashSet<String> {
        &self.merging
    }
}

/// Decides which segments to merge.
///
/// Implementations are pure selectors: they never mutate the ledger and
/// must exclude segments listed in [`MergeContext::merging_segments`].
pub trait MergePolicy: Send + Sync + Debug {
    /// Selects merges in response to `trigger`.
    ///
    /// # Errors
    ///
    /// Propagates errors from the context.
    fn find_merges(
        &self,
        trigger: MergeTrigger,
        infos: &SegmentInfos,
        ctx: &dyn MergeContext,
    ) -> CoreResult<Option<MergeSpecification>>;

    /// Selects merges that bring the segments in `segments_to_merge` down
    /// to at most `max_segment_count`. The map value is `true` for segments
    /// that existed when the forced merge was requested.
    ///
    /// # Errors
    ///
    /// Propagates errors from the context.
    fn find_forced_merges(
        &self,
        infos: &SegmentInfos,
        max_segment_count: usize,
        segments_to_merge: &HashMap<String, bool>,
        ctx: &dyn MergeContext,
    ) -> CoreResult<Option<MergeSpecification>>;

    /// Selects merges that reclaim deleted documents.
    ///
    /// # Errors
    ///
    /// Propagates errors from the context.
    fn find_forced_deletes_merges(
        &self,
        infos: &SegmentInfos,
        ctx: &dyn MergeContext,
    ) -> CoreResult<Option<MergeSpecification>>;

    /// Clones the policy behind a box.
    fn clone_box(&self) -> Box<dyn MergePolicy>;
}

impl Clone for Box<dyn MergePolicy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A policy that never merges.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMergePolicy;

impl MergePolicy for NoMergePolicy {
    fn find_merges(
        &self,
        _trigger: MergeTrigger,
        _infos: &SegmentInfos,
        _ctx: &dyn MergeContext,
    ) -> CoreResult<Option<MergeSpecification>> {
        Ok(None)
    }

    fn find_forced_merges(
        &self,
        _infos: &SegmentInfos,
        _max_segment_count: usize,
        _segments_to_merge: &HashMap<String, bool>,
        _ctx: &dyn MergeContext,
    ) -> CoreResult<Option<MergeSpecification>> {
        Ok(None)
    }

    fn find_forced_deletes_merges(
        &self,
        _infos: &SegmentInfos,
        _ctx: &dyn MergeContext,
    ) -> CoreResult<Option<MergeSpecification>> {
        Ok(None)
    }

    fn clone_box(&self) -> Box<dyn MergePolicy> {
        Box::new(*self)
    }
}
