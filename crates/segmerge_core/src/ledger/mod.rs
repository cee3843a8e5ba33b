//! Segment commit ledger.
//!
//! [`SegmentInfos`] is the versioned list of live segments. A commit point
//! (`segments_N`) is its durable form: the ledger is serialized to
//! `pending_segments_N`, fsynced, renamed into place and the directory
//! metadata synced. Readers locate the newest commit through
//! [`find_segments_file`], which tolerates concurrent commits.
//!
//! ## Invariants
//!
//! - `generation` strictly increases across successful commits
//! - `counter` exceeds the numeric suffix of every live segment name
//! - For indexes created on or after major version 7, every segment records
//!   a minimum version

mod commit;
mod discovery;
mod format;

pub use discovery::find_segments_file;
pub use format::{FORMAT_VERSION_CURRENT, FORMAT_VERSION_START};

use crate::error::{CoreError, CoreResult};
use crate::merge::OneMerge;
use crate::segment::names::{pending_segments_file_name, segments_file_name};
use crate::segment::SegmentCommitInfo;
use crate::types::{random_id, to_radix36, Id, Version};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// The ordered list of segments making up an index, plus commit metadata.
///
/// Cloning produces a deep copy of the segment list suitable for a
/// snapshot; the immutable segment descriptors are shared.
#[derive(Debug, Clone)]
pub struct SegmentInfos {
    segments: Vec<SegmentCommitInfo>,
    /// Used to name new segments.
    counter: u64,
    /// Counts changes; bumped on every mutation.
    version: i64,
    /// Generation of the last commit read or written; 0 if none.
    generation: u64,
    /// Generation of the last commit successfully read or written.
    last_generation: u64,
    /// Highest generation ever attempted, successful or not.
    last_attempted_generation: u64,
    /// Generation of the prepared-but-unfinished commit.
    pending_generation: Option<u64>,
    user_data: BTreeMap<String, String>,
    id: Id,
    index_created_major: i32,
    /// Version of the writer that wrote the commit this was read from.
    writer_version: Option<Version>,
    /// Oldest segment version, as recorded in the last commit read.
    min_segment_version: Option<Version>,
}

impl SegmentInfos {
    /// Creates an empty ledger for a new index.
    #[must_use]
    pub fn new(index_created_major: i32) -> Self {
        Self {
            segments: Vec::new(),
            counter: 0,
            version: 0,
            generation: 0,
            last_generation: 0,
            last_attempted_generation: 0,
            pending_generation: None,
            user_data: BTreeMap::new(),
            id: random_id(),
            index_created_major,
            writer_version: None,
            min_segment_version: None,
        }
    }

    /// Returns the segments in order.
    #[must_use]
    pub fn segments(&self) -> &[SegmentCommitInfo] {
        &self.segments
    }

    /// Returns an iterator over the segments.
    pub fn iter(&self) -> std::slice::Iter<'_, SegmentCommitInfo> {
        self.segments.iter()
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns `true` if there are no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the segment at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SegmentCommitInfo> {
        self.segments.get(index)
    }

    /// Returns the segment named `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&SegmentCommitInfo> {
        self.segments.iter().find(|s| s.name() == name)
    }

    /// Returns a mutable reference to the segment named `name`. Callers that
    /// change it must call [`SegmentInfos::changed`].
    pub fn find_mut(&mut self, name: &str) -> Option<&mut SegmentCommitInfo> {
        self.segments.iter_mut().find(|s| s.name() == name)
    }

    /// Returns the name counter.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Returns the logical change counter.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns the generation of the current commit; 0 if never committed.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the generation of the last successfully read or written commit.
    #[must_use]
    pub fn last_generation(&self) -> u64 {
        self.last_generation
    }

    /// Returns the commit id.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the major version that created the index.
    #[must_use]
    pub fn index_created_major(&self) -> i32 {
        self.index_created_major
    }

    /// Returns the version of the writer that wrote the commit this ledger
    /// was read from.
    #[must_use]
    pub fn writer_version(&self) -> Option<Version> {
        self.writer_version
    }

    /// Returns the oldest segment version.
    #[must_use]
    pub fn min_segment_version(&self) -> Option<Version> {
        self.min_segment_version
    }

    /// Returns the opaque user data.
    #[must_use]
    pub fn user_data(&self) -> &BTreeMap<String, String> {
        &self.user_data
    }

    /// Replaces the user data.
    pub fn set_user_data(&mut self, data: BTreeMap<String, String>, do_increment_version: bool) {
        self.user_data = data;
        if do_increment_version {
            self.changed();
        }
    }

    /// Records a mutation.
    pub fn changed(&mut self) {
        self.version += 1;
    }

    /// Returns `true` while a commit is prepared but not finished.
    #[must_use]
    pub fn is_pending_commit(&self) -> bool {
        self.pending_generation.is_some()
    }

    /// Returns the name of the current commit point, if any.
    #[must_use]
    pub fn segments_file_name(&self) -> Option<String> {
        (self.last_generation > 0).then(|| segments_file_name(self.last_generation))
    }

    /// Returns the name of the prepared commit point, if a commit is pending.
    #[must_use]
    pub fn pending_segments_file_name(&self) -> Option<String> {
        self.pending_generation.map(pending_segments_file_name)
    }

    /// Allocates a new segment name.
    pub fn new_segment_name(&mut self) -> String {
        let name = format!("_{}", to_radix36(self.counter));
        self.counter += 1;
        self.changed();
        name
    }

    /// Appends a segment.
    pub fn add(&mut self, info: SegmentCommitInfo) {
        self.bump_counter_past(info.name());
        self.segments.push(info);
        self.changed();
    }

    /// Appends several segments.
    pub fn add_all(&mut self, infos: impl IntoIterator<Item = SegmentCommitInfo>) {
        for info in infos {
            self.add(info);
        }
    }

    /// Removes the segment named `name`.
    pub fn remove(&mut self, name: &str) -> Option<SegmentCommitInfo> {
        let pos = self.segments.iter().position(|s| s.name() == name)?;
        self.changed();
        Some(self.segments.remove(pos))
    }

    /// Removes all segments.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.changed();
    }

    /// Replaces all segments and the user data with those of `other`,
    /// keeping this ledger's generation history.
    pub fn replace(&mut self, other: &SegmentInfos) {
        self.segments = other.segments.clone();
        self.user_data = other.user_data.clone();
        self.counter = self.counter.max(other.counter);
        self.last_generation = other.last_generation;
        self.changed();
    }

    /// Copies the commit generation from `other`, typically a clone that
    /// was just committed.
    pub fn update_generation(&mut self, other: &SegmentInfos) {
        self.last_generation = other.last_generation;
        self.generation = other.generation;
        self.last_attempted_generation = self.last_attempted_generation.max(other.last_attempted_generation);
    }

    /// Returns the sum of `max_doc` over all segments.
    #[must_use]
    pub fn total_max_doc(&self) -> i64 {
        self.segments.iter().map(|s| i64::from(s.info().max_doc())).sum()
    }

    /// Returns all files referenced by this ledger.
    #[must_use]
    pub fn files(&self, include_segments_file: bool) -> BTreeSet<String> {
        let mut files = BTreeSet::new();
        if include_segments_file {
            if let Some(name) = self.segments_file_name() {
                files.insert(name);
            }
        }
        for info in &self.segments {
            files.extend(info.files());
        }
        files
    }

    /// Applies a completed merge: its input segments are removed and its
    /// output takes the position of the first input found.
    ///
    /// If none of the inputs are present the output is inserted at the
    /// front. With `drop_segment` the output is not inserted at all (used
    /// when every document in it was deleted).
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the merge has no output segment
    /// - `InvalidArgument` if the output lacks a minimum version and the
    ///   index was created on or after major version 7
    pub fn apply_merge_changes(&mut self, merge: &OneMerge, drop_segment: bool) -> CoreResult<()> {
        let output = merge
            .merge_info()
            .ok_or_else(|| CoreError::invalid_operation("merge has no output segment"))?;
        if self.index_created_major >= Version::MIN_SUPPORTED_MAJOR && output.info().min_version().is_none() {
            return Err(CoreError::invalid_argument(format!(
                "all segments must record a min version for indexes created on or after major version {}",
                Version::MIN_SUPPORTED_MAJOR
            )));
        }

        let merged_away: HashSet<&str> = merge.segments().iter().map(SegmentCommitInfo::name).collect();
        let mut output = Some(output);
        let mut kept = Vec::with_capacity(self.segments.len());
        for info in self.segments.drain(..) {
            if merged_away.contains(info.name()) {
                if !drop_segment {
                    if let Some(out) = output.take() {
                        kept.push(out);
                    }
                }
            } else {
                kept.push(info);
            }
        }
        self.segments = kept;

        if !drop_segment {
            if let Some(out) = output {
                // None of the inputs were present: a concurrent change removed
                // them. Insert at the front.
                self.segments.insert(0, out);
            }
        }
        self.changed();
        Ok(())
    }

    /// Returns the generation the next commit will be written as.
    fn next_pending_generation(&self) -> u64 {
        self.generation
            .max(self.last_generation)
            .max(self.last_attempted_generation)
            + 1
    }

    fn bump_counter_past(&mut self, name: &str) {
        if let Some(n) = crate::segment::names::segment_number(name) {
            if n >= self.counter {
                self.counter = n + 1;
            }
        }
    }
}

impl<'a> IntoIterator for &'a SegmentInfos {
    type Item = &'a SegmentCommitInfo;
    type IntoIter = std::slice::Iter<'a, SegmentCommitInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

impl fmt::Display for SegmentInfos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.segments_file_name() {
            Some(name) => write!(f, "{name}:")?,
            None => f.write_str("(uncommitted):")?,
        }
        for info in &self.segments {
            write!(f, " {info}")?;
        }
        Ok(())
    }
}
