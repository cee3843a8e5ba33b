//! The owner of a live segment ledger.
//!
//! [`SegmentManager`] closes the compaction loop: it holds the current
//! [`SegmentInfos`], asks its [`MergePolicy`] for merges whenever segments
//! change, hands registered merges to its [`MergeScheduler`] and applies
//! finished merges back to the ledger. Writing merged segment data is
//! delegated to a [`SegmentMerger`].
//!
//! ## Locking
//!
//! A single mutex guards the ledger, the set of segments claimed by
//! in-flight merges and the merge queues. It is never held while calling
//! into the scheduler, which calls back into the manager under its own lock.
//!
//! ## Files
//!
//! Only the most recent commit is kept. A file is deleted once neither the
//! last commit nor the live ledger references it.

use crate::codec::util::verify_checksum;
use crate::codec::{read_live_docs_count, write_live_docs, CodecRegistry};
use crate::config::MergeSchedulerConfig;
use crate::error::{CoreError, CoreResult};
use crate::ledger::SegmentInfos;
use crate::merge::{
    ConcurrentMergeScheduler, MergePolicy, MergeScheduler, MergeSource, MergeState, MergeTrigger, OneMerge,
    SimpleMergeContext, TieredMergePolicy,
};
use crate::segment::names::{parse_segment_name, PENDING_SEGMENTS, SEGMENTS, WRITE_LOCK_NAME};
use crate::segment::{SegmentCommitInfo, SegmentInfo};
use crate::types::Version;
use parking_lot::{Condvar, Mutex};
use segmerge_storage::{Directory, DirectoryLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MERGE_WAIT_POLL: Duration = Duration::from_millis(250);

/// The inputs of one physical merge.
#[derive(Debug)]
pub struct MergeRequest<'a> {
    /// Name the merged segment must carry.
    pub segment_name: &'a str,
    /// The merge being performed. Its inputs are the segments to combine.
    pub merge: &'a OneMerge,
    /// Where to write the merged files. Writes are throttled by the merge's
    /// rate limiter and fail once the merge is aborted.
    pub directory: &'a Arc<dyn Directory>,
    /// The scheduler running the merge, for
    /// [`MergeScheduler::execute_intra_merge`].
    pub scheduler: &'a dyn MergeScheduler,
}

/// Writes merged segments. Supplied by the codec layer.
pub trait SegmentMerger: Send + Sync + fmt::Debug {
    /// Combines the live documents of `request.merge`'s inputs into a new
    /// segment named `request.segment_name` and returns its descriptor.
    ///
    /// The descriptor file (`.si`) is written by the caller.
    ///
    /// # Errors
    ///
    /// Returns `MergeAborted` (or a storage `Aborted` error) when the merge
    /// was aborted, or any failure while writing.
    fn merge(&self, request: &MergeRequest<'_>) -> CoreResult<SegmentInfo>;
}

/// How a [`SegmentManager`] is assembled.
///
/// Defaults: a [`TieredMergePolicy`] with default settings, a
/// [`ConcurrentMergeScheduler`] with default settings and the built-in
/// codecs.
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    merge_policy: Option<Box<dyn MergePolicy>>,
    merge_scheduler: Option<Arc<dyn MergeScheduler>>,
    codecs: CodecRegistry,
}

impl ManagerOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the merge policy.
    #[must_use]
    pub fn merge_policy(mut self, policy: Box<dyn MergePolicy>) -> Self {
        self.merge_policy = Some(policy);
        self
    }

    /// Sets the merge scheduler. The manager closes it when it closes.
    #[must_use]
    pub fn merge_scheduler(mut self, scheduler: Arc<dyn MergeScheduler>) -> Self {
        self.merge_scheduler = Some(scheduler);
        self
    }

    /// Sets the codecs used to read and write segment descriptors.
    #[must_use]
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }
}

#[derive(Debug)]
struct State {
    infos: SegmentInfos,
    /// Names of segments claimed by pending or running merges.
    merging: HashSet<String>,
    pending: VecDeque<Arc<OneMerge>>,
    running: Vec<Arc<OneMerge>>,
    /// Segments a forced merge must fold; `true` if the segment existed
    /// when the forced merge was requested.
    segments_to_merge: HashMap<String, bool>,
    max_num_segments: Option<usize>,
    committed_files: BTreeSet<String>,
    committed_version: i64,
    /// Files of the ledger snapshot being committed.
    committing_files: BTreeSet<String>,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    dir: Arc<dyn Directory>,
    codecs: CodecRegistry,
    policy: Box<dyn MergePolicy>,
    scheduler: Arc<dyn MergeScheduler>,
    merger: Arc<dyn SegmentMerger>,
    state: Mutex<State>,
    merges_changed: Condvar,
    commit_lock: Mutex<()>,
    deletes_lock: Mutex<()>,
    write_lock: Mutex<Option<Box<dyn DirectoryLock>>>,
}

/// Owns a segment ledger and keeps it compacted.
///
/// # Example
///
/// ```
/// use segmerge_core::types::random_id;
/// use segmerge_core::{CoreResult, MergeRequest, SegmentInfo, SegmentManager, SegmentMerger};
/// use segmerge_storage::{Directory, RamDirectory};
/// use std::sync::Arc;
///
/// #[derive(Debug)]
/// struct EmptyMerger;
///
/// impl SegmentMerger for EmptyMerger {
///     fn merge(&self, request: &MergeRequest<'_>) -> CoreResult<SegmentInfo> {
///         SegmentInfo::new(request.segment_name, 0, "Segmerge10", random_id())
///     }
/// }
///
/// let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
/// let manager = SegmentManager::open(Arc::clone(&dir), Arc::new(EmptyMerger)).unwrap();
/// let name = manager.new_segment_name();
/// let info = SegmentInfo::new(name.as_str(), 100, "Segmerge10", random_id()).unwrap();
/// manager.add_segment(info).unwrap();
/// assert_eq!(manager.commit().unwrap(), "segments_1");
/// manager.close().unwrap();
/// assert!(dir.list_all().unwrap().contains(&format!("{name}.si")));
/// ```
#[derive(Debug)]
pub struct SegmentManager {
    inner: Arc<Inner>,
}

impl SegmentManager {
    /// Opens the index in `dir` with default options, creating an empty
    /// ledger if no commit exists.
    ///
    /// # Errors
    ///
    /// Returns `LockObtainFailed` if another manager holds the directory,
    /// or the error reading the latest commit.
    pub fn open(dir: Arc<dyn Directory>, merger: Arc<dyn SegmentMerger>) -> CoreResult<Self> {
        Self::open_with_options(dir, merger, ManagerOptions::default())
    }

    /// Opens the index in `dir`.
    ///
    /// Files left behind by a crash (unpublished pending commits, segments
    /// no commit references) are deleted.
    ///
    /// # Errors
    ///
    /// Returns `LockObtainFailed` if another manager holds the directory,
    /// or the error reading the latest commit.
    pub fn open_with_options(
        dir: Arc<dyn Directory>,
        merger: Arc<dyn SegmentMerger>,
        options: ManagerOptions,
    ) -> CoreResult<Self> {
        let lock = dir.obtain_lock(WRITE_LOCK_NAME)?;
        let infos = match SegmentInfos::read_latest_commit(dir.as_ref(), &options.codecs) {
            Ok(infos) => {
                info!(
                    generation = infos.generation(),
                    segments = infos.len(),
                    "opened existing index"
                );
                infos
            }
            Err(CoreError::IndexNotFound { .. }) => {
                info!("no commit found; starting a new index");
                SegmentInfos::new(Version::LATEST.major)
            }
            Err(e) => return Err(e),
        };

        let policy = match options.merge_policy {
            Some(policy) => policy,
            None => Box::new(TieredMergePolicy::default()),
        };
        let scheduler = match options.merge_scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(ConcurrentMergeScheduler::new(MergeSchedulerConfig::default())?),
        };
        scheduler.initialize(&dir)?;

        let committed_files = infos.files(true);
        let committed_version = infos.version();
        let inner = Arc::new(Inner {
            dir,
            codecs: options.codecs,
            policy,
            scheduler,
            merger,
            state: Mutex::new(State {
                infos,
                merging: HashSet::new(),
                pending: VecDeque::new(),
                running: Vec::new(),
                segments_to_merge: HashMap::new(),
                max_num_segments: None,
                committed_files,
                committed_version,
                committing_files: BTreeSet::new(),
                closed: false,
            }),
            merges_changed: Condvar::new(),
            commit_lock: Mutex::new(()),
            deletes_lock: Mutex::new(()),
            write_lock: Mutex::new(Some(lock)),
        });
        inner.delete_uncommitted_files();
        Ok(Self { inner })
    }

    /// Returns the directory holding the index.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.inner.dir
    }

    /// Returns the merge scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn MergeScheduler> {
        &self.inner.scheduler
    }

    /// Allocates the name for a new segment.
    #[must_use]
    pub fn new_segment_name(&self) -> String {
        self.inner.state.lock().infos.new_segment_name()
    }

    /// Returns a copy of the live ledger.
    #[must_use]
    pub fn segment_infos(&self) -> SegmentInfos {
        self.inner.state.lock().infos.clone()
    }

    /// Returns the names of segments claimed by pending or running merges.
    #[must_use]
    pub fn merging_segments(&self) -> HashSet<String> {
        self.inner.state.lock().merging.clone()
    }

    /// Returns the number of merges registered but not yet finished.
    #[must_use]
    pub fn outstanding_merges(&self) -> usize {
        let state = self.inner.state.lock();
        state.pending.len() + state.running.len()
    }

    /// Adds a freshly flushed segment and triggers merging.
    ///
    /// The segment's data files must already be written; this writes its
    /// descriptor. A missing minimum version defaults to the segment's own
    /// version.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if a segment with that name is already live
    /// - `CorruptIndex` if its codec is not registered
    /// - the error writing the descriptor or starting merges
    pub fn add_segment(&self, info: SegmentInfo) -> CoreResult<()> {
        let info = match info.min_version() {
            Some(_) => info,
            None => {
                let version = info.version();
                info.with_min_version(Some(version))
            }
        };
        {
            let state = self.inner.state.lock();
            ensure_open(&state)?;
            if state.infos.find(info.name()).is_some() {
                return Err(CoreError::invalid_argument(format!(
                    "segment {} is already live",
                    info.name()
                )));
            }
        }

        let codec = self.inner.codecs.lookup(info.codec(), info.name())?;
        codec.segment_info_format().write(self.inner.dir.as_ref(), &info)?;
        debug!(segment = %info, "adding flushed segment");
        {
            let mut state = self.inner.state.lock();
            ensure_open(&state)?;
            if state.infos.find(info.name()).is_some() {
                return Err(CoreError::invalid_argument(format!(
                    "segment {} is already live",
                    info.name()
                )));
            }
            state.infos.add(SegmentCommitInfo::new(Arc::new(info)));
        }
        self.inner.maybe_merge(MergeTrigger::SegmentFlush)
    }

    /// Records that `segment` now has `del_count` hard-deleted documents.
    ///
    /// If the segment is being merged, the new deletes are carried over to
    /// the merged segment when the merge finishes.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the segment is unknown or the count decreases
    ///   or exceeds `max_doc`, or if a merge replaced the segment while its
    ///   live-docs file was being written
    /// - the error writing the live-docs file
    pub fn apply_deletes(&self, segment: &str, del_count: i32) -> CoreResult<()> {
        let _deleting = self.inner.deletes_lock.lock();
        let updated = {
            let state = self.inner.state.lock();
            ensure_open(&state)?;
            let current = state
                .infos
                .find(segment)
                .ok_or_else(|| CoreError::invalid_argument(format!("unknown segment {segment}")))?;
            if current.del_count() == del_count {
                return Ok(());
            }
            let mut updated = current.clone();
            updated.advance_deletes(del_count)?;
            updated
        };

        let file_name = write_live_docs(self.inner.dir.as_ref(), &updated)?;
        let swapped = {
            let mut state = self.inner.state.lock();
            match ensure_open(&state) {
                Ok(()) => match state.infos.find_mut(segment) {
                    Some(slot) => {
                        *slot = updated;
                        state.infos.changed();
                        Ok(())
                    }
                    None => Err(CoreError::invalid_argument(format!(
                        "segment {segment} was merged away while applying deletes"
                    ))),
                },
                Err(e) => Err(e),
            }
        };
        match swapped {
            Ok(()) => {
                debug!(segment, del_count, "applied deletes");
                Ok(())
            }
            Err(e) => {
                self.inner.dir.delete_files_ignoring_errors(&[file_name.as_str()]);
                Err(e)
            }
        }
    }

    /// Sets the user data recorded with the next commit.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` once closed.
    pub fn set_user_data(&self, data: BTreeMap<String, String>) -> CoreResult<()> {
        let mut state = self.inner.state.lock();
        ensure_open(&state)?;
        state.infos.set_user_data(data, true);
        Ok(())
    }

    /// Asks the merge policy for merges and starts them.
    ///
    /// # Errors
    ///
    /// Returns policy errors and merge failures recorded by the scheduler.
    pub fn maybe_merge(&self, trigger: MergeTrigger) -> CoreResult<()> {
        self.inner.maybe_merge(trigger)
    }

    /// Publishes the live ledger as a new commit and returns the commit
    /// file name.
    ///
    /// Files referenced only by the previous commit are deleted afterwards.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that made the commit fail; the previous commit
    /// stays current.
    pub fn commit(&self) -> CoreResult<String> {
        self.inner.ensure_open()?;
        self.inner.commit()
    }

    /// Merges until at most `max_num_segments` segments remain, counting
    /// only segments that exist now or are produced from them.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `max_num_segments` is zero
    /// - merge failures recorded while waiting
    pub fn force_merge(&self, max_num_segments: usize, do_wait: bool) -> CoreResult<()> {
        if max_num_segments == 0 {
            return Err(CoreError::invalid_argument("max_num_segments must be >= 1"));
        }
        {
            let mut state = self.inner.state.lock();
            ensure_open(&state)?;
            let requested: HashMap<String, bool> = state.infos.iter().map(|s| (s.name().to_string(), true)).collect();
            state.segments_to_merge = requested;
            state.max_num_segments = Some(max_num_segments);
        }
        info!(max_num_segments, "forcing merge");
        self.inner.maybe_merge(MergeTrigger::Explicit)?;

        if do_wait {
            let waited = self
                .inner
                .wait_until(|state| !state.pending.iter().chain(&state.running).any(|m| m.is_forced()));
            let mut state = self.inner.state.lock();
            state.max_num_segments = None;
            state.segments_to_merge.clear();
            waited?;
        }
        Ok(())
    }

    /// Merges away segments whose deleted-document share exceeds the
    /// policy's threshold.
    ///
    /// # Errors
    ///
    /// Returns policy errors and merge failures recorded while waiting.
    pub fn force_merge_deletes(&self, do_wait: bool) -> CoreResult<()> {
        let merges = {
            let mut state = self.inner.state.lock();
            ensure_open(&state)?;
            let ctx = SimpleMergeContext::new(state.merging.clone());
            let spec = self.inner.policy.find_forced_deletes_merges(&state.infos, &ctx)?;
            let mut registered = Vec::new();
            for merge in spec.into_iter().flatten() {
                if self.inner.register_merge(&mut state, Arc::clone(&merge)) {
                    registered.push(merge);
                }
            }
            registered
        };
        info!(merges = merges.len(), "forcing merge of deletes");
        self.inner.scheduler.merge(self.inner.source(), MergeTrigger::Explicit)?;

        if do_wait {
            self.inner.wait_until(|state| {
                !state
                    .pending
                    .iter()
                    .chain(&state.running)
                    .any(|m| merges.iter().any(|w| Arc::ptr_eq(w, m)))
            })?;
        }
        Ok(())
    }

    /// Blocks until every registered merge has finished.
    ///
    /// # Errors
    ///
    /// Returns a merge failure recorded by the scheduler.
    pub fn wait_for_merges(&self) -> CoreResult<()> {
        self.inner.ensure_open()?;
        self.inner.wait_for_merges()
    }

    /// Aborts pending and running merges and waits for running ones to stop.
    ///
    /// # Errors
    ///
    /// Returns a merge failure recorded by the scheduler while waiting.
    pub fn abort_merges(&self) -> CoreResult<()> {
        self.inner.abort_merges()
    }

    /// Verifies the checksums of the last commit file and of every live
    /// segment's descriptor and live-docs file.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` or `CorruptIndex` for the first damaged
    /// file.
    pub fn check_integrity(&self) -> CoreResult<()> {
        let (infos, commit_file) = {
            let state = self.inner.state.lock();
            (state.infos.clone(), state.infos.segments_file_name())
        };
        let dir = self.inner.dir.as_ref();
        if let Some(name) = commit_file {
            verify_checksum(dir, &name)?;
        }
        for info in &infos {
            verify_checksum(dir, &info.info().descriptor_file_name())?;
            if info.has_deletions() {
                let recorded = read_live_docs_count(dir, info)?;
                if recorded != info.del_count() {
                    return Err(CoreError::corrupt(
                        info.live_docs_file_name().unwrap_or_default(),
                        format!("live docs record {recorded} deletes, ledger has {}", info.del_count()),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Waits for merges, commits outstanding changes and closes the
    /// scheduler. The write lock is released even if a step fails.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub fn close(&self) -> CoreResult<()> {
        if self.inner.state.lock().closed {
            return Ok(());
        }
        let mut first_error = None;
        let mut record = |result: CoreResult<()>| {
            if let Err(e) = result {
                warn!(error = %e, "error while closing segment manager");
                first_error.get_or_insert(e);
            }
        };

        record(
            self.inner
                .maybe_merge(MergeTrigger::Closing)
                .and_then(|()| self.inner.wait_for_merges()),
        );
        let changed = {
            let state = self.inner.state.lock();
            state.infos.version() != state.committed_version
        };
        if changed {
            record(self.inner.commit().map(drop));
        }
        record(self.inner.shutdown());
        info!("segment manager closed");
        first_error.map_or(Ok(()), Err)
    }

    /// Aborts merges and closes without committing. Files written since the
    /// last commit are deleted.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub fn rollback(&self) -> CoreResult<()> {
        if self.inner.state.lock().closed {
            return Ok(());
        }
        let aborted = self.inner.abort_merges();
        let shutdown = self.inner.shutdown();
        info!("segment manager rolled back");
        aborted.and(shutdown)
    }
}

fn ensure_open(state: &State) -> CoreResult<()> {
    if state.closed {
        return Err(CoreError::already_closed("segment manager"));
    }
    Ok(())
}

/// Returns `true` for names the manager creates: segment files and commit
/// points.
fn is_index_file(name: &str) -> bool {
    name.starts_with('_') || name.starts_with(SEGMENTS) || name.starts_with(PENDING_SEGMENTS)
}

impl Inner {
    fn source(self: &Arc<Self>) -> Arc<dyn MergeSource> {
        Arc::clone(self) as Arc<dyn MergeSource>
    }

    fn ensure_open(&self) -> CoreResult<()> {
        ensure_open(&self.state.lock())
    }

    fn maybe_merge(self: &Arc<Self>, trigger: MergeTrigger) -> CoreResult<()> {
        {
            let mut state = self.state.lock();
            ensure_open(&state)?;
            self.update_pending_merges(&mut state, trigger)?;
        }
        self.scheduler.merge(self.source(), trigger)
    }

    fn update_pending_merges(&self, state: &mut State, trigger: MergeTrigger) -> CoreResult<usize> {
        let ctx = SimpleMergeContext::new(state.merging.clone());
        let spec = match state.max_num_segments {
            Some(max) if matches!(trigger, MergeTrigger::Explicit | MergeTrigger::MergeFinished) => {
                self.policy
                    .find_forced_merges(&state.infos, max, &state.segments_to_merge, &ctx)?
            }
            _ => self.policy.find_merges(trigger, &state.infos, &ctx)?,
        };
        let Some(spec) = spec else {
            return Ok(0);
        };
        debug!(%trigger, %spec, "registering merges");
        let mut registered = 0;
        for merge in spec {
            if self.register_merge(state, merge) {
                registered += 1;
            }
        }
        Ok(registered)
    }

    /// Claims the merge's segments and queues it, largest estimated size
    /// first. Returns `false` if a segment is already claimed or no longer
    /// live.
    fn register_merge(&self, state: &mut State, merge: Arc<OneMerge>) -> bool {
        let unavailable = merge
            .segments()
            .iter()
            .any(|s| state.merging.contains(s.name()) || state.infos.find(s.name()).is_none());
        if unavailable || merge.is_aborted() {
            debug!(merge = %merge, "not registering merge of unavailable segments");
            return false;
        }
        for segment in merge.segments() {
            state.merging.insert(segment.name().to_string());
        }
        let bytes = merge.estimated_merge_bytes();
        let at = state.pending.partition_point(|queued| queued.estimated_merge_bytes() >= bytes);
        state.pending.insert(at, merge);
        true
    }

    fn commit(&self) -> CoreResult<String> {
        let _committing = self.commit_lock.lock();
        let mut to_commit = {
            let mut state = self.state.lock();
            let snapshot = state.infos.clone();
            state.committing_files = snapshot.files(false);
            snapshot
        };

        let result = self.write_commit(&mut to_commit);

        let mut state = self.state.lock();
        state.committing_files.clear();
        state.infos.update_generation(&to_commit);
        let file_name = result?;
        let previous = std::mem::replace(&mut state.committed_files, to_commit.files(true));
        state.committed_version = to_commit.version();
        self.delete_unreferenced(&state, previous);
        info!(file = %file_name, segments = to_commit.len(), "committed");
        Ok(file_name)
    }

    fn write_commit(&self, infos: &mut SegmentInfos) -> CoreResult<String> {
        let files = infos.files(false);
        let names: Vec<&str> = files.iter().map(String::as_str).collect();
        self.dir.sync(&names)?;
        infos.commit(self.dir.as_ref())
    }

    fn wait_for_merges(self: &Arc<Self>) -> CoreResult<()> {
        self.scheduler.merge(self.source(), MergeTrigger::Explicit)?;
        self.wait_until(|state| state.pending.is_empty() && state.running.is_empty())
    }

    /// Waits until `done` holds, surfacing merge failures recorded by the
    /// scheduler.
    fn wait_until(&self, mut done: impl FnMut(&State) -> bool) -> CoreResult<()> {
        loop {
            {
                let mut state = self.state.lock();
                if done(&*state) {
                    break;
                }
                self.merges_changed.wait_for(&mut state, MERGE_WAIT_POLL);
            }
            if let Some(err) = self.scheduler.take_merge_exception() {
                return Err(err);
            }
        }
        self.scheduler.take_merge_exception().map_or(Ok(()), Err)
    }

    fn abort_merges(&self) -> CoreResult<()> {
        let (pending, running) = {
            let mut state = self.state.lock();
            let pending: Vec<Arc<OneMerge>> = state.pending.drain(..).collect();
            for merge in &pending {
                merge.abort();
                merge.mark_finished(MergeState::Aborted);
                for segment in merge.segments() {
                    state.merging.remove(segment.name());
                }
            }
            for merge in &state.running {
                merge.abort();
            }
            (pending.len(), state.running.len())
        };
        info!(pending, running, "aborting merges");
        self.merges_changed.notify_all();
        self.wait_until(|state| state.running.is_empty())
    }

    /// Marks the manager closed, closes the scheduler, drops files no
    /// commit references and releases the write lock.
    fn shutdown(&self) -> CoreResult<()> {
        {
            let mut state = self.state.lock();
            state.closed = true;
            let pending: Vec<Arc<OneMerge>> = state.pending.drain(..).collect();
            for merge in pending {
                merge.abort();
                merge.mark_finished(MergeState::Aborted);
                for segment in merge.segments() {
                    state.merging.remove(segment.name());
                }
            }
        }
        let closed = self.scheduler.close();
        self.delete_uncommitted_files();
        self.write_lock.lock().take();
        closed
    }

    fn commit_merge(&self, state: &mut State, merge: &OneMerge) -> CoreResult<()> {
        let mut output = merge
            .merge_info()
            .ok_or_else(|| CoreError::invalid_operation("completed merge has no output segment"))?;
        let output_name = output.name().to_string();

        // deletes that reached the inputs while they were being merged
        let carried: i64 = merge
            .segments()
            .iter()
            .filter_map(|snapshot| {
                state
                    .infos
                    .find(snapshot.name())
                    .map(|current| i64::from(current.del_count()) - i64::from(snapshot.del_count()))
            })
            .sum();
        let max_doc = i64::from(output.info().max_doc());
        let drop_segment = max_doc == 0 || carried >= max_doc;
        if !drop_segment && carried > 0 {
            let carried = i32::try_from(carried)
                .map_err(|_| CoreError::invalid_operation(format!("too many deletes to carry: {carried}")))?;
            output.advance_deletes(carried)?;
            write_live_docs(self.dir.as_ref(), &output)?;
            merge.set_merge_info(output);
        }

        state.infos.apply_merge_changes(merge, drop_segment)?;

        let forced_input = merge
            .segments()
            .iter()
            .any(|s| state.segments_to_merge.contains_key(s.name()));
        for segment in merge.segments() {
            state.segments_to_merge.remove(segment.name());
        }
        if forced_input && !drop_segment {
            state.segments_to_merge.insert(output_name.clone(), false);
        }

        if drop_segment {
            self.delete_segment_files(&output_name);
        }
        self.delete_unreferenced(state, merge.segments().iter().flat_map(SegmentCommitInfo::files));
        debug!(merge = %merge, output = %output_name, carried, dropped = drop_segment, "applied merge");
        Ok(())
    }

    /// Deletes the `candidates` that neither the live ledger, the last
    /// commit nor an in-progress commit reference.
    fn delete_unreferenced(&self, state: &State, candidates: impl IntoIterator<Item = String>) {
        let live = state.infos.files(false);
        let doomed: Vec<String> = candidates
            .into_iter()
            .filter(|f| !live.contains(f) && !state.committed_files.contains(f) && !state.committing_files.contains(f))
            .collect();
        if doomed.is_empty() {
            return;
        }
        debug!(files = ?doomed, "deleting unreferenced files");
        let names: Vec<&str> = doomed.iter().map(String::as_str).collect();
        self.dir.delete_files_ignoring_errors(&names);
    }

    /// Deletes every file belonging to `segment`.
    fn delete_segment_files(&self, segment: &str) {
        match self.dir.list_all() {
            Ok(files) => {
                let doomed: Vec<&str> = files
                    .iter()
                    .map(String::as_str)
                    .filter(|f| parse_segment_name(f) == segment)
                    .collect();
                self.dir.delete_files_ignoring_errors(&doomed);
            }
            Err(e) => warn!(segment, error = %e, "could not list files to clean up"),
        }
    }

    /// Deletes index files the last commit does not reference.
    fn delete_uncommitted_files(&self) {
        let files = match self.dir.list_all() {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "could not list files to clean up");
                return;
            }
        };
        let state = self.state.lock();
        let live = state.infos.files(false);
        let doomed: Vec<&str> = files
            .iter()
            .map(String::as_str)
            .filter(|f| {
                is_index_file(f)
                    && !state.committed_files.contains(*f)
                    && (state.closed || !live.contains(*f))
            })
            .collect();
        if !doomed.is_empty() {
            debug!(files = ?doomed, "deleting uncommitted files");
            self.dir.delete_files_ignoring_errors(&doomed);
        }
    }
}

impl MergeSource for Inner {
    fn next_merge(&self) -> Option<Arc<OneMerge>> {
        let mut state = self.state.lock();
        let merge = state.pending.pop_front()?;
        state.running.push(Arc::clone(&merge));
        Some(merge)
    }

    fn on_merge_finished(&self, merge: &Arc<OneMerge>) {
        let mut state = self.state.lock();
        state.running.retain(|m| !Arc::ptr_eq(m, merge));
        for segment in merge.segments() {
            state.merging.remove(segment.name());
        }

        if merge.state() == MergeState::Completed {
            match self.commit_merge(&mut state, merge) {
                Ok(()) if !state.closed => {
                    if let Err(e) = self.update_pending_merges(&mut state, MergeTrigger::MergeFinished) {
                        warn!(error = %e, "failed to select merges after a merge finished");
                    }
                }
                Ok(()) => {}
                Err(e) => {
                    warn!(merge = %merge, error = %e, "failed to apply finished merge");
                    merge.mark_finished(MergeState::Failed);
                    if let Some(output) = merge.merge_info() {
                        self.delete_segment_files(output.name());
                    }
                }
            }
        }
        self.merges_changed.notify_all();
    }

    fn has_pending_merges(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    fn merge(&self, merge: &Arc<OneMerge>) -> CoreResult<()> {
        merge.progress().check_aborted()?;
        let name = self.state.lock().infos.new_segment_name();
        debug!(merge = %merge, output = %name, "merging");

        let result = self.write_merged_segment(merge, &name);
        if let Err(e) = &result {
            if !e.is_merge_aborted() {
                warn!(merge = %merge, error = %e, "merge failed");
            }
            self.delete_segment_files(&name);
        }
        result
    }
}

impl Inner {
    fn write_merged_segment(&self, merge: &OneMerge, name: &str) -> CoreResult<()> {
        let directory = self.scheduler.wrap_for_merge(merge, Arc::clone(&self.dir));
        let request = MergeRequest {
            segment_name: name,
            merge,
            directory: &directory,
            scheduler: self.scheduler.as_ref(),
        };
        let info = self.merger.merge(&request)?;
        if info.name() != name {
            return Err(CoreError::invalid_operation(format!(
                "merger produced segment {} instead of {name}",
                info.name()
            )));
        }
        merge.progress().check_aborted()?;

        let info = match info.min_version() {
            Some(_) => info,
            None => {
                let min = merge
                    .segments()
                    .iter()
                    .filter_map(|s| s.info().min_version())
                    .min()
                    .unwrap_or_else(|| info.version());
                info.with_min_version(Some(min))
            }
        };
        let codec = self.codecs.lookup(info.codec(), name)?;
        codec.segment_info_format().write(self.dir.as_ref(), &info)?;
        merge.set_merge_info(SegmentCommitInfo::new(Arc::new(info)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TieredMergePolicyConfig;
    use crate::merge::{MergeContext, MergeSpecification, NoMergePolicy, SerialMergeScheduler};
    use crate::types::random_id;
    use segmerge_storage::{DataOutput, IndexInput, IndexOutput, RamDirectory, StorageResult};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Barrier, Weak};
    use std::thread;

    /// Writes one data file holding the live doc count.
    #[derive(Debug, Default)]
    struct CountingMerger;

    impl SegmentMerger for CountingMerger {
        fn merge(&self, request: &MergeRequest<'_>) -> CoreResult<SegmentInfo> {
            let live: i32 = request.merge.segments().iter().map(SegmentCommitInfo::live_docs).sum();
            let bytes: u64 = request
                .merge
                .segments()
                .iter()
                .map(|s| (s.size_in_bytes() as f64 * (1.0 - s.deletes_pct() / 100.0)) as u64)
                .sum();
            let data = format!("{}.dat", request.segment_name);
            let mut out = request.directory.create_output(&data)?;
            out.write_vint(u32::try_from(live).unwrap_or(0))?;
            out.close()?;
            let files: BTreeSet<String> = [data].into_iter().collect();
            SegmentInfo::new(request.segment_name, live, "Segmerge10", random_id())?
                .with_size_in_bytes(bytes)
                .with_files(files)
        }
    }

    fn flush(manager: &SegmentManager, docs: i32, bytes: u64) -> String {
        let name = manager.new_segment_name();
        let data = format!("{name}.dat");
        let mut out = manager.directory().create_output(&data).unwrap();
        out.write_vint(docs as u32).unwrap();
        out.close().unwrap();
        let info = SegmentInfo::new(name.as_str(), docs, "Segmerge10", random_id())
            .unwrap()
            .with_size_in_bytes(bytes)
            .with_files([data].into_iter().collect())
            .unwrap();
        manager.add_segment(info).unwrap();
        name
    }

    fn serial_options(policy: Box<dyn MergePolicy>) -> ManagerOptions {
        ManagerOptions::new()
            .merge_policy(policy)
            .merge_scheduler(Arc::new(SerialMergeScheduler::new()))
    }

    fn small_tiers() -> Box<dyn MergePolicy> {
        let config = TieredMergePolicyConfig::new()
            .segments_per_tier(2.0)
            .max_merge_at_once(2)
            .floor_segment_mb(0.001);
        Box::new(TieredMergePolicy::new(config).unwrap())
    }

    #[test]
    fn new_index_commits_and_reopens() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let manager =
            SegmentManager::open_with_options(Arc::clone(&dir), Arc::new(CountingMerger), serial_options(Box::new(NoMergePolicy)))
                .unwrap();
        let a = flush(&manager, 10, 1000);
        let b = flush(&manager, 20, 2000);
        assert_eq!(manager.commit().unwrap(), "segments_1");
        manager.close().unwrap();

        let reopened =
            SegmentManager::open_with_options(dir, Arc::new(CountingMerger), serial_options(Box::new(NoMergePolicy)))
                .unwrap();
        let infos = reopened.segment_infos();
        let names: Vec<&str> = infos.iter().map(SegmentCommitInfo::name).collect();
        assert_eq!(names, vec![a.as_str(), b.as_str()]);
        assert_eq!(infos.generation(), 1);
        reopened.check_integrity().unwrap();
        reopened.close().unwrap();
    }

    #[test]
    fn second_open_fails_while_locked() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let first = SegmentManager::open(Arc::clone(&dir), Arc::new(CountingMerger)).unwrap();
        assert!(SegmentManager::open(Arc::clone(&dir), Arc::new(CountingMerger)).is_err());
        first.close().unwrap();
        SegmentManager::open(dir, Arc::new(CountingMerger)).unwrap().close().unwrap();
    }

    #[test]
    fn flushes_trigger_merges_that_replace_inputs() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let manager = SegmentManager::open_with_options(Arc::clone(&dir), Arc::new(CountingMerger), serial_options(small_tiers()))
            .unwrap();
        for _ in 0..4 {
            flush(&manager, 10, 1000);
        }
        manager.wait_for_merges().unwrap();

        let infos = manager.segment_infos();
        assert!(infos.len() < 4, "{infos}");
        assert_eq!(infos.total_max_doc(), 40);
        assert!(manager.merging_segments().is_empty());
        assert_eq!(manager.outstanding_merges(), 0);

        // merged-away inputs were never committed, so their files are gone
        let files = dir.list_all().unwrap();
        for file in &files {
            if file.ends_with(".dat") || file.ends_with(".si") {
                assert!(infos.find(parse_segment_name(file)).is_some(), "stray file {file}");
            }
        }
        manager.close().unwrap();
    }

    #[test]
    fn force_merge_to_one_segment() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let manager =
            SegmentManager::open_with_options(dir, Arc::new(CountingMerger), serial_options(Box::new(TieredMergePolicy::default())))
                .unwrap();
        for _ in 0..5 {
            flush(&manager, 10, 1000);
        }
        manager.force_merge(1, true).unwrap();
        let infos = manager.segment_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos.total_max_doc(), 50);
        assert!(infos.get(0).unwrap().info().min_version().is_some());
        manager.commit().unwrap();
        manager.check_integrity().unwrap();
        manager.close().unwrap();
    }

    #[test]
    fn committed_inputs_survive_until_next_commit() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let manager = SegmentManager::open_with_options(
            Arc::clone(&dir),
            Arc::new(CountingMerger),
            serial_options(Box::new(TieredMergePolicy::default())),
        )
        .unwrap();
        let a = flush(&manager, 10, 1000);
        flush(&manager, 10, 1000);
        manager.commit().unwrap();

        manager.force_merge(1, true).unwrap();
        let descriptor = format!("{a}.si");
        assert!(dir.list_all().unwrap().contains(&descriptor));

        assert_eq!(manager.commit().unwrap(), "segments_2");
        let files = dir.list_all().unwrap();
        assert!(!files.contains(&descriptor));
        assert!(!files.contains(&"segments_1".to_string()));
        manager.close().unwrap();
    }

    #[test]
    fn deletes_are_recorded_and_reclaimed() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let manager =
            SegmentManager::open_with_options(dir, Arc::new(CountingMerger), serial_options(Box::new(TieredMergePolicy::default())))
                .unwrap();
        let a = flush(&manager, 100, 10_000);
        flush(&manager, 100, 10_000);
        manager.apply_deletes(&a, 60).unwrap();
        assert_eq!(manager.segment_infos().find(&a).unwrap().del_count(), 60);
        assert!(manager.apply_deletes(&a, 10).is_err());
        manager.check_integrity().unwrap();

        manager.force_merge_deletes(true).unwrap();
        let infos = manager.segment_infos();
        assert!(infos.find(&a).is_none());
        assert_eq!(infos.iter().map(SegmentCommitInfo::del_count).sum::<i32>(), 0);
        assert_eq!(infos.total_max_doc(), 140);
        manager.close().unwrap();
    }

    #[test]
    fn fully_deleted_merge_output_is_dropped() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let manager =
            SegmentManager::open_with_options(dir, Arc::new(CountingMerger), serial_options(Box::new(TieredMergePolicy::default())))
                .unwrap();
        let a = flush(&manager, 10, 1000);
        let b = flush(&manager, 10, 1000);
        manager.apply_deletes(&a, 10).unwrap();
        manager.apply_deletes(&b, 10).unwrap();
        manager.force_merge(1, true).unwrap();
        assert!(manager.segment_infos().is_empty());
        manager.close().unwrap();
    }

    #[test]
    fn rollback_discards_uncommitted_segments() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let manager = SegmentManager::open_with_options(
            Arc::clone(&dir),
            Arc::new(CountingMerger),
            serial_options(Box::new(NoMergePolicy)),
        )
        .unwrap();
        let kept = flush(&manager, 10, 1000);
        manager.commit().unwrap();
        let lost = flush(&manager, 10, 1000);
        manager.rollback().unwrap();

        let files = dir.list_all().unwrap();
        assert!(files.contains(&format!("{kept}.si")));
        assert!(!files.iter().any(|f| parse_segment_name(f) == lost));
        assert!(matches!(manager.commit(), Err(CoreError::AlreadyClosed { .. })));
    }

    #[test]
    fn user_data_is_committed() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let manager = SegmentManager::open_with_options(
            Arc::clone(&dir),
            Arc::new(CountingMerger),
            serial_options(Box::new(NoMergePolicy)),
        )
        .unwrap();
        let data: BTreeMap<String, String> = [("checkpoint".to_string(), "42".to_string())].into_iter().collect();
        manager.set_user_data(data.clone()).unwrap();
        manager.close().unwrap();

        let infos = SegmentInfos::read_latest_commit(dir.as_ref(), &CodecRegistry::new()).unwrap();
        assert_eq!(infos.user_data(), &data);
    }

    #[test]
    fn duplicate_segment_is_rejected() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let manager =
            SegmentManager::open_with_options(dir, Arc::new(CountingMerger), serial_options(Box::new(NoMergePolicy)))
                .unwrap();
        let name = flush(&manager, 10, 1000);
        let info = SegmentInfo::new(name.as_str(), 10, "Segmerge10", random_id()).unwrap();
        assert!(matches!(
            manager.add_segment(info),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(manager.force_merge(0, true).is_err());
        manager.close().unwrap();
    }

    /// Records the input segments of each merge, in the order merged.
    #[derive(Debug, Default)]
    struct RecordingMerger {
        order: Mutex<Vec<Vec<String>>>,
    }

    impl SegmentMerger for RecordingMerger {
        fn merge(&self, request: &MergeRequest<'_>) -> CoreResult<SegmentInfo> {
            let inputs = request.merge.segments().iter().map(|s| s.name().to_string()).collect();
            self.order.lock().push(inputs);
            CountingMerger.merge(request)
        }
    }

    /// On an explicit request, merges the first two segments and then the
    /// last two, in that order.
    #[derive(Debug, Clone, Copy)]
    struct PairsPolicy;

    impl MergePolicy for PairsPolicy {
        fn find_merges(
            &self,
            trigger: MergeTrigger,
            infos: &SegmentInfos,
            ctx: &dyn MergeContext,
        ) -> CoreResult<Option<MergeSpecification>> {
            if trigger != MergeTrigger::Explicit || infos.len() != 4 || !ctx.merging_segments().is_empty() {
                return Ok(None);
            }
            let segments: Vec<SegmentCommitInfo> = infos.iter().cloned().collect();
            let mut spec = MergeSpecification::new();
            spec.add(OneMerge::new(segments[..2].to_vec()));
            spec.add(OneMerge::new(segments[2..].to_vec()));
            Ok(Some(spec))
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

    #[test]
    fn largest_pending_merge_starts_first() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let merger = Arc::new(RecordingMerger::default());
        let manager =
            SegmentManager::open_with_options(dir, merger.clone(), serial_options(Box::new(PairsPolicy))).unwrap();
        let small = [flush(&manager, 10, 1024), flush(&manager, 10, 1024)];
        let big = [flush(&manager, 10, 500 << 20), flush(&manager, 10, 500 << 20)];

        manager.maybe_merge(MergeTrigger::Explicit).unwrap();
        manager.wait_for_merges().unwrap();

        let order = merger.order.lock().clone();
        assert_eq!(order, vec![big.to_vec(), small.to_vec()]);
        assert_eq!(manager.segment_infos().len(), 2);
        manager.close().unwrap();
    }

    type CreateHook = Arc<dyn Fn(&str) + Send + Sync>;

    /// A RAM directory that runs a hook before creating a file. When
    /// `overwrite` is set, creating an existing file replaces it.
    struct HookedDirectory {
        inner: RamDirectory,
        overwrite: bool,
        create_lock: Mutex<()>,
        hook: Mutex<Option<CreateHook>>,
    }

    impl HookedDirectory {
        fn new(overwrite: bool) -> Self {
            Self {
                inner: RamDirectory::new(),
                overwrite,
                create_lock: Mutex::new(()),
                hook: Mutex::new(None),
            }
        }

        fn set_hook(&self, hook: CreateHook) {
            *self.hook.lock() = Some(hook);
        }
    }

    impl fmt::Debug for HookedDirectory {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("HookedDirectory").field("inner", &self.inner).finish()
        }
    }

    impl Directory for HookedDirectory {
        fn list_all(&self) -> StorageResult<Vec<String>> {
            self.inner.list_all()
        }

        fn file_length(&self, name: &str) -> StorageResult<u64> {
            self.inner.file_length(name)
        }

        fn create_output(&self, name: &str) -> StorageResult<Box<dyn IndexOutput>> {
            let hook = self.hook.lock().clone();
            if let Some(hook) = hook {
                hook(name);
            }
            let _creating = self.create_lock.lock();
            if self.overwrite {
                self.inner.delete_files_ignoring_errors(&[name]);
            }
            self.inner.create_output(name)
        }

        fn open_input(&self, name: &str) -> StorageResult<Box<dyn IndexInput>> {
            self.inner.open_input(name)
        }

        fn delete_file(&self, name: &str) -> StorageResult<()> {
            self.inner.delete_file(name)
        }

        fn rename(&self, source: &str, dest: &str) -> StorageResult<()> {
            self.inner.rename(source, dest)
        }

        fn sync(&self, names: &[&str]) -> StorageResult<()> {
            self.inner.sync(names)
        }

        fn sync_meta_data(&self) -> StorageResult<()> {
            self.inner.sync_meta_data()
        }

        fn obtain_lock(&self, name: &str) -> StorageResult<Box<dyn DirectoryLock>> {
            self.inner.obtain_lock(name)
        }
    }

    #[test]
    fn racing_adds_of_one_name_admit_a_single_segment() {
        let dir = Arc::new(HookedDirectory::new(true));
        let barrier = Arc::new(Barrier::new(2));
        let descriptors = Arc::new(AtomicUsize::new(0));
        {
            let barrier = Arc::clone(&barrier);
            let descriptors = Arc::clone(&descriptors);
            dir.set_hook(Arc::new(move |name: &str| {
                // both adders pass the duplicate check before either writes
                if name.ends_with(".si") && descriptors.fetch_add(1, Ordering::SeqCst) < 2 {
                    barrier.wait();
                }
            }));
        }
        let shared: Arc<dyn Directory> = dir.clone();
        let manager = Arc::new(
            SegmentManager::open_with_options(shared, Arc::new(CountingMerger), serial_options(Box::new(NoMergePolicy)))
                .unwrap(),
        );
        let name = manager.new_segment_name();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let name = name.clone();
                thread::spawn(move || {
                    let info = SegmentInfo::new(name.as_str(), 10, "Segmerge10", random_id()).unwrap();
                    manager.add_segment(info)
                })
            })
            .collect();
        let results: Vec<CoreResult<()>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "{results:?}");
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(CoreError::InvalidArgument { .. }))));
        assert_eq!(manager.segment_infos().len(), 1);
        manager.close().unwrap();
    }

    #[test]
    fn live_docs_file_is_written_outside_the_state_lock() {
        let dir = Arc::new(HookedDirectory::new(false));
        let shared: Arc<dyn Directory> = dir.clone();
        let manager =
            SegmentManager::open_with_options(shared, Arc::new(CountingMerger), serial_options(Box::new(NoMergePolicy)))
                .unwrap();
        let name = flush(&manager, 10, 1000);

        let inner: Weak<Inner> = Arc::downgrade(&manager.inner);
        let saw_liv = Arc::new(AtomicBool::new(false));
        let state_free = Arc::new(AtomicBool::new(false));
        {
            let saw_liv = Arc::clone(&saw_liv);
            let state_free = Arc::clone(&state_free);
            dir.set_hook(Arc::new(move |file: &str| {
                if file.ends_with(".liv") {
                    saw_liv.store(true, Ordering::SeqCst);
                    let free = inner.upgrade().is_some_and(|inner| inner.state.try_lock().is_some());
                    state_free.store(free, Ordering::SeqCst);
                }
            }));
        }

        manager.apply_deletes(&name, 4).unwrap();
        assert!(saw_liv.load(Ordering::SeqCst));
        assert!(state_free.load(Ordering::SeqCst));
        assert_eq!(manager.segment_infos().find(&name).unwrap().del_count(), 4);
        manager.check_integrity().unwrap();
        manager.close().unwrap();
    }
}
