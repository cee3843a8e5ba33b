//! Test fixtures and index helpers.
//!
//! Provides temporary directories, a [`SegmentMerger`] that writes real
//! (if meaningless) segment files, and helpers to build ledgers.

use crate::generators::SegmentShape;
use crossbeam_channel::bounded;
use segmerge_core::codec::{Segmerge10SegmentInfoFormat, SegmentInfoFormat};
use segmerge_core::types::random_id;
use segmerge_core::{
    CoreError, CoreResult, MergeRequest, SegmentCommitInfo, SegmentInfo, SegmentInfos, SegmentManager, SegmentMerger,
    Segmerge10Codec, Version,
};
use segmerge_storage::{DataOutput, Directory, FsDirectory, RamDirectory};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const WRITE_CHUNK: usize = 64 * 1024;

/// A directory for one test, removed when dropped.
pub struct TestIndex {
    dir: Arc<dyn Directory>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestIndex {
    /// Creates an in-memory index directory.
    pub fn memory() -> Self {
        Self {
            dir: Arc::new(RamDirectory::new()),
            temp_dir: None,
        }
    }

    /// Creates a filesystem index directory under a fresh temp dir.
    pub fn fs() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = FsDirectory::open_with_create_dirs(&temp_dir.path().join("index"))
            .expect("Failed to open index directory");
        Self {
            dir: Arc::new(dir),
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the directory.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.dir
    }

    /// Returns the temp dir path if filesystem-backed.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }
}

/// Installs a `tracing` subscriber that writes through the test harness.
/// Filtered by `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A [`SegmentMerger`] for tests.
///
/// Each merged segment gets a `.dat` file with the live document count
/// followed by `bytes_per_doc` filler bytes per live document, and a `.idx`
/// file written as an intra-merge task. Writes go through the throttled
/// merge directory, so aborts and rate limits apply.
#[derive(Debug, Default)]
pub struct FakeSegmentMerger {
    bytes_per_doc: usize,
    delay: Duration,
    fail: AtomicBool,
    merges: AtomicUsize,
}

impl FakeSegmentMerger {
    /// Creates a merger that writes no filler and does not delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filler bytes written per live document.
    pub fn with_bytes_per_doc(mut self, bytes: usize) -> Self {
        self.bytes_per_doc = bytes;
        self
    }

    /// Makes every merge take at least `delay`. The delay ends early if
    /// the merge is aborted.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets whether merges fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of merges that produced a segment.
    pub fn merges(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }

    fn wait(&self, request: &MergeRequest<'_>) -> CoreResult<()> {
        let deadline = Instant::now() + self.delay;
        loop {
            request.merge.progress().check_aborted()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }
}

impl SegmentMerger for FakeSegmentMerger {
    fn merge(&self, request: &MergeRequest<'_>) -> CoreResult<SegmentInfo> {
        self.wait(request)?;
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::invalid_operation(format!(
                "injected failure merging {}",
                request.merge.seg_string()
            )));
        }

        let name = request.segment_name;
        let live: i32 = request.merge.segments().iter().map(SegmentCommitInfo::live_docs).sum();
        let dat = format!("{name}.dat");
        let filler = usize::try_from(live).unwrap_or(0) * self.bytes_per_doc;
        write_data_file(request.directory.as_ref(), &dat, live, filler)?;

        let idx = format!("{name}.idx");
        let (done_tx, done_rx) = bounded(1);
        let directory = Arc::clone(request.directory);
        let idx_name = idx.clone();
        request.scheduler.execute_intra_merge(Box::new(move || {
            let written = write_data_file(directory.as_ref(), &idx_name, live, 0);
            done_tx
                .send(written)
                .map_err(|_| CoreError::invalid_operation("merge stopped waiting for its index file"))
        }))?;
        done_rx
            .recv()
            .map_err(|_| CoreError::invalid_operation("index file task ended without a result"))??;

        let size = request.directory.file_length(&dat)? + request.directory.file_length(&idx)?;
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("source".to_string(), "merge".to_string());
        diagnostics.insert("mergeFactor".to_string(), request.merge.segments().len().to_string());
        let info = SegmentInfo::new(name, live, Segmerge10Codec::NAME, random_id())?
            .with_size_in_bytes(size)
            .with_diagnostics(diagnostics)
            .with_files(BTreeSet::from([dat, idx]))?;
        self.merges.fetch_add(1, Ordering::SeqCst);
        Ok(info)
    }
}

fn write_data_file(dir: &dyn Directory, name: &str, docs: i32, filler: usize) -> CoreResult<()> {
    let mut out = dir.create_output(name)?;
    out.write_vint(u32::try_from(docs).unwrap_or(0))?;
    let chunk = vec![0x5a_u8; WRITE_CHUNK.min(filler.max(1))];
    let mut left = filler;
    while left > 0 {
        let n = left.min(chunk.len());
        out.write_bytes(&chunk[..n])?;
        left -= n;
    }
    out.close()?;
    Ok(())
}

/// Writes a flushed segment of `docs` documents and adds it to `manager`.
/// Returns the segment name.
///
/// # Errors
///
/// Returns the error writing the segment or adding it.
pub fn flush_segment(manager: &SegmentManager, docs: i32, bytes_per_doc: usize) -> CoreResult<String> {
    let name = manager.new_segment_name();
    let dat = format!("{name}.dat");
    let filler = usize::try_from(docs).unwrap_or(0) * bytes_per_doc;
    write_data_file(manager.directory().as_ref(), &dat, docs, filler)?;
    let size = manager.directory().file_length(&dat)?;
    let mut diagnostics = BTreeMap::new();
    diagnostics.insert("source".to_string(), "flush".to_string());
    let info = SegmentInfo::new(name.as_str(), docs, Segmerge10Codec::NAME, random_id())?
        .with_size_in_bytes(size)
        .with_diagnostics(diagnostics)
        .with_files(BTreeSet::from([dat]))?;
    manager.add_segment(info)?;
    Ok(name)
}

/// Builds a ledger with one segment per shape, writing each segment's
/// descriptor to `dir`. Update files are recorded but not written.
///
/// # Errors
///
/// Returns the error writing a descriptor, or `InvalidArgument` for a
/// shape whose deletions exceed its documents.
pub fn build_ledger(dir: &dyn Directory, shapes: &[SegmentShape]) -> CoreResult<SegmentInfos> {
    let mut infos = SegmentInfos::new(Version::LATEST.major);
    for shape in shapes {
        let name = infos.new_segment_name();
        let info = SegmentInfo::new(name.as_str(), shape.max_doc, Segmerge10Codec::NAME, random_id())?
            .with_size_in_bytes(shape.size_in_bytes);
        Segmerge10SegmentInfoFormat.write(dir, &info)?;

        let mut sci = SegmentCommitInfo::new(Arc::new(info));
        if shape.del_count > 0 {
            sci.advance_deletes(shape.del_count)?;
        }
        sci.set_soft_del_count(shape.soft_del_count)?;
        if shape.field_infos_update {
            sci.advance_field_infos(BTreeSet::from([format!("{name}_1.fnm")]));
        }
        if !shape.doc_values_fields.is_empty() {
            let updates = shape
                .doc_values_fields
                .iter()
                .map(|field| (*field, BTreeSet::from([format!("{name}_1_{field}.dvd")])))
                .collect();
            sci.advance_doc_values(updates);
        }
        infos.add(sci);
    }
    Ok(infos)
}

/// Returns `count` segment shapes of varied size, with deletions, soft
/// deletions and update generations sprinkled in.
pub fn varied_shapes(count: usize) -> Vec<SegmentShape> {
    (0..count)
        .map(|i| {
            let n = i32::try_from(i).unwrap_or(i32::MAX);
            let max_doc = 10 + n * 37;
            let mut shape = SegmentShape::plain(max_doc, u64::from(max_doc.unsigned_abs()) * 512);
            if i % 3 == 1 {
                shape = shape.with_deletes(max_doc / 4, 0);
            }
            if i % 4 == 2 {
                let del_count = shape.del_count;
                shape = shape.with_deletes(del_count, max_doc / 5);
            }
            shape.field_infos_update = i % 5 == 3;
            if i % 2 == 0 {
                shape.doc_values_fields = BTreeSet::from([1, n % 7 + 2]);
            }
            shape
        })
        .collect()
}
