//! Two-phase commit of a ledger to a directory.

use super::SegmentInfos;
use crate::error::{CoreError, CoreResult};
use crate::segment::names::{pending_segments_file_name, segments_file_name};
use segmerge_storage::Directory;
use tracing::{debug, warn};

impl SegmentInfos {
    /// Writes the ledger to `pending_segments_N` and fsyncs it, where `N` is
    /// the next generation. The commit becomes visible only after
    /// [`SegmentInfos::finish_commit`].
    ///
    /// Segment files referenced by the ledger must already be synced.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a commit is already pending. On an I/O
    /// failure the pending file is removed and the generation is unchanged.
    pub fn prepare_commit(&mut self, dir: &dyn Directory) -> CoreResult<()> {
        if self.pending_generation.is_some() {
            return Err(CoreError::invalid_operation("prepare_commit was already called"));
        }
        dir.sync_meta_data()?;

        let generation = self.next_pending_generation();
        self.last_attempted_generation = generation;
        let file_name = pending_segments_file_name(generation);

        if let Err(e) = self.write_pending(dir, &file_name, generation) {
            warn!(file = %file_name, error = %e, "failed to write pending commit");
            dir.delete_files_ignoring_errors(&[file_name.as_str()]);
            return Err(e);
        }
        debug!(file = %file_name, segments = self.segments.len(), "prepared commit");
        self.pending_generation = Some(generation);
        Ok(())
    }

    fn write_pending(&self, dir: &dyn Directory, file_name: &str, generation: u64) -> CoreResult<()> {
        let mut out = dir.create_output(file_name)?;
        match self.write_to(out.as_mut(), generation) {
            Ok(()) => out.close()?,
            Err(e) => {
                // the write error is the one worth reporting
                let _ = out.close();
                return Err(e);
            }
        }
        dir.sync(&[file_name])?;
        Ok(())
    }

    /// Publishes the prepared commit by renaming it to `segments_N` and
    /// syncing the directory metadata. Returns the new commit point name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if no commit is pending. On an I/O failure
    /// the commit is rolled back and the generation is unchanged.
    pub fn finish_commit(&mut self, dir: &dyn Directory) -> CoreResult<String> {
        let Some(generation) = self.pending_generation else {
            return Err(CoreError::invalid_operation("prepare_commit was not called"));
        };
        let pending = pending_segments_file_name(generation);
        let dest = segments_file_name(generation);

        let published = dir.rename(&pending, &dest).map_err(CoreError::from).and_then(|()| {
            dir.sync_meta_data().map_err(|e| {
                dir.delete_files_ignoring_errors(&[dest.as_str()]);
                CoreError::from(e)
            })
        });
        if let Err(e) = published {
            warn!(file = %dest, error = %e, "failed to publish commit");
            self.rollback_commit(dir);
            return Err(e);
        }

        self.pending_generation = None;
        self.generation = generation;
        self.last_generation = generation;
        debug!(file = %dest, "finished commit");
        Ok(dest)
    }

    /// Discards a prepared commit. Does nothing if none is pending.
    pub fn rollback_commit(&mut self, dir: &dyn Directory) {
        if let Some(generation) = self.pending_generation.take() {
            let pending = pending_segments_file_name(generation);
            dir.delete_files_ignoring_errors(&[pending.as_str()]);
            debug!(file = %pending, "rolled back commit");
        }
    }

    /// Prepares and finishes a commit. Returns the new commit point name.
    ///
    /// # Errors
    ///
    /// See [`SegmentInfos::prepare_commit`] and [`SegmentInfos::finish_commit`].
    pub fn commit(&mut self, dir: &dyn Directory) -> CoreResult<String> {
        self.prepare_commit(dir)?;
        self.finish_commit(dir)
    }
}
