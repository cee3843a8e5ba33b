//! Per-commit view of a segment.

use crate::error::{CoreError, CoreResult};
use crate::segment::info::SegmentInfo;
use crate::segment::names::{self, LIVE_DOCS_EXTENSION};
use crate::types::{to_radix36, Id};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// A [`SegmentInfo`] plus the per-commit overlay: deletions, soft deletions
/// and field/doc-values update generations.
///
/// `SegmentCommitInfo` is owned by a [`SegmentInfos`](crate::ledger::SegmentInfos)
/// ledger. Cloning copies the overlay and shares the immutable descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCommitInfo {
    info: Arc<SegmentInfo>,
    del_count: i32,
    soft_del_count: i32,
    /// -1 means no deletions have been written.
    del_gen: i64,
    next_write_del_gen: i64,
    field_infos_gen: i64,
    next_write_field_infos_gen: i64,
    doc_values_gen: i64,
    next_write_doc_values_gen: i64,
    field_infos_files: BTreeSet<String>,
    doc_values_updates_files: BTreeMap<i32, BTreeSet<String>>,
    id: Option<Id>,
}

impl SegmentCommitInfo {
    /// Wraps a freshly written segment: no deletions, no updates.
    #[must_use]
    pub fn new(info: Arc<SegmentInfo>) -> Self {
        Self {
            info,
            del_count: 0,
            soft_del_count: 0,
            del_gen: -1,
            next_write_del_gen: 1,
            field_infos_gen: -1,
            next_write_field_infos_gen: 1,
            doc_values_gen: -1,
            next_write_doc_values_gen: 1,
            field_infos_files: BTreeSet::new(),
            doc_values_updates_files: BTreeMap::new(),
            id: Some(crate::types::random_id()),
        }
    }

    /// Rebuilds a commit info from its serialized fields.
    ///
    /// # Errors
    ///
    /// Returns `CorruptIndex` if the delete counts are inconsistent with
    /// the segment's document count.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        info: Arc<SegmentInfo>,
        del_count: i32,
        soft_del_count: i32,
        del_gen: i64,
        field_infos_gen: i64,
        doc_values_gen: i64,
        id: Option<Id>,
        resource: &str,
    ) -> CoreResult<Self> {
        let max_doc = info.max_doc();
        if del_count < 0 || del_count > max_doc {
            return Err(CoreError::corrupt(
                resource,
                format!("invalid deletion count: {del_count} vs maxDoc={max_doc}"),
            ));
        }
        if soft_del_count < 0 || soft_del_count > max_doc {
            return Err(CoreError::corrupt(
                resource,
                format!("invalid soft-deletion count: {soft_del_count} vs maxDoc={max_doc}"),
            ));
        }
        if i64::from(del_count) + i64::from(soft_del_count) > i64::from(max_doc) {
            return Err(CoreError::corrupt(
                resource,
                format!("invalid deletion count: {} vs maxDoc={max_doc}", del_count + soft_del_count),
            ));
        }
        let next = |gen: i64| if gen == -1 { 1 } else { gen + 1 };
        Ok(Self {
            info,
            del_count,
            soft_del_count,
            del_gen,
            next_write_del_gen: next(del_gen),
            field_infos_gen,
            next_write_field_infos_gen: next(field_infos_gen),
            doc_values_gen,
            next_write_doc_values_gen: next(doc_values_gen),
            field_infos_files: BTreeSet::new(),
            doc_values_updates_files: BTreeMap::new(),
            id,
        })
    }

    /// Returns the immutable segment descriptor.
    #[must_use]
    pub fn info(&self) -> &Arc<SegmentInfo> {
        &self.info
    }

    /// Returns the segment name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.info.name()
    }

    /// Returns the number of hard-deleted documents.
    #[must_use]
    pub fn del_count(&self) -> i32 {
        self.del_count
    }

    /// Returns the number of soft-deleted documents.
    #[must_use]
    pub fn soft_del_count(&self) -> i32 {
        self.soft_del_count
    }

    /// Returns the number of live documents.
    #[must_use]
    pub fn live_docs(&self) -> i32 {
        self.info.max_doc() - self.del_count
    }

    /// Returns the generation of the current live-docs file, or -1.
    #[must_use]
    pub fn del_gen(&self) -> i64 {
        self.del_gen
    }

    /// Returns the field-infos generation, or -1.
    #[must_use]
    pub fn field_infos_gen(&self) -> i64 {
        self.field_infos_gen
    }

    /// Returns the doc-values generation, or -1.
    #[must_use]
    pub fn doc_values_gen(&self) -> i64 {
        self.doc_values_gen
    }

    /// Returns the files holding updated field infos.
    #[must_use]
    pub fn field_infos_files(&self) -> &BTreeSet<String> {
        &self.field_infos_files
    }

    /// Returns the per-field doc-values update files.
    #[must_use]
    pub fn doc_values_updates_files(&self) -> &BTreeMap<i32, BTreeSet<String>> {
        &self.doc_values_updates_files
    }

    /// Returns the id of this commit view, if any.
    #[must_use]
    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    /// Returns `true` if the segment has hard deletions.
    #[must_use]
    pub fn has_deletions(&self) -> bool {
        self.del_gen != -1
    }

    /// Returns `true` if field infos were updated after the segment was written.
    #[must_use]
    pub fn has_field_updates(&self) -> bool {
        self.field_infos_gen != -1
    }

    /// Returns the segment size in bytes.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.info.size_in_bytes()
    }

    /// Returns the percentage of hard-deleted documents.
    #[must_use]
    pub fn deletes_pct(&self) -> f64 {
        if self.info.max_doc() <= 0 {
            0.0
        } else {
            100.0 * f64::from(self.del_count) / f64::from(self.info.max_doc())
        }
    }

    /// Records a new hard-delete count and moves to the next live-docs
    /// generation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the count decreases or exceeds the live
    /// documents left after soft deletions.
    pub fn advance_deletes(&mut self, del_count: i32) -> CoreResult<()> {
        if del_count < self.del_count {
            return Err(CoreError::invalid_argument(format!(
                "delete count of {} cannot decrease ({} -> {del_count})",
                self.name(),
                self.del_count
            )));
        }
        if i64::from(del_count) + i64::from(self.soft_del_count) > i64::from(self.info.max_doc()) {
            return Err(CoreError::invalid_argument(format!(
                "delete count {del_count} exceeds maxDoc={} of {}",
                self.info.max_doc(),
                self.name()
            )));
        }
        self.del_count = del_count;
        self.del_gen = self.next_write_del_gen;
        self.next_write_del_gen += 1;
        self.id = Some(crate::types::random_id());
        Ok(())
    }

    /// Sets the soft-delete count.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the total deletes would exceed `max_doc`.
    pub fn set_soft_del_count(&mut self, soft_del_count: i32) -> CoreResult<()> {
        if soft_del_count < 0
            || i64::from(self.del_count) + i64::from(soft_del_count) > i64::from(self.info.max_doc())
        {
            return Err(CoreError::invalid_argument(format!(
                "invalid soft delete count {soft_del_count} for {}",
                self.name()
            )));
        }
        self.soft_del_count = soft_del_count;
        Ok(())
    }

    /// Records a field-infos update written to `files`.
    pub fn advance_field_infos(&mut self, files: BTreeSet<String>) {
        self.field_infos_gen = self.next_write_field_infos_gen;
        self.next_write_field_infos_gen += 1;
        self.field_infos_files = files;
    }

    /// Records a doc-values update generation.
    pub fn advance_doc_values(&mut self, updates: BTreeMap<i32, BTreeSet<String>>) {
        self.doc_values_gen = self.next_write_doc_values_gen;
        self.next_write_doc_values_gen += 1;
        self.doc_values_updates_files = updates;
    }

    pub(crate) fn set_field_infos_files(&mut self, files: BTreeSet<String>) {
        self.field_infos_files = files;
    }

    pub(crate) fn set_doc_values_updates_files(&mut self, files: BTreeMap<i32, BTreeSet<String>>) {
        self.doc_values_updates_files = files;
    }

    /// Returns the name of the current live-docs file, if deletions exist.
    #[must_use]
    pub fn live_docs_file_name(&self) -> Option<String> {
        u64::try_from(self.del_gen)
            .ok()
            .filter(|_| self.has_deletions())
            .map(|gen| names::file_name_from_generation(self.name(), LIVE_DOCS_EXTENSION, gen))
    }

    /// Returns every file referenced by this commit view of the segment,
    /// including its descriptor.
    #[must_use]
    pub fn files(&self) -> BTreeSet<String> {
        let mut files: BTreeSet<String> = self.info.files().clone();
        files.insert(self.info.descriptor_file_name());
        if let Some(liv) = self.live_docs_file_name() {
            files.insert(liv);
        }
        files.extend(self.field_infos_files.iter().cloned());
        for update_files in self.doc_values_updates_files.values() {
            files.extend(update_files.iter().cloned());
        }
        files
    }
}

impl fmt::Display for SegmentCommitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.info)?;
        if self.del_count != 0 {
            write!(f, "/{}", self.del_count)?;
        }
        if self.soft_del_count != 0 {
            write!(f, ":soft{}", self.soft_del_count)?;
        }
        if self.has_deletions() {
            write!(f, ":delGen={}", to_radix36(self.del_gen.unsigned_abs()))?;
        }
        Ok(())
    }
}
