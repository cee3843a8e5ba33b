//! Immutable segment descriptor.

use crate::error::{CoreError, CoreResult};
use crate::segment::names::{self, SEGMENT_INFO_EXTENSION};
use crate::types::{Id, Version};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Descriptor of an immutable on-disk segment.
///
/// A `SegmentInfo` is written once (as `<name>.si`) when its segment is
/// flushed or produced by a merge and is never modified afterwards. Mutable,
/// per-commit state such as deletions lives in
/// [`SegmentCommitInfo`](crate::segment::SegmentCommitInfo).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    name: String,
    max_doc: i32,
    codec: String,
    id: Id,
    version: Version,
    min_version: Option<Version>,
    size_in_bytes: u64,
    is_compound_file: bool,
    diagnostics: BTreeMap<String, String>,
    attributes: BTreeMap<String, String>,
    files: BTreeSet<String>,
}

impl SegmentInfo {
    /// Creates a descriptor written by the current version.
    ///
    /// The minimum version defaults to [`Version::LATEST`]; merged segments
    /// should set it to the minimum of their inputs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `max_doc` is negative or the name is not
    /// of the form `_<radix36>`.
    pub fn new(name: impl Into<String>, max_doc: i32, codec: impl Into<String>, id: Id) -> CoreResult<Self> {
        let name = name.into();
        if names::segment_number(&name).is_none() {
            return Err(CoreError::invalid_argument(format!("invalid segment name: {name:?}")));
        }
        if max_doc < 0 {
            return Err(CoreError::invalid_argument(format!(
                "max_doc must be >= 0 (got {max_doc}) for segment {name}"
            )));
        }
        Ok(Self {
            name,
            max_doc,
            codec: codec.into(),
            id,
            version: Version::LATEST,
            min_version: Some(Version::LATEST),
            size_in_bytes: 0,
            is_compound_file: false,
            diagnostics: BTreeMap::new(),
            attributes: BTreeMap::new(),
            files: BTreeSet::new(),
        })
    }

    /// Sets the writer version.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Sets the minimum version of any document-producing writer.
    #[must_use]
    pub fn with_min_version(mut self, min_version: Option<Version>) -> Self {
        self.min_version = min_version;
        self
    }

    /// Sets the total size of the segment's files in bytes.
    #[must_use]
    pub fn with_size_in_bytes(mut self, size: u64) -> Self {
        self.size_in_bytes = size;
        self
    }

    /// Sets whether the segment is stored as a compound file.
    #[must_use]
    pub fn with_compound_file(mut self, value: bool) -> Self {
        self.is_compound_file = value;
        self
    }

    /// Sets the diagnostics map.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: BTreeMap<String, String>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Sets the attributes map.
    #[must_use]
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Sets the files that make up the segment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a file does not belong to this segment.
    pub fn with_files(mut self, files: BTreeSet<String>) -> CoreResult<Self> {
        for file in &files {
            if names::parse_segment_name(file) != self.name {
                return Err(CoreError::invalid_argument(format!(
                    "file {file:?} does not belong to segment {}",
                    self.name
                )));
            }
        }
        self.files = files;
        Ok(self)
    }

    /// Returns the segment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of documents in the segment, including deleted ones.
    #[must_use]
    pub fn max_doc(&self) -> i32 {
        self.max_doc
    }

    /// Returns the codec name.
    #[must_use]
    pub fn codec(&self) -> &str {
        &self.codec
    }

    /// Returns the segment identity.
    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the writer version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the minimum writer version of the segment's content.
    #[must_use]
    pub fn min_version(&self) -> Option<Version> {
        self.min_version
    }

    /// Returns the segment size in bytes.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    /// Returns whether the segment uses a compound file.
    #[must_use]
    pub fn is_compound_file(&self) -> bool {
        self.is_compound_file
    }

    /// Returns the diagnostics map.
    #[must_use]
    pub fn diagnostics(&self) -> &BTreeMap<String, String> {
        &self.diagnostics
    }

    /// Returns the attributes map.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Returns the segment's data files, excluding its descriptor.
    #[must_use]
    pub fn files(&self) -> &BTreeSet<String> {
        &self.files
    }

    /// Returns the name of the descriptor file (`<name>.si`).
    #[must_use]
    pub fn descriptor_file_name(&self) -> String {
        names::segment_file_name(&self.name, "", SEGMENT_INFO_EXTENSION)
    }
}

impl fmt::Display for SegmentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):", self.name, self.version)?;
        f.write_str(if self.is_compound_file { "c" } else { "C" })?;
        write!(f, "{}", self.max_doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_names_and_counts() {
        assert!(SegmentInfo::new("seg", 1, "Segmerge10", [0; 16]).is_err());
        assert!(SegmentInfo::new("_1", -1, "Segmerge10", [0; 16]).is_err());
        assert!(SegmentInfo::new("_1", 0, "Segmerge10", [0; 16]).is_ok());
    }

    #[test]
    fn files_must_belong_to_segment() {
        let info = SegmentInfo::new("_a", 10, "Segmerge10", [0; 16]).unwrap();
        let own: BTreeSet<String> = ["_a.dat", "_a_1.dv"].iter().map(|s| s.to_string()).collect();
        let info = info.with_files(own.clone()).unwrap();
        assert_eq!(info.files(), &own);

        let foreign: BTreeSet<String> = ["_b.dat".to_string()].into_iter().collect();
        assert!(info.with_files(foreign).is_err());
    }

    #[test]
    fn display_and_descriptor_name() {
        let info = SegmentInfo::new("_3", 42, "Segmerge10", [0; 16])
            .unwrap()
            .with_version(Version::new(10, 0, 0))
            .with_compound_file(true);
        assert_eq!(info.to_string(), "_3(10.0.0):c42");
        assert_eq!(info.descriptor_file_name(), "_3.si");
    }
}
