//! Codecs: the per-segment file formats.
//!
//! segmerge does not encode postings or any other segment data itself; that
//! is the job of the codec layer. The commit ledger only needs a codec to
//! resolve each segment's descriptor (`.si` file), so a [`Codec`] here
//! exposes just its [`SegmentInfoFormat`].
//!
//! Codecs are looked up by name through an explicit [`CodecRegistry`]
//! value; there is no process-wide registry.

mod live_docs;
mod segment_info;
pub mod util;

pub(crate) use live_docs::{read_live_docs_count, write_live_docs};
pub use segment_info::Segmerge10SegmentInfoFormat;
pub(crate) use segment_info::{read_version, write_version};

use crate::error::{CoreError, CoreResult};
use crate::segment::SegmentInfo;
use crate::types::Id;
use segmerge_storage::Directory;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Reads and writes segment descriptors.
pub trait SegmentInfoFormat: Send + Sync + Debug {
    /// Reads the descriptor of `segment`, verifying it carries `segment_id`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptIndex` if the file is damaged or belongs to another
    /// segment, and storage errors if it cannot be read.
    fn read(&self, dir: &dyn Directory, segment: &str, segment_id: &Id, codec: &str) -> CoreResult<SegmentInfo>;

    /// Writes the descriptor of `info` as `<name>.si`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file already exists or cannot be written.
    fn write(&self, dir: &dyn Directory, info: &SegmentInfo) -> CoreResult<()>;
}

/// A named set of segment file formats.
pub trait Codec: Send + Sync + Debug {
    /// Returns the codec name recorded in commit points.
    fn name(&self) -> &str;

    /// Returns the segment descriptor format.
    fn segment_info_format(&self) -> &dyn SegmentInfoFormat;
}

/// The built-in codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct Segmerge10Codec {
    si_format: Segmerge10SegmentInfoFormat,
}

impl Segmerge10Codec {
    /// Name of the built-in codec.
    pub const NAME: &'static str = "Segmerge10";
}

impl Codec for Segmerge10Codec {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn segment_info_format(&self) -> &dyn SegmentInfoFormat {
        &self.si_format
    }
}

/// Codecs available for reading, keyed by name.
///
/// The default registry contains [`Segmerge10Codec`].
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    codecs: BTreeMap<String, Arc<dyn Codec>>,
    default_codec: String,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self {
            codecs: BTreeMap::new(),
            default_codec: Segmerge10Codec::NAME.to_string(),
        };
        registry.register(Arc::new(Segmerge10Codec::default()));
        registry
    }
}

impl CodecRegistry {
    /// Creates a registry containing the built-in codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a codec, replacing any codec with the same name.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.name().to_string(), codec);
    }

    /// Sets the codec used for newly written segments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if no codec with that name is registered.
    pub fn set_default(&mut self, name: &str) -> CoreResult<()> {
        if !self.codecs.contains_key(name) {
            return Err(CoreError::invalid_argument(format!("unknown codec: {name}")));
        }
        self.default_codec = name.to_string();
        Ok(())
    }

    /// Returns a codec by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Codec>> {
        self.codecs.get(name).cloned()
    }

    /// Returns a codec by name, reporting a missing codec as corruption of
    /// `resource`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptIndex` if no codec with that name is registered.
    pub fn lookup(&self, name: &str, resource: &str) -> CoreResult<Arc<dyn Codec>> {
        self.get(name).ok_or_else(|| {
            CoreError::corrupt(
                resource,
                format!(
                    "could not load codec '{name}'; registered codecs: {:?}",
                    self.codecs.keys().collect::<Vec<_>>()
                ),
            )
        })
    }

    /// Returns the codec used for newly written segments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the default codec was never registered.
    pub fn default_codec(&self) -> CoreResult<Arc<dyn Codec>> {
        self.get(&self.default_codec).ok_or_else(|| {
            CoreError::invalid_operation(format!("default codec {} is not registered", self.default_codec))
        })
    }

    /// Returns the registered codec names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.codecs.keys().map(String::as_str).collect()
    }
}
