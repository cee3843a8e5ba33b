//! Segment descriptors.
//!
//! - [`SegmentInfo`]: the immutable descriptor written once per segment
//! - [`SegmentCommitInfo`]: a segment as seen by one commit (deletes, updates)
//! - [`names`]: index file naming conventions

mod commit_info;
mod info;
pub mod names;

pub use commit_info::SegmentCommitInfo;
pub use info::SegmentInfo;
