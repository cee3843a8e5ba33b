//! # segmerge core
//!
//! Segment lifecycle management for log-structured indexes.
//!
//! An index is a set of immutable segments plus a commit ledger naming the
//! live ones. This crate provides:
//! - The commit ledger ([`SegmentInfos`]) with atomic, crash-safe commits
//!   and discovery of the newest commit under concurrent writers
//! - Segment descriptors and their on-disk format ([`SegmentInfo`],
//!   [`SegmentCommitInfo`])
//! - Merge selection ([`TieredMergePolicy`])
//! - Merge execution with back-pressure and adaptive I/O throttling
//!   ([`ConcurrentMergeScheduler`], [`SerialMergeScheduler`])
//! - [`SegmentManager`], which ties the above into a running index
//!
//! Reading and writing segment *contents* is out of scope: flushed segments
//! are handed to the manager ready-made, and merged segments are produced by
//! a caller-supplied [`SegmentMerger`].
//!
//! ## Example
//!
//! ```rust
//! use segmerge_core::SegmentInfos;
//! use segmerge_storage::RamDirectory;
//!
//! let dir = RamDirectory::new();
//! let mut infos = SegmentInfos::new(10);
//! assert_eq!(infos.new_segment_name(), "_0");
//! assert_eq!(infos.commit(&dir).unwrap(), "segments_1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod merge;
pub mod segment;
pub mod stats;
pub mod types;

pub use codec::{Codec, CodecRegistry, Segmerge10Codec, SegmentInfoFormat};
pub use config::{MergeSchedulerConfig, TieredMergePolicyConfig};
pub use error::{CoreError, CoreResult};
pub use ledger::SegmentInfos;
pub use manager::{ManagerOptions, MergeRequest, SegmentManager, SegmentMerger};
pub use merge::{
    ConcurrentMergeScheduler, MergePolicy, MergeScheduler, MergeSpecification, MergeTrigger, OneMerge,
    SerialMergeScheduler, TieredMergePolicy,
};
pub use segment::{SegmentCommitInfo, SegmentInfo};
pub use stats::{MergeStats, MergeStatsSnapshot};
pub use types::{Id, Version};
