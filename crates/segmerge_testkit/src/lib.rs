//! # segmerge testkit
//!
//! Test utilities for segmerge.
//!
//! This crate provides:
//! - Temporary index directories and ledger builders
//! - A fake segment merger that writes real, throttled files
//! - Fault injection for directories
//! - Property-based test generators using proptest
//!
//! Cross-crate integration tests live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segmerge_testkit::prelude::*;
//!
//! #[test]
//! fn merges_flushed_segments() {
//!     let index = TestIndex::memory();
//!     let merger = Arc::new(FakeSegmentMerger::new());
//!     let manager = SegmentManager::open(Arc::clone(index.directory()), merger).unwrap();
//!     flush_segment(&manager, 100, 8).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use faulty::{Fault, FaultyDirectory};
pub use fixtures::*;
pub use generators::*;
