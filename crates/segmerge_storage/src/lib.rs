//! # segmerge storage
//!
//! Directory abstraction and low-level file primitives for segmerge.
//!
//! Everything above this crate (the commit ledger, merge policy and merge
//! scheduler) talks to storage exclusively through the [`Directory`] trait.
//! Directories are **flat namespaces of write-once files**: a file is created,
//! written sequentially, closed, and from then on only read, renamed or
//! deleted.
//!
//! ## Design Principles
//!
//! - Files are write-once; [`Directory::create_output`] fails if the name exists
//! - Directory listings may be weakly consistent under concurrent writers
//! - Durability is explicit: [`Directory::sync`] for file contents and
//!   [`Directory::sync_meta_data`] for renames/creations
//! - Must be `Send + Sync` for concurrent access from merge threads
//!
//! ## Available Directories
//!
//! - [`RamDirectory`] - For testing and ephemeral indexes
//! - [`FsDirectory`] - For persistent storage using OS file APIs
//! - [`RateLimitedDirectory`] - Wrapper that throttles writes through a [`RateLimiter`]
//!
//! ## Example
//!
//! ```rust
//! use segmerge_storage::{DataInput, DataOutput, Directory, RamDirectory};
//!
//! let dir = RamDirectory::new();
//! let mut out = dir.create_output("hello.bin").unwrap();
//! out.write_string("hello world").unwrap();
//! out.close().unwrap();
//!
//! let mut input = dir.open_input("hello.bin").unwrap();
//! assert_eq!(input.read_string().unwrap(), "hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
mod data;
mod directory;
mod error;
mod fs;
mod memory;
mod rate_limit;

pub use checksum::ChecksumIndexInput;
pub use data::{DataInput, DataOutput};
pub use directory::{Directory, DirectoryLock, IndexInput, IndexOutput};
pub use error::{StorageError, StorageResult};
pub use fs::FsDirectory;
pub use memory::RamDirectory;
pub use rate_limit::{RateLimitedDirectory, RateLimitedOutput, RateLimiter};
