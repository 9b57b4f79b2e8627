//! Core types for the Vigil virtual file system.
//!
//! Shared vocabulary between the entry cache and its storage backends:
//! stable error codes, stat records, and canonical path handling. No I/O
//! lives here.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Stable error codes shared across backends.
pub mod error;
/// Canonical path handling and derived path fields.
pub mod path;
/// Stat records and entry kinds.
pub mod stats;

pub use error::{VfsError, VfsResult};
pub use path::EntryPaths;
pub use stats::{EntryKind, FileStats};
