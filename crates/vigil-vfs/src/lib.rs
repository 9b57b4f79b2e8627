//! Vigil VFS - a cache and coherence layer over pluggable storage.
//!
//! Applications resolve [`Entry`] handles through a [`FileSystem`] and use
//! them for stat, listing, traversal, and mutation. Entries cache backend
//! results only while they sit under an active watched root, so a cache hit
//! is always backed by change notifications. Mutations run a fixed
//! coherence protocol: a change window is opened, the backend operation
//! runs, internal bookkeeping is repaired, the caller sees the result, an
//! event is broadcast, and the window closes. External watcher
//! notifications queue behind open windows and are applied afterwards, so
//! self-inflicted changes are never misread as external ones.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Storage backend capability trait.
pub mod backend;
/// Directory listing and directory-only operations.
pub mod directory;
/// Cached entry handles and the mutation protocol.
pub mod entry;
/// Change and rename events.
pub mod events;
/// The coordinator owning records, roots, and the change gate.
pub mod filesystem;
/// Bounded recursive traversal.
pub mod visit;
/// Watched roots and their inclusion filters.
pub mod watched_root;

pub use backend::{Backend, ListedEntry};
pub use directory::DirContents;
pub use entry::Entry;
pub use events::{detach, EventBus, EventReceiver, FsEvent, DEFAULT_CHANNEL_CAPACITY};
pub use filesystem::{ChangeGuard, FileSystem};
pub use visit::{VisitOptions, DEFAULT_MAX_DEPTH, DEFAULT_MAX_ENTRIES};
pub use watched_root::{IgnoreRules, RootFilter, WatchState, WatchedRoot};

pub use vigil_core::{EntryKind, FileStats, VfsError, VfsResult};
