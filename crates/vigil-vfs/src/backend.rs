//! Storage backend capability trait.
//!
//! The cache layer talks to storage exclusively through [`Backend`]. Every
//! call is asynchronous and treated as a suspension point; implementations
//! are free to be remote, throttled, or effectively synchronous.

use async_trait::async_trait;

use vigil_core::{FileStats, VfsError, VfsResult};

/// One child reported by [`Backend::read_dir`].
///
/// Stat results are batched with the listing so the layer can prime child
/// caches in a single round-trip. A failed per-child stat is data, not a
/// listing failure.
#[derive(Debug, Clone)]
pub struct ListedEntry {
    /// Child name without any path separator.
    pub name: String,
    /// Stat record, or the per-child failure.
    pub stats: VfsResult<FileStats>,
}

/// Asynchronous storage capabilities behind the cache layer.
///
/// Paths follow the canonical form used throughout the layer: absolute,
/// `/`-separated, directories carrying a trailing `/`. Implementations map
/// their native failures onto [`VfsError`] at this boundary.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns whether `path` currently exists.
    async fn exists(&self, path: &str) -> VfsResult<bool>;

    /// Stats a single path.
    async fn stat(&self, path: &str) -> VfsResult<FileStats>;

    /// Lists a directory with batched per-child stats.
    async fn read_dir(&self, path: &str) -> VfsResult<Vec<ListedEntry>>;

    /// Creates a directory and returns its fresh stats.
    async fn mkdir(&self, path: &str) -> VfsResult<FileStats>;

    /// Moves an entry. Directory paths keep their trailing slash on both
    /// sides.
    async fn rename(&self, old_path: &str, new_path: &str) -> VfsResult<()>;

    /// Removes an entry. For directories this removes the whole subtree.
    async fn unlink(&self, path: &str) -> VfsResult<()>;

    /// Whether [`Backend::move_to_trash`] is implemented.
    fn supports_trash(&self) -> bool {
        false
    }

    /// Moves an entry to the platform trash.
    async fn move_to_trash(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::InvalidParams(format!(
            "move to trash is not supported: {path}"
        )))
    }

    /// Starts delivering external change notifications for `path`.
    async fn watch_path(&self, path: &str) -> VfsResult<()> {
        let _ = path;
        Ok(())
    }

    /// Stops delivering external change notifications for `path`.
    async fn unwatch_path(&self, path: &str) -> VfsResult<()> {
        let _ = path;
        Ok(())
    }
}
