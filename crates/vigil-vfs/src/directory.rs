//! Directory listing and directory-only operations.
//!
//! Listings return child handles paired with the stats the backend batched
//! into the listing. While the directory is watched, those stats prime the
//! child caches and the listing itself is cached, so repeated reads of a
//! stable directory cost one backend round-trip in total.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, trace};

use vigil_core::{FileStats, VfsError, VfsResult};

use crate::entry::Entry;
use crate::events::FsEvent;

/// Snapshot of a directory listing.
#[derive(Debug, Clone)]
pub struct DirContents {
    /// Child entries paired with their stats, in backend order.
    pub entries: Vec<(Entry, FileStats)>,
    /// Per-child stat failures, keyed by child path.
    pub errors: HashMap<String, VfsError>,
}

impl Entry {
    fn require_directory(&self) -> VfsResult<()> {
        if self.is_directory() {
            Ok(())
        } else {
            Err(VfsError::InvalidParams(format!(
                "not a directory: {}",
                self.path()
            )))
        }
    }

    /// Lists the directory.
    ///
    /// Concurrent calls on the same directory coalesce onto one backend
    /// listing. While the directory is watched (a starting root counts),
    /// the listing is cached and each child's stat cache is primed from
    /// the batched stats.
    ///
    /// # Errors
    ///
    /// [`VfsError::InvalidParams`] on a file handle. A failed backend
    /// listing drops the caches and propagates; per-child stat failures do
    /// not fail the listing and are reported in
    /// [`DirContents::errors`].
    pub async fn read_contents(&self) -> VfsResult<DirContents> {
        self.require_directory()?;

        if let Some(contents) = self.cached_contents() {
            return Ok(contents);
        }

        let record = std::sync::Arc::clone(self.record());
        let _gate = record.listing_gate.lock().await;

        // a concurrent lister may have filled the cache while we waited
        if let Some(contents) = self.cached_contents() {
            return Ok(contents);
        }

        let path = self.path();
        trace!(path = %path, "listing directory");

        let listed = match self.fs().backend().read_dir(&path).await {
            Ok(listed) => listed,
            Err(err) => {
                self.clear_cached_data();
                return Err(err);
            }
        };

        let watched = self.is_watched_relaxed();
        let mut entries: Vec<(Entry, FileStats)> = Vec::with_capacity(listed.len());
        let mut errors: HashMap<String, VfsError> = HashMap::new();

        for item in listed {
            let child_path = format!("{path}{}", item.name);
            match item.stats {
                Ok(stats) => {
                    let child = if stats.is_directory() {
                        self.fs().get_directory_for_path(&child_path)?
                    } else {
                        self.fs().get_file_for_path(&child_path)?
                    };
                    if watched {
                        child.store_stat(stats.clone());
                    }
                    entries.push((child, stats));
                }
                Err(err) => {
                    errors.insert(child_path, err);
                }
            }
        }

        if watched {
            self.store_contents(&entries, &errors);
        }

        Ok(DirContents { entries, errors })
    }

    /// Creates the directory on the backend.
    ///
    /// The fresh stats are cached when the new directory is watched, the
    /// parent is re-listed, and a change event carrying the diff is
    /// broadcast when the parent is watched.
    ///
    /// # Errors
    ///
    /// [`VfsError::InvalidParams`] on a file handle. Backend failures,
    /// [`VfsError::AlreadyExists`] included, propagate after the caches
    /// are dropped; no event is broadcast.
    pub async fn create(&self) -> VfsResult<FileStats> {
        self.require_directory()?;

        let path = self.path();
        let _guard = self.fs().begin_change();
        debug!(path = %path, "mkdir");

        let stats = match self.fs().backend().mkdir(&path).await {
            Ok(stats) => stats,
            Err(err) => {
                self.clear_cached_data();
                return Err(err);
            }
        };

        if self.is_watched() {
            self.store_stat(stats.clone());
        }

        if let Some(parent) = self.parent_directory() {
            let (added, removed) = self.fs().handle_directory_change(&parent).await;
            if parent.is_watched() {
                self.fs().publish(FsEvent::Changed {
                    path: Some(parent.path()),
                    added,
                    removed,
                });
            }
        }

        Ok(stats)
    }

    /// Whether the directory has no listable children. A child that fails
    /// to stat still counts as a child.
    ///
    /// # Errors
    ///
    /// Same as [`Entry::read_contents`].
    pub async fn is_empty(&self) -> VfsResult<bool> {
        let contents = self.read_contents().await?;
        Ok(contents.entries.is_empty() && contents.errors.is_empty())
    }

    /// Removes the directory if nothing but empty directories live under
    /// it, pruning depth-first. Returns whether this directory was
    /// removed.
    ///
    /// # Errors
    ///
    /// Listing or unlink failures abort the prune and propagate.
    pub async fn unlink_empty_subtree(&self) -> VfsResult<bool> {
        self.require_directory()?;
        self.prune_empty().await
    }

    fn prune_empty(&self) -> Pin<Box<dyn Future<Output = VfsResult<bool>> + Send + '_>> {
        Box::pin(async move {
            let contents = self.read_contents().await?;
            for (child, stats) in &contents.entries {
                if stats.is_directory() {
                    child.prune_empty().await?;
                }
            }

            // child unlinks refreshed the listing through the parent diff
            if self.is_empty().await? {
                self.unlink().await?;
                Ok(true)
            } else {
                Ok(false)
            }
        })
    }
}
