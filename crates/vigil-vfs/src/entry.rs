//! Cached entry handles and the mutation protocol.
//!
//! An [`Entry`] is a cheap handle onto a record owned by the
//! [`FileSystem`] index. Two handles for the same canonical path share one
//! record, so cached state is observed consistently no matter where a
//! handle came from. Records hold a stat cache, a memoized watch-filter
//! result, and for directories a contents cache; all of it is advisory and
//! can be dropped at any time.
//!
//! Mutations (`rename`, `unlink`, `move_to_trash`) follow one protocol:
//! open a change window, run the backend operation, repair internal
//! bookkeeping, hand the result to the caller, broadcast an event, close
//! the window. External watcher notifications queue behind the window, so
//! a mutation is never double-processed when the backend echoes it back.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;
use tracing::debug;

use vigil_core::path::ensure_trailing_slash;
use vigil_core::{EntryKind, EntryPaths, FileStats, VfsError, VfsResult};

use crate::directory::DirContents;
use crate::events::FsEvent;
use crate::filesystem::FileSystem;
use crate::watched_root::WatchState;

/// Memoized watch-filter state: the root an entry was resolved against and
/// whether that root's filter includes it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WatchMemo {
    pub(crate) root_id: u64,
    pub(crate) included: bool,
}

/// Cached directory listing: live child records with their stats, plus
/// per-child stat failures.
#[derive(Debug, Clone, Default)]
pub(crate) struct CachedContents {
    pub(crate) children: Vec<(Arc<EntryRecord>, FileStats)>,
    pub(crate) errors: HashMap<String, VfsError>,
}

/// Mutable per-entry state, guarded by the record lock.
#[derive(Debug)]
pub(crate) struct EntryState {
    pub(crate) paths: EntryPaths,
    pub(crate) stat: Option<FileStats>,
    pub(crate) watched: Option<WatchMemo>,
    pub(crate) contents: Option<CachedContents>,
}

/// Index-owned storage slot behind [`Entry`] handles.
///
/// Records never point back at the coordinator, so handles can be held
/// indefinitely without creating reference cycles.
#[derive(Debug)]
pub(crate) struct EntryRecord {
    pub(crate) id: u64,
    pub(crate) kind: EntryKind,
    state: RwLock<EntryState>,
    /// Serializes backend listings so concurrent readers coalesce.
    pub(crate) listing_gate: Mutex<()>,
}

impl EntryRecord {
    pub(crate) fn new(id: u64, kind: EntryKind, paths: EntryPaths) -> Self {
        Self {
            id,
            kind,
            state: RwLock::new(EntryState {
                paths,
                stat: None,
                watched: None,
                contents: None,
            }),
            listing_gate: Mutex::new(()),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, EntryState> {
        self.state.read().unwrap_or_else(|err| {
            tracing::warn!("Entry state lock poisoned, recovering");
            err.into_inner()
        })
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, EntryState> {
        self.state.write().unwrap_or_else(|err| {
            tracing::warn!("Entry state lock poisoned, recovering");
            err.into_inner()
        })
    }

    pub(crate) fn path(&self) -> String {
        self.read().paths.path.clone()
    }

    fn try_path(&self) -> Option<String> {
        self.state.try_read().ok().map(|state| state.paths.path.clone())
    }
}

/// Handle to one cached file or directory.
///
/// Handles are cheap to clone and compare equal when they share a record,
/// which for live entries means they share a canonical path. The path, the
/// name, and the parent path are derived together and move together when
/// the entry is renamed.
#[derive(Clone)]
pub struct Entry {
    fs: FileSystem,
    record: Arc<EntryRecord>,
}

impl Entry {
    pub(crate) fn new(fs: FileSystem, record: Arc<EntryRecord>) -> Self {
        Self { fs, record }
    }

    pub(crate) fn fs(&self) -> &FileSystem {
        &self.fs
    }

    pub(crate) fn record(&self) -> &Arc<EntryRecord> {
        &self.record
    }

    /// Canonical absolute path. Directories carry a trailing slash.
    #[must_use]
    pub fn path(&self) -> String {
        self.record.read().paths.path.clone()
    }

    /// Final path segment. Empty only for the root directory.
    #[must_use]
    pub fn name(&self) -> String {
        self.record.read().paths.name.clone()
    }

    /// Path of the containing directory, `None` for the root.
    #[must_use]
    pub fn parent_path(&self) -> Option<String> {
        self.record.read().paths.parent_path.clone()
    }

    /// Process-unique identifier, stable across renames.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.record.id
    }

    /// Whether this handle names a file or a directory.
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        self.record.kind
    }

    /// True for file handles.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.record.kind.is_file()
    }

    /// True for directory handles.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.record.kind.is_directory()
    }

    /// Handle for the containing directory, `None` at the root.
    #[must_use]
    pub fn parent_directory(&self) -> Option<Entry> {
        let parent = self.record.read().paths.parent_path.clone()?;
        self.fs.get_directory_for_path(&parent).ok()
    }

    // Cache plumbing. Callers hold no lock across these.

    pub(crate) fn cached_stat(&self) -> Option<FileStats> {
        self.record.read().stat.clone()
    }

    pub(crate) fn store_stat(&self, stats: FileStats) {
        self.record.write().stat = Some(stats);
    }

    pub(crate) fn cached_contents(&self) -> Option<DirContents> {
        let cached = self.record.read().contents.clone()?;
        Some(DirContents {
            entries: cached
                .children
                .into_iter()
                .map(|(record, stats)| (Entry::new(self.fs.clone(), record), stats))
                .collect(),
            errors: cached.errors,
        })
    }

    pub(crate) fn store_contents(
        &self,
        children: &[(Entry, FileStats)],
        errors: &HashMap<String, VfsError>,
    ) {
        let cached = CachedContents {
            children: children
                .iter()
                .map(|(child, stats)| (Arc::clone(&child.record), stats.clone()))
                .collect(),
            errors: errors.clone(),
        };
        self.record.write().contents = Some(cached);
    }

    /// Paths of the children recorded in the contents cache, if any.
    pub(crate) fn cached_child_paths(&self) -> Vec<String> {
        let records: Vec<Arc<EntryRecord>> = match self.record.read().contents.as_ref() {
            Some(cached) => cached.children.iter().map(|(record, _)| Arc::clone(record)).collect(),
            None => return Vec::new(),
        };
        records.iter().map(|record| record.path()).collect()
    }

    /// Drops the stat cache, and for directories the contents cache plus
    /// the stat and contents caches of known immediate children. Watchers
    /// sometimes report only that a directory changed, so child stats
    /// cannot be trusted either. The cascade stops at one level; deeper
    /// descendants are invalidated when their own parents are.
    pub(crate) fn clear_cached_data(&self) {
        let cached_children = {
            let mut state = self.record.write();
            state.stat = None;
            state
                .contents
                .take()
                .map(|contents| {
                    contents
                        .children
                        .into_iter()
                        .map(|(record, _)| record)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        // a directory resolved but never listed can still have indexed
        // children
        let children = if cached_children.is_empty() && self.record.kind.is_directory() {
            self.fs.records_under_parent(&self.path())
        } else {
            cached_children
        };

        for child in children {
            let mut state = child.write();
            state.stat = None;
            state.contents = None;
        }
    }

    // Watch resolution.

    /// True when the entry lies under an active watched root and passes
    /// the root's filter. Cached data is only retained while this holds.
    ///
    /// The root association and filter verdict are memoized; liveness of
    /// the root is re-validated on every call, and a dead root drops the
    /// association together with all cached data.
    #[must_use]
    pub fn is_watched(&self) -> bool {
        self.check_watched(false)
    }

    /// Watch check that also accepts roots still starting up. Listing
    /// population uses this so watcher startup does not race cache
    /// priming.
    pub(crate) fn is_watched_relaxed(&self) -> bool {
        self.check_watched(true)
    }

    fn check_watched(&self, relaxed: bool) -> bool {
        let (memo, paths) = {
            let state = self.record.read();
            (state.watched, state.paths.clone())
        };

        let memo = match memo {
            Some(memo) => memo,
            None => match self.compute_watch_memo(&paths, relaxed) {
                Some(memo) => {
                    self.record.write().watched = Some(memo);
                    memo
                }
                // outside every watched root: nothing to memoize
                None => return false,
            },
        };

        match self.fs.watched_root_status(memo.root_id) {
            Some(WatchState::Active) => memo.included,
            Some(WatchState::Starting) if relaxed => memo.included,
            _ => {
                self.record.write().watched = None;
                self.clear_cached_data();
                false
            }
        }
    }

    /// Resolves the watch association from scratch: find the covering
    /// root, then apply its filter, which requires the parent directory to
    /// be watched itself. The relaxed flag propagates up the parent chain,
    /// so membership computed while a root is still starting is the same
    /// membership an active root would compute.
    fn compute_watch_memo(&self, paths: &EntryPaths, relaxed: bool) -> Option<WatchMemo> {
        let root = self.fs.find_watched_root_for_path(&paths.path)?;

        let included = if root.path() == paths.path {
            true
        } else if let Some(parent_path) = paths.parent_path.as_deref() {
            match self.fs.get_directory_for_path(parent_path) {
                Ok(parent) if parent.check_watched(relaxed) => root.filter().allows(
                    &paths.name,
                    parent_path,
                    self.record.kind.is_directory(),
                ),
                _ => false,
            }
        } else {
            false
        };

        Some(WatchMemo {
            root_id: root.id(),
            included,
        })
    }

    // Read operations.

    /// Whether the entry currently exists. A cached stat answers without a
    /// backend round-trip.
    ///
    /// # Errors
    ///
    /// Backend failures propagate after the caches are dropped.
    pub async fn exists(&self) -> VfsResult<bool> {
        if self.cached_stat().is_some() {
            return Ok(true);
        }

        match self.fs.backend().exists(&self.path()).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.clear_cached_data();
                Ok(false)
            }
            Err(err) => {
                self.clear_cached_data();
                Err(err)
            }
        }
    }

    /// Stats the entry. Served from cache when possible; a fresh result is
    /// cached only while the entry is watched.
    ///
    /// # Errors
    ///
    /// Backend failures propagate after the caches are dropped.
    pub async fn stat(&self) -> VfsResult<FileStats> {
        if let Some(stats) = self.cached_stat() {
            return Ok(stats);
        }

        match self.fs.backend().stat(&self.path()).await {
            Ok(stats) => {
                if self.is_watched() {
                    self.store_stat(stats.clone());
                }
                Ok(stats)
            }
            Err(err) => {
                self.clear_cached_data();
                Err(err)
            }
        }
    }

    // Mutations.

    /// Moves the entry to `new_path`. Directory targets are normalized to
    /// carry a trailing slash.
    ///
    /// On success every indexed entry inside a renamed directory is
    /// re-keyed in place: handles keep their identity and observe their
    /// new paths. A single rename event is broadcast after the caller's
    /// result is determined.
    ///
    /// # Errors
    ///
    /// Backend failures propagate after the caches are dropped; no event
    /// is broadcast.
    pub async fn rename(&self, new_path: &str) -> VfsResult<()> {
        let new_path = match self.record.kind {
            EntryKind::Directory => ensure_trailing_slash(new_path),
            EntryKind::File => new_path.to_string(),
        };
        let old_path = self.path();

        let _guard = self.fs.begin_change();
        debug!(old = %old_path, new = %new_path, "rename");

        match self.fs.backend().rename(&old_path, &new_path).await {
            Ok(()) => {
                self.fs.handle_rename(&old_path, &new_path, self.record.kind);
                self.fs.publish(FsEvent::Renamed { old_path, new_path });
                Ok(())
            }
            Err(err) => {
                self.clear_cached_data();
                Err(err)
            }
        }
    }

    /// Removes the entry; for directories the whole subtree.
    ///
    /// Caches are dropped before the backend call since even a failed
    /// removal may have altered backend state. Afterwards the parent
    /// directory is re-listed and, when watched, a change event carrying
    /// the observed diff is broadcast, whether or not the removal
    /// succeeded.
    ///
    /// # Errors
    ///
    /// The backend failure, after the parent repair has run.
    pub async fn unlink(&self) -> VfsResult<()> {
        let path = self.path();
        let _guard = self.fs.begin_change();
        debug!(path = %path, "unlink");

        self.clear_cached_data();
        let result = self.fs.backend().unlink(&path).await;
        self.repair_parent_after_removal().await;
        result
    }

    /// Moves the entry to the platform trash, falling back to [`unlink`]
    /// when the backend has no trash support.
    ///
    /// [`unlink`]: Entry::unlink
    ///
    /// # Errors
    ///
    /// The backend failure, after the parent repair has run.
    pub async fn move_to_trash(&self) -> VfsResult<()> {
        if !self.fs.backend().supports_trash() {
            return self.unlink().await;
        }

        let path = self.path();
        let _guard = self.fs.begin_change();
        debug!(path = %path, "move to trash");

        self.clear_cached_data();
        let result = self.fs.backend().move_to_trash(&path).await;
        self.repair_parent_after_removal().await;
        result
    }

    /// Re-lists the parent and broadcasts the diff when the parent is
    /// watched. Runs on both removal outcomes; the re-list reports
    /// whatever state the backend is really in.
    async fn repair_parent_after_removal(&self) {
        let Some(parent) = self.parent_directory() else {
            return;
        };
        let (added, removed) = self.fs.handle_directory_change(&parent).await;
        if parent.is_watched() {
            self.fs.publish(FsEvent::Changed {
                path: Some(parent.path()),
                added,
                removed,
            });
        }
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.record.id == other.record.id
    }
}

impl Eq for Entry {}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // try_read keeps Debug usable while the state lock is held
        let path = self
            .record
            .try_path()
            .unwrap_or_else(|| "<locked>".to_string());
        f.debug_struct("Entry")
            .field("path", &path)
            .field("kind", &self.record.kind)
            .field("id", &self.record.id)
            .finish()
    }
}
