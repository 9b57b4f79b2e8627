//! The coordinator owning records, watched roots, and the change gate.
//!
//! One [`FileSystem`] fronts one backend. It owns the canonical-path index
//! that makes entry handles converge onto shared records, the registry of
//! watched roots, the event bus, and the change gate that holds external
//! watcher notifications back while internal mutations are in flight.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tracing::{debug, trace, warn};

use vigil_core::path::{ensure_trailing_slash, is_within, normalize, reprefix};
use vigil_core::{EntryKind, EntryPaths, FileStats, VfsError, VfsResult};

use crate::backend::Backend;
use crate::entry::{Entry, EntryRecord, WatchMemo};
use crate::events::{EventBus, EventReceiver, FsEvent, DEFAULT_CHANNEL_CAPACITY};
use crate::watched_root::{RootFilter, WatchState, WatchedRoot};

/// External notification queued while a change window is open.
#[derive(Debug)]
struct PendingChange {
    path: Option<String>,
    stats: Option<FileStats>,
}

/// Window counter and the queue of held-back external notifications.
#[derive(Debug, Default)]
struct ChangeGate {
    depth: usize,
    draining: bool,
    pending: VecDeque<PendingChange>,
}

struct FsState {
    backend: Arc<dyn Backend>,
    /// Canonical path to record. File keys have no trailing slash,
    /// directory keys always do, so one path can never be indexed under
    /// both kinds.
    index: DashMap<String, Arc<EntryRecord>>,
    roots: DashMap<u64, Arc<WatchedRoot>>,
    /// Shared id source for entries and roots.
    next_id: AtomicU64,
    gate: Mutex<ChangeGate>,
    events: EventBus,
}

/// Coordinator for one backend.
///
/// `FileSystem` is a cheap cloneable handle; every clone shares the index,
/// the watched roots, the change gate, and the event bus.
#[derive(Clone)]
pub struct FileSystem {
    state: Arc<FsState>,
}

impl FileSystem {
    /// Creates a coordinator over `backend` with the default event
    /// capacity.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_event_capacity(backend, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a coordinator with a custom event channel capacity.
    #[must_use]
    pub fn with_event_capacity(backend: Arc<dyn Backend>, capacity: usize) -> Self {
        Self {
            state: Arc::new(FsState {
                backend,
                index: DashMap::new(),
                roots: DashMap::new(),
                next_id: AtomicU64::new(1),
                gate: Mutex::new(ChangeGate::default()),
                events: EventBus::with_capacity(capacity),
            }),
        }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.state.backend
    }

    fn allocate_id(&self) -> u64 {
        self.state.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Subscribes to change and rename events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.state.events.subscribe()
    }

    pub(crate) fn publish(&self, event: FsEvent) {
        self.state.events.publish(event);
    }

    // Entry resolution.

    /// Handle for the file at `path`. Any trailing slash is stripped.
    ///
    /// Resolution is purely structural; the backend is not consulted and
    /// the path need not exist.
    ///
    /// # Errors
    ///
    /// [`VfsError::InvalidParams`] when the path is not absolute or names
    /// the root directory.
    pub fn get_file_for_path(&self, path: &str) -> VfsResult<Entry> {
        self.entry_for_path(path, EntryKind::File)
    }

    /// Handle for the directory at `path`, normalized to carry one
    /// trailing slash.
    ///
    /// # Errors
    ///
    /// [`VfsError::InvalidParams`] when the path is not absolute.
    pub fn get_directory_for_path(&self, path: &str) -> VfsResult<Entry> {
        self.entry_for_path(path, EntryKind::Directory)
    }

    /// Resolves `path` by the trailing-slash rule: `/a/b/` is a
    /// directory, `/a/b` a file.
    ///
    /// # Errors
    ///
    /// Same as the kind-specific resolvers.
    pub fn resolve(&self, path: &str) -> VfsResult<Entry> {
        if path.ends_with('/') {
            self.get_directory_for_path(path)
        } else {
            self.get_file_for_path(path)
        }
    }

    fn entry_for_path(&self, path: &str, kind: EntryKind) -> VfsResult<Entry> {
        if !path.starts_with('/') {
            return Err(VfsError::InvalidParams(format!(
                "path is not absolute: {path}"
            )));
        }
        let normalized = normalize(path, kind);
        if normalized.is_empty() {
            return Err(VfsError::InvalidParams(format!("not a file path: {path}")));
        }
        Ok(Entry::new(self.clone(), self.record_for(&normalized, kind)))
    }

    fn record_for(&self, path: &str, kind: EntryKind) -> Arc<EntryRecord> {
        if let Some(existing) = self.state.index.get(path) {
            return Arc::clone(existing.value());
        }
        let record = self.state.index.entry(path.to_string()).or_insert_with(|| {
            Arc::new(EntryRecord::new(
                self.allocate_id(),
                kind,
                EntryPaths::derive(path, kind),
            ))
        });
        Arc::clone(record.value())
    }

    /// Records whose index key places them directly inside `dir_path`.
    pub(crate) fn records_under_parent(&self, dir_path: &str) -> Vec<Arc<EntryRecord>> {
        self.state
            .index
            .iter()
            .filter(|item| parent_of_key(item.key()) == Some(dir_path))
            .map(|item| Arc::clone(item.value()))
            .collect()
    }

    // Watched roots.

    /// Starts watching the subtree rooted at `path`.
    ///
    /// The root registers in the starting state before the backend watch
    /// is established, so listings made during startup already cache. On
    /// backend failure the root is removed again and nothing is watched.
    ///
    /// # Errors
    ///
    /// [`VfsError::InvalidParams`] when the path is not absolute or lies
    /// inside an already watched root; backend failures propagate.
    pub async fn watch(&self, path: &str, filter: RootFilter) -> VfsResult<()> {
        if !path.starts_with('/') {
            return Err(VfsError::InvalidParams(format!(
                "path is not absolute: {path}"
            )));
        }
        let root_path = ensure_trailing_slash(path);
        if self.find_watched_root_for_path(&root_path).is_some() {
            return Err(VfsError::InvalidParams(format!(
                "path is already watched: {root_path}"
            )));
        }

        let id = self.allocate_id();
        let root = Arc::new(WatchedRoot::new(id, root_path.clone(), filter));
        self.state.roots.insert(id, Arc::clone(&root));
        debug!(path = %root_path, id, "watch starting");

        match self.state.backend.watch_path(&root_path).await {
            Ok(()) => {
                root.set_status(WatchState::Active);
                debug!(path = %root_path, id, "watch active");
                Ok(())
            }
            Err(err) => {
                root.set_status(WatchState::Inactive);
                self.state.roots.remove(&id);
                warn!(path = %root_path, error = %err, "watch failed");
                Err(err)
            }
        }
    }

    /// Stops watching the root at exactly `path`.
    ///
    /// Every cache under the root is dropped immediately; reads made after
    /// unwatching go to the backend again.
    ///
    /// # Errors
    ///
    /// [`VfsError::RootNotWatched`] when no root has this path; backend
    /// failures propagate after the local teardown.
    pub async fn unwatch(&self, path: &str) -> VfsResult<()> {
        let root_path = ensure_trailing_slash(path);
        let root = self
            .state
            .roots
            .iter()
            .find(|item| item.value().path() == root_path)
            .map(|item| Arc::clone(item.value()));
        let Some(root) = root else {
            return Err(VfsError::RootNotWatched(root_path));
        };

        root.set_status(WatchState::Inactive);
        self.state.roots.remove(&root.id());

        // caches under the root must not outlive it
        let affected: Vec<Arc<EntryRecord>> = self
            .state
            .index
            .iter()
            .filter(|item| is_within(item.key(), &root_path))
            .map(|item| Arc::clone(item.value()))
            .collect();
        for record in affected {
            let mut state = record.write();
            state.stat = None;
            state.contents = None;
        }

        debug!(path = %root_path, "watch removed");
        self.state.backend.unwatch_path(&root_path).await
    }

    /// The innermost registered root whose subtree contains `path`, if
    /// any.
    pub(crate) fn find_watched_root_for_path(&self, path: &str) -> Option<Arc<WatchedRoot>> {
        self.state
            .roots
            .iter()
            .find(|item| is_within(path, item.value().path()))
            .map(|item| Arc::clone(item.value()))
    }

    pub(crate) fn watched_root(&self, id: u64) -> Option<Arc<WatchedRoot>> {
        self.state.roots.get(&id).map(|item| Arc::clone(item.value()))
    }

    pub(crate) fn watched_root_status(&self, id: u64) -> Option<WatchState> {
        self.watched_root(id).map(|root| root.status())
    }

    // Rename and change bookkeeping.

    /// Re-keys every indexed record affected by a successful rename. For
    /// directories that is the directory itself and all indexed
    /// descendants. Records keep their identity; only their derived paths
    /// change.
    pub(crate) fn handle_rename(&self, old_path: &str, new_path: &str, kind: EntryKind) {
        let moved: Vec<(String, Arc<EntryRecord>)> = match kind {
            EntryKind::Directory => self
                .state
                .index
                .iter()
                .filter(|item| is_within(item.key(), old_path))
                .map(|item| (item.key().clone(), Arc::clone(item.value())))
                .collect(),
            EntryKind::File => self
                .state
                .index
                .get(old_path)
                .map(|item| vec![(item.key().clone(), Arc::clone(item.value()))])
                .unwrap_or_default(),
        };

        for (old_key, record) in moved {
            let Some(new_key) = reprefix(&old_key, old_path, new_path) else {
                continue;
            };
            self.state.index.remove(&old_key);
            self.apply_path_change(&record, &new_key);
            self.state.index.insert(new_key, record);
        }
    }

    /// Rewrites a record's derived paths after a move and settles its
    /// watch association: still inside its root, the filter verdict is
    /// recomputed; moved outside, association and caches are dropped.
    fn apply_path_change(&self, record: &Arc<EntryRecord>, new_path: &str) {
        let paths = EntryPaths::derive(new_path, record.kind);
        let mut state = record.write();

        if let Some(memo) = state.watched {
            match self.watched_root(memo.root_id) {
                Some(root) if is_within(&paths.path, root.path()) => {
                    let included = if root.path() == paths.path {
                        true
                    } else {
                        let parent = paths.parent_path.as_deref().unwrap_or("");
                        root.filter()
                            .allows(&paths.name, parent, record.kind.is_directory())
                    };
                    state.watched = Some(WatchMemo {
                        root_id: memo.root_id,
                        included,
                    });
                }
                _ => {
                    state.watched = None;
                    state.stat = None;
                    state.contents = None;
                }
            }
        }

        state.paths = paths;
    }

    /// Re-lists `dir` and diffs the result against its previous cached
    /// listing. Removed paths leave the index so later resolutions mint
    /// fresh records. Best-effort: a failed re-list yields an empty diff.
    pub(crate) async fn handle_directory_change(&self, dir: &Entry) -> (Vec<String>, Vec<String>) {
        let old_paths = dir.cached_child_paths();
        dir.clear_cached_data();

        match dir.read_contents().await {
            Ok(contents) => {
                let new_paths: Vec<String> = contents
                    .entries
                    .iter()
                    .map(|(child, _)| child.path())
                    .collect();
                let added: Vec<String> = new_paths
                    .iter()
                    .filter(|path| !old_paths.contains(path))
                    .cloned()
                    .collect();
                let removed: Vec<String> = old_paths
                    .into_iter()
                    .filter(|path| !new_paths.contains(path))
                    .collect();

                for path in &removed {
                    self.remove_index_subtree(path);
                }

                (added, removed)
            }
            Err(err) => {
                trace!(path = %dir.path(), error = %err, "re-list failed during change repair");
                (Vec::new(), Vec::new())
            }
        }
    }

    fn remove_index_subtree(&self, path: &str) {
        if path.ends_with('/') {
            let doomed: Vec<String> = self
                .state
                .index
                .iter()
                .filter(|item| is_within(item.key(), path))
                .map(|item| item.key().clone())
                .collect();
            for key in doomed {
                self.state.index.remove(&key);
            }
        } else {
            self.state.index.remove(path);
        }
    }

    // Change windows and external notifications.

    fn lock_gate(&self) -> MutexGuard<'_, ChangeGate> {
        self.state
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a change window. External notifications arriving while any
    /// window is open are queued and applied after the last one closes.
    ///
    /// Windows nest; every internal mutation opens one around its whole
    /// protocol run.
    #[must_use = "dropping the guard closes the change window"]
    pub fn begin_change(&self) -> ChangeGuard {
        let mut gate = self.lock_gate();
        gate.depth = gate.depth.saturating_add(1);
        trace!(depth = gate.depth, "change window opened");
        ChangeGuard { fs: self.clone() }
    }

    fn end_change(&self) {
        let drain = {
            let mut gate = self.lock_gate();
            gate.depth = gate.depth.saturating_sub(1);
            trace!(depth = gate.depth, "change window closed");
            gate.depth == 0 && !gate.pending.is_empty()
        };
        if !drain {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let fs = self.clone();
                handle.spawn(async move {
                    fs.flush_external_changes().await;
                });
            }
            Err(_) => {
                // the queue drains on the next notification instead
                warn!("change window closed outside a runtime, external changes stay queued");
            }
        }
    }

    /// Delivers an external change observed by the embedder's watcher.
    ///
    /// `path` follows the canonical form; `None` means anything may have
    /// changed and drops every cache. `stats` may carry the fresh stats
    /// the watcher already obtained. Notifications are queued while a
    /// change window is open and applied once it closes; an unchanged file
    /// mtime is treated as a spurious echo and suppressed.
    pub async fn notify_external_change(&self, path: Option<&str>, stats: Option<FileStats>) {
        {
            let mut gate = self.lock_gate();
            gate.pending.push_back(PendingChange {
                path: path.map(ToString::to_string),
                stats,
            });
        }
        self.flush_external_changes().await;
    }

    /// Applies queued external notifications one at a time. Returns
    /// immediately while a window is open or another drain is running;
    /// whoever is draining keeps going until the queue is empty.
    async fn flush_external_changes(&self) {
        loop {
            let change = {
                let mut gate = self.lock_gate();
                if gate.depth > 0 || gate.draining {
                    return;
                }
                let Some(change) = gate.pending.pop_front() else {
                    return;
                };
                gate.draining = true;
                change
            };

            self.apply_external_change(change).await;
            self.lock_gate().draining = false;
        }
    }

    async fn apply_external_change(&self, change: PendingChange) {
        let Some(path) = change.path else {
            trace!("external change with no path, dropping all caches");
            let records: Vec<Arc<EntryRecord>> = self
                .state
                .index
                .iter()
                .map(|item| Arc::clone(item.value()))
                .collect();
            for record in records {
                let mut state = record.write();
                state.stat = None;
                state.contents = None;
            }
            self.publish(FsEvent::Changed {
                path: None,
                added: Vec::new(),
                removed: Vec::new(),
            });
            return;
        };

        let record = self
            .state
            .index
            .get(path.as_str())
            .map(|item| Arc::clone(item.value()))
            .or_else(|| {
                self.state
                    .index
                    .get(ensure_trailing_slash(&path).as_str())
                    .map(|item| Arc::clone(item.value()))
            });
        let Some(record) = record else {
            trace!(path = %path, "external change for unresolved path ignored");
            return;
        };

        let entry = Entry::new(self.clone(), record);
        if entry.is_file() {
            if let (Some(new_stats), Some(cached)) = (&change.stats, entry.cached_stat()) {
                // unchanged mtime means the watcher echoed a known state
                if new_stats.mtime == cached.mtime {
                    trace!(path = %path, "external change with unchanged mtime ignored");
                    return;
                }
            }
            entry.clear_cached_data();
            if let Some(stats) = change.stats {
                if entry.is_watched() {
                    entry.store_stat(stats);
                }
            }
            debug!(path = %entry.path(), "external file change");
            self.publish(FsEvent::Changed {
                path: Some(entry.path()),
                added: Vec::new(),
                removed: Vec::new(),
            });
        } else {
            let (added, removed) = self.handle_directory_change(&entry).await;
            if let Some(stats) = change.stats {
                if entry.is_watched() {
                    entry.store_stat(stats);
                }
            }
            debug!(
                path = %entry.path(),
                added = added.len(),
                removed = removed.len(),
                "external directory change"
            );
            self.publish(FsEvent::Changed {
                path: Some(entry.path()),
                added,
                removed,
            });
        }
    }
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem")
            .field("entries", &self.state.index.len())
            .field("roots", &self.state.roots.len())
            .finish_non_exhaustive()
    }
}

/// RAII change window. Dropping the guard closes the window; closing the
/// last open window schedules the queued external notifications.
#[must_use = "dropping the guard closes the change window"]
pub struct ChangeGuard {
    fs: FileSystem,
}

impl Drop for ChangeGuard {
    fn drop(&mut self) {
        self.fs.end_change();
    }
}

impl fmt::Debug for ChangeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChangeGuard")
    }
}

/// Index key of the directory directly containing `key`, `None` for the
/// root.
fn parent_of_key(key: &str) -> Option<&str> {
    let trimmed = key.strip_suffix('/').unwrap_or(key);
    if trimmed.is_empty() {
        return None;
    }
    let idx = trimmed.rfind('/')?;
    Some(&key[..=idx])
}

#[cfg(test)]
mod tests {
    use super::parent_of_key;

    #[test]
    fn test_parent_of_key() {
        assert_eq!(parent_of_key("/a/b.txt"), Some("/a/"));
        assert_eq!(parent_of_key("/a/b/"), Some("/a/"));
        assert_eq!(parent_of_key("/a"), Some("/"));
        assert_eq!(parent_of_key("/a/"), Some("/"));
        assert_eq!(parent_of_key("/"), None);
    }
}
