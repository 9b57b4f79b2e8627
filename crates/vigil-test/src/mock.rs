//! In-memory mock backend with scripted failures and call counters.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::trace;

use vigil_core::{EntryKind, EntryPaths, FileStats, VfsError, VfsResult};
use vigil_vfs::{Backend, ListedEntry};

/// One node in the mock tree.
#[derive(Debug, Clone)]
struct MockNode {
    kind: EntryKind,
    size: u64,
    mtime: u64,
    real_path: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    /// File keys carry no trailing slash, directory keys always do.
    nodes: BTreeMap<String, MockNode>,
    calls: HashMap<(String, String), usize>,
    failures: HashMap<(String, String), VecDeque<VfsError>>,
    trashed: Vec<String>,
    clock: u64,
}

/// In-memory [`Backend`] for tests.
///
/// Builder methods (`with_file`, `with_tree`, ...) shape the initial tree.
/// Scripted failures are one-shot per queued error, and every backend call
/// is counted per `(operation, path)` so tests can assert cache behavior.
/// The mutation helpers (`insert_file`, `remove`, `touch`, ...) emulate
/// out-of-band changes: they bypass the counters.
///
/// Operation names used by `fail_next` and the counters: `"exists"`,
/// `"stat"`, `"readdir"`, `"mkdir"`, `"rename"`, `"unlink"`, `"trash"`,
/// `"watch"`, `"unwatch"`.
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<MockState>,
    supports_trash: bool,
    watch_hold: watch::Sender<bool>,
}

impl MockBackend {
    /// Creates a tree containing only the root directory.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            MockNode {
                kind: EntryKind::Directory,
                size: 0,
                mtime: 1,
                real_path: None,
            },
        );
        let (watch_hold, _) = watch::channel(false);
        Self {
            state: Mutex::new(MockState {
                nodes,
                clock: 1,
                ..MockState::default()
            }),
            supports_trash: false,
            watch_hold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Tree builders.

    /// Adds an empty file, creating missing parent directories.
    #[must_use]
    pub fn with_file(self, path: &str) -> Self {
        self.insert_file(path);
        self
    }

    /// Adds a file with an explicit size.
    #[must_use]
    pub fn with_sized_file(self, path: &str, size: u64) -> Self {
        self.insert_file(path);
        if let Some(node) = self.lock().nodes.get_mut(path.trim_end_matches('/')) {
            node.size = size;
        }
        self
    }

    /// Adds a directory, creating missing parents.
    #[must_use]
    pub fn with_dir(self, path: &str) -> Self {
        self.insert_dir(path);
        self
    }

    /// Adds every path in `paths`; entries ending in `/` become
    /// directories.
    #[must_use]
    pub fn with_tree(self, paths: &[&str]) -> Self {
        for path in paths {
            if path.ends_with('/') {
                self.insert_dir(path);
            } else {
                self.insert_file(path);
            }
        }
        self
    }

    /// Enables [`Backend::move_to_trash`].
    #[must_use]
    pub fn with_trash_support(mut self) -> Self {
        self.supports_trash = true;
        self
    }

    // Scripting and inspection.

    /// Queues a failure for the next `op` call on `path`. Queued failures
    /// are consumed in order, one per call.
    pub fn fail_next(&self, op: &str, path: &str, err: VfsError) {
        self.lock()
            .failures
            .entry((op.to_string(), path.to_string()))
            .or_default()
            .push_back(err);
    }

    /// Number of `op` calls made against `path`.
    #[must_use]
    pub fn call_count(&self, op: &str, path: &str) -> usize {
        self.lock()
            .calls
            .get(&(op.to_string(), path.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Total `op` calls across all paths.
    #[must_use]
    pub fn op_count(&self, op: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|((name, _), _)| name == op)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Paths moved to the trash, oldest first.
    #[must_use]
    pub fn trashed(&self) -> Vec<String> {
        self.lock().trashed.clone()
    }

    /// While `hold` is true, `watch_path` calls stay pending, keeping
    /// roots in their starting state.
    pub fn set_watch_hold(&self, hold: bool) {
        self.watch_hold.send_replace(hold);
    }

    // Out-of-band mutation helpers.

    /// Creates or replaces a file without counting a backend call.
    pub fn insert_file(&self, path: &str) {
        let mut state = self.lock();
        state.clock = state.clock.saturating_add(1);
        let mtime = state.clock;
        Self::ensure_parents(&mut state, path);
        state.nodes.insert(
            path.trim_end_matches('/').to_string(),
            MockNode {
                kind: EntryKind::File,
                size: 0,
                mtime,
                real_path: None,
            },
        );
    }

    /// Creates a directory without counting a backend call.
    pub fn insert_dir(&self, path: &str) {
        let mut state = self.lock();
        state.clock = state.clock.saturating_add(1);
        let mtime = state.clock;
        Self::ensure_parents(&mut state, path);
        let key = format!("{}/", path.trim_end_matches('/'));
        state.nodes.entry(key).or_insert(MockNode {
            kind: EntryKind::Directory,
            size: 0,
            mtime,
            real_path: None,
        });
    }

    /// Removes a path, and its subtree for directories, without counting a
    /// backend call.
    pub fn remove(&self, path: &str) {
        let mut state = self.lock();
        Self::remove_node(&mut state, path);
    }

    /// Bumps the mock clock and the node's mtime.
    pub fn touch(&self, path: &str) {
        let mut state = self.lock();
        state.clock = state.clock.saturating_add(1);
        let mtime = state.clock;
        if let Some(node) = Self::node_mut(&mut state, path) {
            node.mtime = mtime;
        }
    }

    /// Marks `path` as a link resolving to `real_path`.
    pub fn set_real_path(&self, path: &str, real_path: &str) {
        let mut state = self.lock();
        if let Some(node) = Self::node_mut(&mut state, path) {
            node.real_path = Some(real_path.to_string());
        }
    }

    /// Current stats of a node, in either path form, without counting a
    /// backend call.
    #[must_use]
    pub fn stats_for(&self, path: &str) -> Option<FileStats> {
        let state = self.lock();
        let file_key = path.trim_end_matches('/').to_string();
        let dir_key = format!("{file_key}/");
        state
            .nodes
            .get(path)
            .or_else(|| state.nodes.get(&dir_key))
            .or_else(|| state.nodes.get(&file_key))
            .map(Self::node_stats)
    }

    // Internals.

    fn node_mut<'a>(state: &'a mut MockState, path: &str) -> Option<&'a mut MockNode> {
        let file_key = path.trim_end_matches('/').to_string();
        let dir_key = format!("{file_key}/");
        let key = if state.nodes.contains_key(path) {
            path.to_string()
        } else if state.nodes.contains_key(&dir_key) {
            dir_key
        } else {
            file_key
        };
        state.nodes.get_mut(&key)
    }

    fn ensure_parents(state: &mut MockState, path: &str) {
        let trimmed = path.trim_end_matches('/');
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        let mut prefix = String::from("/");
        for segment in segments.iter().take(segments.len().saturating_sub(1)) {
            prefix.push_str(segment);
            prefix.push('/');
            let mtime = state.clock;
            state.nodes.entry(prefix.clone()).or_insert(MockNode {
                kind: EntryKind::Directory,
                size: 0,
                mtime,
                real_path: None,
            });
        }
    }

    fn remove_node(state: &mut MockState, path: &str) {
        let file_key = path.trim_end_matches('/').to_string();
        let dir_key = format!("{file_key}/");
        state.nodes.remove(&file_key);
        if state.nodes.remove(&dir_key).is_some() || path.ends_with('/') {
            let doomed: Vec<String> = state
                .nodes
                .keys()
                .filter(|key| key.starts_with(&dir_key))
                .cloned()
                .collect();
            for key in doomed {
                state.nodes.remove(&key);
            }
        }
    }

    fn take_failure(state: &mut MockState, op: &str, path: &str) -> Option<VfsError> {
        let key = (op.to_string(), path.to_string());
        let queue = state.failures.get_mut(&key)?;
        let err = queue.pop_front();
        if queue.is_empty() {
            state.failures.remove(&key);
        }
        if err.is_some() {
            trace!(op, path, "mock: injected failure");
        }
        err
    }

    fn count_call(state: &mut MockState, op: &str, path: &str) {
        let count = state
            .calls
            .entry((op.to_string(), path.to_string()))
            .or_insert(0);
        *count = count.saturating_add(1);
    }

    fn node_stats(node: &MockNode) -> FileStats {
        let stats = match node.kind {
            EntryKind::File => FileStats::file(node.size, node.mtime),
            EntryKind::Directory => FileStats::directory(node.mtime),
        };
        match &node.real_path {
            Some(real) => stats.with_real_path(real.clone()),
            None => stats,
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn exists(&self, path: &str) -> VfsResult<bool> {
        let mut state = self.lock();
        Self::count_call(&mut state, "exists", path);
        if let Some(err) = Self::take_failure(&mut state, "exists", path) {
            return Err(err);
        }
        Ok(state.nodes.contains_key(path))
    }

    async fn stat(&self, path: &str) -> VfsResult<FileStats> {
        let mut state = self.lock();
        Self::count_call(&mut state, "stat", path);
        if let Some(err) = Self::take_failure(&mut state, "stat", path) {
            return Err(err);
        }
        state
            .nodes
            .get(path)
            .map(Self::node_stats)
            .ok_or_else(|| VfsError::NotFound(path.to_string()))
    }

    async fn read_dir(&self, path: &str) -> VfsResult<Vec<ListedEntry>> {
        let mut state = self.lock();
        Self::count_call(&mut state, "readdir", path);
        if let Some(err) = Self::take_failure(&mut state, "readdir", path) {
            return Err(err);
        }
        match state.nodes.get(path) {
            Some(node) if node.kind.is_directory() => {}
            Some(_) => {
                return Err(VfsError::InvalidParams(format!("not a directory: {path}")));
            }
            None => return Err(VfsError::NotFound(path.to_string())),
        }

        let children: Vec<(String, String)> = state
            .nodes
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(path)?;
                if rest.is_empty() {
                    return None;
                }
                let name = rest.strip_suffix('/').unwrap_or(rest);
                if name.is_empty() || name.contains('/') {
                    return None;
                }
                Some((name.to_string(), key.clone()))
            })
            .collect();

        let mut listed = Vec::with_capacity(children.len());
        for (name, key) in children {
            let stats = match Self::take_failure(&mut state, "stat", &key) {
                Some(err) => Err(err),
                None => state
                    .nodes
                    .get(&key)
                    .map(Self::node_stats)
                    .ok_or_else(|| VfsError::NotFound(key.clone())),
            };
            listed.push(ListedEntry { name, stats });
        }
        Ok(listed)
    }

    async fn mkdir(&self, path: &str) -> VfsResult<FileStats> {
        let mut state = self.lock();
        Self::count_call(&mut state, "mkdir", path);
        if let Some(err) = Self::take_failure(&mut state, "mkdir", path) {
            return Err(err);
        }
        let key = format!("{}/", path.trim_end_matches('/'));
        if state.nodes.contains_key(&key) {
            return Err(VfsError::AlreadyExists(key));
        }
        if let Some(parent) = EntryPaths::derive(&key, EntryKind::Directory).parent_path {
            if !state.nodes.contains_key(&parent) {
                return Err(VfsError::NotFound(parent));
            }
        }
        state.clock = state.clock.saturating_add(1);
        let node = MockNode {
            kind: EntryKind::Directory,
            size: 0,
            mtime: state.clock,
            real_path: None,
        };
        let stats = Self::node_stats(&node);
        state.nodes.insert(key, node);
        Ok(stats)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> VfsResult<()> {
        let mut state = self.lock();
        Self::count_call(&mut state, "rename", old_path);
        if let Some(err) = Self::take_failure(&mut state, "rename", old_path) {
            return Err(err);
        }
        if state.nodes.contains_key(new_path) {
            return Err(VfsError::AlreadyExists(new_path.to_string()));
        }
        let Some(node) = state.nodes.remove(old_path) else {
            return Err(VfsError::NotFound(old_path.to_string()));
        };
        if node.kind.is_directory() {
            let descendants: Vec<(String, MockNode)> = state
                .nodes
                .iter()
                .filter(|(key, _)| key.starts_with(old_path))
                .map(|(key, node)| (key.clone(), node.clone()))
                .collect();
            for (key, _) in &descendants {
                state.nodes.remove(key);
            }
            for (key, moved) in descendants {
                if let Some(rest) = key.strip_prefix(old_path) {
                    state.nodes.insert(format!("{new_path}{rest}"), moved);
                }
            }
        }
        state.nodes.insert(new_path.to_string(), node);
        Ok(())
    }

    async fn unlink(&self, path: &str) -> VfsResult<()> {
        let mut state = self.lock();
        Self::count_call(&mut state, "unlink", path);
        if let Some(err) = Self::take_failure(&mut state, "unlink", path) {
            return Err(err);
        }
        if !state.nodes.contains_key(path) {
            return Err(VfsError::NotFound(path.to_string()));
        }
        Self::remove_node(&mut state, path);
        Ok(())
    }

    fn supports_trash(&self) -> bool {
        self.supports_trash
    }

    async fn move_to_trash(&self, path: &str) -> VfsResult<()> {
        let mut state = self.lock();
        Self::count_call(&mut state, "trash", path);
        if let Some(err) = Self::take_failure(&mut state, "trash", path) {
            return Err(err);
        }
        if !state.nodes.contains_key(path) {
            return Err(VfsError::NotFound(path.to_string()));
        }
        Self::remove_node(&mut state, path);
        state.trashed.push(path.to_string());
        Ok(())
    }

    async fn watch_path(&self, path: &str) -> VfsResult<()> {
        {
            let mut state = self.lock();
            Self::count_call(&mut state, "watch", path);
            if let Some(err) = Self::take_failure(&mut state, "watch", path) {
                return Err(err);
            }
        }
        let mut held = self.watch_hold.subscribe();
        while *held.borrow_and_update() {
            trace!(path, "mock: watch held");
            if held.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn unwatch_path(&self, path: &str) -> VfsResult<()> {
        let mut state = self.lock();
        Self::count_call(&mut state, "unwatch", path);
        if let Some(err) = Self::take_failure(&mut state, "unwatch", path) {
            return Err(err);
        }
        Ok(())
    }
}
