//! Bounded recursive traversal.
//!
//! Traversal is depth-first from a starting entry, with three safety
//! rails: a depth bound, a traversal-wide entry budget, and cycle
//! detection keyed on resolved paths so symlink loops terminate silently.
//! Within a directory, children can be visited serially (the default,
//! preserving order) or with bounded concurrency.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::stream::{self, TryStreamExt};

use vigil_core::{FileStats, VfsError, VfsResult};

use crate::entry::Entry;

/// Default depth bound below the starting entry.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Default traversal-wide entry budget.
pub const DEFAULT_MAX_ENTRIES: usize = 200_000;

/// Tunables for [`Entry::visit`].
#[derive(Debug, Clone)]
pub struct VisitOptions {
    /// Maximum descent depth below the starting entry.
    pub max_depth: usize,
    /// Traversal-wide budget of visited entries.
    pub max_entries: usize,
    /// Visit children in case-insensitive name order.
    pub sort_list: bool,
    /// Concurrent child visits per directory. `1` preserves listing
    /// order.
    pub concurrency: usize,
}

impl Default for VisitOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_entries: DEFAULT_MAX_ENTRIES,
            sort_list: false,
            concurrency: 1,
        }
    }
}

impl VisitOptions {
    /// Caps descent depth below the starting entry.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Caps the total number of visited entries.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sorts children case-insensitively by name before visiting.
    #[must_use]
    pub fn with_sort_list(mut self, sort_list: bool) -> Self {
        self.sort_list = sort_list;
        self
    }

    /// Visits up to `concurrency` children of a directory at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

struct VisitState<F> {
    visitor: Mutex<F>,
    visited: Mutex<HashSet<String>>,
    count: AtomicUsize,
    options: VisitOptions,
    root_path: String,
}

impl Entry {
    /// Recursively visits this entry and everything beneath it.
    ///
    /// The visitor sees each entry with its stats and returns whether to
    /// descend into it; returning `false` on a directory prunes its
    /// subtree without affecting siblings. Directories already seen under
    /// their resolved path are pruned silently, which is what terminates
    /// symlink cycles.
    ///
    /// # Errors
    ///
    /// [`VfsError::TooManyEntries`] once the entry budget is exhausted. A
    /// failed listing aborts the whole traversal with the backend error,
    /// and a failed stat of the starting entry aborts before anything is
    /// visited.
    pub async fn visit<F>(&self, visitor: F, options: VisitOptions) -> VfsResult<()>
    where
        F: FnMut(&Entry, &FileStats) -> bool + Send,
    {
        let stats = self.stat().await?;
        let state = VisitState {
            visitor: Mutex::new(visitor),
            visited: Mutex::new(HashSet::new()),
            count: AtomicUsize::new(0),
            options,
            root_path: self.path(),
        };
        visit_helper(self.clone(), stats, &state, 0).await
    }
}

fn visit_helper<'a, F>(
    entry: Entry,
    stats: FileStats,
    state: &'a VisitState<F>,
    depth: usize,
) -> Pin<Box<dyn Future<Output = VfsResult<()>> + Send + 'a>>
where
    F: FnMut(&Entry, &FileStats) -> bool + Send,
{
    Box::pin(async move {
        if entry.is_directory() {
            let key = stats.real_path.clone().unwrap_or_else(|| entry.path());
            let already_seen = {
                let mut visited = state
                    .visited
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                !visited.insert(key)
            };
            // a directory reached twice means a link cycle
            if already_seen {
                return Ok(());
            }
        }

        let seen = state.count.fetch_add(1, Ordering::SeqCst);
        if seen >= state.options.max_entries {
            return Err(VfsError::TooManyEntries(state.root_path.clone()));
        }

        let descend = {
            let mut visitor = state
                .visitor
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            visitor(&entry, &stats)
        };

        if !descend || entry.is_file() || depth >= state.options.max_depth {
            return Ok(());
        }

        let contents = entry.read_contents().await?;
        let mut children = contents.entries;
        if state.options.sort_list {
            children.sort_by(|(a, _), (b, _)| {
                a.name().to_lowercase().cmp(&b.name().to_lowercase())
            });
        }

        let limit = state.options.concurrency.max(1);
        stream::iter(children.into_iter().map(Ok))
            .try_for_each_concurrent(Some(limit), |(child, child_stats)| {
                visit_helper(child, child_stats, state, depth.saturating_add(1))
            })
            .await
    })
}
