//! Watched roots and their inclusion filters.
//!
//! A watched root marks a subtree whose backend sends change
//! notifications. Entries under a root are cacheable only while the root is
//! active and the root's filter includes them; everything else is read
//! through to the backend.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::warn;

/// Lifecycle of a watched root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Registered; the backend watch is still being established.
    Starting,
    /// Backend watch established; caches under the root are trustworthy.
    Active,
    /// Unwatched. Entries drop their association lazily.
    Inactive,
}

/// Gitignore-style exclusion rules scoped to a root directory.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    base: String,
    matcher: Gitignore,
}

impl IgnoreRules {
    /// Parses ignore rules from file content, one pattern per line.
    ///
    /// Empty lines and `#` comments are skipped. Patterns match relative to
    /// `base`, the root directory the rules are scoped to.
    ///
    /// # Errors
    ///
    /// Returns an error when a pattern fails to parse.
    pub fn from_content(base: &str, content: &str) -> Result<Self, ignore::Error> {
        let mut builder = GitignoreBuilder::new(base);

        for line in content.lines() {
            let trimmed = line.trim();
            if !trimmed.is_empty() && !trimmed.starts_with('#') {
                builder.add_line(None, trimmed)?;
            }
        }

        Ok(Self {
            base: base.to_string(),
            matcher: builder.build()?,
        })
    }

    /// Root directory these rules are scoped to.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    fn excludes(&self, name: &str, parent_path: &str, is_dir: bool) -> bool {
        let full = format!("{parent_path}{name}");
        let relative = full.strip_prefix(&self.base).unwrap_or(&full);
        self.matcher.matched(relative, is_dir).is_ignore()
    }
}

/// Inclusion filter applied to entries under a watched root.
///
/// Filters see the entry name and the path of its containing directory,
/// never entry handles, so they stay cheap and side-effect free.
#[derive(Clone)]
pub enum RootFilter {
    /// Every entry under the root is included.
    AllowAll,
    /// Entries matching gitignore-style rules are excluded.
    Ignore(IgnoreRules),
    /// Caller-supplied predicate over `(name, parent_path)`.
    Custom(Arc<dyn Fn(&str, &str) -> bool + Send + Sync>),
}

impl RootFilter {
    /// Whether the entry `name` under `parent_path` is included.
    #[must_use]
    pub fn allows(&self, name: &str, parent_path: &str, is_dir: bool) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Ignore(rules) => !rules.excludes(name, parent_path, is_dir),
            Self::Custom(predicate) => predicate(name, parent_path),
        }
    }

    /// Wraps a predicate over `(name, parent_path)`.
    #[must_use]
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }
}

impl fmt::Debug for RootFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllowAll => f.write_str("AllowAll"),
            Self::Ignore(rules) => f.debug_tuple("Ignore").field(&rules.base).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One watched subtree: its path, filter, and lifecycle status.
#[derive(Debug)]
pub struct WatchedRoot {
    id: u64,
    path: String,
    filter: RootFilter,
    status: RwLock<WatchState>,
}

impl WatchedRoot {
    pub(crate) fn new(id: u64, path: String, filter: RootFilter) -> Self {
        Self {
            id,
            path,
            filter,
            status: RwLock::new(WatchState::Starting),
        }
    }

    /// Process-unique identifier. Re-watching a path mints a new id, so
    /// memoized associations with a dead root can never alias a new one.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Root directory path, with its trailing slash.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The root's inclusion filter.
    #[must_use]
    pub fn filter(&self) -> &RootFilter {
        &self.filter
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> WatchState {
        *self.status.read().unwrap_or_else(|err| {
            warn!("WatchedRoot status lock poisoned, recovering");
            err.into_inner()
        })
    }

    pub(crate) fn set_status(&self, status: WatchState) {
        *self
            .status
            .write()
            .unwrap_or_else(PoisonError::into_inner) = status;
    }
}
