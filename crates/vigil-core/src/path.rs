//! Canonical path handling.
//!
//! Entry paths are absolute, `/`-separated strings. Directory paths carry
//! exactly one trailing `/`; file paths carry none. Everything here is
//! purely lexical and never touches a backend.

use crate::stats::EntryKind;

/// Derived path fields for one cache entry.
///
/// `name` and `parent_path` are always computed from `path` as a set; a path
/// change derives a whole new value and swaps it in, so the three fields can
/// never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPaths {
    /// Canonical absolute path.
    pub path: String,
    /// Final path segment. Empty for the root directory `/`.
    pub name: String,
    /// Canonical path of the containing directory. `None` for the root.
    pub parent_path: Option<String>,
}

impl EntryPaths {
    /// Derives the canonical path, name, and parent path for `path`.
    #[must_use]
    pub fn derive(path: &str, kind: EntryKind) -> Self {
        let path = normalize(path, kind);
        let mut parts: Vec<&str> = path.split('/').collect();
        if kind.is_directory() {
            // the trailing slash yields an empty final segment
            parts.pop();
        }
        let name = parts.pop().unwrap_or_default().to_string();
        let parent_path = if parts.is_empty() {
            None
        } else {
            Some(format!("{}/", parts.join("/")))
        };
        Self {
            path,
            name,
            parent_path,
        }
    }
}

/// Applies the trailing-slash rule: directory paths end with exactly one
/// `/`, file paths with none.
#[must_use]
pub fn normalize(path: &str, kind: EntryKind) -> String {
    let trimmed = path.trim_end_matches('/');
    match kind {
        EntryKind::Directory => format!("{trimmed}/"),
        EntryKind::File => trimmed.to_string(),
    }
}

/// Appends a `/` when `path` does not already end with one.
#[must_use]
pub fn ensure_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// True when `path` is `root` itself or lies underneath it.
///
/// `root` must be a directory path with its trailing slash, so plain prefix
/// matching cannot confuse `/proj/` with `/project2/`.
#[must_use]
pub fn is_within(path: &str, root: &str) -> bool {
    path.starts_with(root)
}

/// Rewrites `path` so the leading `old_prefix` becomes `new_prefix`.
///
/// Returns `None` when `path` does not start with `old_prefix`.
#[must_use]
pub fn reprefix(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    path.strip_prefix(old_prefix)
        .map(|rest| format!("{new_prefix}{rest}"))
}
