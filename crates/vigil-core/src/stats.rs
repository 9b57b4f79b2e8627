use serde::{Deserialize, Serialize};

/// Discriminates file entries from directory entries.
///
/// The kind is fixed at entry construction and never changes for a live
/// entry; a path that stops being a directory is a different entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

impl EntryKind {
    /// True for [`EntryKind::File`].
    #[must_use]
    pub fn is_file(self) -> bool {
        matches!(self, Self::File)
    }

    /// True for [`EntryKind::Directory`].
    #[must_use]
    pub fn is_directory(self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// Stat record reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    /// Entry kind reported by the backend.
    pub kind: EntryKind,
    /// Size of the entry in bytes.
    pub size: u64,
    /// Modification time in seconds since the UNIX epoch.
    pub mtime: u64,
    /// Fully resolved path when the entry is reached through a link.
    ///
    /// `None` when the path needed no resolution. Traversal keys its cycle
    /// guard on this.
    pub real_path: Option<String>,
}

impl FileStats {
    /// Builds a record for a regular file.
    #[must_use]
    pub fn file(size: u64, mtime: u64) -> Self {
        Self {
            kind: EntryKind::File,
            size,
            mtime,
            real_path: None,
        }
    }

    /// Builds a record for a directory.
    #[must_use]
    pub fn directory(mtime: u64) -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            mtime,
            real_path: None,
        }
    }

    /// Attaches the resolved link target.
    #[must_use]
    pub fn with_real_path(mut self, real_path: impl Into<String>) -> Self {
        self.real_path = Some(real_path.into());
        self
    }

    /// True if the record describes a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    /// True if the record describes a regular file.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }
}
