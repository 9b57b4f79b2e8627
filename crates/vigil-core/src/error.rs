use thiserror::Error;

/// Stable error codes for virtual file system operations.
///
/// Backends map their native failures onto these codes at the boundary; the
/// cache layer treats the codes as opaque, invalidates what they touch, and
/// propagates them without retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VfsError {
    /// Operation arguments were malformed or unsupported for the entry kind.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Missing directory or file.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The entry could not be read.
    #[error("Not readable: {0}")]
    NotReadable(String),

    /// The entry could not be written.
    #[error("Not writable: {0}")]
    NotWritable(String),

    /// Creation or rename target already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The backend ran out of space.
    #[error("Out of space: {0}")]
    OutOfSpace(String),

    /// A traversal exceeded its entry budget.
    #[error("Too many entries under {0}")]
    TooManyEntries(String),

    /// The path is not inside any watched root.
    #[error("Root not watched: {0}")]
    RootNotWatched(String),

    /// Unclassified backend failure.
    #[error("Unknown file system error: {0}")]
    Unknown(String),
}

/// Convenience result type for file system operations.
pub type VfsResult<T> = Result<T, VfsError>;

impl From<std::io::Error> for VfsError {
    /// Maps native I/O failures onto the stable code set. Backends built on
    /// `std::io` use this at their boundary; kinds without a counterpart
    /// collapse to [`VfsError::Unknown`].
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let msg = err.to_string();
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(msg),
            ErrorKind::PermissionDenied => Self::NotReadable(msg),
            ErrorKind::ReadOnlyFilesystem => Self::NotWritable(msg),
            ErrorKind::AlreadyExists => Self::AlreadyExists(msg),
            ErrorKind::StorageFull => Self::OutOfSpace(msg),
            ErrorKind::InvalidInput => Self::InvalidParams(msg),
            _ => Self::Unknown(msg),
        }
    }
}
