//! VFS error types.

use std::io;
use thiserror::Error;

/// How a failure surfaces to HTTP clients.
///
/// The protocol handler and the server both match on this rather than on
/// individual error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Target is absent.
    NotFound,
    /// The request conflicts with the current state of the target.
    Conflict,
    /// A conditional header was missing or did not match.
    PreconditionFailed,
    /// The request tried to reach outside the configured root.
    Forbidden,
    /// The request itself is malformed.
    BadRequest,
    /// Anything unclassified.
    Internal,
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Source of a copy or move does not exist.
    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Another request holds the write lock on this file.
    #[error("file is locked by another writer: {0}")]
    Locked(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The client went away before the transfer finished.
    #[error("request cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a SourceNotFound error.
    pub fn source_not_found(path: impl Into<String>) -> Self {
        Self::SourceNotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a Locked error.
    pub fn locked(path: impl Into<String>) -> Self {
        Self::Locked(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Attach the offending path to a bare I/O error.
    ///
    /// `NotFound`, `AlreadyExists`, `PermissionDenied` and `DirectoryNotEmpty`
    /// are lifted into their dedicated variants so callers can match on them.
    pub fn at(path: &std::path::Path, err: io::Error) -> Self {
        let shown = path.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(shown),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(shown),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(shown),
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty(shown),
            _ => Self::Io(io::Error::new(err.kind(), format!("{shown}: {err}"))),
        }
    }

    /// Classify this error for the HTTP boundary.
    pub fn kind(&self) -> FailureKind {
        match self {
            VfsError::NotFound(_) | VfsError::SourceNotFound(_) => FailureKind::NotFound,
            VfsError::AlreadyExists(_)
            | VfsError::PermissionDenied(_)
            | VfsError::DirectoryNotEmpty(_)
            | VfsError::Locked(_)
            | VfsError::Cancelled => FailureKind::Conflict,
            VfsError::PathEscapesRoot(_) => FailureKind::Forbidden,
            VfsError::InvalidPath(_) => FailureKind::BadRequest,
            VfsError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => FailureKind::NotFound,
                io::ErrorKind::PermissionDenied
                | io::ErrorKind::AlreadyExists
                | io::ErrorKind::DirectoryNotEmpty => FailureKind::Conflict,
                _ => FailureKind::Internal,
            },
            VfsError::Other(_) => FailureKind::Internal,
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_at_lifts_known_kinds() {
        let err = VfsError::at(
            Path::new("/srv/a.txt"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, VfsError::NotFound(ref p) if p == "/srv/a.txt"));

        let err = VfsError::at(
            Path::new("/srv/dir"),
            io::Error::new(io::ErrorKind::DirectoryNotEmpty, "busy"),
        );
        assert_eq!(err.kind(), FailureKind::Conflict);
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(VfsError::not_found("x").kind(), FailureKind::NotFound);
        assert_eq!(VfsError::source_not_found("x").kind(), FailureKind::NotFound);
        assert_eq!(VfsError::locked("x").kind(), FailureKind::Conflict);
        assert_eq!(VfsError::Cancelled.kind(), FailureKind::Conflict);
        assert_eq!(VfsError::path_escapes_root("x").kind(), FailureKind::Forbidden);
        assert_eq!(VfsError::invalid_path("x").kind(), FailureKind::BadRequest);
        assert_eq!(
            VfsError::Io(io::Error::other("disk on fire")).kind(),
            FailureKind::Internal
        );
    }
}
