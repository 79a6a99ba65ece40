//! VFS error types.

use std::io;
use thiserror::Error;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File, directory, handler, mount point or device not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// No handler owns the virtual root of this path.
    #[error("no handler for path: {0}")]
    NoMountPoint(String),

    /// The owning handler exists but its storage is not mounted.
    #[error("handler not mounted: {0}")]
    NotMounted(String),

    /// Mounting is not available on this platform.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The operation cannot complete against the current tree state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored record could not be decoded.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Handler is read-only.
    #[error("handler is read-only: {0}")]
    ReadOnly(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path or argument.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Storage configuration could not be loaded or stored.
    #[error("config error: {0}")]
    Config(String),

    /// A cancellable operation was cancelled by its caller.
    #[error("operation cancelled")]
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

    /// Create a NoMountPoint error.
    pub fn no_mount_point(path: impl Into<String>) -> Self {
        Self::NoMountPoint(path.into())
    }

    /// Create a NotMounted error.
    pub fn not_mounted(id: impl Into<String>) -> Self {
        Self::NotMounted(id.into())
    }

    /// Create an UnsupportedPlatform error.
    pub fn unsupported_platform(msg: impl Into<String>) -> Self {
        Self::UnsupportedPlatform(msg.into())
    }

    /// Create a Conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a ParseFailure error.
    pub fn parse_failure(msg: impl Into<String>) -> Self {
        Self::ParseFailure(msg.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for every "does not exist" flavour: missing path, unknown
    /// virtual root, or an I/O `NotFound`.
    pub fn is_not_found(&self) -> bool {
        match self {
            VfsError::NotFound(_) | VfsError::NoMountPoint(_) => true,
            VfsError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Map an I/O error on `path` to `NotFound` when the path is missing,
    /// keeping every other kind as `Io`.
    pub(crate) fn from_io(err: io::Error, path: impl Into<String>) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.into())
        } else {
            Self::Io(err)
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_family() {
        assert!(VfsError::not_found("/a").is_not_found());
        assert!(VfsError::no_mount_point("/a").is_not_found());
        assert!(VfsError::Io(io::Error::from(io::ErrorKind::NotFound)).is_not_found());
        assert!(!VfsError::conflict("/a").is_not_found());
    }

    #[test]
    fn test_from_io_keeps_other_kinds() {
        let err = VfsError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "/x");
        assert!(matches!(err, VfsError::Io(_)));
        let err = VfsError::from_io(io::Error::from(io::ErrorKind::NotFound), "/x");
        assert!(matches!(err, VfsError::NotFound(p) if p == "/x"));
    }
}
