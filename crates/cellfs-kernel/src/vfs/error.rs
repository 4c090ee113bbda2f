//! VFS error types.

use std::io;
use thiserror::Error;

/// VFS error type.
///
/// Every backend reports failures through this enum so that callers can
/// match on the kind regardless of where the failure happened (local disk,
/// remote session, overlay fan-out).
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied by the underlying filesystem.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Operation refused by a read-only or restricted backend.
    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    /// Operation spans two roots that must not be bridged.
    #[error("cross-backend operation not allowed: {0}")]
    CrossBackend(String),

    /// Transport or decoding failure on a remote session.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// Overlay backends disagreed in a way that cannot be reconciled.
    #[error("inconsistent backends: {0}")]
    Inconsistent(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path or argument.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Discriminant of [`VfsError`], without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VfsErrorKind {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    NotPermitted,
    CrossBackend,
    Protocol,
    Inconsistent,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    PathEscapesRoot,
    InvalidPath,
    Io,
    Other,
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotPermitted error.
    pub fn not_permitted(op: impl Into<String>) -> Self {
        Self::NotPermitted(op.into())
    }

    /// Create a CrossBackend error.
    pub fn cross_backend(msg: impl Into<String>) -> Self {
        Self::CrossBackend(msg.into())
    }

    /// Create a Protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an Inconsistent error.
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
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

    /// The kind of this error.
    pub fn kind(&self) -> VfsErrorKind {
        match self {
            VfsError::NotFound(_) => VfsErrorKind::NotFound,
            VfsError::AlreadyExists(_) => VfsErrorKind::AlreadyExists,
            VfsError::PermissionDenied(_) => VfsErrorKind::PermissionDenied,
            VfsError::NotPermitted(_) => VfsErrorKind::NotPermitted,
            VfsError::CrossBackend(_) => VfsErrorKind::CrossBackend,
            VfsError::Protocol(_) => VfsErrorKind::Protocol,
            VfsError::Inconsistent(_) => VfsErrorKind::Inconsistent,
            VfsError::NotADirectory(_) => VfsErrorKind::NotADirectory,
            VfsError::IsADirectory(_) => VfsErrorKind::IsADirectory,
            VfsError::DirectoryNotEmpty(_) => VfsErrorKind::DirectoryNotEmpty,
            VfsError::PathEscapesRoot(_) => VfsErrorKind::PathEscapesRoot,
            VfsError::InvalidPath(_) => VfsErrorKind::InvalidPath,
            VfsError::Io(_) => VfsErrorKind::Io,
            VfsError::Other(_) => VfsErrorKind::Other,
        }
    }

    /// Returns true if this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == VfsErrorKind::NotFound
    }
}

/// Classify an I/O error into the matching VFS error kind.
///
/// Anything that has no typed counterpart stays wrapped in [`VfsError::Io`].
impl From<io::Error> for VfsError {
    fn from(e: io::Error) -> Self {
        #[cfg(unix)]
        if e.raw_os_error() == Some(libc::EPERM) {
            return VfsError::NotPermitted(e.to_string());
        }

        match e.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound(e.to_string()),
            io::ErrorKind::AlreadyExists => VfsError::AlreadyExists(e.to_string()),
            io::ErrorKind::PermissionDenied => VfsError::PermissionDenied(e.to_string()),
            io::ErrorKind::NotADirectory => VfsError::NotADirectory(e.to_string()),
            io::ErrorKind::IsADirectory => VfsError::IsADirectory(e.to_string()),
            io::ErrorKind::DirectoryNotEmpty => VfsError::DirectoryNotEmpty(e.to_string()),
            io::ErrorKind::CrossesDevices => VfsError::CrossBackend(e.to_string()),
            io::ErrorKind::InvalidInput => VfsError::InvalidPath(e.to_string()),
            _ => VfsError::Io(e),
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::PermissionDenied(msg) | VfsError::NotPermitted(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::CrossBackend(msg) => io::Error::new(io::ErrorKind::CrossesDevices, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            VfsError::PathEscapesRoot(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::Io(e) => e,
            VfsError::Protocol(msg) | VfsError::Inconsistent(msg) | VfsError::Other(msg) => {
                io::Error::other(msg)
            }
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
