//! Remote status codes and their mapping to [`VfsError`].

use cellfs_kernel::VfsError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error class carried across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    NotPermitted,
    CrossBackend,
    InvalidArgument,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    Inconsistent,
    Internal,
}

/// A failed remote operation: code plus the server's detail text (usually
/// the path involved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == StatusCode::NotFound
    }

    /// Rebuild the error on the client side.
    pub fn into_vfs_error(self) -> VfsError {
        let msg = self.message;
        match self.code {
            StatusCode::NotFound => VfsError::NotFound(msg),
            StatusCode::AlreadyExists => VfsError::AlreadyExists(msg),
            StatusCode::PermissionDenied => VfsError::PermissionDenied(msg),
            StatusCode::NotPermitted => VfsError::NotPermitted(msg),
            StatusCode::CrossBackend => VfsError::CrossBackend(msg),
            StatusCode::InvalidArgument => VfsError::InvalidPath(msg),
            StatusCode::NotADirectory => VfsError::NotADirectory(msg),
            StatusCode::IsADirectory => VfsError::IsADirectory(msg),
            StatusCode::DirectoryNotEmpty => VfsError::DirectoryNotEmpty(msg),
            StatusCode::Inconsistent => VfsError::Inconsistent(msg),
            StatusCode::Internal => VfsError::Other(msg),
        }
    }
}

impl From<&VfsError> for Status {
    fn from(e: &VfsError) -> Self {
        match e {
            VfsError::NotFound(m) => Status::new(StatusCode::NotFound, m),
            VfsError::AlreadyExists(m) => Status::new(StatusCode::AlreadyExists, m),
            VfsError::PermissionDenied(m) => Status::new(StatusCode::PermissionDenied, m),
            VfsError::PathEscapesRoot(m) => {
                Status::new(StatusCode::PermissionDenied, format!("path escapes root: {m}"))
            }
            VfsError::NotPermitted(m) => Status::new(StatusCode::NotPermitted, m),
            VfsError::CrossBackend(m) => Status::new(StatusCode::CrossBackend, m),
            VfsError::InvalidPath(m) => Status::new(StatusCode::InvalidArgument, m),
            VfsError::NotADirectory(m) => Status::new(StatusCode::NotADirectory, m),
            VfsError::IsADirectory(m) => Status::new(StatusCode::IsADirectory, m),
            VfsError::DirectoryNotEmpty(m) => Status::new(StatusCode::DirectoryNotEmpty, m),
            VfsError::Inconsistent(m) => Status::new(StatusCode::Inconsistent, m),
            VfsError::Protocol(_) | VfsError::Io(_) | VfsError::Other(_) => {
                Status::new(StatusCode::Internal, e.to_string())
            }
        }
    }
}

impl From<VfsError> for Status {
    fn from(e: VfsError) -> Self {
        Status::from(&e)
    }
}

impl From<Status> for VfsError {
    fn from(s: Status) -> Self {
        s.into_vfs_error()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellfs_kernel::VfsErrorKind;

    #[test]
    fn test_not_found_is_lossless() {
        let status = Status::from(VfsError::not_found("a/b.txt"));
        assert!(status.is_not_found());

        let back = status.into_vfs_error();
        assert!(back.is_not_found());
        assert_eq!(back.to_string(), VfsError::not_found("a/b.txt").to_string());
    }

    #[test]
    fn test_every_kind_has_a_code() {
        let cases = [
            (VfsError::already_exists("x"), VfsErrorKind::AlreadyExists),
            (VfsError::not_permitted("x"), VfsErrorKind::NotPermitted),
            (VfsError::cross_backend("x"), VfsErrorKind::CrossBackend),
            (VfsError::directory_not_empty("x"), VfsErrorKind::DirectoryNotEmpty),
            (VfsError::inconsistent("x"), VfsErrorKind::Inconsistent),
            (VfsError::invalid_path("x"), VfsErrorKind::InvalidPath),
            (VfsError::path_escapes_root("x"), VfsErrorKind::PermissionDenied),
            (VfsError::other("x"), VfsErrorKind::Other),
            (VfsError::protocol("x"), VfsErrorKind::Other),
        ];
        for (err, kind) in cases {
            assert_eq!(Status::from(&err).into_vfs_error().kind(), kind, "{err}");
        }
    }
}
