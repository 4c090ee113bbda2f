//! Virtual Filesystem abstraction.
//!
//! Key components:
//!
//! - [`VfsOps`] / [`FileHandle`] - the capability interface every backend implements
//! - [`LocalBackend`] - local directory tree (with path security)
//! - [`MemoryBackend`] - in-memory filesystem (cache tier, testing)
//! - [`FastReadBackend`] - read-only local backend with raw dirent listing
//! - [`OverlayBackend`] - two backends reconciled by modification time
//! - [`RoutedBackend`] - splits a path prefix off to a second backend
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: operations use paths so they can be
//!   forwarded over the network unchanged.
//! - **Handles are owned**: `open` returns `Box<dyn FileHandle>` and every
//!   handle method takes `&mut self`.
//! - **Recursive composition**: composite backends accept `Arc<dyn VfsOps>`
//!   and do not care what is underneath.

pub mod backends;
pub mod dirent;
mod error;
mod ops;
mod types;

pub use backends::{
    FastReadBackend, LayeredFile, LocalBackend, MemoryBackend, OverlayBackend, OverlayState,
    RoutedBackend,
};
pub use error::{VfsError, VfsErrorKind, VfsResult};
pub use ops::{FileHandle, VfsOps};
pub use types::{from_unix_seconds, unix_seconds, FileMetadata, FileMode, FileType, OpenFlags};
