//! # cellfs-kernel
//!
//! Core VFS crate for cellfs: the capability interface shared by every
//! backend, the error taxonomy, and the local/composite backends.
//!
//! Callers program against [`VfsOps`] and [`FileHandle`]. Whether the
//! filesystem underneath is a local directory, an in-memory tree, an overlay
//! of two backends or (through `cellfs-client`) a remote server does not
//! change the calling code, and composite backends accept any of them,
//! including each other.

pub mod vfs;

pub use vfs::{
    FastReadBackend, FileHandle, FileMetadata, FileMode, FileType, LayeredFile, LocalBackend,
    MemoryBackend, OpenFlags, OverlayBackend, OverlayState, RoutedBackend, VfsError,
    VfsErrorKind, VfsOps, VfsResult,
};
