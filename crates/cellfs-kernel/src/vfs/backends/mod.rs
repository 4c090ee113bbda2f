//! VFS backends.
//!
//! Backends implement [`VfsOps`](super::VfsOps) for different storage types.
//! `LocalBackend`, `MemoryBackend` and `FastReadBackend` are leaves;
//! `OverlayBackend` and `RoutedBackend` compose other backends.

mod fastread;
mod local;
mod memory;
mod overlay;
mod routed;

pub use fastread::FastReadBackend;
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use overlay::{LayeredFile, OverlayBackend, OverlayState};
pub use routed::RoutedBackend;
