//! cellfs remote filesystem client.
//!
//! [`RemoteBackend`] implements [`VfsOps`](cellfs_kernel::VfsOps) by talking
//! to a `cellfs-server`, so a remote directory can be used anywhere a local
//! backend can, including as one side of an overlay.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use cellfs_client::{ClientConfig, RemoteBackend};
//! use cellfs_discovery::DiscoveryService;
//! use cellfs_kernel::VfsOps;
//! use std::path::Path;
//!
//! let discovery = DiscoveryService::new(Default::default());
//! discovery.start()?;
//! let fs = RemoteBackend::connect(&discovery, "cellfs://cellfs.FS", ClientConfig::default()).await?;
//! let readme = fs.read_all(Path::new("README.md")).await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod config;
pub mod constants;
mod file;

pub use backend::{ConnectError, RemoteBackend};
pub use config::ClientConfig;
pub use file::RemoteFile;
