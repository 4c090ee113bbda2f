//! cellfs remote filesystem server.
//!
//! Exposes any [`VfsOps`](cellfs_kernel::VfsOps) backend over the cellfs
//! protocol. Each TCP connection is either a per-file session or a single
//! unary call; see `cellfs-proto` for the message flow.

pub mod config;
pub mod constants;
mod server;
mod session;
mod unary;

pub use config::{ConfigError, FileConfig, ServerConfig};
pub use server::FsServer;
