//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

pub use cellfs_discovery::constants::DEFAULT_RESOLVE_TIMEOUT;
pub use cellfs_proto::constants::{CHUNK_SIZE, DEFAULT_CALL_TIMEOUT, READDIR_BATCH};

/// Bound on establishing one TCP connection. Every session and unary call
/// opens its own connection, so this stays short.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
