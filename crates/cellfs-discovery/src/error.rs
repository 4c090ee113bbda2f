//! Discovery error types.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the discovery layer.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Socket setup or send failure.
    #[error("discovery I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram body could not be decoded.
    #[error("malformed announcement: {0}")]
    Decode(String),

    /// Announcement could not be encoded.
    #[error("failed to encode announcement: {0}")]
    Encode(String),

    /// Target string is not `cellfs://[host@]service[/path]`.
    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// No address for the target appeared in time.
    #[error("no address for {target} after {after:?}")]
    Timeout { target: String, after: Duration },

    /// The discovery service was stopped.
    #[error("discovery service stopped")]
    Stopped,
}

impl DiscoveryError {
    pub(crate) fn invalid_target(target: &str, reason: impl Into<String>) -> Self {
        DiscoveryError::InvalidTarget {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}

/// Discovery result type.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
