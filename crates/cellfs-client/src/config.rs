use std::time::Duration;

use crate::constants::{CONNECT_TIMEOUT, DEFAULT_CALL_TIMEOUT, DEFAULT_RESOLVE_TIMEOUT};

/// Timeouts applied by a [`RemoteBackend`](crate::RemoteBackend).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bound on one request/response exchange.
    pub call_timeout: Duration,
    /// Bound on establishing a connection to one address.
    pub connect_timeout: Duration,
    /// Bound on waiting for discovery to find the target; `None` waits forever.
    pub resolve_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            resolve_timeout: Some(DEFAULT_RESOLVE_TIMEOUT),
        }
    }
}
