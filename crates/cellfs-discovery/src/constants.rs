//! Discovery constants.
//!
//! Centralizes the wire-level defaults shared by announcers and listeners.

use std::net::Ipv4Addr;
use std::time::Duration;

/// URI scheme of discovery targets (`cellfs://host@service/path`).
pub const TARGET_SCHEME: &str = "cellfs";

/// Multicast group announcements are sent to.
pub const DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);

/// UDP port of the discovery group.
pub const DISCOVERY_PORT: u16 = 9999;

/// Receive buffer size; larger datagrams are truncated by the kernel.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// How often an announcer repeats itself.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on waiting for a target to appear.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Back-off after a failed multicast receive.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);
