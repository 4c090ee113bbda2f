//! Discovery configuration.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use crate::constants::{
    ANNOUNCE_INTERVAL, DEFAULT_RESOLVE_TIMEOUT, DISCOVERY_GROUP, DISCOVERY_PORT,
    MAX_DATAGRAM_SIZE,
};

/// Settings shared by the listener, announcers and resolvers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Multicast group and port.
    pub group: SocketAddrV4,
    /// Local interface to join the group on (`0.0.0.0` = default route).
    pub interface: Ipv4Addr,
    /// Announcement period.
    #[serde(with = "secs")]
    pub announce_interval: Duration,
    /// Bound on `resolve`/`resolve_now`; `None` waits forever.
    #[serde(with = "opt_secs")]
    pub resolve_timeout: Option<Duration>,
    /// Receive buffer size.
    pub max_datagram_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            group: SocketAddrV4::new(DISCOVERY_GROUP, DISCOVERY_PORT),
            interface: Ipv4Addr::UNSPECIFIED,
            announce_interval: ANNOUNCE_INTERVAL,
            resolve_timeout: Some(DEFAULT_RESOLVE_TIMEOUT),
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

/// Durations as fractional seconds in config files.
pub mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Optional durations as fractional seconds; absent or `0` means none.
pub mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.map_or(0.0, |d| d.as_secs_f64()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = f64::deserialize(d)?;
        if secs == 0.0 {
            return Ok(None);
        }
        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}
