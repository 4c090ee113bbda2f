//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub use cellfs_proto::constants::{DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT, DEFAULT_SERVICE};

/// Default bind address. Remote clients find the server through multicast
/// discovery, so listen on every interface.
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Default listen address.
pub const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(DEFAULT_BIND_IP, DEFAULT_PORT);
