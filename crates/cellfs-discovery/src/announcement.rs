//! Announcement datagrams.
//!
//! A datagram carries exactly one postcard-encoded [`Announcement`]. Senders
//! may pad the datagram with zero bytes; receivers trim trailing zeros
//! before decoding. Names are never empty and never end in NUL, so the
//! last byte of a valid encoding is never zero.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::{DiscoveryError, DiscoveryResult};

/// One discovery message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Announcement {
    /// `name` is served at `addr`. Receivers replace the IP with the
    /// datagram's source address and keep the port.
    Service { addr: SocketAddr, name: String },
    /// The sending machine calls itself `name`.
    Host { name: String },
}

impl Announcement {
    pub fn service(name: impl Into<String>, addr: SocketAddr) -> Self {
        Announcement::Service {
            addr,
            name: name.into(),
        }
    }

    pub fn host(name: impl Into<String>) -> Self {
        Announcement::Host { name: name.into() }
    }

    fn name(&self) -> &str {
        match self {
            Announcement::Service { name, .. } | Announcement::Host { name } => name,
        }
    }

    fn validate(self) -> DiscoveryResult<Self> {
        let name = self.name();
        if name.is_empty() {
            return Err(DiscoveryError::Decode("empty name".into()));
        }
        if name.ends_with('\0') {
            return Err(DiscoveryError::Decode("name ends with NUL".into()));
        }
        Ok(self)
    }

    /// Encode for sending.
    pub fn encode(&self) -> DiscoveryResult<Vec<u8>> {
        let checked = self.clone().validate().map_err(|e| DiscoveryError::Encode(e.to_string()))?;
        postcard::to_stdvec(&checked).map_err(|e| DiscoveryError::Encode(e.to_string()))
    }

    /// Decode a received datagram, tolerating trailing zero padding.
    pub fn decode(datagram: &[u8]) -> DiscoveryResult<Self> {
        let end = datagram
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        if end == 0 {
            return Err(DiscoveryError::Decode("empty datagram".into()));
        }
        let announcement: Announcement = postcard::from_bytes(&datagram[..end])
            .map_err(|e| DiscoveryError::Decode(e.to_string()))?;
        announcement.validate()
    }
}
