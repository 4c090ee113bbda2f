//! The service registry: what the listener has learned so far.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::watch;
use tracing::debug;

use crate::announcement::Announcement;
use crate::error::DiscoveryResult;
use crate::target::Target;

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// Service name → addresses, in first-seen order.
    pub services: BTreeMap<String, Vec<SocketAddr>>,
    /// Hostname → IPs that announced it, in first-seen order.
    pub hosts: BTreeMap<String, Vec<IpAddr>>,
}

impl RegistrySnapshot {
    /// Addresses matching `target`.
    ///
    /// With a host qualifier, only service addresses whose IP announced that
    /// hostname are returned.
    pub fn lookup(&self, target: &Target) -> Vec<SocketAddr> {
        let Some(addrs) = self.services.get(&target.service) else {
            return Vec::new();
        };
        match &target.host {
            None => addrs.clone(),
            Some(host) => {
                let ips = self.hosts.get(host).map(Vec::as_slice).unwrap_or(&[]);
                addrs
                    .iter()
                    .filter(|addr| ips.contains(&addr.ip()))
                    .copied()
                    .collect()
            }
        }
    }
}

/// Shared, append-only registry with change notification.
///
/// Writers are the discovery listener and static registration; readers are
/// resolvers. Every change bumps a generation counter on a watch channel.
#[derive(Debug)]
pub struct Registry {
    state: RwLock<RegistrySnapshot>,
    generation: watch::Sender<u64>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            state: RwLock::new(RegistrySnapshot::default()),
            generation,
        }
    }

    /// Record that `service` is reachable at `addr`. Returns true if new.
    pub fn insert_service(&self, service: &str, addr: SocketAddr) -> bool {
        let added = {
            let mut state = self.state.write();
            let addrs = state.services.entry(service.to_string()).or_default();
            if addrs.contains(&addr) {
                false
            } else {
                addrs.push(addr);
                true
            }
        };
        if added {
            debug!(service, %addr, "learned service address");
            self.bump();
        }
        added
    }

    /// Record that `ip` calls itself `host`. Returns true if new.
    pub fn insert_host(&self, host: &str, ip: IpAddr) -> bool {
        let added = {
            let mut state = self.state.write();
            let ips = state.hosts.entry(host.to_string()).or_default();
            if ips.contains(&ip) {
                false
            } else {
                ips.push(ip);
                true
            }
        };
        if added {
            debug!(host, %ip, "learned host address");
            self.bump();
        }
        added
    }

    /// Apply one received datagram from `src`. Returns true if anything
    /// changed; malformed datagrams are an error and change nothing.
    pub fn ingest(&self, datagram: &[u8], src: SocketAddr) -> DiscoveryResult<bool> {
        match Announcement::decode(datagram)? {
            Announcement::Service { addr, name } => {
                let addr = SocketAddr::new(src.ip(), addr.port());
                Ok(self.insert_service(&name, addr))
            }
            Announcement::Host { name } => Ok(self.insert_host(&name, src.ip())),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.state.read().clone()
    }

    /// Addresses currently matching `target`.
    pub fn lookup(&self, target: &Target) -> Vec<SocketAddr> {
        self.state.read().lookup(target)
    }

    /// Receiver that wakes on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Current generation; increases by one per change.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_datagram(name: &str, addr: &str) -> Vec<u8> {
        Announcement::service(name, addr.parse().unwrap())
            .encode()
            .unwrap()
    }

    fn host_datagram(name: &str) -> Vec<u8> {
        Announcement::host(name).encode().unwrap()
    }

    fn src(ip: &str) -> SocketAddr {
        SocketAddr::new(ip.parse().unwrap(), 40000)
    }

    #[test]
    fn test_ingest_rewrites_host_and_dedupes() {
        let registry = Registry::new();
        let datagram = service_datagram("X", "0.0.0.0:8100");

        assert!(registry.ingest(&datagram, src("10.0.0.5")).unwrap());
        assert!(!registry.ingest(&datagram, src("10.0.0.5")).unwrap());
        assert!(registry.ingest(&datagram, src("10.0.0.6")).unwrap());

        let target = Target::service("X");
        assert_eq!(
            registry.lookup(&target),
            vec![
                "10.0.0.5:8100".parse::<SocketAddr>().unwrap(),
                "10.0.0.6:8100".parse().unwrap(),
            ]
        );
        assert_eq!(registry.generation(), 2);
    }

    #[test]
    fn test_zero_padded_datagram() {
        let registry = Registry::new();
        let mut datagram = service_datagram("X", "0.0.0.0:8100");
        datagram.resize(crate::constants::MAX_DATAGRAM_SIZE, 0);

        assert!(registry.ingest(&datagram, src("10.0.0.5")).unwrap());
    }

    #[test]
    fn test_malformed_datagram_changes_nothing() {
        let registry = Registry::new();
        assert!(registry.ingest(b"not postcard at all", src("10.0.0.5")).is_err());
        assert_eq!(registry.snapshot(), RegistrySnapshot::default());
        assert_eq!(registry.generation(), 0);
    }

    #[test]
    fn test_host_qualified_lookup() {
        let registry = Registry::new();
        let datagram = service_datagram("X", "0.0.0.0:8100");
        registry.ingest(&datagram, src("10.0.0.5")).unwrap();
        registry.ingest(&datagram, src("10.0.0.6")).unwrap();
        registry.ingest(&host_datagram("alpha"), src("10.0.0.6")).unwrap();

        let alpha: Target = "cellfs://alpha@X".parse().unwrap();
        assert_eq!(
            registry.lookup(&alpha),
            vec!["10.0.0.6:8100".parse::<SocketAddr>().unwrap()]
        );

        let unknown: Target = "cellfs://beta@X".parse().unwrap();
        assert!(registry.lookup(&unknown).is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_wake_on_change() {
        let registry = Registry::new();
        let mut rx = registry.subscribe();

        registry.insert_service("X", "10.0.0.1:1".parse().unwrap());
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 1);

        // Duplicate insert: no notification.
        registry.insert_service("X", "10.0.0.1:1".parse().unwrap());
        assert!(!rx.has_changed().unwrap());
    }
}
