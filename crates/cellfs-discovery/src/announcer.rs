//! Periodic multicast announcements of exported services.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::announcement::Announcement;
use crate::config::DiscoveryConfig;
use crate::error::DiscoveryResult;

/// This machine's hostname, if it can be determined and is valid UTF-8.
pub fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}

/// Announces a fixed set of services (and optionally a hostname) to the
/// discovery group at a fixed interval.
#[derive(Debug, Clone)]
pub struct Announcer {
    group: SocketAddrV4,
    interval: Duration,
    services: Vec<(String, SocketAddr)>,
    hostname: Option<String>,
}

impl Announcer {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            group: config.group,
            interval: config.announce_interval,
            services: Vec::new(),
            hostname: None,
        }
    }

    /// Announce `name` as served on `addr`. Only the port of `addr` matters
    /// to listeners, which substitute the datagram's source IP.
    pub fn service(mut self, name: impl Into<String>, addr: SocketAddr) -> Self {
        self.services.push((name.into(), addr));
        self
    }

    /// Also announce this hostname.
    pub fn hostname(mut self, name: impl Into<String>) -> Self {
        self.hostname = Some(name.into());
        self
    }

    /// Encoded datagrams for one announcement round.
    pub fn datagrams(&self) -> DiscoveryResult<Vec<Vec<u8>>> {
        let mut out = Vec::with_capacity(self.services.len() + 1);
        for (name, addr) in &self.services {
            out.push(Announcement::service(name.clone(), *addr).encode()?);
        }
        if let Some(host) = &self.hostname {
            out.push(Announcement::host(host.clone()).encode()?);
        }
        Ok(out)
    }

    /// Send one announcement round on `socket`.
    pub async fn announce_once(&self, socket: &UdpSocket) -> DiscoveryResult<()> {
        for datagram in self.datagrams()? {
            socket.send_to(&datagram, self.group).await?;
        }
        Ok(())
    }

    /// Announce every interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> DiscoveryResult<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        info!(
            group = %self.group,
            services = self.services.len(),
            hostname = self.hostname.as_deref().unwrap_or("-"),
            "announcing"
        );

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.announce_once(&socket).await {
                        Ok(()) => debug!(group = %self.group, "announcement sent"),
                        Err(e) => warn!(error = %e, "announcement failed"),
                    }
                }
            }
        }
        debug!("announcer stopped");
        Ok(())
    }

    /// Run in a background task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<DiscoveryResult<()>> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::target::Target;

    #[test]
    fn test_datagrams_feed_registry() {
        let announcer = Announcer::new(&DiscoveryConfig::default())
            .service("cellfs.FS", "0.0.0.0:8100".parse().unwrap())
            .service("cellfs.Index", "0.0.0.0:8101".parse().unwrap())
            .hostname("alpha");

        let datagrams = announcer.datagrams().unwrap();
        assert_eq!(datagrams.len(), 3);

        let registry = Registry::new();
        let src: SocketAddr = "192.168.1.7:50000".parse().unwrap();
        for d in &datagrams {
            registry.ingest(d, src).unwrap();
        }

        let target = Target::service("cellfs.FS").on_host("alpha");
        assert_eq!(
            registry.lookup(&target),
            vec!["192.168.1.7:8100".parse::<SocketAddr>().unwrap()]
        );
    }

    #[tokio::test]
    async fn test_announce_once_reaches_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = DiscoveryConfig {
            group: match listener.local_addr().unwrap() {
                SocketAddr::V4(addr) => addr,
                SocketAddr::V6(_) => unreachable!(),
            },
            ..DiscoveryConfig::default()
        };
        let announcer = Announcer::new(&config).service("X", "0.0.0.0:9000".parse().unwrap());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        announcer.announce_once(&sender).await.unwrap();

        let mut buf = vec![0u8; 8192];
        let (n, src) = listener.recv_from(&mut buf).await.unwrap();
        let registry = Registry::new();
        assert!(registry.ingest(&buf[..n], src).unwrap());
        assert_eq!(
            registry.lookup(&Target::service("X")),
            vec!["127.0.0.1:9000".parse::<SocketAddr>().unwrap()]
        );
    }
}
