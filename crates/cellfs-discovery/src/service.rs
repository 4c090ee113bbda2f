//! The per-process discovery listener.

use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::constants::RECV_ERROR_BACKOFF;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::registry::{Registry, RegistrySnapshot};
use crate::resolver::Resolver;
use crate::target::Target;

enum Lifecycle {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

/// Owns the registry and the background task that fills it from
/// multicast announcements.
///
/// `start` is idempotent; `stop` is final. Resolvers keep working against
/// the registry after `stop`, they just stop learning anything new.
pub struct DiscoveryService {
    config: DiscoveryConfig,
    registry: Arc<Registry>,
    lifecycle: Mutex<Lifecycle>,
    cancel: CancellationToken,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Join the multicast group and start listening. Calling this again
    /// while running is a no-op. Must be called from within a tokio runtime.
    pub fn start(&self) -> DiscoveryResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::Stopped => return Err(DiscoveryError::Stopped),
            Lifecycle::Idle => {}
        }

        let socket = bind_multicast(&self.config)?;
        info!(group = %self.config.group, "discovery listener started");

        let task = tokio::spawn(listen(
            socket,
            self.registry.clone(),
            self.config.max_datagram_size,
            self.cancel.clone(),
        ));
        *lifecycle = Lifecycle::Running(task);
        Ok(())
    }

    /// Stop the listener. Later `start` calls fail with `Stopped`.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            info!("discovery listener stopping");
        }
        self.cancel.cancel();
        *lifecycle = Lifecycle::Stopped;
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(ref task) if !task.is_finished())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Copy of everything learned so far.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    /// Resolver for a target string such as `cellfs://alpha@cellfs.FS`.
    pub fn resolver(&self, target: &str) -> DiscoveryResult<Resolver> {
        Ok(self.resolver_for(target.parse()?))
    }

    pub fn resolver_for(&self, target: Target) -> Resolver {
        Resolver::new(self.registry.clone(), target, self.config.resolve_timeout)
    }

    /// Seed the registry with a known service address.
    pub fn register_static(&self, service: &str, addr: SocketAddr) -> bool {
        self.registry.insert_service(service, addr)
    }

    /// Seed the registry with a known hostname.
    pub fn register_host(&self, host: &str, ip: IpAddr) -> bool {
        self.registry.insert_host(host, ip)
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen(
    socket: UdpSocket,
    registry: Arc<Registry>,
    buf_size: usize,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; buf_size];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = socket.recv_from(&mut buf) => r,
        };

        match received {
            Ok((n, src)) => match registry.ingest(&buf[..n], src) {
                Ok(_) => {}
                Err(e) => debug!(%src, error = %e, "ignoring datagram"),
            },
            Err(e) => {
                warn!(error = %e, "discovery receive failed");
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
            }
        }
    }
    debug!("discovery listener exited");
}

/// Bind a reusable UDP socket on the group port and join the group.
#[cfg(unix)]
fn bind_multicast(config: &DiscoveryConfig) -> DiscoveryResult<UdpSocket> {
    use rustix::net::{AddressFamily, SocketType, bind_v4, socket, sockopt};

    let fd = socket(AddressFamily::INET, SocketType::DGRAM, None).map_err(std::io::Error::from)?;
    sockopt::set_socket_reuseaddr(&fd, true).map_err(std::io::Error::from)?;
    let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.group.port());
    bind_v4(&fd, &local).map_err(std::io::Error::from)?;

    let std_socket = std::net::UdpSocket::from(fd);
    join(std_socket, config)
}

#[cfg(not(unix))]
fn bind_multicast(config: &DiscoveryConfig) -> DiscoveryResult<UdpSocket> {
    let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.group.port());
    join(std::net::UdpSocket::bind(local)?, config)
}

fn join(std_socket: std::net::UdpSocket, config: &DiscoveryConfig) -> DiscoveryResult<UdpSocket> {
    std_socket.set_nonblocking(true)?;
    let socket = UdpSocket::from_std(std_socket)?;
    socket.join_multicast_v4(*config.group.ip(), config.interface)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn service() -> DiscoveryService {
        DiscoveryService::new(DiscoveryConfig {
            resolve_timeout: Some(Duration::from_secs(5)),
            ..DiscoveryConfig::default()
        })
    }

    #[tokio::test]
    async fn test_static_registration_resolves() {
        let discovery = service();
        assert!(discovery.register_static("cellfs.FS", "127.0.0.1:8100".parse().unwrap()));
        assert!(!discovery.register_static("cellfs.FS", "127.0.0.1:8100".parse().unwrap()));

        let mut resolver = discovery.resolver("cellfs://cellfs.FS").unwrap();
        assert_eq!(
            resolver.resolve().await.unwrap(),
            vec!["127.0.0.1:8100".parse::<SocketAddr>().unwrap()]
        );

        let snapshot = discovery.snapshot();
        assert_eq!(snapshot.services.len(), 1);
        assert!(snapshot.hosts.is_empty());
    }

    #[tokio::test]
    async fn test_resolver_wakes_on_registration() {
        let discovery = Arc::new(service());
        let mut resolver = discovery.resolver("cellfs://alpha@cellfs.FS").unwrap();

        let d = discovery.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            d.register_static("cellfs.FS", "10.1.1.1:8100".parse().unwrap());
            d.register_host("alpha", "10.1.1.1".parse().unwrap());
        });

        let addrs = resolver.resolve().await.unwrap();
        assert_eq!(addrs, vec!["10.1.1.1:8100".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_invalid_target_rejected() {
        let discovery = service();
        assert!(matches!(
            discovery.resolver("http://cellfs.FS"),
            Err(DiscoveryError::InvalidTarget { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_after_stop_fails() {
        let discovery = service();
        discovery.stop();
        assert!(matches!(discovery.start(), Err(DiscoveryError::Stopped)));
        assert!(!discovery.is_running());
    }
}
