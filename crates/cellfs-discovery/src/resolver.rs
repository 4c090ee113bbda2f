//! Per-target resolution on top of the registry.

use futures::Stream;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{DiscoveryError, DiscoveryResult};
use crate::registry::Registry;
use crate::target::Target;

/// Resolves one [`Target`] to addresses and follows registry updates.
///
/// Each resolver remembers which registry generation it last resolved, so
/// [`resolve_now`](Self::resolve_now) only returns after something new has
/// been learned.
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<Registry>,
    target: Target,
    timeout: Option<Duration>,
    rx: watch::Receiver<u64>,
}

impl Resolver {
    pub(crate) fn new(registry: Arc<Registry>, target: Target, timeout: Option<Duration>) -> Self {
        let rx = registry.subscribe();
        Self {
            registry,
            target,
            timeout,
            rx,
        }
    }

    /// The target being resolved.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Bound waits to `timeout`; `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Addresses known right now, possibly empty.
    pub fn current(&self) -> Vec<SocketAddr> {
        self.registry.lookup(&self.target)
    }

    /// Known addresses, waiting for the first one if none are known yet.
    pub async fn resolve(&mut self) -> DiscoveryResult<Vec<SocketAddr>> {
        self.rx.borrow_and_update();
        let addrs = self.current();
        if !addrs.is_empty() {
            return Ok(addrs);
        }
        self.resolve_now().await
    }

    /// Wait for a registry change since the last resolution that leaves
    /// the target with at least one address, then return the addresses.
    pub async fn resolve_now(&mut self) -> DiscoveryResult<Vec<SocketAddr>> {
        let timeout = self.timeout;
        let target = self.target.clone();
        let registry = self.registry.clone();
        let rx = &mut self.rx;

        let wait = async move {
            loop {
                rx.changed().await.map_err(|_| DiscoveryError::Stopped)?;
                rx.borrow_and_update();
                let addrs = registry.lookup(&target);
                if !addrs.is_empty() {
                    return Ok(addrs);
                }
            }
        };

        match timeout {
            Some(after) => tokio::time::timeout(after, wait)
                .await
                .map_err(|_| DiscoveryError::Timeout {
                    target: self.target.to_string(),
                    after,
                })?,
            None => wait.await,
        }
    }

    /// Stream of address sets, one item per registry change that affects
    /// this target. The first item is the current set if non-empty.
    pub fn watch(&self) -> impl Stream<Item = Vec<SocketAddr>> + Send + 'static {
        let registry = self.registry.clone();
        let target = self.target.clone();
        let mut rx = registry.subscribe();
        rx.mark_changed();

        futures::stream::unfold(
            (registry, target, rx, None::<Vec<SocketAddr>>),
            |(registry, target, mut rx, mut last)| async move {
                loop {
                    rx.changed().await.ok()?;
                    rx.borrow_and_update();
                    let addrs = registry.lookup(&target);
                    if addrs.is_empty() || last.as_ref() == Some(&addrs) {
                        continue;
                    }
                    last = Some(addrs.clone());
                    return Some((addrs, (registry, target, rx, last)));
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn resolver(registry: &Arc<Registry>, target: &str, timeout: Option<Duration>) -> Resolver {
        Resolver::new(registry.clone(), target.parse().unwrap(), timeout)
    }

    #[tokio::test]
    async fn test_resolve_returns_known_addresses() {
        let registry = Arc::new(Registry::new());
        registry.insert_service("X", "10.0.0.1:8100".parse().unwrap());

        let mut r = resolver(&registry, "cellfs://X", Some(Duration::from_millis(50)));
        assert_eq!(r.resolve().await.unwrap(), vec!["10.0.0.1:8100".parse().unwrap()]);
    }

    #[tokio::test]
    async fn test_resolve_now_waits_for_announcement() {
        let registry = Arc::new(Registry::new());
        let mut r = resolver(&registry, "cellfs://X", Some(Duration::from_secs(5)));

        let writer = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.insert_service("other", "10.0.0.9:1".parse().unwrap());
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.insert_service("X", "10.0.0.1:8100".parse().unwrap());
        });

        let addrs = r.resolve_now().await.unwrap();
        assert_eq!(addrs, vec!["10.0.0.1:8100".parse().unwrap()]);
    }

    #[tokio::test]
    async fn test_resolve_now_requires_new_update() {
        let registry = Arc::new(Registry::new());
        registry.insert_service("X", "10.0.0.1:8100".parse().unwrap());
        let mut r = resolver(&registry, "cellfs://X", Some(Duration::from_millis(50)));

        r.resolve().await.unwrap();
        let err = r.resolve_now().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_host_qualified_target_waits_for_host() {
        let registry = Arc::new(Registry::new());
        registry.insert_service("X", "10.0.0.6:8100".parse().unwrap());
        let mut r = resolver(&registry, "cellfs://alpha@X", Some(Duration::from_secs(5)));
        assert!(r.current().is_empty());

        let writer = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.insert_host("alpha", "10.0.0.6".parse().unwrap());
        });

        assert_eq!(r.resolve().await.unwrap(), vec!["10.0.0.6:8100".parse().unwrap()]);
    }

    #[tokio::test]
    async fn test_watch_stream() {
        let registry = Arc::new(Registry::new());
        registry.insert_service("X", "10.0.0.1:1".parse().unwrap());
        let r = resolver(&registry, "cellfs://X", None);
        let mut updates = Box::pin(r.watch());

        assert_eq!(updates.next().await.unwrap().len(), 1);

        registry.insert_service("X", "10.0.0.2:1".parse().unwrap());
        assert_eq!(updates.next().await.unwrap().len(), 2);
    }
}
