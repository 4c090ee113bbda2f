//! `VfsOps` over the remote protocol.

use async_trait::async_trait;
use cellfs_discovery::{DiscoveryError, DiscoveryService, Target};
use cellfs_kernel::{FileHandle, FileMetadata, OpenFlags, VfsError, VfsOps, VfsResult};
use cellfs_proto::{
    Channel, Hello, SessionRequest, SessionResponse, Timestamp, UnaryRequest, UnaryResponse,
};
use futures::StreamExt;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::file::RemoteFile;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// A filesystem served by one or more remote `cellfs-server`s.
///
/// Every unary call and every open file uses its own connection. When
/// several addresses are known, connections rotate over them; when built
/// through discovery the address set follows new announcements.
pub struct RemoteBackend {
    name: String,
    base: String,
    addrs: Arc<RwLock<Vec<SocketAddr>>>,
    next: AtomicUsize,
    config: ClientConfig,
    watcher: Option<JoinHandle<()>>,
}

impl RemoteBackend {
    /// Backend over a fixed address set.
    pub fn with_addrs(addrs: Vec<SocketAddr>, config: ClientConfig) -> Self {
        Self {
            name: "remote".to_string(),
            base: "/".to_string(),
            addrs: Arc::new(RwLock::new(addrs)),
            next: AtomicUsize::new(0),
            config,
            watcher: None,
        }
    }

    /// Resolve `target` (e.g. `cellfs://alpha@cellfs.FS/projects`) through
    /// `discovery` and keep following its announcements. The target's path
    /// becomes the root of this backend.
    pub async fn connect(
        discovery: &DiscoveryService,
        target: &str,
        config: ClientConfig,
    ) -> Result<Self, ConnectError> {
        let target: Target = target.parse()?;
        let mut resolver = discovery
            .resolver_for(target.clone())
            .with_timeout(config.resolve_timeout);
        let initial = resolver.resolve().await?;
        info!(%target, addrs = ?initial, "resolved remote filesystem");

        let addrs = Arc::new(RwLock::new(initial));
        let updates = resolver.watch();
        let shared = addrs.clone();
        let watched = target.clone();
        let watcher = tokio::spawn(async move {
            let mut updates = Box::pin(updates);
            while let Some(next) = updates.next().await {
                debug!(target = %watched, addrs = ?next, "address set updated");
                *shared.write() = next;
            }
        });

        Ok(Self {
            name: target.to_string(),
            base: target.path.clone(),
            addrs,
            next: AtomicUsize::new(0),
            config,
            watcher: Some(watcher),
        })
    }

    /// Addresses currently in rotation.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.addrs.read().clone()
    }

    fn remote_path(&self, path: &Path) -> String {
        let rel = path.to_string_lossy();
        let rel = rel.trim_start_matches('/');
        let base = self.base.trim_end_matches('/');
        if rel.is_empty() {
            if base.is_empty() { "/".to_string() } else { base.to_string() }
        } else {
            format!("{base}/{rel}")
        }
    }

    /// Connect to the next address in rotation, falling through to the
    /// others if it is unreachable.
    async fn dial(&self) -> VfsResult<Channel<TcpStream>> {
        let addrs = self.addrs();
        if addrs.is_empty() {
            return Err(VfsError::protocol(format!("{}: no known address", self.name)));
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut last_err = None;
        for i in 0..addrs.len() {
            let addr = addrs[(start + i) % addrs.len()];
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
            {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    return Ok(Channel::new(stream));
                }
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "connect failed");
                    last_err = Some(format!("{addr}: {e}"));
                }
                Err(_) => {
                    debug!(%addr, "connect timed out");
                    last_err = Some(format!("{addr}: connect timed out"));
                }
            }
        }
        Err(VfsError::protocol(format!(
            "{}: no reachable address ({})",
            self.name,
            last_err.unwrap_or_default()
        )))
    }

    async fn unary(&self, request: UnaryRequest) -> VfsResult<UnaryResponse> {
        let mut chan = self.dial().await?;
        chan.send(&Hello::Unary).await?;
        match chan.call(&request, self.config.call_timeout).await? {
            UnaryResponse::Error(status) => Err(status.into()),
            response => Ok(response),
        }
    }

    async fn unary_done(&self, request: UnaryRequest) -> VfsResult<()> {
        let op = request.op();
        match self.unary(request).await? {
            UnaryResponse::Done => Ok(()),
            other => Err(VfsError::protocol(format!(
                "unexpected response to {op}: {other:?}"
            ))),
        }
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

#[async_trait]
impl VfsOps for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&self, path: &Path) -> VfsResult<FileMetadata> {
        let request = UnaryRequest::Stat {
            path: self.remote_path(path),
        };
        match self.unary(request).await? {
            UnaryResponse::Stat(meta) => Ok(meta),
            other => Err(VfsError::protocol(format!(
                "unexpected response to stat: {other:?}"
            ))),
        }
    }

    async fn open_file(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn FileHandle>> {
        let mut chan = self.dial().await?;
        chan.send(&Hello::Session).await?;

        let request = SessionRequest::Open {
            path: self.remote_path(path),
            flags,
            mode,
        };
        match chan.call(&request, self.config.call_timeout).await? {
            SessionResponse::Opened { name } => Ok(Box::new(RemoteFile::new(
                chan,
                name,
                self.config.call_timeout,
            ))),
            SessionResponse::Error(status) => Err(status.into()),
            other => Err(VfsError::protocol(format!(
                "unexpected response to open: {other:?}"
            ))),
        }
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.unary_done(UnaryRequest::Mkdir {
            path: self.remote_path(path),
            mode,
        })
        .await
    }

    async fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.unary_done(UnaryRequest::MkdirAll {
            path: self.remote_path(path),
            mode,
        })
        .await
    }

    async fn remove(&self, path: &Path) -> VfsResult<()> {
        self.unary_done(UnaryRequest::Remove {
            path: self.remote_path(path),
        })
        .await
    }

    async fn remove_all(&self, path: &Path) -> VfsResult<()> {
        self.unary_done(UnaryRequest::RemoveAll {
            path: self.remote_path(path),
        })
        .await
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.unary_done(UnaryRequest::Rename {
            from: self.remote_path(from),
            to: self.remote_path(to),
        })
        .await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.unary_done(UnaryRequest::Chmod {
            path: self.remote_path(path),
            mode,
        })
        .await
    }

    async fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        self.unary_done(UnaryRequest::Chtimes {
            path: self.remote_path(path),
            atime: Timestamp::from(atime),
            mtime: Timestamp::from(mtime),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_path_joins_base() {
        let mut backend = RemoteBackend::with_addrs(Vec::new(), ClientConfig::default());
        assert_eq!(backend.remote_path(Path::new("a/b")), "/a/b");
        assert_eq!(backend.remote_path(Path::new("/a")), "/a");
        assert_eq!(backend.remote_path(Path::new("")), "/");

        backend.base = "/projects/x/".to_string();
        assert_eq!(backend.remote_path(Path::new("/src/main.rs")), "/projects/x/src/main.rs");
        assert_eq!(backend.remote_path(Path::new("/")), "/projects/x");
    }

    #[tokio::test]
    async fn test_no_addresses_is_protocol_error() {
        let backend = RemoteBackend::with_addrs(Vec::new(), ClientConfig::default());
        let err = backend.stat(Path::new("x")).await.unwrap_err();
        assert_eq!(err.kind(), cellfs_kernel::VfsErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_connect_times_out_without_announcement() {
        let discovery = DiscoveryService::new(Default::default());
        let config = ClientConfig {
            resolve_timeout: Some(std::time::Duration::from_millis(30)),
            ..ClientConfig::default()
        };
        let result = RemoteBackend::connect(&discovery, "cellfs://nobody", config).await;
        assert!(matches!(
            result,
            Err(ConnectError::Discovery(DiscoveryError::Timeout { .. }))
        ));
    }
}
