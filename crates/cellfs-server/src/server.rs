//! Listener and per-connection dispatch.

use cellfs_kernel::VfsOps;
use cellfs_proto::{Channel, Hello, ProtoError, ProtoResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::ServerConfig;
use crate::session::run_session;
use crate::unary::run_unary;

/// Serves one filesystem to remote clients.
///
/// Cloning is cheap; clones serve the same filesystem.
#[derive(Clone)]
pub struct FsServer {
    fs: Arc<dyn VfsOps>,
    config: ServerConfig,
}

impl FsServer {
    pub fn new(fs: Arc<dyn VfsOps>, config: ServerConfig) -> Self {
        Self { fs, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn fs(&self) -> &dyn VfsOps {
        self.fs.as_ref()
    }

    /// Accept connections until `cancel` fires. Each connection runs in
    /// its own task.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> std::io::Result<()> {
        info!(
            addr = %listener.local_addr()?,
            backend = self.fs.name(),
            read_only = self.config.read_only,
            "cellfs server listening"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let server = self.clone();
            let span = info_span!("conn", %peer);
            tokio::spawn(
                async move {
                    if let Err(e) = server.handle_tcp(stream, peer).await {
                        debug!(error = %e, "connection ended with error");
                    }
                }
                .instrument(span),
            );
        }

        info!("cellfs server stopped");
        Ok(())
    }

    async fn handle_tcp(&self, stream: TcpStream, peer: SocketAddr) -> ProtoResult<()> {
        stream.set_nodelay(true)?;
        debug!(%peer, "connection accepted");
        self.handle_connection(stream).await
    }

    /// Run the protocol on an already-established stream.
    pub async fn handle_connection<S>(&self, io: S) -> ProtoResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut chan = Channel::new(io);
        let hello = match tokio::time::timeout(self.config.idle_timeout, chan.recv::<Hello>()).await {
            Ok(hello) => hello?,
            Err(_) => return Err(ProtoError::Timeout(self.config.idle_timeout)),
        };

        match hello {
            None => Ok(()),
            Some(Hello::Session) => run_session(self, &mut chan).await,
            Some(Hello::Unary) => run_unary(self, &mut chan).await,
        }
    }
}
