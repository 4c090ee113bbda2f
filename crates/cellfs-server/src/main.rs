//! cellfs server binary.
//!
//! Serves a local directory over the cellfs protocol and announces it via
//! multicast discovery.
//!
//! Usage:
//!   cellfs-server --root /srv/share
//!   cellfs-server --root /srv/share --read-only --service share.FS
//!   cellfs-server --config /etc/cellfs/server.toml --bind 0.0.0.0:9100

use anyhow::{Context, Result};
use cellfs_discovery::{Announcer, DiscoveryConfig, local_hostname};
use cellfs_kernel::{FastReadBackend, LocalBackend, VfsOps};
use cellfs_server::constants::{DEFAULT_BIND_ADDR, DEFAULT_SERVICE};
use cellfs_server::{FileConfig, FsServer, ServerConfig};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

/// Serve a directory over the cellfs remote filesystem protocol.
#[derive(Parser, Debug)]
#[command(name = "cellfs-server")]
#[command(about = "Serve a directory over the cellfs protocol")]
struct Args {
    /// Directory to serve
    #[arg(long)]
    root: Option<PathBuf>,

    /// Listen address [default: 0.0.0.0:8100]
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Service name to announce [default: cellfs.FS]
    #[arg(long)]
    service: Option<String>,

    /// Hostname to announce [default: this machine's hostname]
    #[arg(long)]
    hostname: Option<String>,

    /// Refuse every mutating operation
    #[arg(long)]
    read_only: bool,

    /// Do not announce via multicast discovery
    #[arg(long)]
    no_announce: bool,

    /// List directories with raw getdents reads (implies read-only)
    #[arg(long)]
    fast_read: bool,

    /// TOML config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let root = args
        .root
        .clone()
        .or(file.root.clone())
        .context("no root directory given (use --root or `root` in the config file)")?;
    let bind = args.bind.or(file.bind).unwrap_or(DEFAULT_BIND_ADDR);
    let service = args
        .service
        .clone()
        .or(file.service.clone())
        .unwrap_or_else(|| DEFAULT_SERVICE.to_string());
    let fast_read = args.fast_read || file.fast_read.unwrap_or(false);
    let read_only = args.read_only || file.read_only.unwrap_or(false) || fast_read;
    let announce = !args.no_announce && file.announce.unwrap_or(true);
    let discovery = file.discovery.clone().unwrap_or_default();

    let mut config = ServerConfig {
        read_only,
        ..ServerConfig::default()
    };
    if let Some(idle) = file.idle_timeout()? {
        config.idle_timeout = idle;
    }

    let fs: Arc<dyn VfsOps> = if fast_read {
        Arc::new(FastReadBackend::new(&root))
    } else if read_only {
        Arc::new(LocalBackend::read_only(&root))
    } else {
        Arc::new(LocalBackend::new(&root))
    };

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(root = %root.display(), %local_addr, %service, "starting cellfs server");

    let cancel = CancellationToken::new();
    let announcer = if announce {
        let hostname = args.hostname.clone().or(file.hostname.clone()).or_else(local_hostname);
        Some(spawn_announcer(&discovery, &service, local_addr, hostname, cancel.clone()))
    } else {
        None
    };

    let server = FsServer::new(fs, config);
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
        }
        shutdown.cancel();
    });

    server.serve(listener, cancel.clone()).await?;

    if let Some(task) = announcer {
        task.await??;
    }
    Ok(())
}

fn spawn_announcer(
    discovery: &DiscoveryConfig,
    service: &str,
    addr: SocketAddr,
    hostname: Option<String>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<cellfs_discovery::DiscoveryResult<()>> {
    let mut announcer = Announcer::new(discovery).service(service, addr);
    if let Some(name) = hostname {
        announcer = announcer.hostname(name);
    }
    announcer.spawn(cancel)
}
