//! Path-keyed calls outside any session.

use cellfs_kernel::{VfsError, VfsResult};
use cellfs_proto::{Channel, ProtoError, ProtoResult, Status, UnaryRequest, UnaryResponse};
use std::path::Path;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::server::FsServer;

/// Read one request, answer it, and close.
pub(crate) async fn run_unary<S>(server: &FsServer, chan: &mut Channel<S>) -> ProtoResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let idle = server.config().idle_timeout;
    let request: UnaryRequest = match tokio::time::timeout(idle, chan.recv_some()).await {
        Ok(request) => request?,
        Err(_) => return Err(ProtoError::Timeout(idle)),
    };

    let op = request.op();
    let response = match handle(server, request).await {
        Ok(response) => response,
        Err(e) => {
            debug!(op, error = %e, "unary request failed");
            UnaryResponse::Error(Status::from(&e))
        }
    };
    chan.send(&response).await?;
    chan.close().await
}

async fn handle(server: &FsServer, request: UnaryRequest) -> VfsResult<UnaryResponse> {
    if server.config().read_only && request.is_mutation() {
        return Err(VfsError::not_permitted(format!(
            "{} on read-only server",
            request.op()
        )));
    }

    let fs = server.fs();
    match request {
        UnaryRequest::Stat { path } => Ok(UnaryResponse::Stat(fs.stat(Path::new(&path)).await?)),
        UnaryRequest::Chtimes { path, atime, mtime } => {
            fs.chtimes(
                Path::new(&path),
                SystemTime::from(atime),
                SystemTime::from(mtime),
            )
            .await?;
            Ok(UnaryResponse::Done)
        }
        UnaryRequest::Chmod { path, mode } => {
            fs.chmod(Path::new(&path), mode).await?;
            Ok(UnaryResponse::Done)
        }
        UnaryRequest::Mkdir { path, mode } => {
            fs.mkdir(Path::new(&path), mode).await?;
            Ok(UnaryResponse::Done)
        }
        UnaryRequest::MkdirAll { path, mode } => {
            fs.mkdir_all(Path::new(&path), mode).await?;
            Ok(UnaryResponse::Done)
        }
        UnaryRequest::Rename { from, to } => {
            fs.rename(Path::new(&from), Path::new(&to)).await?;
            Ok(UnaryResponse::Done)
        }
        UnaryRequest::Remove { path } => {
            fs.remove(Path::new(&path)).await?;
            Ok(UnaryResponse::Done)
        }
        UnaryRequest::RemoveAll { path } => {
            fs.remove_all(Path::new(&path)).await?;
            Ok(UnaryResponse::Done)
        }
    }
}
