//! Per-file session loop.
//!
//! A session owns exactly one open handle. Requests are handled one at a
//! time in arrival order and each gets exactly one response; the client
//! closing its send side closes the handle.

use cellfs_kernel::{FileHandle, VfsError, VfsResult};
use cellfs_proto::{
    CHUNK_SIZE, Channel, ProtoError, ProtoResult, READDIR_BATCH, SessionRequest, SessionResponse,
    Status, StatusCode, seek_from_wire,
};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace, warn};

use crate::server::FsServer;

pub(crate) async fn run_session<S>(server: &FsServer, chan: &mut Channel<S>) -> ProtoResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(first) = next_request(server, chan).await? else {
        return Ok(());
    };

    let (path, flags, mode) = match first {
        SessionRequest::Open { path, flags, mode } => (path, flags, mode),
        other => {
            let status = Status::new(
                StatusCode::InvalidArgument,
                format!("session must start with open, got {}", other.op()),
            );
            chan.send(&SessionResponse::Error(status)).await?;
            return Err(ProtoError::unexpected(other.op()));
        }
    };

    if server.config().read_only && flags.is_write() {
        let status = Status::from(VfsError::not_permitted(format!("open {path} for writing")));
        return chan.send(&SessionResponse::Error(status)).await;
    }

    let mut handle = match server.fs().open_file(Path::new(&path), flags, mode).await {
        Ok(handle) => handle,
        Err(e) => {
            debug!(%path, error = %e, "open failed");
            return chan.send(&SessionResponse::Error(Status::from(&e))).await;
        }
    };
    debug!(%path, ?flags, "session opened");

    let result = serve_handle(server, chan, handle.as_mut(), &path).await;

    if let Err(e) = handle.close().await {
        warn!(%path, error = %e, "close failed");
    }
    debug!(%path, "session closed");
    result
}

async fn serve_handle<S>(
    server: &FsServer,
    chan: &mut Channel<S>,
    handle: &mut dyn FileHandle,
    path: &str,
) -> ProtoResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let opened = SessionResponse::Opened {
        name: handle.name().to_string(),
    };
    chan.send(&opened).await?;

    while let Some(request) = next_request(server, chan).await? {
        let op = request.op();
        trace!(path, op, "session request");
        let response = match dispatch(handle, request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(path, op, error = %e, "session request failed");
                SessionResponse::Error(Status::from(&e))
            }
        };
        chan.send(&response).await?;
    }
    Ok(())
}

async fn next_request<S>(
    server: &FsServer,
    chan: &mut Channel<S>,
) -> ProtoResult<Option<SessionRequest>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let idle = server.config().idle_timeout;
    match tokio::time::timeout(idle, chan.recv()).await {
        Ok(request) => request,
        Err(_) => Err(ProtoError::Timeout(idle)),
    }
}

async fn dispatch(handle: &mut dyn FileHandle, request: SessionRequest) -> VfsResult<SessionResponse> {
    match request {
        SessionRequest::Open { .. } => Err(VfsError::invalid_path(
            "session already has an open file",
        )),
        SessionRequest::Stat => Ok(SessionResponse::Stat(handle.stat().await?)),
        SessionRequest::Truncate { size } => {
            handle.truncate(size).await?;
            Ok(SessionResponse::Truncated)
        }
        SessionRequest::Read { len } => {
            let mut buf = vec![0u8; chunk_len(len)];
            let n = handle.read(&mut buf).await?;
            buf.truncate(n);
            Ok(SessionResponse::Read { content: buf })
        }
        SessionRequest::ReadAt { offset, len } => {
            let mut buf = vec![0u8; chunk_len(len)];
            let n = handle.read_at(&mut buf, offset).await?;
            buf.truncate(n);
            Ok(SessionResponse::Read { content: buf })
        }
        SessionRequest::Write { content } => {
            let n = handle.write(&content[..content.len().min(CHUNK_SIZE)]).await?;
            Ok(SessionResponse::Written {
                bytes_written: n as u32,
            })
        }
        SessionRequest::WriteAt { offset, content } => {
            let n = handle
                .write_at(&content[..content.len().min(CHUNK_SIZE)], offset)
                .await?;
            Ok(SessionResponse::Written {
                bytes_written: n as u32,
            })
        }
        SessionRequest::Readdir { count } => {
            let mut entries = handle.readdir(batch_len(count)).await?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(SessionResponse::Readdir { entries })
        }
        SessionRequest::Readdirnames { count } => {
            let mut names = handle.readdirnames(batch_len(count)).await?;
            names.sort();
            Ok(SessionResponse::Readdirnames { names })
        }
        SessionRequest::Seek { offset, whence } => {
            let pos = seek_from_wire(offset, whence)
                .ok_or_else(|| VfsError::invalid_path(format!("negative seek offset {offset}")))?;
            Ok(SessionResponse::Seek {
                offset: handle.seek(pos).await?,
            })
        }
        SessionRequest::Sync => {
            handle.sync().await?;
            Ok(SessionResponse::Synced)
        }
    }
}

fn chunk_len(len: u32) -> usize {
    (len as usize).min(CHUNK_SIZE)
}

/// Entries to list for one response. "All remaining" becomes one batch;
/// the client keeps asking until a batch comes back empty.
fn batch_len(count: i32) -> i32 {
    if count <= 0 {
        READDIR_BATCH
    } else {
        count.min(READDIR_BATCH)
    }
}
