//! Remote file handles.

use async_trait::async_trait;
use cellfs_kernel::{FileHandle, FileMetadata, VfsError, VfsResult};
use cellfs_proto::{Channel, SessionRequest, SessionResponse, seek_to_wire};
use std::io::SeekFrom;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::constants::{CHUNK_SIZE, READDIR_BATCH};

enum Session {
    Open(Channel<TcpStream>),
    Closed,
}

/// A file open on a remote server.
///
/// Owns one session connection. Requests go out one at a time and each
/// waits for its response; a transport failure closes the session and
/// every later call fails with a protocol error.
pub struct RemoteFile {
    name: String,
    session: Session,
    timeout: Duration,
}

impl RemoteFile {
    /// Wrap a session whose `Open` has already been acknowledged.
    pub(crate) fn new(chan: Channel<TcpStream>, name: String, timeout: Duration) -> Self {
        Self {
            name,
            session: Session::Open(chan),
            timeout,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.session, Session::Open(_))
    }

    async fn call(&mut self, request: SessionRequest) -> VfsResult<SessionResponse> {
        let Session::Open(chan) = &mut self.session else {
            return Err(VfsError::protocol(format!("{}: session closed", self.name)));
        };

        let op = request.op();
        match chan.call(&request, self.timeout).await {
            Ok(SessionResponse::Error(status)) => Err(status.into()),
            Ok(response) => Ok(response),
            Err(e) => {
                debug!(file = %self.name, op, error = %e, "session failed");
                self.session = Session::Closed;
                Err(e.into())
            }
        }
    }

    async fn write_chunked(&mut self, buf: &[u8], mut offset: Option<u64>) -> VfsResult<usize> {
        let mut written = 0;
        while written < buf.len() {
            let end = (written + CHUNK_SIZE).min(buf.len());
            let content = buf[written..end].to_vec();
            let request = match offset {
                Some(off) => SessionRequest::WriteAt {
                    offset: off,
                    content,
                },
                None => SessionRequest::Write { content },
            };

            let n = match self.call(request).await? {
                SessionResponse::Written { bytes_written } => bytes_written as usize,
                other => return Err(unexpected("write", &other)),
            };
            if n == 0 {
                return Err(VfsError::other(format!("{}: server wrote zero bytes", self.name)));
            }
            written += n;
            if let Some(off) = offset.as_mut() {
                *off += n as u64;
            }
        }
        Ok(written)
    }
}

fn unexpected(op: &str, response: &SessionResponse) -> VfsError {
    VfsError::protocol(format!("unexpected response to {op}: {response:?}"))
}

fn chunk_len(len: usize) -> u32 {
    len.min(CHUNK_SIZE) as u32
}

/// Entries to request next, or `None` once `count` entries are in hand.
/// `count <= 0` keeps asking until the server returns an empty batch.
fn next_batch(count: i32, have: usize) -> Option<i32> {
    if count <= 0 {
        return Some(READDIR_BATCH);
    }
    let remaining = (count as usize).checked_sub(have).filter(|&n| n > 0)?;
    Some(remaining.min(READDIR_BATCH as usize) as i32)
}

#[async_trait]
impl FileHandle for RemoteFile {
    fn name(&self) -> &str {
        &self.name
    }

    /// Reads at most one chunk.
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = chunk_len(buf.len());
        match self.call(SessionRequest::Read { len }).await? {
            SessionResponse::Read { content } => {
                let n = content.len().min(buf.len());
                buf[..n].copy_from_slice(&content[..n]);
                Ok(n)
            }
            other => Err(unexpected("read", &other)),
        }
    }

    /// Fills `buf` chunk by chunk, stopping early only at end of file.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let request = SessionRequest::ReadAt {
                offset: offset + filled as u64,
                len: chunk_len(buf.len() - filled),
            };
            let content = match self.call(request).await? {
                SessionResponse::Read { content } => content,
                other => return Err(unexpected("read_at", &other)),
            };
            if content.is_empty() {
                break;
            }
            let n = content.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&content[..n]);
            filled += n;
        }
        Ok(filled)
    }

    async fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        self.write_chunked(buf, None).await
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        self.write_chunked(buf, Some(offset)).await
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let (offset, whence) = seek_to_wire(pos)?;
        match self.call(SessionRequest::Seek { offset, whence }).await? {
            SessionResponse::Seek { offset } => Ok(offset),
            other => Err(unexpected("seek", &other)),
        }
    }

    async fn readdir(&mut self, count: i32) -> VfsResult<Vec<FileMetadata>> {
        let mut entries: Vec<FileMetadata> = Vec::new();
        while let Some(want) = next_batch(count, entries.len()) {
            let batch = match self.call(SessionRequest::Readdir { count: want }).await? {
                SessionResponse::Readdir { entries } => entries,
                other => return Err(unexpected("readdir", &other)),
            };
            if batch.is_empty() {
                break;
            }
            entries.extend(batch);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn readdirnames(&mut self, count: i32) -> VfsResult<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        while let Some(want) = next_batch(count, names.len()) {
            let batch = match self.call(SessionRequest::Readdirnames { count: want }).await? {
                SessionResponse::Readdirnames { names } => names,
                other => return Err(unexpected("readdirnames", &other)),
            };
            if batch.is_empty() {
                break;
            }
            names.extend(batch);
        }
        names.sort();
        Ok(names)
    }

    async fn stat(&mut self) -> VfsResult<FileMetadata> {
        match self.call(SessionRequest::Stat).await? {
            SessionResponse::Stat(meta) => Ok(meta),
            other => Err(unexpected("stat", &other)),
        }
    }

    async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        match self.call(SessionRequest::Truncate { size }).await? {
            SessionResponse::Truncated => Ok(()),
            other => Err(unexpected("truncate", &other)),
        }
    }

    async fn sync(&mut self) -> VfsResult<()> {
        match self.call(SessionRequest::Sync).await? {
            SessionResponse::Synced => Ok(()),
            other => Err(unexpected("sync", &other)),
        }
    }

    /// Half-close the session and wait for the server to release the file.
    async fn close(&mut self) -> VfsResult<()> {
        let Session::Open(mut chan) = std::mem::replace(&mut self.session, Session::Closed) else {
            return Ok(());
        };

        chan.close().await?;
        match tokio::time::timeout(self.timeout, chan.recv::<SessionResponse>()).await {
            Ok(Ok(None)) => Ok(()),
            Ok(Ok(Some(other))) => Err(unexpected("close", &other)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(VfsError::protocol(format!(
                "{}: server did not release the file within {:?}",
                self.name, self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_batch() {
        assert_eq!(next_batch(-1, 0), Some(READDIR_BATCH));
        assert_eq!(next_batch(0, 5000), Some(READDIR_BATCH));
        assert_eq!(next_batch(2, 0), Some(2));
        assert_eq!(next_batch(2, 2), None);
        assert_eq!(next_batch(3000, 1024), Some(READDIR_BATCH));
        assert_eq!(next_batch(3000, 2500), Some(500));
    }
}
