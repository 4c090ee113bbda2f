//! Request and response messages.
//!
//! A connection starts with a [`Hello`] frame. A session connection then
//! carries [`SessionRequest`]/[`SessionResponse`] pairs bound to one open
//! file; a unary connection carries exactly one [`UnaryRequest`] and its
//! [`UnaryResponse`].

use cellfs_kernel::{FileMetadata, OpenFlags, VfsError, VfsResult};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::status::Status;

/// First frame on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hello {
    /// A per-file session follows; the next request must be `Open`.
    Session,
    /// One path-keyed call follows.
    Unary,
}

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Split a `SeekFrom` into wire form. Absolute offsets past `i64::MAX`
/// have no wire representation.
pub fn seek_to_wire(pos: SeekFrom) -> VfsResult<(i64, Whence)> {
    match pos {
        SeekFrom::Start(n) => i64::try_from(n)
            .map(|n| (n, Whence::Start))
            .map_err(|_| VfsError::invalid_path(format!("seek offset {n} out of range"))),
        SeekFrom::Current(n) => Ok((n, Whence::Current)),
        SeekFrom::End(n) => Ok((n, Whence::End)),
    }
}

/// Rebuild a `SeekFrom`; `None` for a negative absolute offset.
pub fn seek_from_wire(offset: i64, whence: Whence) -> Option<SeekFrom> {
    match whence {
        Whence::Start => u64::try_from(offset).ok().map(SeekFrom::Start),
        Whence::Current => Some(SeekFrom::Current(offset)),
        Whence::End => Some(SeekFrom::End(offset)),
    }
}

/// Wall-clock time with nanosecond precision, relative to the unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp {
                secs: d.as_secs() as i64,
                nanos: d.subsec_nanos(),
            },
            Err(e) => {
                let d = e.duration();
                // Normalise so nanos stays positive.
                let (secs, nanos) = if d.subsec_nanos() == 0 {
                    (-(d.as_secs() as i64), 0)
                } else {
                    (-(d.as_secs() as i64) - 1, 1_000_000_000 - d.subsec_nanos())
                };
                Timestamp { secs, nanos }
            }
        }
    }
}

impl From<Timestamp> for SystemTime {
    fn from(t: Timestamp) -> Self {
        let base = if t.secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(t.secs as u64)
        } else {
            UNIX_EPOCH - Duration::from_secs(t.secs.unsigned_abs())
        };
        base + Duration::from_nanos(u64::from(t.nanos))
    }
}

/// Operations on the file bound to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRequest {
    Open {
        path: String,
        flags: OpenFlags,
        mode: u32,
    },
    Stat,
    Truncate {
        size: u64,
    },
    /// Read up to `len` bytes (capped at one chunk) at the cursor.
    Read {
        len: u32,
    },
    ReadAt {
        offset: u64,
        len: u32,
    },
    Write {
        content: Vec<u8>,
    },
    WriteAt {
        offset: u64,
        content: Vec<u8>,
    },
    Readdir {
        count: i32,
    },
    Readdirnames {
        count: i32,
    },
    Seek {
        offset: i64,
        whence: Whence,
    },
    Sync,
}

impl SessionRequest {
    /// Operation name for logs.
    pub fn op(&self) -> &'static str {
        match self {
            SessionRequest::Open { .. } => "open",
            SessionRequest::Stat => "stat",
            SessionRequest::Truncate { .. } => "truncate",
            SessionRequest::Read { .. } => "read",
            SessionRequest::ReadAt { .. } => "read_at",
            SessionRequest::Write { .. } => "write",
            SessionRequest::WriteAt { .. } => "write_at",
            SessionRequest::Readdir { .. } => "readdir",
            SessionRequest::Readdirnames { .. } => "readdirnames",
            SessionRequest::Seek { .. } => "seek",
            SessionRequest::Sync => "sync",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionResponse {
    Opened { name: String },
    Stat(FileMetadata),
    Truncated,
    /// Empty content means end of file.
    Read { content: Vec<u8> },
    Written { bytes_written: u32 },
    /// Sorted by name.
    Readdir { entries: Vec<FileMetadata> },
    /// Sorted.
    Readdirnames { names: Vec<String> },
    Seek { offset: u64 },
    Synced,
    Error(Status),
}

/// Path-keyed calls that need no open file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryRequest {
    Stat {
        path: String,
    },
    Chtimes {
        path: String,
        atime: Timestamp,
        mtime: Timestamp,
    },
    Chmod {
        path: String,
        mode: u32,
    },
    Mkdir {
        path: String,
        mode: u32,
    },
    MkdirAll {
        path: String,
        mode: u32,
    },
    Rename {
        from: String,
        to: String,
    },
    Remove {
        path: String,
    },
    RemoveAll {
        path: String,
    },
}

impl UnaryRequest {
    pub fn op(&self) -> &'static str {
        match self {
            UnaryRequest::Stat { .. } => "stat",
            UnaryRequest::Chtimes { .. } => "chtimes",
            UnaryRequest::Chmod { .. } => "chmod",
            UnaryRequest::Mkdir { .. } => "mkdir",
            UnaryRequest::MkdirAll { .. } => "mkdir_all",
            UnaryRequest::Rename { .. } => "rename",
            UnaryRequest::Remove { .. } => "remove",
            UnaryRequest::RemoveAll { .. } => "remove_all",
        }
    }

    /// Whether the call changes the filesystem.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, UnaryRequest::Stat { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryResponse {
    Stat(FileMetadata),
    Done,
    Error(Status),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_wire_forms() {
        assert_eq!(seek_to_wire(SeekFrom::End(-4)).unwrap(), (-4, Whence::End));
        assert_eq!(seek_to_wire(SeekFrom::Start(7)).unwrap(), (7, Whence::Start));
        assert_eq!(
            seek_to_wire(SeekFrom::Start(i64::MAX as u64)).unwrap(),
            (i64::MAX, Whence::Start)
        );
        assert_eq!(seek_from_wire(10, Whence::Start), Some(SeekFrom::Start(10)));
        assert_eq!(seek_from_wire(-1, Whence::Start), None);
        assert_eq!(seek_from_wire(-1, Whence::Current), Some(SeekFrom::Current(-1)));
    }

    #[test]
    fn test_seek_past_i64_is_rejected() {
        let err = seek_to_wire(SeekFrom::Start(u64::MAX)).unwrap_err();
        assert_eq!(err.kind(), cellfs_kernel::VfsErrorKind::InvalidPath);
        let err = seek_to_wire(SeekFrom::Start(i64::MAX as u64 + 1)).unwrap_err();
        assert_eq!(err.kind(), cellfs_kernel::VfsErrorKind::InvalidPath);
    }

    #[test]
    fn test_timestamp_preserves_nanos() {
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        assert_eq!(SystemTime::from(Timestamp::from(t)), t);

        let before = UNIX_EPOCH - Duration::new(5, 250_000_000);
        let ts = Timestamp::from(before);
        assert_eq!(ts, Timestamp { secs: -6, nanos: 750_000_000 });
        assert_eq!(SystemTime::from(ts), before);
    }
}
