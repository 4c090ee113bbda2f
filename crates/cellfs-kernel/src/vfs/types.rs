//! Core VFS types.
//!
//! These types are path-based snapshots that can travel over the wire
//! unchanged, which is why they carry plain integers instead of
//! `SystemTime` or `std::fs::FileType`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Portable file type, independent of the platform's `st_mode` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Block device.
    BlockDevice,
    /// Character device.
    CharDevice,
    /// Named pipe (FIFO).
    NamedPipe,
    /// Unix domain socket.
    Socket,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }

    /// Classify a `std::fs::FileType`.
    pub fn from_std(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            return FileType::Directory;
        }
        if ft.is_symlink() {
            return FileType::Symlink;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if ft.is_block_device() {
                return FileType::BlockDevice;
            }
            if ft.is_char_device() {
                return FileType::CharDevice;
            }
            if ft.is_fifo() {
                return FileType::NamedPipe;
            }
            if ft.is_socket() {
                return FileType::Socket;
            }
        }
        FileType::File
    }
}

/// Portable mode bitmask: type bits in the high word, permissions in the low
/// twelve bits.
///
/// The type bit positions follow the layout used by Go's `os.FileMode`, so a
/// mode is meaningful on any platform that receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileMode(pub u32);

impl FileMode {
    pub const DIR: u32 = 1 << 31;
    pub const SYMLINK: u32 = 1 << 27;
    pub const DEVICE: u32 = 1 << 26;
    pub const NAMED_PIPE: u32 = 1 << 25;
    pub const SOCKET: u32 = 1 << 24;
    pub const CHAR_DEVICE: u32 = 1 << 21;

    /// Permission and setuid/setgid/sticky bits.
    pub const PERM_MASK: u32 = 0o7777;

    const TYPE_MASK: u32 =
        Self::DIR | Self::SYMLINK | Self::DEVICE | Self::NAMED_PIPE | Self::SOCKET | Self::CHAR_DEVICE;

    /// Build a mode from a file type and permission bits.
    pub fn new(kind: FileType, perm: u32) -> Self {
        let type_bits = match kind {
            FileType::File => 0,
            FileType::Directory => Self::DIR,
            FileType::Symlink => Self::SYMLINK,
            FileType::BlockDevice => Self::DEVICE,
            FileType::CharDevice => Self::DEVICE | Self::CHAR_DEVICE,
            FileType::NamedPipe => Self::NAMED_PIPE,
            FileType::Socket => Self::SOCKET,
        };
        FileMode(type_bits | (perm & Self::PERM_MASK))
    }

    /// Build a mode from `std::fs::Metadata`.
    pub fn from_std(meta: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let perm = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let perm = if meta.permissions().readonly() { 0o444 } else { 0o644 };

        Self::new(FileType::from_std(meta.file_type()), perm)
    }

    /// The file type encoded in this mode.
    pub fn file_type(&self) -> FileType {
        let bits = self.0 & Self::TYPE_MASK;
        if bits & Self::DIR != 0 {
            FileType::Directory
        } else if bits & Self::SYMLINK != 0 {
            FileType::Symlink
        } else if bits & Self::CHAR_DEVICE != 0 {
            FileType::CharDevice
        } else if bits & Self::DEVICE != 0 {
            FileType::BlockDevice
        } else if bits & Self::NAMED_PIPE != 0 {
            FileType::NamedPipe
        } else if bits & Self::SOCKET != 0 {
            FileType::Socket
        } else {
            FileType::File
        }
    }

    /// Permission bits only.
    pub fn perm(&self) -> u32 {
        self.0 & Self::PERM_MASK
    }

    /// Returns true if this is a directory mode.
    pub fn is_dir(&self) -> bool {
        self.0 & Self::DIR != 0
    }
}

/// Snapshot of a file's metadata.
///
/// Never cached: every `stat` produces a fresh value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Base name of the entry (not the full path).
    pub name: String,
    /// Size in bytes.
    pub size: i64,
    /// Portable type and permission bits.
    pub mode: FileMode,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

impl FileMetadata {
    /// Metadata for a regular file.
    pub fn file(name: impl Into<String>, size: i64, perm: u32, mtime: i64) -> Self {
        Self {
            name: name.into(),
            size,
            mode: FileMode::new(FileType::File, perm),
            mtime,
            is_dir: false,
        }
    }

    /// Metadata for a directory.
    pub fn directory(name: impl Into<String>, perm: u32, mtime: i64) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode: FileMode::new(FileType::Directory, perm),
            mtime,
            is_dir: true,
        }
    }

    /// Convert from `std::fs::Metadata`, naming the entry `name`.
    pub fn from_std(name: impl Into<String>, meta: &std::fs::Metadata) -> Self {
        let mode = FileMode::from_std(meta);
        Self {
            name: name.into(),
            size: meta.len() as i64,
            mode,
            mtime: meta.modified().map(unix_seconds).unwrap_or(0),
            is_dir: mode.is_dir(),
        }
    }

    /// The file type encoded in `mode`.
    pub fn file_type(&self) -> FileType {
        self.mode.file_type()
    }

    /// Modification time as a `SystemTime`.
    pub fn modified(&self) -> SystemTime {
        from_unix_seconds(self.mtime)
    }
}

/// Seconds since the Unix epoch, negative for earlier times.
pub fn unix_seconds(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Inverse of [`unix_seconds`].
pub fn from_unix_seconds(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Final component of `path`, or `/` for the root.
pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// Exclusive create (fail if exists).
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            exclusive: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write access (also enables read).
    pub fn write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// Create with write access.
    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Create exclusively (fail if exists).
    pub fn create_exclusive() -> Self {
        Self {
            exclusive: true,
            ..Self::create()
        }
    }

    /// Create and truncate.
    pub fn create_truncate() -> Self {
        Self {
            truncate: true,
            ..Self::create()
        }
    }

    /// Append to an existing file, creating it if needed.
    pub fn append() -> Self {
        Self {
            append: true,
            ..Self::create()
        }
    }

    /// True if these flags could modify the filesystem.
    pub fn is_write(&self) -> bool {
        self.write || self.append || self.create || self.truncate
    }

    /// Equivalent `std::fs::OpenOptions`.
    pub fn to_open_options(&self) -> std::fs::OpenOptions {
        let mut opts = std::fs::OpenOptions::new();
        opts.read(self.read)
            .write(self.write)
            .append(self.append)
            .truncate(self.truncate);
        if self.exclusive {
            opts.create_new(true);
        } else {
            opts.create(self.create);
        }
        opts
    }
}
