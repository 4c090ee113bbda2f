//! Local filesystem backend.
//!
//! Provides access to real filesystem paths, with path security
//! to prevent escaping the root directory.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{FileHandle, VfsOps};
use crate::vfs::types::{base_name, FileMetadata, OpenFlags};

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/cells`, then `open("src/main.rs")` opens
/// `/srv/cells/src/main.rs`.
///
/// Path security is enforced: attempts to escape via `..` are blocked.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_only: bool,
}

impl LocalBackend {
    /// Create a new local filesystem rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            read_only: false,
        }
    }

    /// Create a read-only local filesystem.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    /// Set whether this filesystem is read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path within the root.
    ///
    /// `..` is resolved lexically and may not climb above the root. The
    /// deepest existing ancestor is canonicalized so symlinks pointing
    /// outside the root are caught as well.
    pub(crate) fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let mut rel = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    if !rel.pop() {
                        return Err(VfsError::path_escapes_root(format!(
                            "{} climbs above {}",
                            path.display(),
                            self.root.display()
                        )));
                    }
                }
                Component::Normal(s) => rel.push(s),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }

        if rel.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }

        let full = self.root.join(&rel);

        // Missing components are re-appended after the existing prefix.
        let mut existing = full.as_path();
        let mut missing = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name);
                    existing = parent;
                }
                _ => break,
            }
        }

        let mut canonical = existing.canonicalize()?;
        for name in missing.iter().rev() {
            canonical.push(name);
        }

        if !canonical.starts_with(&self.root) {
            return Err(VfsError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }

        Ok(canonical)
    }

    /// Check if write operations are allowed.
    fn check_writable(&self, op: &str) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::not_permitted(format!("{op} on read-only filesystem")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn stat(&self, path: &Path) -> VfsResult<FileMetadata> {
        let full_path = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full_path).await?;
        Ok(FileMetadata::from_std(base_name(&full_path), &meta))
    }

    async fn open_file(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn FileHandle>> {
        if flags.is_write() {
            self.check_writable("open for writing")?;
        }
        let full_path = self.resolve(path)?;

        let mut opts = flags.to_open_options();
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = fs::OpenOptions::from(opts).open(&full_path).await?;
        Ok(Box::new(LocalFile::new(
            path.to_string_lossy().into_owned(),
            full_path,
            file,
        )))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.check_writable("mkdir")?;
        let full_path = self.resolve(path)?;
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(&full_path).await?;
        Ok(())
    }

    async fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.check_writable("mkdir")?;
        let full_path = self.resolve(path)?;
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(&full_path).await?;
        Ok(())
    }

    async fn remove(&self, path: &Path) -> VfsResult<()> {
        self.check_writable("remove")?;
        let full_path = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full_path).await?;
        if meta.is_dir() {
            fs::remove_dir(&full_path).await?;
        } else {
            fs::remove_file(&full_path).await?;
        }
        Ok(())
    }

    async fn remove_all(&self, path: &Path) -> VfsResult<()> {
        self.check_writable("remove")?;
        let full_path = self.resolve(path)?;
        if full_path == self.root {
            return Err(VfsError::invalid_path("refusing to remove backend root"));
        }
        let meta = match fs::symlink_metadata(&full_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&full_path).await?;
        } else {
            fs::remove_file(&full_path).await?;
        }
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.check_writable("rename")?;
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        fs::rename(&from_path, &to_path).await?;
        Ok(())
    }

    async fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.check_writable("chmod")?;
        let full_path = self.resolve(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
            fs::set_permissions(&full_path, permissions).await?;
        }
        #[cfg(not(unix))]
        {
            let mut permissions = fs::metadata(&full_path).await?.permissions();
            permissions.set_readonly(mode & 0o222 == 0);
            fs::set_permissions(&full_path, permissions).await?;
        }
        Ok(())
    }

    async fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        self.check_writable("chtimes")?;
        let full_path = self.resolve(path)?;
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&full_path)?;
            let times = std::fs::FileTimes::new()
                .set_accessed(atime)
                .set_modified(mtime);
            file.set_times(times)
        })
        .await
        .map_err(|e| VfsError::other(format!("chtimes task failed: {e}")))??;
        Ok(())
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

/// An open file or directory on the local filesystem.
///
/// Directory listings are read in full on the first `readdir`, sorted by
/// name, and then paged out of the buffer.
pub(crate) struct LocalFile {
    name: String,
    path: PathBuf,
    file: fs::File,
    dir_entries: Option<VecDeque<FileMetadata>>,
}

impl LocalFile {
    pub(crate) fn new(name: String, path: PathBuf, file: fs::File) -> Self {
        Self {
            name,
            path,
            file,
            dir_entries: None,
        }
    }

    async fn load_entries(path: &Path) -> VfsResult<VecDeque<FileMetadata>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            // Entries removed since the listing started are skipped.
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            entries.push(FileMetadata::from_std(
                entry.file_name().to_string_lossy().into_owned(),
                &meta,
            ));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries.into())
    }
}

#[async_trait]
impl FileHandle for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        Ok(self.file.read(buf).await?)
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        let saved = self.file.stream_position().await?;
        self.file.seek(SeekFrom::Start(offset)).await?;

        let mut filled = 0;
        let result = loop {
            if filled == buf.len() {
                break Ok(filled);
            }
            match self.file.read(&mut buf[filled..]).await {
                Ok(0) => break Ok(filled),
                Ok(n) => filled += n,
                Err(e) => break Err(e),
            }
        };

        self.file.seek(SeekFrom::Start(saved)).await?;
        Ok(result?)
    }

    async fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        self.file.write_all(buf).await?;
        self.file.flush().await?;
        Ok(buf.len())
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        let saved = self.file.stream_position().await?;
        self.file.seek(SeekFrom::Start(offset)).await?;
        let result = self.file.write_all(buf).await;
        self.file.flush().await?;
        self.file.seek(SeekFrom::Start(saved)).await?;
        result?;
        Ok(buf.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        Ok(self.file.seek(pos).await?)
    }

    async fn readdir(&mut self, count: i32) -> VfsResult<Vec<FileMetadata>> {
        if self.dir_entries.is_none() {
            self.dir_entries = Some(Self::load_entries(&self.path).await?);
        }
        let entries = self
            .dir_entries
            .as_mut()
            .ok_or_else(|| VfsError::other("directory listing unavailable"))?;

        let take = if count <= 0 {
            entries.len()
        } else {
            (count as usize).min(entries.len())
        };
        Ok(entries.drain(..take).collect())
    }

    async fn stat(&mut self) -> VfsResult<FileMetadata> {
        let meta = self.file.metadata().await?;
        Ok(FileMetadata::from_std(base_name(&self.path), &meta))
    }

    async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.file.set_len(size).await?;
        Ok(())
    }

    async fn sync(&mut self) -> VfsResult<()> {
        self.file.sync_all().await?;
        Ok(())
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.file.flush().await?;
        self.dir_entries = None;
        Ok(())
    }
}
