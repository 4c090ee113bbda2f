//! The capability interface: [`VfsOps`] for filesystems and [`FileHandle`]
//! for open files.
//!
//! Both traits are object safe so that composite backends can hold
//! `Arc<dyn VfsOps>` and hand out `Box<dyn FileHandle>` without knowing
//! which concrete backend sits underneath.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::Path;
use std::time::SystemTime;

use super::types::{FileMetadata, OpenFlags};
use super::VfsResult;

/// An open file or directory.
///
/// Handles take `&mut self`, so a handle has exactly one user at a time.
#[async_trait]
pub trait FileHandle: Send {
    /// Path this handle was opened with.
    fn name(&self) -> &str;

    /// Read at the current position. Returns `Ok(0)` at end of file.
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;

    /// Read at `offset` without moving the current position.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<usize>;

    /// Write at the current position.
    async fn write(&mut self, buf: &[u8]) -> VfsResult<usize>;

    /// Write at `offset` without moving the current position.
    async fn write_at(&mut self, buf: &[u8], offset: u64) -> VfsResult<usize>;

    /// Move the current position. Returns the new absolute offset.
    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64>;

    /// List directory entries.
    ///
    /// `count <= 0` returns every remaining entry. `count > 0` returns at
    /// most `count` entries; the next call continues where this one ended.
    async fn readdir(&mut self, count: i32) -> VfsResult<Vec<FileMetadata>>;

    /// Like [`readdir`](Self::readdir) but returns names only.
    async fn readdirnames(&mut self, count: i32) -> VfsResult<Vec<String>> {
        Ok(self
            .readdir(count)
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    /// Metadata of the open file.
    async fn stat(&mut self) -> VfsResult<FileMetadata>;

    /// Resize the file.
    async fn truncate(&mut self, size: u64) -> VfsResult<()>;

    /// Flush buffered data to the backing store.
    async fn sync(&mut self) -> VfsResult<()> {
        Ok(())
    }

    /// Release the handle. Further calls are undefined.
    async fn close(&mut self) -> VfsResult<()>;
}

/// Core VFS operations trait.
///
/// All operations are path-based. Paths are interpreted relative to the
/// backend's root; a leading `/` is accepted and ignored.
#[async_trait]
pub trait VfsOps: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file metadata.
    async fn stat(&self, path: &Path) -> VfsResult<FileMetadata>;

    /// Open a file with explicit flags and creation mode.
    async fn open_file(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn FileHandle>>;

    /// Open for reading.
    async fn open(&self, path: &Path) -> VfsResult<Box<dyn FileHandle>> {
        self.open_file(path, OpenFlags::read(), 0).await
    }

    /// Create or truncate a file for reading and writing.
    async fn create(&self, path: &Path) -> VfsResult<Box<dyn FileHandle>> {
        self.open_file(path, OpenFlags::create_truncate(), 0o666)
            .await
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Create a single directory. The parent must exist.
    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()>;

    /// Create a directory and any missing parents.
    async fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()>;

    /// Remove a file or an empty directory.
    async fn remove(&self, path: &Path) -> VfsResult<()>;

    /// Remove a path and everything below it. Missing paths are not an error.
    async fn remove_all(&self, path: &Path) -> VfsResult<()>;

    /// Rename a file or directory.
    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    /// Change permission bits.
    async fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()>;

    /// Change access and modification times.
    async fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> VfsResult<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Returns true if this filesystem refuses all mutation.
    fn read_only(&self) -> bool {
        false
    }

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &Path) -> bool {
        self.stat(path).await.is_ok()
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let mut file = self.open(path).await?;
        let mut out = Vec::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        file.close().await?;
        Ok(out)
    }

    /// Create or truncate `path` and write `data` to it.
    async fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        let mut file = self.create(path).await?;
        let mut written = 0;
        while written < data.len() {
            let n = file.write(&data[written..]).await?;
            if n == 0 {
                return Err(super::VfsError::other("short write"));
            }
            written += n;
        }
        file.close().await
    }

    /// List a directory, sorted by name.
    async fn read_dir(&self, path: &Path) -> VfsResult<Vec<FileMetadata>> {
        let mut dir = self.open(path).await?;
        let mut entries = dir.readdir(-1).await?;
        dir.close().await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
