//! Read-only local backend with block-based directory listing.
//!
//! Listing a directory through [`LocalBackend`] costs one `stat` per entry.
//! `FastReadBackend` instead pulls raw `linux_dirent64` records from the
//! kernel 8 KiB at a time and takes each entry's type from the record
//! itself. Entries carry only a name and a type; size and mtime are zero.
//!
//! Every mutating operation fails with `NotPermitted`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::LocalBackend;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{FileHandle, VfsOps};
use crate::vfs::types::{base_name, FileMetadata, FileMode, FileType, OpenFlags};

/// Bytes requested from the kernel per directory read.
pub const BLOCK_SIZE: usize = 8 << 10;

/// Read-only view of a local directory tree with a fast `readdir`.
#[derive(Debug, Clone)]
pub struct FastReadBackend {
    local: LocalBackend,
}

impl FastReadBackend {
    /// Wrap a directory tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_local(LocalBackend::new(root))
    }

    /// Wrap an existing local backend. Its own read-only flag is irrelevant.
    pub fn from_local(local: LocalBackend) -> Self {
        Self { local }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        self.local.root()
    }

    fn refuse<T>(op: &str, path: &Path) -> VfsResult<T> {
        Err(VfsError::not_permitted(format!(
            "{op} {}: fast-read filesystem is read-only",
            path.display()
        )))
    }
}

#[async_trait]
impl VfsOps for FastReadBackend {
    fn name(&self) -> &str {
        "fastread"
    }

    async fn stat(&self, path: &Path) -> VfsResult<FileMetadata> {
        self.local.stat(path).await
    }

    async fn open_file(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn FileHandle>> {
        if flags.is_write() {
            return Self::refuse("open for writing", path);
        }
        let full_path = self.local.resolve(path)?;
        let meta = tokio::fs::metadata(&full_path).await?;
        if !meta.is_dir() {
            return self.local.open_file(path, flags, mode).await;
        }

        let dir = {
            let full_path = full_path.clone();
            tokio::task::spawn_blocking(move || std::fs::File::open(full_path))
                .await
                .map_err(|e| VfsError::other(format!("open task failed: {e}")))??
        };
        Ok(Box::new(FastDirFile {
            name: path.to_string_lossy().into_owned(),
            path: full_path,
            dir: Some(dir),
            pending: VecDeque::new(),
            exhausted: false,
        }))
    }

    async fn create(&self, path: &Path) -> VfsResult<Box<dyn FileHandle>> {
        Self::refuse("create", path)
    }

    async fn mkdir(&self, path: &Path, _mode: u32) -> VfsResult<()> {
        Self::refuse("mkdir", path)
    }

    async fn mkdir_all(&self, path: &Path, _mode: u32) -> VfsResult<()> {
        Self::refuse("mkdir", path)
    }

    async fn remove(&self, path: &Path) -> VfsResult<()> {
        Self::refuse("remove", path)
    }

    async fn remove_all(&self, path: &Path) -> VfsResult<()> {
        Self::refuse("remove", path)
    }

    async fn rename(&self, from: &Path, _to: &Path) -> VfsResult<()> {
        Self::refuse("rename", from)
    }

    async fn chmod(&self, path: &Path, _mode: u32) -> VfsResult<()> {
        Self::refuse("chmod", path)
    }

    async fn chtimes(&self, path: &Path, _atime: SystemTime, _mtime: SystemTime) -> VfsResult<()> {
        Self::refuse("chtimes", path)
    }

    fn read_only(&self) -> bool {
        true
    }
}

/// An open directory whose entries come from raw kernel blocks.
///
/// The std file moves into a blocking task for each block read and comes
/// back with the decoded entries.
struct FastDirFile {
    name: String,
    path: PathBuf,
    dir: Option<std::fs::File>,
    pending: VecDeque<FileMetadata>,
    exhausted: bool,
}

impl FastDirFile {
    /// Decode one more block into `pending`.
    async fn fill(&mut self) -> VfsResult<()> {
        let dir = self
            .dir
            .take()
            .ok_or_else(|| VfsError::other(format!("{} is closed", self.name)))?;
        let path = self.path.clone();

        let (dir, block) = tokio::task::spawn_blocking(move || {
            let block = read_block(&dir, &path);
            (dir, block)
        })
        .await
        .map_err(|e| VfsError::other(format!("readdir task failed: {e}")))?;
        self.dir = Some(dir);

        match block? {
            Some(entries) => {
                self.pending.extend(entries);
                if cfg!(not(target_os = "linux")) {
                    self.exhausted = true;
                }
            }
            None => self.exhausted = true,
        }
        Ok(())
    }

    fn is_a_directory(&self) -> VfsError {
        VfsError::is_a_directory(&self.name)
    }
}

#[async_trait]
impl FileHandle for FastDirFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self, _buf: &mut [u8]) -> VfsResult<usize> {
        Err(self.is_a_directory())
    }

    async fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> VfsResult<usize> {
        Err(self.is_a_directory())
    }

    async fn write(&mut self, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsError::not_permitted(format!("write {}", self.name)))
    }

    async fn write_at(&mut self, _buf: &[u8], _offset: u64) -> VfsResult<usize> {
        Err(VfsError::not_permitted(format!("write {}", self.name)))
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        // Only rewinding is meaningful for a dirent stream.
        if pos != SeekFrom::Start(0) {
            return Err(VfsError::invalid_path(format!(
                "{}: directories only support seeking to the start",
                self.name
            )));
        }
        let dir = std::fs::File::open(&self.path)?;
        self.dir = Some(dir);
        self.pending.clear();
        self.exhausted = false;
        Ok(0)
    }

    async fn readdir(&mut self, count: i32) -> VfsResult<Vec<FileMetadata>> {
        let want = if count <= 0 { usize::MAX } else { count as usize };
        while self.pending.len() < want && !self.exhausted {
            self.fill().await?;
        }
        let take = want.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    async fn stat(&mut self) -> VfsResult<FileMetadata> {
        let meta = tokio::fs::metadata(&self.path).await?;
        Ok(FileMetadata::from_std(base_name(&self.path), &meta))
    }

    async fn truncate(&mut self, _size: u64) -> VfsResult<()> {
        Err(VfsError::not_permitted(format!("truncate {}", self.name)))
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.dir = None;
        self.pending.clear();
        Ok(())
    }
}

fn entry(name: String, kind: FileType) -> FileMetadata {
    FileMetadata {
        name,
        size: 0,
        mode: FileMode::new(kind, 0),
        mtime: 0,
        is_dir: kind.is_dir(),
    }
}

/// Read and decode one block of entries. `None` at end of directory.
#[cfg(target_os = "linux")]
fn read_block(dir: &std::fs::File, path: &Path) -> VfsResult<Option<Vec<FileMetadata>>> {
    use std::os::unix::io::AsRawFd;

    let mut buf = vec![0u8; BLOCK_SIZE];
    // SAFETY: the fd is owned by `dir` for the duration of the call and the
    // kernel writes at most `buf.len()` bytes into `buf`.
    let n = unsafe {
        libc::syscall(
            libc::SYS_getdents64,
            dir.as_raw_fd(),
            buf.as_mut_ptr(),
            buf.len(),
        )
    };
    if n < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    if n == 0 {
        return Ok(None);
    }

    let entries = decode_block(&buf[..n as usize], |name| {
        std::fs::symlink_metadata(path.join(name)).map(|meta| FileType::from_std(meta.file_type()))
    })?;
    Ok(Some(entries))
}

/// Decode one block of raw records. `lookup` resolves entries whose type
/// the filesystem left as `DT_UNKNOWN`; a `NotFound` from it means the
/// entry vanished after the block was read and it is skipped.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn decode_block<F>(buf: &[u8], mut lookup: F) -> VfsResult<Vec<FileMetadata>>
where
    F: FnMut(&str) -> std::io::Result<FileType>,
{
    use crate::vfs::dirent::{self, DirentKind};

    let mut entries = Vec::new();
    for record in dirent::parse(buf) {
        let record = record?;
        if record.is_skippable() {
            continue;
        }
        let name = String::from_utf8_lossy(record.name).into_owned();
        let kind = match record.kind() {
            DirentKind::Known(kind) => kind,
            DirentKind::Unknown => match lookup(&name) {
                Ok(kind) => kind,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            },
            DirentKind::Unsupported(d_type) => {
                tracing::trace!(name = %name, d_type, "skipping unsupported dirent type");
                continue;
            }
        };
        entries.push(entry(name, kind));
    }
    Ok(entries)
}

/// Portable fallback: the whole listing arrives as a single block.
#[cfg(not(target_os = "linux"))]
fn read_block(_dir: &std::fs::File, path: &Path) -> VfsResult<Option<Vec<FileMetadata>>> {
    let mut entries = Vec::new();
    for item in std::fs::read_dir(path)? {
        let item = item?;
        let kind = match item.file_type() {
            Ok(ft) => FileType::from_std(ft),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        entries.push(entry(item.file_name().to_string_lossy().into_owned(), kind));
    }
    Ok(Some(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::dirent::testing::push_record;
    use crate::vfs::dirent::{DT_DIR, DT_REG, DT_UNKNOWN, DT_WHT};
    use std::io;
    use tempfile::TempDir;

    fn setup() -> (FastReadBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let backend = FastReadBackend::new(dir.path());
        (backend, dir)
    }

    #[tokio::test]
    async fn test_lists_entries_without_dot_dirs() {
        let (backend, _dir) = setup();
        let mut entries = backend.read_dir(Path::new("/")).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".git", "README", "src"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].file_type(), FileType::File);
        assert!(entries[2].is_dir);
    }

    #[tokio::test]
    async fn test_readdir_is_repeatable() {
        let (backend, _dir) = setup();

        let mut first = backend.open(Path::new("")).await.unwrap();
        let a = first.readdirnames(-1).await.unwrap();
        let mut second = backend.open(Path::new("")).await.unwrap();
        let b = second.readdirnames(-1).await.unwrap();
        assert_eq!(a, b);

        first.seek(SeekFrom::Start(0)).await.unwrap();
        assert_eq!(first.readdirnames(0).await.unwrap(), a);
    }

    #[tokio::test]
    async fn test_readdir_paging() {
        let (backend, _dir) = setup();
        let mut dir = backend.open(Path::new("")).await.unwrap();
        let mut seen = dir.readdirnames(2).await.unwrap();
        assert_eq!(seen.len(), 2);
        seen.extend(dir.readdirnames(2).await.unwrap());
        assert_eq!(seen.len(), 3);
        assert!(dir.readdirnames(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_files_read_through_local() {
        let (backend, _dir) = setup();
        let data = backend.read_all(Path::new("README")).await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(backend.stat(Path::new("README")).await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn test_mutations_not_permitted() {
        let (backend, _dir) = setup();
        let not_permitted = |r: VfsResult<()>| matches!(r, Err(VfsError::NotPermitted(_)));

        assert!(not_permitted(backend.mkdir(Path::new("x"), 0o755).await));
        assert!(not_permitted(backend.mkdir_all(Path::new("x/y"), 0o755).await));
        assert!(not_permitted(backend.remove(Path::new("README")).await));
        assert!(not_permitted(backend.remove_all(Path::new("src")).await));
        assert!(not_permitted(
            backend.rename(Path::new("README"), Path::new("R")).await
        ));
        assert!(not_permitted(backend.chmod(Path::new("README"), 0o600).await));
        let now = SystemTime::now();
        assert!(not_permitted(
            backend.chtimes(Path::new("README"), now, now).await
        ));

        assert!(matches!(
            backend.create(Path::new("new")).await,
            Err(VfsError::NotPermitted(_))
        ));
        assert!(matches!(
            backend
                .open_file(Path::new("README"), OpenFlags::write(), 0)
                .await,
            Err(VfsError::NotPermitted(_))
        ));
        assert!(backend.read_only());
    }

    #[test]
    fn test_unknown_type_falls_back_to_lookup() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, DT_DIR, ".");
        push_record(&mut buf, 2, DT_REG, "known");
        push_record(&mut buf, 3, DT_UNKNOWN, "subdir");
        push_record(&mut buf, 4, DT_UNKNOWN, "gone");
        push_record(&mut buf, 5, DT_WHT, "whiteout");

        let mut asked = Vec::new();
        let entries = decode_block(&buf, |name| {
            asked.push(name.to_string());
            match name {
                "subdir" => Ok(FileType::Directory),
                _ => Err(io::Error::from(io::ErrorKind::NotFound)),
            }
        })
        .unwrap();

        assert_eq!(asked, vec!["subdir", "gone"]);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["known", "subdir"]);
        assert_eq!(entries[0].file_type(), FileType::File);
        assert!(entries[1].is_dir);
    }

    #[test]
    fn test_lookup_failure_other_than_missing_is_reported() {
        let mut buf = Vec::new();
        push_record(&mut buf, 1, DT_UNKNOWN, "locked");

        let err = decode_block(&buf, |_| Err(io::Error::from(io::ErrorKind::PermissionDenied)))
            .unwrap_err();
        assert_eq!(err.kind(), crate::vfs::VfsErrorKind::PermissionDenied);
    }
}
