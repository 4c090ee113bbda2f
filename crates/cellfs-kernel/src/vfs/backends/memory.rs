//! In-memory filesystem backend.
//!
//! Used as the fast tier of an overlay and in tests. All data is ephemeral.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{FileHandle, VfsOps};
use crate::vfs::types::{base_name, unix_seconds, FileMetadata, OpenFlags};

/// Entry in the memory filesystem.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, perm: u32, mtime: i64 },
    Directory { perm: u32, mtime: i64 },
}

impl Entry {
    fn directory(perm: u32) -> Self {
        Entry::Directory {
            perm,
            mtime: now(),
        }
    }

    fn metadata(&self, name: String) -> FileMetadata {
        match self {
            Entry::File { data, perm, mtime } => {
                FileMetadata::file(name, data.len() as i64, *perm, *mtime)
            }
            Entry::Directory { perm, mtime } => FileMetadata::directory(name, *perm, *mtime),
        }
    }

    fn set_perm(&mut self, mode: u32) {
        match self {
            Entry::File { perm, .. } | Entry::Directory { perm, .. } => *perm = mode & 0o7777,
        }
    }

    fn set_mtime(&mut self, secs: i64) {
        match self {
            Entry::File { mtime, .. } | Entry::Directory { mtime, .. } => *mtime = secs,
        }
    }
}

fn now() -> i64 {
    unix_seconds(SystemTime::now())
}

type Entries = HashMap<PathBuf, Entry>;

/// In-memory filesystem backend.
///
/// Thread-safe via internal `RwLock`. Open handles share the same map, so a
/// write through a handle is visible to `stat` immediately. All data is lost
/// when the last reference is dropped.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    entries: Arc<RwLock<Entries>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory filesystem.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists
        entries.insert(PathBuf::new(), Entry::directory(0o755));
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Normalize a path: remove leading `/`, resolve `.` and `..`.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        result
    }

    fn read_lock(&self) -> VfsResult<RwLockReadGuard<'_, Entries>> {
        self.entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))
    }

    fn write_lock(&self) -> VfsResult<RwLockWriteGuard<'_, Entries>> {
        self.entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))
    }

    /// Ensure all parent directories of `path` exist.
    fn ensure_parents(entries: &mut Entries, path: &Path) -> VfsResult<()> {
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            if let Component::Normal(s) = component {
                current.push(s);
                match entries
                    .entry(current.clone())
                    .or_insert_with(|| Entry::directory(0o755))
                {
                    Entry::Directory { .. } => {}
                    Entry::File { .. } => {
                        return Err(VfsError::not_a_directory(path_str(&current)));
                    }
                }
            }
        }
        Ok(())
    }

    fn has_children(entries: &Entries, dir: &Path) -> bool {
        entries
            .keys()
            .any(|p| p.parent() == Some(dir) && p.as_path() != dir)
    }
}

fn path_str(path: &Path) -> String {
    format!("/{}", path.display())
}

#[async_trait]
impl VfsOps for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn stat(&self, path: &Path) -> VfsResult<FileMetadata> {
        let normalized = Self::normalize(path);
        let entries = self.read_lock()?;
        entries
            .get(&normalized)
            .map(|e| e.metadata(base_name(&normalized)))
            .ok_or_else(|| VfsError::not_found(path_str(&normalized)))
    }

    async fn open_file(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn FileHandle>> {
        let normalized = Self::normalize(path);
        {
            let mut entries = self.write_lock()?;
            if !entries.contains_key(&normalized) {
                if !flags.create {
                    return Err(VfsError::not_found(path_str(&normalized)));
                }
                Self::ensure_parents(&mut entries, &normalized)?;
                entries.insert(
                    normalized.clone(),
                    Entry::File {
                        data: Vec::new(),
                        perm: mode & 0o7777,
                        mtime: now(),
                    },
                );
            } else if flags.create && flags.exclusive {
                return Err(VfsError::already_exists(path_str(&normalized)));
            } else {
                match entries.get_mut(&normalized) {
                    Some(Entry::Directory { .. }) if flags.is_write() => {
                        return Err(VfsError::is_a_directory(path_str(&normalized)));
                    }
                    Some(Entry::File { data, mtime, .. }) if flags.truncate => {
                        data.clear();
                        *mtime = now();
                    }
                    _ => {}
                }
            }
        }

        Ok(Box::new(MemoryFile {
            fs: self.clone(),
            name: path.to_string_lossy().into_owned(),
            path: normalized,
            flags,
            pos: 0,
            dir_entries: None,
        }))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.write_lock()?;
        if entries.contains_key(&normalized) {
            return Err(VfsError::already_exists(path_str(&normalized)));
        }
        let parent = normalized.parent().unwrap_or(Path::new(""));
        match entries.get(parent) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => return Err(VfsError::not_a_directory(path_str(parent))),
            None => return Err(VfsError::not_found(path_str(parent))),
        }
        entries.insert(normalized, Entry::directory(mode & 0o7777));
        Ok(())
    }

    async fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.write_lock()?;
        Self::ensure_parents(&mut entries, &normalized)?;
        match entries
            .entry(normalized.clone())
            .or_insert_with(|| Entry::directory(mode & 0o7777))
        {
            Entry::Directory { .. } => Ok(()),
            Entry::File { .. } => Err(VfsError::not_a_directory(path_str(&normalized))),
        }
    }

    async fn remove(&self, path: &Path) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        if normalized.as_os_str().is_empty() {
            return Err(VfsError::invalid_path("cannot remove root"));
        }
        let mut entries = self.write_lock()?;
        match entries.get(&normalized) {
            None => return Err(VfsError::not_found(path_str(&normalized))),
            Some(Entry::Directory { .. }) if Self::has_children(&entries, &normalized) => {
                return Err(VfsError::directory_not_empty(path_str(&normalized)));
            }
            Some(_) => {}
        }
        entries.remove(&normalized);
        Ok(())
    }

    async fn remove_all(&self, path: &Path) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        if normalized.as_os_str().is_empty() {
            return Err(VfsError::invalid_path("cannot remove root"));
        }
        let mut entries = self.write_lock()?;
        entries.retain(|p, _| !p.starts_with(&normalized));
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        let from = Self::normalize(from);
        let to = Self::normalize(to);
        if from.as_os_str().is_empty() || to.as_os_str().is_empty() {
            return Err(VfsError::invalid_path("cannot rename root"));
        }
        if from == to {
            return Ok(());
        }
        if to.starts_with(&from) {
            return Err(VfsError::invalid_path(format!(
                "cannot move {} into itself",
                path_str(&from)
            )));
        }

        let mut entries = self.write_lock()?;
        if !entries.contains_key(&from) {
            return Err(VfsError::not_found(path_str(&from)));
        }
        let parent = to.parent().unwrap_or(Path::new(""));
        if !matches!(entries.get(parent), Some(Entry::Directory { .. })) {
            return Err(VfsError::not_found(path_str(parent)));
        }
        if let Some(Entry::Directory { .. }) = entries.get(&to) {
            if Self::has_children(&entries, &to) {
                return Err(VfsError::directory_not_empty(path_str(&to)));
            }
        }

        let moved: Vec<PathBuf> = entries
            .keys()
            .filter(|p| p.starts_with(&from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(entry) = entries.remove(&old) {
                let suffix = old.strip_prefix(&from).unwrap_or(Path::new(""));
                let new = if suffix.as_os_str().is_empty() {
                    to.clone()
                } else {
                    to.join(suffix)
                };
                entries.insert(new, entry);
            }
        }
        Ok(())
    }

    async fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.write_lock()?;
        entries
            .get_mut(&normalized)
            .ok_or_else(|| VfsError::not_found(path_str(&normalized)))?
            .set_perm(mode);
        Ok(())
    }

    async fn chtimes(&self, path: &Path, _atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        let normalized = Self::normalize(path);
        let mut entries = self.write_lock()?;
        entries
            .get_mut(&normalized)
            .ok_or_else(|| VfsError::not_found(path_str(&normalized)))?
            .set_mtime(unix_seconds(mtime));
        Ok(())
    }
}

/// Handle into a [`MemoryBackend`].
///
/// Holds a reference to the shared map rather than a copy of the data, so
/// removing the path while it is open makes later calls fail with NotFound.
struct MemoryFile {
    fs: MemoryBackend,
    name: String,
    path: PathBuf,
    flags: OpenFlags,
    pos: u64,
    dir_entries: Option<VecDeque<FileMetadata>>,
}

impl MemoryFile {
    fn check_writable(&self) -> VfsResult<()> {
        if self.flags.write || self.flags.append {
            Ok(())
        } else {
            Err(VfsError::permission_denied(format!(
                "{} not opened for writing",
                self.name
            )))
        }
    }

    fn read_from(&self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        let entries = self.fs.read_lock()?;
        match entries.get(&self.path) {
            Some(Entry::File { data, .. }) => {
                let start = (offset as usize).min(data.len());
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                Ok(n)
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(&self.name)),
            None => Err(VfsError::not_found(&self.name)),
        }
    }

    fn write_to(&self, buf: &[u8], offset: Option<u64>) -> VfsResult<u64> {
        self.check_writable()?;
        let mut entries = self.fs.write_lock()?;
        match entries.get_mut(&self.path) {
            Some(Entry::File { data, mtime, .. }) => {
                let start = offset.unwrap_or(data.len() as u64) as usize;
                let end = start + buf.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(buf);
                *mtime = now();
                Ok(end as u64)
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(&self.name)),
            None => Err(VfsError::not_found(&self.name)),
        }
    }

    fn len(&self) -> VfsResult<u64> {
        let entries = self.fs.read_lock()?;
        match entries.get(&self.path) {
            Some(Entry::File { data, .. }) => Ok(data.len() as u64),
            Some(Entry::Directory { .. }) => Ok(0),
            None => Err(VfsError::not_found(&self.name)),
        }
    }

    fn list(&self) -> VfsResult<VecDeque<FileMetadata>> {
        let entries = self.fs.read_lock()?;
        match entries.get(&self.path) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => return Err(VfsError::not_a_directory(&self.name)),
            None => return Err(VfsError::not_found(&self.name)),
        }
        let mut children: Vec<FileMetadata> = entries
            .iter()
            .filter(|(p, _)| p.parent() == Some(self.path.as_path()) && **p != self.path)
            .map(|(p, e)| e.metadata(base_name(p)))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children.into())
    }
}

#[async_trait]
impl FileHandle for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let n = self.read_from(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        self.read_from(buf, offset)
    }

    async fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        let offset = if self.flags.append { None } else { Some(self.pos) };
        self.pos = self.write_to(buf, offset)?;
        Ok(buf.len())
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        self.write_to(buf, Some(offset))?;
        Ok(buf.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => self.len()?.checked_add_signed(d),
        };
        self.pos = target.ok_or_else(|| VfsError::invalid_path("negative seek offset"))?;
        Ok(self.pos)
    }

    async fn readdir(&mut self, count: i32) -> VfsResult<Vec<FileMetadata>> {
        if self.dir_entries.is_none() {
            self.dir_entries = Some(self.list()?);
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
        self.fs.stat(&self.path).await
    }

    async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.check_writable()?;
        let mut entries = self.fs.write_lock()?;
        match entries.get_mut(&self.path) {
            Some(Entry::File { data, mtime, .. }) => {
                data.resize(size as usize, 0);
                *mtime = now();
                Ok(())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(&self.name)),
            None => Err(VfsError::not_found(&self.name)),
        }
    }

    async fn close(&mut self) -> VfsResult<()> {
        self.dir_entries = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::types::from_unix_seconds;

    #[tokio::test]
    async fn test_create_and_read() {
        let fs = MemoryBackend::new();
        fs.write_all(Path::new("/test.txt"), b"hello world")
            .await
            .unwrap();

        let data = fs.read_all(Path::new("/test.txt")).await.unwrap();
        assert_eq!(data, b"hello world");

        let meta = fs.stat(Path::new("test.txt")).await.unwrap();
        assert_eq!(meta.name, "test.txt");
        assert_eq!(meta.size, 11);
    }

    #[tokio::test]
    async fn test_partial_reads_and_seek() {
        let fs = MemoryBackend::new();
        fs.write_all(Path::new("f"), b"hello world").await.unwrap();

        let mut file = fs.open(Path::new("f")).await.unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(file.read_at(&mut buf, 6).await.unwrap(), 5);
        assert_eq!(&buf, b"world");

        assert_eq!(file.seek(SeekFrom::End(-5)).await.unwrap(), 6);
        assert_eq!(file.read(&mut buf).await.unwrap(), 5);
        assert_eq!(file.read(&mut buf).await.unwrap(), 0);

        assert!(file.seek(SeekFrom::Current(-100)).await.is_err());
    }

    #[tokio::test]
    async fn test_write_requires_write_flag() {
        let fs = MemoryBackend::new();
        fs.write_all(Path::new("f"), b"x").await.unwrap();

        let mut file = fs.open(Path::new("f")).await.unwrap();
        let err = file.write(b"y").await.unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_append_and_write_at() {
        let fs = MemoryBackend::new();
        fs.write_all(Path::new("f"), b"abc").await.unwrap();

        let mut file = fs
            .open_file(Path::new("f"), OpenFlags::append(), 0o644)
            .await
            .unwrap();
        file.write(b"def").await.unwrap();
        file.write_at(b"X", 0).await.unwrap();
        file.write(b"g").await.unwrap();

        let data = fs.read_all(Path::new("f")).await.unwrap();
        assert_eq!(data, b"Xbcdefg");
    }

    #[tokio::test]
    async fn test_exclusive_create() {
        let fs = MemoryBackend::new();
        fs.open_file(Path::new("f"), OpenFlags::create_exclusive(), 0o644)
            .await
            .unwrap();
        let err = fs
            .open_file(Path::new("f"), OpenFlags::create_exclusive(), 0o644)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_mkdir_and_readdir() {
        let fs = MemoryBackend::new();
        fs.mkdir(Path::new("/dir"), 0o755).await.unwrap();
        fs.write_all(Path::new("/dir/b"), b"").await.unwrap();
        fs.write_all(Path::new("/dir/a"), b"").await.unwrap();
        fs.mkdir(Path::new("/dir/sub"), 0o755).await.unwrap();

        let entries = fs.read_dir(Path::new("/dir")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "sub"]);
        assert!(entries[2].is_dir);

        let mut dir = fs.open(Path::new("/dir")).await.unwrap();
        assert_eq!(dir.readdirnames(2).await.unwrap(), vec!["a", "b"]);
        assert_eq!(dir.readdirnames(0).await.unwrap(), vec!["sub"]);
    }

    #[tokio::test]
    async fn test_mkdir_errors() {
        let fs = MemoryBackend::new();
        assert!(fs
            .mkdir(Path::new("/a/b"), 0o755)
            .await
            .unwrap_err()
            .is_not_found());

        fs.mkdir_all(Path::new("/a/b"), 0o755).await.unwrap();
        let err = fs.mkdir(Path::new("/a/b"), 0o755).await.unwrap_err();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
        fs.mkdir_all(Path::new("/a/b"), 0o755).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove() {
        let fs = MemoryBackend::new();
        fs.write_all(Path::new("/d/f"), b"x").await.unwrap();

        let err = fs.remove(Path::new("/d")).await.unwrap_err();
        assert!(matches!(err, VfsError::DirectoryNotEmpty(_)));

        fs.remove(Path::new("/d/f")).await.unwrap();
        fs.remove(Path::new("/d")).await.unwrap();
        assert!(fs.remove(Path::new("/d")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_all() {
        let fs = MemoryBackend::new();
        fs.write_all(Path::new("/d/e/f"), b"x").await.unwrap();
        fs.write_all(Path::new("/dd"), b"x").await.unwrap();

        fs.remove_all(Path::new("/d")).await.unwrap();
        assert!(!fs.exists(Path::new("/d/e/f")).await);
        assert!(fs.exists(Path::new("/dd")).await);
        fs.remove_all(Path::new("/missing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_directory() {
        let fs = MemoryBackend::new();
        fs.write_all(Path::new("/old/f"), b"content").await.unwrap();

        fs.rename(Path::new("/old"), Path::new("/new")).await.unwrap();

        assert!(!fs.exists(Path::new("/old")).await);
        let data = fs.read_all(Path::new("/new/f")).await.unwrap();
        assert_eq!(data, b"content");
    }

    #[tokio::test]
    async fn test_chmod_and_chtimes() {
        let fs = MemoryBackend::new();
        fs.write_all(Path::new("/f"), b"").await.unwrap();

        fs.chmod(Path::new("/f"), 0o600).await.unwrap();
        let t = from_unix_seconds(100);
        fs.chtimes(Path::new("/f"), t, t).await.unwrap();

        let meta = fs.stat(Path::new("/f")).await.unwrap();
        assert_eq!(meta.mode.perm(), 0o600);
        assert_eq!(meta.mtime, 100);
    }

    #[tokio::test]
    async fn test_handle_sees_removal() {
        let fs = MemoryBackend::new();
        fs.write_all(Path::new("/f"), b"x").await.unwrap();
        let mut file = fs.open(Path::new("/f")).await.unwrap();
        fs.remove(Path::new("/f")).await.unwrap();

        let mut buf = [0u8; 1];
        assert!(file.read(&mut buf).await.unwrap_err().is_not_found());
    }
}
