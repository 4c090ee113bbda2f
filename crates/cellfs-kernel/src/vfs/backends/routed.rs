//! Prefix router: one subtree lives in a different backend.
//!
//! The typical use is a repository worktree whose `.git` directory is
//! stored elsewhere. Paths are forwarded unchanged, so the routed backend
//! sees `/.git/HEAD` rather than `/HEAD`.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{FileHandle, VfsOps};
use crate::vfs::types::{FileMetadata, OpenFlags};

/// Routes paths under `prefix` to `routed` and everything else to `main`.
pub struct RoutedBackend {
    main: Arc<dyn VfsOps>,
    routed: Arc<dyn VfsOps>,
    prefix: PathBuf,
}

impl RoutedBackend {
    pub const DEFAULT_PREFIX: &'static str = ".git";

    /// Route `/.git` and below to `routed`.
    pub fn new(main: Arc<dyn VfsOps>, routed: Arc<dyn VfsOps>) -> Self {
        Self::with_prefix(main, routed, Self::DEFAULT_PREFIX)
    }

    /// Route `prefix` and below to `routed`.
    pub fn with_prefix(
        main: Arc<dyn VfsOps>,
        routed: Arc<dyn VfsOps>,
        prefix: impl AsRef<Path>,
    ) -> Self {
        Self {
            main,
            routed,
            prefix: relative(prefix.as_ref()),
        }
    }

    /// True if `path` belongs to the routed subtree.
    ///
    /// Matching is per component: `/.gitignore` is not under `/.git`.
    pub fn is_routed(&self, path: &Path) -> bool {
        relative(path).starts_with(&self.prefix)
    }

    fn backend(&self, path: &Path) -> &dyn VfsOps {
        if self.is_routed(path) {
            self.routed.as_ref()
        } else {
            self.main.as_ref()
        }
    }
}

/// `path` without its root, with `.` and `..` resolved lexically.
fn relative(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(s) => out.push(s),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

#[async_trait]
impl VfsOps for RoutedBackend {
    fn name(&self) -> &str {
        "routed"
    }

    async fn stat(&self, path: &Path) -> VfsResult<FileMetadata> {
        self.backend(path).stat(path).await
    }

    async fn open_file(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn FileHandle>> {
        self.backend(path).open_file(path, flags, mode).await
    }

    async fn create(&self, path: &Path) -> VfsResult<Box<dyn FileHandle>> {
        self.backend(path).create(path).await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.backend(path).mkdir(path, mode).await
    }

    async fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.backend(path).mkdir_all(path, mode).await
    }

    async fn remove(&self, path: &Path) -> VfsResult<()> {
        self.backend(path).remove(path).await
    }

    async fn remove_all(&self, path: &Path) -> VfsResult<()> {
        self.backend(path).remove_all(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        if self.is_routed(from) != self.is_routed(to) {
            return Err(VfsError::cross_backend(format!(
                "{} -> {}",
                from.display(),
                to.display()
            )));
        }
        self.backend(from).rename(from, to).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.backend(path).chmod(path, mode).await
    }

    async fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        self.backend(path).chtimes(path, atime, mtime).await
    }

    fn read_only(&self) -> bool {
        self.main.read_only() && self.routed.read_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backends::MemoryBackend;
    use crate::vfs::VfsErrorKind;

    fn setup() -> (RoutedBackend, MemoryBackend, MemoryBackend) {
        let (worktree, git) = (MemoryBackend::new(), MemoryBackend::new());
        let fs = RoutedBackend::new(Arc::new(worktree.clone()), Arc::new(git.clone()));
        (fs, worktree, git)
    }

    #[tokio::test]
    async fn test_routes_by_prefix() {
        let (fs, worktree, git) = setup();
        fs.write_all(Path::new("/.git/HEAD"), b"ref: main").await.unwrap();
        fs.write_all(Path::new("/.gitignore"), b"target").await.unwrap();
        fs.write_all(Path::new("/src/lib.rs"), b"").await.unwrap();

        assert!(git.exists(Path::new("/.git/HEAD")).await);
        assert!(worktree.exists(Path::new("/.gitignore")).await);
        assert!(worktree.exists(Path::new("/src/lib.rs")).await);
        assert!(!worktree.exists(Path::new("/.git/HEAD")).await);

        assert_eq!(fs.read_all(Path::new(".git/HEAD")).await.unwrap(), b"ref: main");
    }

    #[tokio::test]
    async fn test_rename_across_is_refused() {
        let (fs, _worktree, _git) = setup();
        fs.write_all(Path::new("/a"), b"").await.unwrap();

        let err = fs
            .rename(Path::new("/a"), Path::new("/.git/a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::CrossBackend);

        fs.rename(Path::new("/a"), Path::new("/b")).await.unwrap();
        assert!(fs.exists(Path::new("/b")).await);
    }

    #[tokio::test]
    async fn test_parent_components_resolve_before_routing() {
        let (fs, worktree, git) = setup();
        assert!(fs.is_routed(Path::new("/src/../.git/HEAD")));
        assert!(!fs.is_routed(Path::new("/.git/../src/lib.rs")));
        assert!(!fs.is_routed(Path::new("/.git/..")));

        fs.write_all(Path::new("/src/../.git/HEAD"), b"ref: main").await.unwrap();
        assert!(git.exists(Path::new("/.git/HEAD")).await);
        assert!(!worktree.exists(Path::new("/.git/HEAD")).await);

        fs.write_all(Path::new("/a"), b"").await.unwrap();
        let err = fs
            .rename(Path::new("/a"), Path::new("/src/../.git/a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::CrossBackend);
    }
}
