//! Overlay of two backends reconciled by modification time.
//!
//! Every operation first classifies the path by stat-ing it in both
//! backends ([`OverlayState`]). Metadata operations then go to whichever
//! backends hold the path; opens return a [`LayeredFile`] that reads from
//! the fresher copy and writes to both.
//!
//! Classification is recomputed on every call and never cached, so two
//! concurrent operations on the same path may observe different states.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{FileHandle, VfsOps};
use crate::vfs::types::{FileMetadata, OpenFlags};

/// Where a path lives across the two backends of an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    AbsentInBoth,
    AbsentInFirst,
    AbsentInSecond,
    FirstNewer,
    SecondNewer,
    Equal,
}

impl OverlayState {
    /// Classify from the two stat results (`None` = not found).
    pub fn from_stats(first: Option<&FileMetadata>, second: Option<&FileMetadata>) -> Self {
        match (first, second) {
            (None, None) => OverlayState::AbsentInBoth,
            (None, Some(_)) => OverlayState::AbsentInFirst,
            (Some(_), None) => OverlayState::AbsentInSecond,
            (Some(a), Some(b)) => match a.mtime.cmp(&b.mtime) {
                std::cmp::Ordering::Greater => OverlayState::FirstNewer,
                std::cmp::Ordering::Less => OverlayState::SecondNewer,
                std::cmp::Ordering::Equal => OverlayState::Equal,
            },
        }
    }

    /// True if both backends hold the path.
    pub fn in_both(&self) -> bool {
        matches!(
            self,
            OverlayState::FirstNewer | OverlayState::SecondNewer | OverlayState::Equal
        )
    }
}

/// Result of classifying one path.
struct Classified {
    state: OverlayState,
    first: Option<FileMetadata>,
    second: Option<FileMetadata>,
}

/// Metadata mutation that may be applied to one or both backends.
enum Mutation<'a> {
    Chtimes(SystemTime, SystemTime),
    Chmod(u32),
    Rename(&'a Path),
    Remove,
    RemoveAll,
}

impl Mutation<'_> {
    fn name(&self) -> &'static str {
        match self {
            Mutation::Chtimes(..) => "chtimes",
            Mutation::Chmod(_) => "chmod",
            Mutation::Rename(_) => "rename",
            Mutation::Remove => "remove",
            Mutation::RemoveAll => "remove_all",
        }
    }

    async fn apply(&self, fs: &dyn VfsOps, path: &Path) -> VfsResult<()> {
        match self {
            Mutation::Chtimes(atime, mtime) => fs.chtimes(path, *atime, *mtime).await,
            Mutation::Chmod(mode) => fs.chmod(path, *mode).await,
            Mutation::Rename(to) => fs.rename(path, to).await,
            Mutation::Remove => fs.remove(path).await,
            Mutation::RemoveAll => fs.remove_all(path).await,
        }
    }
}

/// Merge the outcome of applying one call to both backends.
///
/// One failure wins over a success. When both fail with the same kind the
/// first backend's error is reported; differing kinds are `Inconsistent`.
fn merge_results(op: &str, path: &Path, first: VfsResult<()>, second: VfsResult<()>) -> VfsResult<()> {
    match (first, second) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) => {
            warn!(op, path = %path.display(), error = %e, "first overlay backend failed");
            Err(e)
        }
        (Ok(()), Err(e)) => {
            warn!(op, path = %path.display(), error = %e, "second overlay backend failed");
            Err(e)
        }
        (Err(e1), Err(e2)) if e1.kind() == e2.kind() => Err(e1),
        (Err(e1), Err(e2)) => Err(VfsError::inconsistent(format!(
            "{op} {}: first backend: {e1}; second backend: {e2}",
            path.display()
        ))),
    }
}

fn stat_presence(result: VfsResult<FileMetadata>) -> VfsResult<Option<FileMetadata>> {
    match result {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Two backends presented as one.
pub struct OverlayBackend {
    first: Arc<dyn VfsOps>,
    second: Arc<dyn VfsOps>,
}

impl OverlayBackend {
    /// Overlay `first` and `second`. On equal mtimes `first` wins.
    pub fn new(first: Arc<dyn VfsOps>, second: Arc<dyn VfsOps>) -> Self {
        Self { first, second }
    }

    /// Classify `path` across both backends.
    ///
    /// Errors other than "not found" from either side are returned as-is,
    /// the first backend's taking precedence.
    pub async fn state(&self, path: &Path) -> VfsResult<OverlayState> {
        Ok(self.classify(path).await?.state)
    }

    async fn classify(&self, path: &Path) -> VfsResult<Classified> {
        let (r1, r2) = tokio::join!(self.first.stat(path), self.second.stat(path));
        let first = stat_presence(r1);
        let second = stat_presence(r2);
        let (first, second) = (first?, second?);

        let state = OverlayState::from_stats(first.as_ref(), second.as_ref());
        debug!(path = %path.display(), ?state, "classified overlay path");
        Ok(Classified {
            state,
            first,
            second,
        })
    }

    fn no_entry(path: &Path) -> VfsError {
        VfsError::not_found(format!("{}: no entry in either backend", path.display()))
    }

    async fn mutate(&self, path: &Path, op: Mutation<'_>) -> VfsResult<()> {
        let classified = self.classify(path).await?;
        match classified.state {
            OverlayState::AbsentInBoth => Err(Self::no_entry(path)),
            OverlayState::AbsentInFirst => op.apply(self.second.as_ref(), path).await,
            OverlayState::AbsentInSecond => op.apply(self.first.as_ref(), path).await,
            OverlayState::FirstNewer | OverlayState::SecondNewer | OverlayState::Equal => {
                let (r1, r2) = tokio::join!(
                    op.apply(self.first.as_ref(), path),
                    op.apply(self.second.as_ref(), path)
                );
                merge_results(op.name(), path, r1, r2)
            }
        }
    }

    /// Open in both backends; `primary` serves reads.
    async fn open_both(
        &self,
        path: &Path,
        primary: (&dyn VfsOps, OpenFlags),
        secondary: (&dyn VfsOps, OpenFlags),
        mode: u32,
    ) -> VfsResult<Box<dyn FileHandle>> {
        let mut primary_file = primary.0.open_file(path, primary.1, mode).await?;
        match secondary.0.open_file(path, secondary.1, mode).await {
            Ok(secondary_file) => Ok(Box::new(LayeredFile::new(
                primary_file,
                Some(secondary_file),
            ))),
            Err(e) => {
                if let Err(close_err) = primary_file.close().await {
                    debug!(path = %path.display(), error = %close_err, "close after failed overlay open");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl VfsOps for OverlayBackend {
    fn name(&self) -> &str {
        "overlay"
    }

    async fn stat(&self, path: &Path) -> VfsResult<FileMetadata> {
        let classified = self.classify(path).await?;
        let meta = match classified.state {
            OverlayState::AbsentInBoth => None,
            OverlayState::AbsentInFirst | OverlayState::SecondNewer => classified.second,
            OverlayState::AbsentInSecond | OverlayState::FirstNewer | OverlayState::Equal => {
                classified.first
            }
        };
        meta.ok_or_else(|| Self::no_entry(path))
    }

    async fn open_file(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> VfsResult<Box<dyn FileHandle>> {
        let first = self.first.as_ref();
        let second = self.second.as_ref();
        let classified = self.classify(path).await?;

        // A write through the overlay must land in both backends, so the
        // side that lacks the path gets it created.
        let creating = OpenFlags {
            create: true,
            ..flags
        };

        match classified.state {
            OverlayState::AbsentInBoth if flags.create => {
                self.open_both(path, (first, flags), (second, flags), mode)
                    .await
            }
            OverlayState::AbsentInBoth => Err(Self::no_entry(path)),
            OverlayState::AbsentInFirst if flags.is_write() => {
                self.open_both(path, (second, flags), (first, creating), mode)
                    .await
            }
            OverlayState::AbsentInFirst => {
                let file = second.open_file(path, flags, mode).await?;
                Ok(Box::new(LayeredFile::new(file, None)))
            }
            OverlayState::AbsentInSecond if flags.is_write() => {
                self.open_both(path, (first, flags), (second, creating), mode)
                    .await
            }
            OverlayState::AbsentInSecond => {
                let file = first.open_file(path, flags, mode).await?;
                Ok(Box::new(LayeredFile::new(file, None)))
            }
            OverlayState::SecondNewer => {
                self.open_both(path, (second, flags), (first, flags), mode)
                    .await
            }
            OverlayState::FirstNewer | OverlayState::Equal => {
                self.open_both(path, (first, flags), (second, flags), mode)
                    .await
            }
        }
    }

    async fn create(&self, path: &Path) -> VfsResult<Box<dyn FileHandle>> {
        let flags = OpenFlags::create_truncate();
        self.open_both(
            path,
            (self.first.as_ref(), flags),
            (self.second.as_ref(), flags),
            0o666,
        )
        .await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<()> {
        // The parent may exist on one side only.
        self.mkdir_all(path, mode).await
    }

    async fn mkdir_all(&self, path: &Path, mode: u32) -> VfsResult<()> {
        let (r1, r2) = tokio::join!(
            self.first.mkdir_all(path, mode),
            self.second.mkdir_all(path, mode)
        );
        r1.and(r2)
    }

    async fn remove(&self, path: &Path) -> VfsResult<()> {
        self.mutate(path, Mutation::Remove).await
    }

    async fn remove_all(&self, path: &Path) -> VfsResult<()> {
        self.mutate(path, Mutation::RemoveAll).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.mutate(from, Mutation::Rename(to)).await
    }

    async fn chmod(&self, path: &Path, mode: u32) -> VfsResult<()> {
        self.mutate(path, Mutation::Chmod(mode)).await
    }

    async fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> VfsResult<()> {
        self.mutate(path, Mutation::Chtimes(atime, mtime)).await
    }

    fn read_only(&self) -> bool {
        self.first.read_only() && self.second.read_only()
    }
}

/// A file open in one or two backends.
///
/// Routing:
/// - `read`, `read_at`, `readdir`, `readdirnames` and `stat` are served by
///   `primary` only.
/// - `write`, `write_at`, `truncate`, `sync` and `close` go to `primary`
///   and then to `secondary`. Both are always attempted; the first error
///   wins and otherwise the primary's result is returned.
/// - `seek` moves both, and `read` advances the secondary by the number of
///   bytes read, so positional writes stay aligned.
pub struct LayeredFile {
    primary: Box<dyn FileHandle>,
    secondary: Option<Box<dyn FileHandle>>,
}

impl LayeredFile {
    pub fn new(primary: Box<dyn FileHandle>, secondary: Option<Box<dyn FileHandle>>) -> Self {
        Self { primary, secondary }
    }

    /// True if writes fan out to a second backend.
    pub fn is_layered(&self) -> bool {
        self.secondary.is_some()
    }
}

/// Combine a primary result with the secondary's, first error winning.
fn first_error<T, U>(primary: VfsResult<T>, secondary: Option<VfsResult<U>>) -> VfsResult<T> {
    let value = primary?;
    if let Some(Err(e)) = secondary {
        warn!(error = %e, "secondary overlay file failed");
        return Err(e);
    }
    Ok(value)
}

/// Write all of `buf`, at the cursor or at `offset`.
async fn write_exact(file: &mut dyn FileHandle, buf: &[u8], offset: Option<u64>) -> VfsResult<()> {
    let mut done = 0;
    while done < buf.len() {
        let n = match offset {
            Some(off) => file.write_at(&buf[done..], off + done as u64).await?,
            None => file.write(&buf[done..]).await?,
        };
        if n == 0 {
            return Err(VfsError::other(format!("{}: short write", file.name())));
        }
        done += n;
    }
    Ok(())
}

#[async_trait]
impl FileHandle for LayeredFile {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let n = self.primary.read(buf).await?;
        let secondary = match self.secondary.as_mut() {
            Some(s) if n > 0 => Some(s.seek(SeekFrom::Current(n as i64)).await),
            _ => None,
        };
        first_error(Ok(n), secondary)
    }

    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> VfsResult<usize> {
        self.primary.read_at(buf, offset).await
    }

    /// The secondary receives exactly the bytes the primary accepted.
    async fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        let n = self.primary.write(buf).await?;
        let secondary = match self.secondary.as_mut() {
            Some(s) => Some(write_exact(s.as_mut(), &buf[..n], None).await),
            None => None,
        };
        first_error(Ok(n), secondary)
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> VfsResult<usize> {
        let n = self.primary.write_at(buf, offset).await?;
        let secondary = match self.secondary.as_mut() {
            Some(s) => Some(write_exact(s.as_mut(), &buf[..n], Some(offset)).await),
            None => None,
        };
        first_error(Ok(n), secondary)
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let primary = self.primary.seek(pos).await;
        // Relative seeks on the secondary would drift if the sizes differ.
        let pos = match (&primary, pos) {
            (Ok(offset), SeekFrom::End(_)) => SeekFrom::Start(*offset),
            _ => pos,
        };
        let secondary = match self.secondary.as_mut() {
            Some(s) => Some(s.seek(pos).await),
            None => None,
        };
        first_error(primary, secondary)
    }

    async fn readdir(&mut self, count: i32) -> VfsResult<Vec<FileMetadata>> {
        self.primary.readdir(count).await
    }

    async fn readdirnames(&mut self, count: i32) -> VfsResult<Vec<String>> {
        self.primary.readdirnames(count).await
    }

    async fn stat(&mut self) -> VfsResult<FileMetadata> {
        self.primary.stat().await
    }

    async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        let primary = self.primary.truncate(size).await;
        let secondary = match self.secondary.as_mut() {
            Some(s) => Some(s.truncate(size).await),
            None => None,
        };
        first_error(primary, secondary)
    }

    async fn sync(&mut self) -> VfsResult<()> {
        let primary = self.primary.sync().await;
        let secondary = match self.secondary.as_mut() {
            Some(s) => Some(s.sync().await),
            None => None,
        };
        first_error(primary, secondary)
    }

    async fn close(&mut self) -> VfsResult<()> {
        let primary = self.primary.close().await;
        let secondary = match self.secondary.as_mut() {
            Some(s) => Some(s.close().await),
            None => None,
        };
        first_error(primary, secondary)
    }
}
