//! Shared filesystem operations.
//!
//! Every path the worker touches goes through here, which keeps the handful
//! of platform-specific corners (symlinks, read-only bits) in one place.

use std::path::{Path, PathBuf};

use bytes::BytesMut;
use color_eyre::{eyre::Context, Result};
use tap::Pipe;
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::Digest;

/// Hash the specified file on disk.
pub async fn file_digest(path: &Path) -> Result<Digest> {
    use sha2::{Digest as _, Sha256};
    let mut hasher = Sha256::new();
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open {path:?}"))?;
    let mut buffer = BytesMut::with_capacity(64 * 1024);
    loop {
        let n = file
            .read_buf(&mut buffer)
            .await
            .with_context(|| format!("read {path:?}"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        buffer.clear();
    }

    hasher
        .finalize()
        .to_vec()
        .pipe(Digest::from_hash)
        .pipe(Ok)
}

/// Stat a path, distinguishing "definitely absent" from an IO failure.
///
/// `NotFound` is a business condition for the worker; everything else is an
/// infrastructural fault and propagates.
pub async fn exists(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("stat {path:?}")),
    }
}

/// Whether the file at `path` is marked read-only.
pub async fn is_readonly(path: &Path) -> Result<bool> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("stat {path:?}"))?;
    Ok(metadata.permissions().readonly())
}

#[cfg(windows)]
pub async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    let (target, link) = (target.to_owned(), link.to_owned());
    tokio::task::spawn_blocking(|| std::os::windows::fs::symlink_file(target, link))
        .await
        .expect("join tokio task")
}

/// Create a symbolic link at `link` whose target is `target`.
#[cfg(any(unix, target_os = "redox"))]
pub async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

/// A file owned exclusively by the caller until it is either released
/// (ownership handed elsewhere, typically to the pool) or dropped, in which
/// case it is deleted.
#[derive(Debug)]
pub struct PendingFile {
    path: PathBuf,
    released: bool,
}

impl PendingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Give up ownership: the file is no longer deleted on drop.
    pub fn release(mut self) -> PathBuf {
        self.released = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // The file may never have been created, or may have been consumed by
        // a rename; both leave nothing to clean up.
        if let Err(error) = std::fs::remove_file(&self.path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(?error, path = ?self.path, "failed to remove pending file");
            }
        }
    }
}
