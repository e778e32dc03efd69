//! Content-addressed pooling of extraction outputs.
//!
//! Entries are flat files named by the lowercase hex SHA-256 of their bytes,
//! so identical outputs are stored once and linked many times. Entries are
//! never overwritten and never collected. The pool directory may be shared by
//! workers on other hosts; publication is rename-based so that two workers
//! racing on the same digest converge on a single entry.

use std::path::{Path, PathBuf};

use bon::bon;
use color_eyre::{
    eyre::{ensure, Context},
    Result,
};
use tracing::{debug, warn};

use crate::{fsx, Digest};

/// A content-addressed store of extraction outputs.
#[derive(Debug, Clone)]
pub struct Pool {
    root: PathBuf,
}

#[bon]
impl Pool {
    /// Open the pool rooted at the given directory, which must already exist.
    #[builder]
    pub fn new(
        /// Absolute path of the pool directory.
        #[builder(into)]
        root: PathBuf,
    ) -> Result<Self> {
        ensure!(root.is_dir(), "pool root does not exist: {root:?}");
        Ok(Self { root })
    }
}

impl Pool {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path the entry with the given digest lives at.
    pub fn entry_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.as_hex())
    }

    /// Ensure a pool entry exists for the bytes of `candidate`, then replace
    /// `dst` with a symbolic link to that entry.
    ///
    /// When `preserve` is false the candidate is consumed: moved into the
    /// pool, or deleted if another worker already published the same bytes.
    /// When true the candidate is left untouched and its bytes are copied in
    /// instead (the copier pools its source file directly).
    ///
    /// Returns the entry path the destination now links to.
    #[tracing::instrument(skip(self))]
    pub async fn link_into(&self, candidate: &Path, dst: &Path, preserve: bool) -> Result<PathBuf> {
        let digest = fsx::file_digest(candidate)
            .await
            .context("digest candidate")?;
        let entry = self.entry_path(&digest);

        if !fsx::exists(&entry).await? {
            self.publish(candidate, &entry, preserve)
                .await
                .with_context(|| format!("publish {candidate:?} as {entry:?}"))?;
        } else if !preserve {
            // Another worker won the race on this digest. The bytes are
            // identical, so the candidate has nothing left to contribute.
            debug!(?entry, "entry already pooled, discarding candidate");
            tokio::fs::remove_file(candidate)
                .await
                .context("discard candidate")?;
        }

        // A symbolic link cannot be created over an existing path.
        match tokio::fs::remove_file(dst).await {
            Ok(()) => warn!(?dst, "replaced existing destination"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("remove existing destination {dst:?}")),
        }
        fsx::symlink(&entry, dst)
            .await
            .with_context(|| format!("link {dst:?} to pool entry {entry:?}"))?;

        Ok(entry)
    }

    /// Put the candidate's bytes at the entry path.
    ///
    /// Rename is atomic on the same filesystem. When the candidate must be
    /// preserved, or lives on a different filesystem, the bytes are staged
    /// next to the entry first so the final rename stays atomic either way.
    async fn publish(&self, candidate: &Path, entry: &Path, preserve: bool) -> Result<()> {
        if preserve {
            return self.stage_then_rename(candidate, entry).await;
        }

        match tokio::fs::rename(candidate, entry).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                self.stage_then_rename(candidate, entry).await?;
                tokio::fs::remove_file(candidate)
                    .await
                    .context("discard candidate after staging")
            }
            Err(e) => Err(e).context("move candidate into pool"),
        }
    }

    async fn stage_then_rename(&self, candidate: &Path, entry: &Path) -> Result<()> {
        let staging = fsx::PendingFile::new(self.root.join(format!(
            ".staging-{}-{}",
            std::process::id(),
            entry
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )));
        tokio::fs::copy(candidate, staging.path())
            .await
            .context("stage candidate")?;
        tokio::fs::rename(staging.path(), entry)
            .await
            .context("rename staged candidate into pool")?;
        // The rename consumed the staging file.
        staging.release();
        Ok(())
    }
}
