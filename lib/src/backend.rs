//! Anonymisation backends and modality routing.

use std::{future::Future, path::Path};

use color_eyre::{eyre::bail, Result};
use tracing::debug;

use crate::{tool::ToolRunner, Status};

/// The modality handled by the dedicated external tool, when one is
/// configured. Matching is case-sensitive.
pub const MODALITY_XA: &str = "XA";

/// The result of one anonymisation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: Status,
    pub message: Option<String>,
}

impl Verdict {
    /// A successful anonymisation, no diagnostic.
    pub fn anonymised() -> Self {
        Self {
            status: Status::Anonymised,
            message: None,
        }
    }

    /// A successful verbatim copy, no diagnostic.
    pub fn copied() -> Self {
        Self {
            status: Status::Copied,
            message: None,
        }
    }

    /// A failure that redelivery cannot fix.
    pub fn wont_retry(message: impl Into<String>) -> Self {
        Self {
            status: Status::ErrorWontRetry,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// A backend that produces a de-identified variant of a DICOM file.
///
/// Business failures (tool exited nonzero, timed out, refused the file) are
/// reported in the verdict. An `Err` from the future is an unexpected fault
/// and escalates to the worker's fatal path.
pub trait Anonymiser {
    fn anonymise(
        &self,
        src: &Path,
        dst: &Path,
        modality: &str,
    ) -> impl Future<Output = Result<Verdict>>;
}

impl Anonymiser for ToolRunner {
    async fn anonymise(&self, src: &Path, dst: &Path, _modality: &str) -> Result<Verdict> {
        Ok(self.run(src, dst).await)
    }
}

/// Placeholder backend for the copy flavour. Copy workers never invoke a
/// backend; reaching this is a programming error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackend;

impl Anonymiser for NoBackend {
    async fn anonymise(&self, _src: &Path, _dst: &Path, _modality: &str) -> Result<Verdict> {
        bail!("copy workers have no anonymisation backend")
    }
}

/// Routes anonymisation by modality.
///
/// `XA` requests go to the dedicated external backend when one is configured;
/// everything else, including `XA` with no external backend, goes to the
/// primary backend. The variant set is closed: there is no dynamic discovery.
#[derive(Debug, Clone)]
pub struct Router<P, X = ToolRunner> {
    primary: P,
    external: Option<X>,
}

impl<P, X> Router<P, X>
where
    P: Anonymiser,
    X: Anonymiser,
{
    pub fn new(primary: P, external: Option<X>) -> Self {
        Self { primary, external }
    }
}

impl<P, X> Anonymiser for Router<P, X>
where
    P: Anonymiser,
    X: Anonymiser,
{
    async fn anonymise(&self, src: &Path, dst: &Path, modality: &str) -> Result<Verdict> {
        match &self.external {
            Some(external) if modality == MODALITY_XA => {
                debug!(modality, "routing to external tool backend");
                external.anonymise(src, dst, modality).await
            }
            _ => self.primary.anonymise(src, dst, modality).await,
        }
    }
}
