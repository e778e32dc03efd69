//! The per-message extraction state machine.
//!
//! A worker processes one delivery at a time; parallelism comes from running
//! several worker instances, each with its own broker channel. Within one
//! message the stages are strictly ordered, and the status report is always
//! published before the delivery is acknowledged: a crash between the two
//! redelivers the request, so downstream consumers see at-least-once
//! semantics and must tolerate duplicate statuses.

use std::{
    future::Future,
    path::{Path, PathBuf},
};

use bon::{bon, Builder};
use color_eyre::{
    eyre::{bail, ensure, Context},
    Result,
};
use tracing::{info, warn};

use crate::{
    backend::{Anonymiser, NoBackend, Verdict},
    fsx,
    message::{ExtractRequest, ExtractStatus, MessageHeader},
    pool::Pool,
    Status,
};

/// Default routing key for successful anonymisations.
pub const DEFAULT_SUCCESS_KEY: &str = "verify";

/// Default routing key for failed anonymisations.
pub const DEFAULT_FAILURE_KEY: &str = "noverify";

/// Sends status reports on a routing key.
///
/// The broker transport behind this is external; the worker only requires
/// that a returned `Ok` means the report has been handed to the channel.
pub trait StatusPublisher {
    fn send(&self, status: &ExtractStatus, routing_key: &str) -> impl Future<Output = Result<()>>;
}

/// Finalises deliveries on the broker channel.
///
/// A delivery that is neither acked nor nacked is redelivered by the broker
/// once the channel closes; the worker relies on this for its fatal path.
pub trait MessageAcknowledger {
    fn ack(&self, delivery_tag: u64) -> impl Future<Output = Result<()>>;
    fn nack(&self, delivery_tag: u64, requeue: bool) -> impl Future<Output = Result<()>>;
}

/// The directory roots every worker operates under.
#[derive(Debug, Clone)]
pub struct Roots {
    filesystem_root: PathBuf,
    extraction_root: PathBuf,
}

#[bon]
impl Roots {
    /// Both roots must exist. A worker started against a missing mount must
    /// fail here rather than poison the queue one message at a time.
    #[builder]
    pub fn new(
        /// Absolute directory the source file paths resolve against.
        #[builder(into)]
        filesystem_root: PathBuf,

        /// Absolute directory the extraction directories resolve against.
        #[builder(into)]
        extraction_root: PathBuf,
    ) -> Result<Self> {
        ensure!(
            filesystem_root.is_dir(),
            "filesystem root does not exist: {filesystem_root:?}"
        );
        ensure!(
            extraction_root.is_dir(),
            "extraction root does not exist: {extraction_root:?}"
        );
        Ok(Self {
            filesystem_root,
            extraction_root,
        })
    }
}

impl Roots {
    pub fn filesystem_root(&self) -> &Path {
        &self.filesystem_root
    }

    pub fn extraction_root(&self) -> &Path {
        &self.extraction_root
    }
}

/// Configuration for the anonymise flavour.
#[derive(Debug, Builder)]
pub struct AnonymiseOptions<B> {
    /// The backend (usually a modality router) that produces outputs.
    backend: B,

    /// Reject source files that are not marked read-only.
    #[builder(default)]
    fail_if_source_writeable: bool,

    /// Routing key for `Anonymised` statuses.
    #[builder(into, default = DEFAULT_SUCCESS_KEY.to_string())]
    routing_key_success: String,

    /// Routing key for everything else.
    #[builder(into, default = DEFAULT_FAILURE_KEY.to_string())]
    routing_key_failure: String,
}

/// Flavour-specific behaviour of the worker.
///
/// Both flavours share the same state machine; the differences are the
/// materialisation step, the diagnostic texts, and the routing keys. The
/// copier deliberately routes success and failure to the same key, and
/// deliberately has no read-only enforcement.
pub enum Mode<B> {
    /// Bit-identical copy of the source bytes.
    Copy {
        /// All copier statuses, success and failure alike, go out on this key.
        no_verify_routing_key: String,
    },

    /// De-identified variant produced by a backend.
    Anonymise(AnonymiseOptions<B>),
}

impl Mode<NoBackend> {
    /// The copy flavour: the source bytes are the output.
    pub fn copy(no_verify_routing_key: impl Into<String>) -> Self {
        Mode::Copy {
            no_verify_routing_key: no_verify_routing_key.into(),
        }
    }
}

impl<B> Mode<B> {
    /// The anonymise flavour.
    pub fn anonymise(options: AnonymiseOptions<B>) -> Self {
        Mode::Anonymise(options)
    }
}

/// One extraction worker.
///
/// `process` drives a single delivery end-to-end. Known business failures
/// (missing source, writeable source, backend-reported errors) become a
/// published status followed by an ack. Unexpected faults return `Err`: the
/// caller must then neither ack nor nack, leaving the delivery to the
/// broker's redelivery so an operator can investigate instead of the queue
/// flooding with transient failures.
#[derive(Builder)]
pub struct Worker<B, P, A> {
    roots: Roots,

    /// Present iff pooled extraction is enabled for this worker.
    pool: Option<Pool>,

    mode: Mode<B>,
    publisher: P,
    acknowledger: A,
}

impl<B, P, A> Worker<B, P, A>
where
    B: Anonymiser,
    P: StatusPublisher,
    A: MessageAcknowledger,
{
    /// Process one delivery: validate, materialise the output, publish a
    /// status, then ack.
    #[tracing::instrument(
        skip_all,
        fields(guid = %header.message_guid, job = %request.job_id, file = %request.dicom_file_path)
    )]
    pub async fn process(
        &self,
        header: &MessageHeader,
        request: &ExtractRequest,
        delivery_tag: u64,
    ) -> Result<()> {
        if matches!(self.mode, Mode::Anonymise(_)) && request.is_identifiable_extraction {
            bail!(
                "anonymiser workers should not handle identifiable extraction messages \
                 (job {}, guid {})",
                request.job_id,
                header.message_guid,
            );
        }

        let verdict = self.materialise(request).await?;
        let status = self.report(request, verdict);
        let routing_key = self.routing_key(status.status);

        info!(status = %status.status, routing_key, "publishing extraction status");
        self.publisher
            .send(&status, routing_key)
            .await
            .context("publish status")?;
        self.acknowledger
            .ack(delivery_tag)
            .await
            .context("ack delivery")?;
        Ok(())
    }

    /// Stages 2 through 7: resolve and check the source, prepare the
    /// destination, produce the output. Business failures come back as
    /// verdicts; `Err` means an unexpected fault.
    async fn materialise(&self, request: &ExtractRequest) -> Result<Verdict> {
        let src = self.roots.filesystem_root.join(&request.dicom_file_path);

        if !fsx::exists(&src).await? {
            return Ok(Verdict {
                status: Status::FileMissing,
                message: Some(self.missing_source_message(&src)),
            });
        }

        if let Mode::Anonymise(options) = &self.mode {
            if options.fail_if_source_writeable && !fsx::is_readonly(&src).await? {
                return Ok(Verdict::wont_retry(format!(
                    "Source file was writeable and FailIfSourceWriteable is set: '{}'",
                    src.display()
                )));
            }
        }

        let extraction_dir = self.roots.extraction_root.join(&request.extraction_directory);
        match &self.mode {
            Mode::Copy { .. } => {
                tokio::fs::create_dir_all(&extraction_dir)
                    .await
                    .with_context(|| format!("create extraction directory {extraction_dir:?}"))?;
            }
            Mode::Anonymise(_) => {
                // The extraction service creates this directory up front; its
                // absence means the shared filesystem is flapping, and
                // retrying every queued message would only amplify the
                // outage.
                if !fsx::exists(&extraction_dir).await? {
                    bail!(
                        "Expected extraction directory to exist: '{}'",
                        extraction_dir.display()
                    );
                }
            }
        }

        let dst = extraction_dir.join(&request.output_path);
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create destination parent {parent:?}"))?;
        }

        let pool = if request.is_pooled_extraction {
            if self.pool.is_none() {
                warn!("pooled extraction requested but no pool root is configured, writing directly");
            }
            self.pool.as_ref()
        } else {
            None
        };

        match (&self.mode, pool) {
            (Mode::Copy { .. }, None) => {
                if fsx::exists(&dst).await? {
                    warn!(?dst, "overwriting existing destination");
                }
                tokio::fs::copy(&src, &dst)
                    .await
                    .with_context(|| format!("copy {src:?} to {dst:?}"))?;
                Ok(Verdict::copied())
            }
            (Mode::Copy { .. }, Some(pool)) => {
                // The source bytes are the pool key, and the source must
                // survive processing, so it is copied into the pool rather
                // than moved.
                pool.link_into(&src, &dst, true)
                    .await
                    .context("pool source file")?;
                Ok(Verdict::copied())
            }
            (Mode::Anonymise(options), None) => options
                .backend
                .anonymise(&src, &dst, &request.modality)
                .await
                .context("anonymise"),
            (Mode::Anonymise(options), Some(pool)) => {
                let staging = tempfile::tempdir().context("create staging directory")?;
                let candidate = fsx::PendingFile::new(staging.path().join("candidate.dcm"));

                let verdict = options
                    .backend
                    .anonymise(&src, candidate.path(), &request.modality)
                    .await
                    .context("anonymise")?;
                if !verdict.is_success() {
                    // The candidate guard deletes whatever the backend left
                    // behind.
                    return Ok(verdict);
                }

                pool.link_into(candidate.path(), &dst, false)
                    .await
                    .context("pool anonymised candidate")?;
                candidate.release();
                Ok(verdict)
            }
        }
    }

    /// Stage 8: map the verdict onto the outbound status message. A failed
    /// verdict never carries an output path.
    fn report(&self, request: &ExtractRequest, verdict: Verdict) -> ExtractStatus {
        let output_file_path = verdict.is_success().then(|| request.output_path.clone());
        ExtractStatus {
            job_id: request.job_id.clone(),
            project: request.project.clone(),
            dicom_file_path: request.dicom_file_path.clone(),
            status: verdict.status,
            status_message: verdict.message,
            output_file_path,
        }
    }

    fn routing_key(&self, status: Status) -> &str {
        match &self.mode {
            Mode::Copy {
                no_verify_routing_key,
            } => no_verify_routing_key,
            Mode::Anonymise(options) if status.is_success() => &options.routing_key_success,
            Mode::Anonymise(options) => &options.routing_key_failure,
        }
    }

    fn missing_source_message(&self, src: &Path) -> String {
        match &self.mode {
            Mode::Copy { .. } => format!("Could not find '{}'", src.display()),
            Mode::Anonymise(_) => {
                format!("Could not find file to anonymise: '{}'", src.display())
            }
        }
    }
}
