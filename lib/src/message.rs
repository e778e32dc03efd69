//! Wire messages exchanged with the extraction queues.
//!
//! Field names follow the upstream pipeline's camelCase JSON. The broker
//! transport itself is external; these types are only the payloads.

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::Status;

/// Envelope metadata accompanying every queue message.
///
/// The worker never interprets this beyond log correlation; it is threaded
/// through to the status publisher untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    #[builder(into)]
    pub message_guid: String,

    /// Unix timestamp of the original publish, preserved across redeliveries.
    #[serde(default)]
    #[builder(default)]
    pub original_publish_timestamp: i64,
}

/// A request to produce one derived file from one source DICOM file.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    /// Opaque job identifier, echoed into the status report.
    #[builder(into)]
    pub job_id: String,

    /// When the job was submitted. Opaque to the worker.
    #[builder(into)]
    pub submitted_at: String,

    /// Opaque project identifier, echoed into the status report.
    #[builder(into)]
    pub project: String,

    /// Relative path under the extraction root that output paths resolve
    /// against. Caller-managed; anonymiser workers require it to exist.
    #[builder(into)]
    pub extraction_directory: String,

    /// Relative path of the source file under the filesystem root.
    #[builder(into)]
    pub dicom_file_path: String,

    /// Relative path of the destination under the extraction directory.
    #[builder(into)]
    pub output_path: String,

    /// DICOM modality code, e.g. `CT`, `XA`, `SR`. Routes backend selection.
    #[builder(into)]
    pub modality: String,

    /// True when the extraction is allowed to carry identifiable data.
    /// Anonymiser workers refuse such requests outright.
    #[serde(default)]
    #[builder(default)]
    pub is_identifiable_extraction: bool,

    /// True when the output should be stored once in the content-addressed
    /// pool and linked into place.
    #[serde(default)]
    #[builder(default)]
    pub is_pooled_extraction: bool,
}

/// Status report emitted after processing a request.
///
/// Exactly one of these is published per accepted request, before the
/// delivery is acknowledged. Downstream consumers must tolerate duplicates
/// for the same `(jobId, dicomFilePath)` pair: a crash between publish and
/// ack redelivers the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct ExtractStatus {
    #[builder(into)]
    pub job_id: String,

    #[builder(into)]
    pub project: String,

    #[builder(into)]
    pub dicom_file_path: String,

    pub status: Status,

    /// Free-form diagnostic, present on failures and on verbose backends.
    #[builder(into)]
    pub status_message: Option<String>,

    /// The request's relative output path. Always `None` on failure.
    #[builder(into)]
    pub output_file_path: Option<String>,
}
