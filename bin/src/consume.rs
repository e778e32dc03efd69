//! Drives a worker over newline-delimited requests from stdin.
//!
//! This is the simplest faithful stand-in for the broker channel: each line
//! is one delivery, each status goes to stdout tagged with its routing key,
//! and acks are recorded in the log. A fatal error from the worker aborts the
//! stream with the remaining deliveries unacknowledged, which is exactly the
//! halt-and-investigate contract the queue relies on.

use color_eyre::{
    eyre::{Context, Result},
    Section, SectionExt,
};
use lethe_lib::{
    backend::Anonymiser,
    message::{ExtractRequest, ExtractStatus, MessageHeader},
    worker::{MessageAcknowledger, StatusPublisher, Worker},
};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// One stdin line: either a bare request or a `{header, request}` envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Incoming {
    Enveloped {
        header: MessageHeader,
        request: ExtractRequest,
    },
    Bare(ExtractRequest),
}

/// Writes each status as a JSON line on stdout, tagged with its routing key.
pub struct StdoutPublisher;

impl StatusPublisher for StdoutPublisher {
    async fn send(&self, status: &ExtractStatus, routing_key: &str) -> Result<()> {
        let line = serde_json::json!({
            "routingKey": routing_key,
            "status": status,
        });
        println!("{line}");
        Ok(())
    }
}

/// Stand-in for the broker channel: the decision is recorded in the log.
pub struct LogAcknowledger;

impl MessageAcknowledger for LogAcknowledger {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        debug!(delivery_tag, "ack");
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        warn!(delivery_tag, requeue, "nack");
        Ok(())
    }
}

/// Process every request on stdin in order, one at a time.
pub async fn run<B: Anonymiser>(
    worker: &Worker<B, StdoutPublisher, LogAcknowledger>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut delivery_tag = 0u64;

    while let Some(line) = lines.next_line().await.context("read request line")? {
        if line.trim().is_empty() {
            continue;
        }
        delivery_tag += 1;

        let (header, request) = match serde_json::from_str::<Incoming>(&line) {
            Ok(Incoming::Enveloped { header, request }) => (header, request),
            Ok(Incoming::Bare(request)) => {
                let header = MessageHeader::builder()
                    .message_guid(format!("local-{delivery_tag}"))
                    .build();
                (header, request)
            }
            Err(error) => {
                warn!(%error, delivery_tag, "skipping malformed request line");
                continue;
            }
        };

        worker
            .process(&header, &request, delivery_tag)
            .await
            .with_section(|| line.header("Request:"))?;
    }

    Ok(())
}
