use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use lethe_lib::{
    backend::Router,
    pool::Pool,
    tool::ToolRunner,
    worker::{AnonymiseOptions, Mode, Roots, Worker},
};
use tracing::info;

use crate::consume::{self, LogAcknowledger, StdoutPublisher};

#[derive(Debug, Parser)]
pub struct Options {
    /// Absolute directory the source file paths resolve against
    #[arg(long)]
    filesystem_root: PathBuf,

    /// Absolute directory the extraction directories resolve against
    #[arg(long)]
    extraction_root: PathBuf,

    /// Enable pooled extraction backed by this directory
    #[arg(long)]
    pool_root: Option<PathBuf>,

    /// Executable invoked as `<tool> <src> <dst>` for every non-XA modality
    ///
    /// The concrete tag- and pixel-level anonymisation lives in this tool;
    /// the worker only supervises it.
    #[arg(long)]
    primary_tool: PathBuf,

    /// Executable invoked for the XA modality; omit to send XA to the
    /// primary tool as well
    #[arg(long)]
    xa_tool: Option<PathBuf>,

    /// Reject source files that are not marked read-only
    #[arg(long)]
    fail_if_source_writeable: bool,

    /// Routing key for successful anonymisations
    #[arg(long, default_value = "verify")]
    routing_key_success: String,

    /// Routing key for failures
    #[arg(long, default_value = "noverify")]
    routing_key_failure: String,
}

#[tracing::instrument]
pub async fn main(opts: Options) -> Result<()> {
    let roots = Roots::builder()
        .filesystem_root(opts.filesystem_root)
        .extraction_root(opts.extraction_root)
        .build()
        .context("validate worker roots")?;
    let pool = opts
        .pool_root
        .map(|root| Pool::builder().root(root).build())
        .transpose()
        .context("open pool")?;

    let primary = ToolRunner::builder()
        .tool_path(opts.primary_tool)
        .build()
        .context("configure primary anonymisation tool")?;
    let external = opts
        .xa_tool
        .map(|tool| ToolRunner::builder().tool_path(tool).build())
        .transpose()
        .context("configure XA anonymisation tool")?;

    let worker = Worker::builder()
        .roots(roots)
        .maybe_pool(pool)
        .mode(Mode::anonymise(
            AnonymiseOptions::builder()
                .backend(Router::new(primary, external))
                .fail_if_source_writeable(opts.fail_if_source_writeable)
                .routing_key_success(opts.routing_key_success)
                .routing_key_failure(opts.routing_key_failure)
                .build(),
        ))
        .publisher(StdoutPublisher)
        .acknowledger(LogAcknowledger)
        .build();

    info!("anonymise worker ready");
    consume::run(&worker).await
}
