use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use lethe_lib::{
    pool::Pool,
    worker::{Mode, Roots, Worker},
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

    /// Routing key for all copier statuses, success and failure alike
    #[arg(long, default_value = "noverify")]
    no_verify_routing_key: String,
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

    let worker = Worker::builder()
        .roots(roots)
        .maybe_pool(pool)
        .mode(Mode::copy(opts.no_verify_routing_key))
        .publisher(StdoutPublisher)
        .acknowledger(LogAcknowledger)
        .build();

    info!("copy worker ready");
    consume::run(&worker).await
}
