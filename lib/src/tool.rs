//! Supervises external anonymisation tools.
//!
//! The tool contract: argv is `<tool> <absolute src> <absolute dst>`; the tool
//! must create `dst` and exit 0 within the wall-clock budget. Stdout and
//! stderr are informational only; the exit code and the existence of `dst`
//! are authoritative.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use bon::bon;
use color_eyre::{
    eyre::{ensure, Context},
    Result,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    task::JoinHandle,
    time::timeout,
};
use tracing::debug;

use crate::backend::Verdict;

/// Wall-clock budget for one tool invocation.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs a configured executable over `(src, dst)` pairs and classifies the
/// outcome. One instance is shared across all messages of a worker.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    tool_path: PathBuf,
    timeout: Duration,
}

#[bon]
impl ToolRunner {
    /// Create a runner for the given executable.
    ///
    /// A missing tool is a deployment error and must surface at startup, not
    /// on the first message, so existence is checked here.
    #[builder]
    pub fn new(
        /// Path to the executable.
        #[builder(into)]
        tool_path: PathBuf,

        /// Override the default invocation budget.
        timeout: Option<Duration>,
    ) -> Result<Self> {
        ensure!(
            tool_path.is_file(),
            "anonymisation tool not found: {tool_path:?}"
        );
        Ok(Self {
            tool_path,
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }
}

impl ToolRunner {
    /// Run the tool over one source file.
    ///
    /// Every way the tool can fail, including failing to spawn at all, is a
    /// business outcome reported in the verdict; this method never escalates.
    #[tracing::instrument(skip(self), fields(tool = ?self.tool_path))]
    pub async fn run(&self, src: &Path, dst: &Path) -> Verdict {
        match self.invoke(src, dst).await {
            Ok(verdict) => verdict,
            Err(error) => Verdict::wont_retry(format!("{error:#}")),
        }
    }

    async fn invoke(&self, src: &Path, dst: &Path) -> Result<Verdict> {
        let mut child = Command::new(&self.tool_path)
            .arg(src)
            .arg(dst)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn {:?}", self.tool_path))?;

        let stdout = child.stdout.take().map(|s| drain("stdout", s));
        let stderr = child.stderr.take().map(|s| drain("stderr", s));

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(status) => status.context("wait for tool")?,
            Err(_) => {
                child.kill().await.context("kill timed-out tool")?;
                return Ok(Verdict::wont_retry(format!(
                    "Anonymisation tool timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if let Some(task) = stdout {
            task.await.ok();
        }
        let stderr = match stderr {
            Some(task) => task.await.unwrap_or_default().join("\n"),
            None => String::new(),
        };

        if !status.success() {
            let code = status
                .code()
                .map_or_else(|| "<signal>".to_string(), |c| c.to_string());
            return Ok(Verdict::wont_retry(format!(
                "Anonymisation tool exited with code {code}. Error: {stderr}"
            )));
        }

        if !crate::fsx::exists(dst).await? {
            return Ok(Verdict::wont_retry(format!(
                "Anonymisation tool completed but output file was not created: {}",
                dst.display()
            )));
        }

        Ok(Verdict::anonymised())
    }
}

/// Drain one of the child's output streams line by line, logging each line
/// at debug and returning the collected lines once the pipe closes.
fn drain(stream: &'static str, source: impl AsyncRead + Unpin + Send + 'static) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(source).lines();
        let mut collected = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(stream, "{line}");
            collected.push(line);
        }
        collected
    })
}
