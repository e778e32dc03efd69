use color_eyre::Result;
use lethe_lib::{tool::ToolRunner, Status};
use pretty_assertions::assert_eq;
use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

#[test_log::test(tokio::test)]
async fn tool_success_requires_zero_exit_and_output() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let tool = script(tmp.path(), "anon.sh", r#"cp "$1" "$2""#);
    let runner = ToolRunner::builder().tool_path(tool).build()?;

    let src = tmp.path().join("in.dcm");
    let dst = tmp.path().join("out.dcm");
    tokio::fs::write(&src, b"pixels").await?;

    let verdict = runner.run(&src, &dst).await;
    assert_eq!(verdict.status, Status::Anonymised);
    assert_eq!(verdict.message, None);
    assert_eq!(tokio::fs::read(&dst).await?, b"pixels");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn nonzero_exit_reports_code_and_stderr() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let tool = script(tmp.path(), "anon.sh", "echo boom >&2\nexit 1");
    let runner = ToolRunner::builder().tool_path(tool).build()?;

    let src = tmp.path().join("in.dcm");
    tokio::fs::write(&src, b"pixels").await?;

    let verdict = runner.run(&src, &tmp.path().join("out.dcm")).await;
    assert_eq!(verdict.status, Status::ErrorWontRetry);
    let message = verdict.message.expect("diagnostic expected");
    assert!(message.contains("exited with code 1"), "message: {message}");
    assert!(message.contains("boom"), "message: {message}");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn zero_exit_without_output_is_a_failure() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let tool = script(tmp.path(), "anon.sh", "exit 0");
    let runner = ToolRunner::builder().tool_path(tool).build()?;

    let src = tmp.path().join("in.dcm");
    tokio::fs::write(&src, b"pixels").await?;

    let verdict = runner.run(&src, &tmp.path().join("out.dcm")).await;
    assert_eq!(verdict.status, Status::ErrorWontRetry);
    let message = verdict.message.expect("diagnostic expected");
    assert!(
        message.contains("output file was not created"),
        "message: {message}"
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn overrunning_tool_is_killed_and_reported() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let tool = script(tmp.path(), "anon.sh", "sleep 30");
    let runner = ToolRunner::builder()
        .tool_path(tool)
        .timeout(Duration::from_secs(1))
        .build()?;

    let src = tmp.path().join("in.dcm");
    tokio::fs::write(&src, b"pixels").await?;

    let verdict = runner.run(&src, &tmp.path().join("out.dcm")).await;
    assert_eq!(verdict.status, Status::ErrorWontRetry);
    let message = verdict.message.expect("diagnostic expected");
    assert!(message.contains("timed out after 1s"), "message: {message}");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn spawn_failure_is_a_business_outcome() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    // Present but not executable: the runner constructs, the spawn fails.
    let tool = tmp.path().join("anon.sh");
    std::fs::write(&tool, "#!/bin/sh\n")?;
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o644))?;
    let runner = ToolRunner::builder().tool_path(tool).build()?;

    let src = tmp.path().join("in.dcm");
    tokio::fs::write(&src, b"pixels").await?;

    let verdict = runner.run(&src, &tmp.path().join("out.dcm")).await;
    assert_eq!(verdict.status, Status::ErrorWontRetry);
    assert!(verdict.message.is_some());
    Ok(())
}

#[test]
fn builder_rejects_missing_tool() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let result = ToolRunner::builder()
        .tool_path(tmp.path().join("no-such-tool"))
        .build();
    assert!(result.is_err());
}
