use assert_cmd::Command;
use assert_fs::prelude::*;
use color_eyre::{Result, eyre::Context};
use pretty_assertions::assert_eq;

use crate::{parse_statuses, request_line};

#[test_log::test]
fn copies_source_to_destination() -> Result<()> {
    let temp = assert_fs::TempDir::new().context("create temp dir")?;
    temp.child("dicom/foo.dcm").write_binary(b"payload")?;
    temp.child("extract/extractDir").create_dir_all()?;

    let output = Command::cargo_bin("lethe")?
        .arg("copy")
        .arg("--filesystem-root")
        .arg(temp.child("dicom").path())
        .arg("--extraction-root")
        .arg(temp.child("extract").path())
        .write_stdin(request_line("foo.dcm", "foo-copy.dcm", "CT"))
        .assert()
        .success()
        .get_output()
        .clone();

    let statuses = parse_statuses(&output.stdout);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["routingKey"], "noverify");
    assert_eq!(statuses[0]["status"]["status"], "Copied");
    assert_eq!(statuses[0]["status"]["outputFilePath"], "foo-copy.dcm");

    temp.child("extract/extractDir/foo-copy.dcm")
        .assert(predicates::path::exists());
    assert_eq!(
        std::fs::read(temp.child("extract/extractDir/foo-copy.dcm").path())?,
        b"payload"
    );
    Ok(())
}

#[test_log::test]
fn missing_source_reports_file_missing_and_continues() -> Result<()> {
    let temp = assert_fs::TempDir::new().context("create temp dir")?;
    temp.child("dicom").create_dir_all()?;
    temp.child("extract/extractDir").create_dir_all()?;

    let output = Command::cargo_bin("lethe")?
        .arg("copy")
        .arg("--filesystem-root")
        .arg(temp.child("dicom").path())
        .arg("--extraction-root")
        .arg(temp.child("extract").path())
        .write_stdin(request_line("missing.dcm", "out.dcm", "CT"))
        .assert()
        .success()
        .get_output()
        .clone();

    let statuses = parse_statuses(&output.stdout);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["status"]["status"], "FileMissing");
    assert_eq!(statuses[0]["status"]["outputFilePath"], serde_json::Value::Null);
    // Copier failures use the same routing key as successes.
    assert_eq!(statuses[0]["routingKey"], "noverify");
    Ok(())
}

#[test_log::test]
fn startup_fails_when_roots_are_missing() -> Result<()> {
    let temp = assert_fs::TempDir::new().context("create temp dir")?;

    Command::cargo_bin("lethe")?
        .arg("copy")
        .arg("--filesystem-root")
        .arg(temp.path().join("nope"))
        .arg("--extraction-root")
        .arg(temp.path())
        .write_stdin(String::new())
        .assert()
        .failure();
    Ok(())
}
