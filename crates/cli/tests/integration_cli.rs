use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_help_output() {
    let mut cmd = Command::cargo_bin("packnplay").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("read-configuration"));
}

#[test]
fn test_version_output() {
    let mut cmd = Command::cargo_bin("packnplay").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_no_subcommand_is_usage_error() {
    let mut cmd = Command::cargo_bin("packnplay").unwrap();
    cmd.assert().failure();
}

#[test]
fn test_exec_requires_a_command() {
    let mut cmd = Command::cargo_bin("packnplay").unwrap();
    cmd.arg("exec").assert().failure();
}

#[test]
fn test_up_without_devcontainer_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("packnplay").unwrap();
    cmd.arg("up")
        .arg("--workspace-folder")
        .arg(temp_dir.path())
        .assert()
        .failure();
}

#[test]
fn test_read_configuration_without_devcontainer_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("packnplay").unwrap();
    cmd.arg("read-configuration")
        .arg("--workspace-folder")
        .arg(temp_dir.path())
        .assert()
        .failure();
}

#[test]
fn test_read_configuration_prints_resolved_json() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(temp_dir.path().join(".devcontainer")).unwrap();
    std::fs::write(
        temp_dir.path().join(".devcontainer/devcontainer.json"),
        r#"{ "name": "demo", "image": "ubuntu:22.04" }"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("packnplay").unwrap();
    cmd.arg("read-configuration")
        .arg("--workspace-folder")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"image\": \"ubuntu:22.04\""));
}
