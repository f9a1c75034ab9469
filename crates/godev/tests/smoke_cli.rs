//! CLI smoke tests: argument surface and error paths that don't need an
//! engine.

use assert_cmd::Command;
use predicates::prelude::*;

fn godev() -> Command {
    Command::cargo_bin("godev").unwrap()
}

#[test]
fn test_help() {
    godev()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reproducible development containers"))
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("stop"));
}

#[test]
fn test_version() {
    godev()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("godev"));
}

#[test]
fn test_requires_subcommand() {
    godev().assert().failure();
}

#[test]
fn test_up_with_missing_config() {
    let dir = tempfile::tempdir().unwrap();
    godev()
        .current_dir(dir.path())
        .arg("up")
        .assert()
        .failure()
        .stderr(predicate::str::contains("devcontainer.json not found"));
}

#[test]
fn test_up_with_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("devcontainer.json"), "{}").unwrap();
    godev()
        .current_dir(dir.path())
        .arg("up")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must specify image or build"));
}

#[test]
fn test_up_rejects_bad_env_flag() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("devcontainer.json"), r#"{"image":"alpine"}"#).unwrap();
    godev()
        .current_dir(dir.path())
        .args(["up", "--env", "missing-equals"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --env value"));
}
