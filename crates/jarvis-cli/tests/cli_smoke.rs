//! Binary smoke tests for the `jarvis` CLI.
//!
//! Runs the actual compiled binary, same approach the Dorky-Robot-sipag
//! `sipag` CLI uses for its own `tests/cli_smoke.rs`.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[allow(deprecated)] // cargo_bin works fine for our use case
fn jarvis() -> Command {
    Command::cargo_bin("jarvis").unwrap()
}

fn temp_db_dir() -> TempDir {
    TempDir::new().unwrap()
}

// ── Binary builds and runs ──────────────────────────────────────────────────

#[test]
fn binary_exists() {
    jarvis();
}

#[test]
fn version_flag() {
    jarvis()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("jarvis"));
}

#[test]
fn help_lists_subcommands() {
    let output = jarvis().arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in &["poll", "poll-once", "run", "webhook", "status", "report"] {
        assert!(stdout.contains(cmd), "help text should mention '{cmd}'");
    }
}

#[test]
fn unknown_subcommand_fails() {
    jarvis()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// ── Missing required configuration ──────────────────────────────────────────

#[test]
fn poll_fails_without_github_token() {
    let dir = temp_db_dir();
    jarvis()
        .arg("poll-once")
        .env("GITHUB_TOKEN", "")
        .env("TARGET_REPO", "")
        .env("DB_PATH", dir.path().join("t.db").to_str().unwrap())
        .assert()
        .failure()
        .stderr(predicate::str::contains("GITHUB_TOKEN"));
}

#[test]
fn run_fails_without_target_repo() {
    let dir = temp_db_dir();
    jarvis()
        .args(["run", "42"])
        .env("GITHUB_TOKEN", "")
        .env("TARGET_REPO", "")
        .env("DB_PATH", dir.path().join("t.db").to_str().unwrap())
        .assert()
        .failure();
}

#[test]
fn webhook_fails_without_config() {
    let dir = temp_db_dir();
    jarvis()
        .arg("webhook")
        .env("GITHUB_TOKEN", "")
        .env("TARGET_REPO", "")
        .env("DB_PATH", dir.path().join("t.db").to_str().unwrap())
        .assert()
        .failure();
}

// ── Status / report work without GITHUB_TOKEN / TARGET_REPO ────────────────

#[test]
fn status_on_empty_ledger() {
    let dir = temp_db_dir();
    jarvis()
        .arg("status")
        .env("GITHUB_TOKEN", "")
        .env("TARGET_REPO", "")
        .env("DB_PATH", dir.path().join("t.db").to_str().unwrap())
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs found"));
}

#[test]
fn report_on_empty_ledger() {
    let dir = temp_db_dir();
    jarvis()
        .arg("report")
        .env("GITHUB_TOKEN", "")
        .env("TARGET_REPO", "")
        .env("DB_PATH", dir.path().join("t.db").to_str().unwrap())
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs recorded yet."));
}

#[test]
fn report_for_missing_issue() {
    let dir = temp_db_dir();
    jarvis()
        .args(["report", "99"])
        .env("GITHUB_TOKEN", "")
        .env("TARGET_REPO", "acme/widgets")
        .env("DB_PATH", dir.path().join("t.db").to_str().unwrap())
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs found for issue #99"));
}
