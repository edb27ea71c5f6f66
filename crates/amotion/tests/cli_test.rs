//! Integration tests for the `amotion` CLI binary.
//!
//! Argument parsing, help output, shell completions and error exit codes,
//! all without a live unit.
#![allow(clippy::unwrap_used)]

use std::net::TcpListener;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `amotion` binary with env isolation.
///
/// Clears all `AMOTION_*` env vars and points config directories at a
/// fresh temp dir so tests never touch the user's real configuration.
fn amotion_cmd(home: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("amotion");
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("AMOTION_PROFILE")
        .env_remove("AMOTION_URL")
        .env_remove("AMOTION_USERNAME")
        .env_remove("AMOTION_PASSWORD")
        .env_remove("AMOTION_OUTPUT")
        .env_remove("AMOTION_TIMEOUT");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// A local URL nothing listens on.
fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = amotion_cmd(&home).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home).arg("--help").assert().success().stdout(
        predicate::str::contains("aMotion")
            .and(predicate::str::contains("status"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("maintenance")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("amotion"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("amotion"));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let home = tempfile::tempdir().unwrap();
    let output = amotion_cmd(&home).arg("foobar").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_status_without_config() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No unit configured"));
}

#[test]
fn test_url_without_password_is_auth_error() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["--url", "http://192.168.0.11", "status"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No password"));
}

#[test]
fn test_unreachable_unit_is_connection_error() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["--url", &dead_url(), "info"])
        .env("AMOTION_PASSWORD", "secret")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("Could not connect"));
}

#[test]
fn test_invalid_output_format() {
    let home = tempfile::tempdir().unwrap();
    let output = amotion_cmd(&home)
        .args(["--output", "invalid", "status"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(
        text.contains("invalid") || text.contains("possible values"),
        "Expected error about valid output formats:\n{text}"
    );
}

#[test]
fn test_fan_out_of_range() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["set", "fan", "150"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("150"));
}

#[test]
fn test_unknown_mode() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["set", "mode", "turbo"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown mode"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_show_no_config() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["--output", "json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"default_profile\""));
}

#[test]
fn test_config_path() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_unknown_profile() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["--profile", "cellar", "status"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cellar"));
}

// ── Subcommand help discovery ───────────────────────────────────────

#[test]
fn test_set_subcommands_exist() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["set", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("temperature")
                .and(predicate::str::contains("fan"))
                .and(predicate::str::contains("mode")),
        );
}

#[test]
fn test_config_subcommands_exist() {
    let home = tempfile::tempdir().unwrap();
    amotion_cmd(&home)
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("init")
                .and(predicate::str::contains("show"))
                .and(predicate::str::contains("set-password"))
                .and(predicate::str::contains("path")),
        );
}
