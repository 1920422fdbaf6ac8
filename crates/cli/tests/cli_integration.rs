//! CLI integration tests for the `callflow` binary.
//!
//! Uses `assert_cmd` to spawn the binary and verify exit codes, stdout
//! content, and stderr content. Every test runs in a fresh temporary
//! directory so no stray `callflow.toml` is picked up.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Helper: create a Command for the `callflow` binary in `dir`.
fn callflow(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("callflow");
    cmd.current_dir(dir.path());
    cmd.env_remove("CALLFLOW_API_KEY");
    cmd.env_remove("CALLFLOW_BATCH_WIDTH");
    cmd
}

fn test_cmd(dir: &TempDir) -> Command {
    let mut cmd = callflow(dir);
    cmd.arg("test")
        .arg("--rules")
        .arg(fixture("rules.json"))
        .arg("--tests")
        .arg(fixture("tests.json"));
    cmd
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    let dir = TempDir::new().unwrap();
    callflow(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("IVR rules engine"));
}

#[test]
fn version_exits_0() {
    let dir = TempDir::new().unwrap();
    callflow(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("callflow"));
}

// ──────────────────────────────────────────────
// 2. Check subcommand
// ──────────────────────────────────────────────

#[test]
fn check_valid_script_exits_0() {
    let dir = TempDir::new().unwrap();
    callflow(&dir)
        .arg("check")
        .arg(fixture("sales.script"))
        .assert()
        .success()
        .stdout(predicate::str::contains("valid (5 directives)"))
        .stdout(predicate::str::contains("attribute"));
}

#[test]
fn check_invalid_script_exits_1() {
    let dir = TempDir::new().unwrap();
    callflow(&dir)
        .arg("check")
        .arg(fixture("broken.script"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid script: line 2"));
}

#[test]
fn check_json_lists_directives() {
    let dir = TempDir::new().unwrap();
    let output = callflow(&dir)
        .args(["--output", "json", "check"])
        .arg(fixture("sales.script"))
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["valid"], true);
    assert_eq!(json["lines"][2]["directive"]["type"], "input");
    assert_eq!(json["lines"][2]["directive"]["value"], "1");
}

#[test]
fn check_missing_file_exits_1() {
    let dir = TempDir::new().unwrap();
    callflow(&dir)
        .args(["check", "nope.script"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error reading file"));
}

// ──────────────────────────────────────────────
// 3. Test subcommand
// ──────────────────────────────────────────────

#[test]
fn passing_folder_reports_tap_and_exits_0() {
    let dir = TempDir::new().unwrap();
    test_cmd(&dir)
        .args(["--folder", "/ivr", "--recursive"])
        .assert()
        .success()
        .stdout(predicate::str::contains("TAP version 14"))
        .stdout(predicate::str::contains("1..2"))
        .stdout(predicate::str::contains("ok 1 - Sales path"))
        .stdout(predicate::str::contains("ok 2 - Support path"))
        .stdout(predicate::str::contains("# coverage 100%"));
}

#[test]
fn non_recursive_folder_matches_exactly() {
    let dir = TempDir::new().unwrap();
    test_cmd(&dir)
        .args(["--folder", "/ivr/sales"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1..1"));
}

#[test]
fn failing_test_exits_1_with_diagnostics() {
    let dir = TempDir::new().unwrap();
    test_cmd(&dir)
        .args(["--id", "t-wrong"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("not ok 1 - Expects the wrong queue"))
        .stdout(predicate::str::contains("expected queue matching 'Support'"));
}

#[test]
fn json_output_carries_batch_and_results() {
    let dir = TempDir::new().unwrap();
    let output = test_cmd(&dir)
        .args(["--output", "json", "--width", "1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["batch"]["status"], "COMPLETE");
    assert_eq!(json["batch"]["total"], 3);
    assert_eq!(json["batch"]["success"], false);
    let names: Vec<&str> = json["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Expects the wrong queue", "Sales path", "Support path"]);
}

#[test]
fn unknown_test_id_exits_1() {
    let dir = TempDir::new().unwrap();
    test_cmd(&dir)
        .args(["--id", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed"));
}

#[test]
fn missing_rules_file_exits_1() {
    let dir = TempDir::new().unwrap();
    callflow(&dir)
        .args(["test", "--rules", "nope.json", "--tests"])
        .arg(fixture("tests.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error reading rules"));
}

// ──────────────────────────────────────────────
// 4. Configuration
// ──────────────────────────────────────────────

#[test]
fn config_file_in_working_directory_is_read() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("callflow.toml"), "[batch]\nbatch_width = \"wide\"\n").unwrap();
    test_cmd(&dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config"));
}

#[test]
fn explicit_config_path_must_exist() {
    let dir = TempDir::new().unwrap();
    callflow(&dir)
        .args(["--config", "missing.toml", "check"])
        .arg(fixture("sales.script"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error reading config"));
}

#[test]
fn bad_batch_width_env_is_rejected() {
    let dir = TempDir::new().unwrap();
    test_cmd(&dir)
        .env("CALLFLOW_BATCH_WIDTH", "many")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid CALLFLOW_BATCH_WIDTH"));
}

#[test]
fn unreachable_platform_fails_the_run() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("callflow.toml"),
        concat!(
            "[engine.retry]\nmax_retries = 0\nbase_delay_ms = 1\nmax_delay_ms = 1\n",
            "[collaborators]\nplatform_url = \"http://127.0.0.1:1\"\n",
        ),
    )
    .unwrap();
    test_cmd(&dir)
        .args(["--folder", "/ivr/sales"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("not ok 1 - Sales path"));
}

#[test]
fn attribute_limit_above_cap_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("callflow.toml"), "[engine]\nattribute_limit = 500\n").unwrap();
    test_cmd(&dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("attribute_limit 500 exceeds the cap of 200"));
}
