//! Integration tests for core CLI contract behavior.

use {
    predicates::prelude::*,
    std::{fs, path::Path},
    tempfile::{TempDir, tempdir},
};

const KEY_FILE: &str = r#"
[[key]]
check_value = "ABCD1234EF"
key_data_hex = "0123456789ABCDEFFEDCBA9876543210"
algorithm_family = "TDES"

[[key]]
check_value = "77AA01"
key_data_hex = "0123456789ABCDEFFEDCBA987654321"

[[profile]]
name = "retail"

[[profile.slot]]
usage = "PIN"
key_type = "PIN Encryption Key"
slot = "01"
selected_key_ref = "ABCD1234EF"

[[profile]]
name = "broken"

[[profile.slot]]
usage = "PIN"
key_type = "PIN Encryption Key"
slot = "01"
selected_key_ref = "ABCD1234EF"

[[profile.slot]]
usage = "MAC"
key_type = "MAC Key"
slot = "02"
selected_key_ref = "77AA01"

[[profile]]
name = "empty"
"#;

/// Isolated working directory with an empty config and a key file.
fn workspace() -> TempDir {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("config.toml"), "").expect("config should be written");
    fs::write(dir.path().join("keys.toml"), KEY_FILE).expect("key file should be written");
    dir
}

fn cli_cmd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("keyinject");
    cmd.current_dir(dir)
        .env_remove("KEYINJECT_PORT")
        .env_remove("KEYINJECT_BAUD")
        .env_remove("KEYINJECT_KEYS")
        .env_remove("KEYINJECT_NON_INTERACTIVE")
        .env("NO_COLOR", "1")
        .arg("--config")
        .arg(dir.join("config.toml"));
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let dir = workspace();
    cli_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("keyinject"))
        .stdout(predicate::str::contains("inject"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let dir = workspace();
    cli_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("keyinject"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn missing_subcommand_is_usage_error() {
    let dir = workspace();
    cli_cmd(dir.path())
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn frame_prints_inject_frames_without_a_port() {
    let dir = workspace();
    cli_cmd(dir.path())
        .args(["--keys", "keys.toml", "frame", "retail"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# [1/1] PIN slot 01"))
        .stdout(predicate::str::contains("02 30 32 30 31 30 31"))
        .stderr(predicate::str::contains("clear key material"));
}

#[test]
fn frame_reads_key_file_from_environment() {
    let dir = workspace();
    cli_cmd(dir.path())
        .env("KEYINJECT_KEYS", dir.path().join("keys.toml"))
        .args(["--quiet", "frame", "retail"])
        .assert()
        .success()
        .stdout(predicate::str::contains("02 30 32"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn frame_validation_failure_keeps_stdout_clean() {
    let dir = workspace();
    cli_cmd(dir.path())
        .args(["--keys", "keys.toml", "frame", "broken"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Validation error"));
}

#[test]
fn frame_empty_profile_succeeds_without_output() {
    let dir = workspace();
    cli_cmd(dir.path())
        .args(["--keys", "keys.toml", "frame", "empty"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn unknown_profile_is_usage_error() {
    let dir = workspace();
    cli_cmd(dir.path())
        .args(["--keys", "keys.toml", "inject", "missing"])
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("retail"));
}

#[test]
fn missing_key_file_is_usage_error() {
    let dir = workspace();
    cli_cmd(dir.path())
        .args(["--non-interactive", "inject", "retail"])
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("key file"));
}

#[test]
fn unreadable_key_file_fails() {
    let dir = workspace();
    cli_cmd(dir.path())
        .args(["--keys", "nope.toml", "frame", "retail"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("nope.toml"));
}

#[test]
fn erase_without_target_is_usage_error() {
    let dir = workspace();
    cli_cmd(dir.path())
        .args(["--port", "/dev/keyinject-missing", "erase"])
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn invalid_serial_number_fails_before_writing() {
    let dir = workspace();
    cli_cmd(dir.path())
        .args(["--port", "/dev/keyinject-missing", "serial", "write", "SHORT"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Validation error"));
}

#[test]
fn unknown_brand_is_usage_error() {
    let dir = workspace();
    cli_cmd(dir.path())
        .args(["--port", "/dev/keyinject-missing", "brand", "verifone"])
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("AISINO"));
}

#[test]
fn list_ports_json_returns_valid_json() {
    let dir = workspace();
    let output = cli_cmd(dir.path())
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");
    assert!(output.status.success());

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["ok"], true);
    assert!(parsed["data"]["ports"].is_array());
}

#[test]
fn completions_write_script_to_stdout() {
    let dir = workspace();
    cli_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("keyinject"));
}
