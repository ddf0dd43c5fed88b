//! Integration tests for the `petlink` CLI binary.
//!
//! Argument parsing, config handling, and REST-backed commands against a
//! mock backend. No test touches the user's real configuration or keyring.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `petlink` binary with env isolation.
fn petlink_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("petlink");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("PETLINK_PROFILE")
        .env_remove("PETLINK_CONFIG")
        .env_remove("PETLINK_SERVER")
        .env_remove("PETLINK_TOKEN")
        .env_remove("PETLINK_OUTPUT")
        .env_remove("PETLINK_INSECURE")
        .env_remove("PETLINK_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Run a prepared command off the async runtime so the mock server keeps serving.
async fn run(mut cmd: assert_cmd::Command) -> std::process::Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

fn status_body(req: &str, status: &str) -> serde_json::Value {
    json!({
        "reqId": req,
        "deviceId": "D1",
        "type": "feed",
        "status": status,
        "createdAt": "2024-01-01T00:00:00Z"
    })
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = petlink_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    petlink_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("send"))
            .and(predicate::str::contains("command"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    petlink_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("petlink"));
}

#[test]
fn test_invalid_subcommand() {
    let home = tempfile::tempdir().unwrap();
    let output = petlink_cmd(home.path()).arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(text.contains("foobar"), "Expected error naming the subcommand:\n{text}");
}

#[test]
fn test_watch_requires_a_device() {
    let home = tempfile::tempdir().unwrap();
    petlink_cmd(home.path())
        .arg("watch")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("DEVICES"));
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_send_without_config_explains_setup() {
    let home = tempfile::tempdir().unwrap();
    petlink_cmd(home.path())
        .args(["send", "D1", "feed"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No backend configured"));
}

#[test]
fn test_unknown_profile_is_not_found() {
    let home = tempfile::tempdir().unwrap();
    petlink_cmd(home.path())
        .args(["--profile", "nope", "command", "get", "D1", "r-1"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Profile 'nope' not found"));
}

#[test]
fn test_config_path_honours_flag() {
    let home = tempfile::tempdir().unwrap();
    let file = home.path().join("custom.toml");
    petlink_cmd(home.path())
        .args(["config", "path", "--config"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_init_then_show() {
    let home = tempfile::tempdir().unwrap();
    let file = home.path().join("petlink.toml");

    petlink_cmd(home.path())
        .args(["config", "init", "--server", "https://pets.example", "--config"])
        .arg(&file)
        .assert()
        .success();
    assert!(file.exists());

    let output = petlink_cmd(home.path())
        .args(["config", "show", "-o", "json", "--config"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["default_profile"], "default");
    assert_eq!(shown["profiles"]["default"]["server"], "https://pets.example");
    assert_eq!(shown["profiles"]["default"]["topic_prefix"], "/topic");
}

#[test]
fn test_config_show_redacts_tokens() {
    let home = tempfile::tempdir().unwrap();
    let file = home.path().join("petlink.toml");
    std::fs::write(
        &file,
        "[profiles.default]\nserver = \"https://pets.example\"\ntoken = \"hunter2\"\n",
    )
    .unwrap();

    petlink_cmd(home.path())
        .args(["config", "show", "--config"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not())
        .stdout(predicate::str::contains("********"));
}

#[test]
fn test_config_init_rejects_bad_url() {
    let home = tempfile::tempdir().unwrap();
    let file = home.path().join("petlink.toml");
    petlink_cmd(home.path())
        .args(["config", "init", "--server", "not a url", "--config"])
        .arg(&file)
        .assert()
        .code(2);
    assert!(!file.exists());
}

// ── Validation ──────────────────────────────────────────────────────

#[test]
fn test_send_rejects_invalid_device_id() {
    let home = tempfile::tempdir().unwrap();
    petlink_cmd(home.path())
        .args(["--server", "http://127.0.0.1:9", "send", "a/b", "feed"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("device id"));
}

#[test]
fn test_send_rejects_non_object_payload() {
    let home = tempfile::tempdir().unwrap();
    petlink_cmd(home.path())
        .args(["--server", "http://127.0.0.1:9", "send", "D1", "feed"])
        .args(["--payload", "[1,2]"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("payload"));
}

// ── REST-backed commands ────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_send_posts_command_with_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/devices/D1/commands"))
        .and(header("authorization", "Bearer t0k"))
        .and(body_json(json!({"type": "feed", "payload": {"grams": 5}})))
        .respond_with(ResponseTemplate::new(202).set_body_json(status_body("r-1", "PENDING")))
        .expect(1)
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let mut cmd = petlink_cmd(home.path());
    cmd.args(["--server", &server.uri(), "--token", "t0k", "-o", "json-compact"])
        .args(["send", "D1", "feed", "--payload", r#"{"grams":5}"#]);
    let output = run(cmd).await;

    assert!(output.status.success(), "{}", combined_output(&output));
    let printed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(printed["reqId"], "r-1");
    assert_eq!(printed["status"], "PENDING");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_get_plain_prints_request_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/devices/D1/commands/r-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("r-7", "ACKED")))
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let mut cmd = petlink_cmd(home.path());
    cmd.args(["--server", &server.uri(), "--token", "t", "-o", "plain"])
        .args(["command", "get", "D1", "r-7"]);
    let output = run(cmd).await;

    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "r-7");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_retry_uses_retry_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/devices/D1/commands/r-2/retry"))
        .respond_with(ResponseTemplate::new(202).set_body_json(status_body("r-3", "SENT")))
        .expect(1)
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let mut cmd = petlink_cmd(home.path());
    cmd.args(["--server", &server.uri(), "--token", "t"])
        .args(["command", "retry", "D1", "r-2"]);
    let output = run(cmd).await;

    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("r-3"), "table should show the new request:\n{stdout}");
    assert!(stdout.contains("SENT"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unauthorized_exits_with_auth_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let mut cmd = petlink_cmd(home.path());
    cmd.args(["--server", &server.uri(), "--token", "stale"])
        .args(["command", "get", "D1", "r-1"]);
    let output = run(cmd).await;

    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("Authentication failed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_command_exits_with_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "B0404",
            "message": "command r-9 does not exist"
        })))
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let mut cmd = petlink_cmd(home.path());
    cmd.args(["--server", &server.uri(), "--token", "t"])
        .args(["command", "get", "D1", "r-9"]);
    let output = run(cmd).await;

    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("does not exist"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_send_wait_reports_failed_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/devices/D1/commands"))
        .respond_with(ResponseTemplate::new(202).set_body_json(status_body("r-5", "FAILED")))
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let mut cmd = petlink_cmd(home.path());
    cmd.args(["--server", &server.uri(), "--token", "t"])
        .args(["send", "D1", "feed", "--wait", "5"]);
    let output = run(cmd).await;

    assert_eq!(output.status.code(), Some(6));
    let text = combined_output(&output);
    assert!(text.contains("r-5 finished as FAILED"), "{text}");
}
