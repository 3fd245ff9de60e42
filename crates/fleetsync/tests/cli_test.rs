//! Integration tests for the `fleetsync` CLI binary.
//!
//! Argument parsing, help output, shell completions and error handling run
//! without a provider; one test drives `devices` against a wiremock server.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `fleetsync` binary with env isolation.
///
/// Clears all `FLEETSYNC_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn fleetsync_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("fleetsync");
    cmd.env("HOME", "/tmp/fleetsync-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/fleetsync-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("FLEETSYNC_PROFILE")
        .env_remove("FLEETSYNC_API_URL")
        .env_remove("FLEETSYNC_USERNAME")
        .env_remove("FLEETSYNC_PASSWORD")
        .env_remove("FLEETSYNC_OUTPUT")
        .env_remove("FLEETSYNC_INSECURE")
        .env_remove("FLEETSYNC_TIMEOUT");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = fleetsync_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    fleetsync_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("GPS51")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("positions"))
            .and(predicate::str::contains("watch")),
    );
}

#[test]
fn test_version_flag() {
    fleetsync_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fleetsync"));
}

#[test]
fn test_watch_help_lists_options() {
    fleetsync_cmd()
        .args(["watch", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--interval")
                .and(predicate::str::contains("--adaptive"))
                .and(predicate::str::contains("--log-file")),
        );
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    fleetsync_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fleetsync"));
}

#[test]
fn test_completions_zsh() {
    fleetsync_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_invalid_shell() {
    fleetsync_cmd()
        .args(["completions", "tcsh"])
        .assert()
        .failure()
        .code(2);
}

// ── Error handling ──────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = fleetsync_cmd().arg("teleport").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("unrecognized subcommand"));
}

#[test]
fn test_invalid_output_format() {
    fleetsync_cmd()
        .args(["--output", "xml", "devices"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_missing_profile_is_a_usage_error() {
    let output = fleetsync_cmd().arg("devices").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(
        text.contains("Profile 'default' not found"),
        "Expected profile error in output:\n{text}"
    );
}

#[test]
fn test_missing_password_exits_with_auth_code() {
    let output = fleetsync_cmd()
        .args(["--username", "fleet", "--api-url", "http://127.0.0.1:9/openapi"])
        .args(["--profile", "cli-test-no-keyring-entry", "devices"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("missing: password"));
}

#[test]
fn test_unparseable_since_is_rejected() {
    let output = fleetsync_cmd()
        .env("FLEETSYNC_PASSWORD", "password")
        .args(["--username", "fleet", "--api-url", "http://127.0.0.1:9/openapi"])
        .args(["positions", "--since", "whenever"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Invalid value for since"));
}

#[test]
fn test_config_show_without_file() {
    fleetsync_cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[defaults]"));
}

#[test]
fn test_config_use_unknown_profile() {
    let output = fleetsync_cmd()
        .args(["config", "use", "nowhere"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("(none)"));
}

#[test]
fn test_config_use_and_remove_rewrite_the_file() {
    let home = tempfile::tempdir().unwrap();
    let config_dir = home.path().join("fleetsync");
    std::fs::create_dir_all(&config_dir).unwrap();
    let config_file = config_dir.join("config.toml");
    std::fs::write(
        &config_file,
        "default_profile = \"day\"\n\n\
         [profiles.day]\nusername = \"fleet\"\npassword = \"hunter2\"\n\n\
         [profiles.night]\nusername = \"fleet\"\n",
    )
    .unwrap();

    let isolated = || {
        let mut cmd = fleetsync_cmd();
        cmd.env("XDG_CONFIG_HOME", home.path());
        cmd
    };

    isolated()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[profiles.night]")
                .and(predicate::str::contains("hunter2").not()),
        );

    isolated().args(["config", "use", "night"]).assert().success();
    let written = std::fs::read_to_string(&config_file).unwrap();
    assert!(written.contains("default_profile = \"night\""), "{written}");

    isolated().args(["config", "remove", "night"]).assert().success();
    let written = std::fs::read_to_string(&config_file).unwrap();
    assert!(!written.contains("[profiles.night]"), "{written}");
    assert!(written.contains("default_profile = \"day\""), "{written}");
}

// ── Provider round-trip ─────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_plain_against_mock_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("action", "login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 0,
            "token": "tok-cli",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("action", "querymonitorlist"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 0,
            "groups": [{
                "groupname": "Depot",
                "devices": [
                    { "deviceid": "A1", "devicename": "Truck" },
                    { "deviceid": "B2", "devicename": "Van" }
                ]
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("action", "logout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": 0 })))
        .mount(&server)
        .await;

    let api_url = format!("{}/openapi", server.uri());
    let output = tokio::task::spawn_blocking(move || {
        fleetsync_cmd()
            .env("FLEETSYNC_PASSWORD", "password")
            .args(["--username", "fleet", "--api-url", &api_url])
            .args(["--output", "plain", "devices"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    let text = combined_output(&output);
    assert!(output.status.success(), "devices failed:\n{text}");
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "A1\nB2");
}
