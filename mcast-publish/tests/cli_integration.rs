//! Integration tests for the mcast-publish CLI
//!
//! No platform adapters are configured, so these runs never leave the
//! machine. They cover argument handling, output formats and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Isolated config file and database per test
struct TestEnv {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("data")
            .join("mediacast.db")
            .to_string_lossy()
            .replace('\\', "\\\\");
        let config_path = temp_dir.path().join("config.toml");

        fs::write(
            &config_path,
            format!(
                r#"
[database]
path = "{}"

[polling]
interval = "1s"
max_attempts = 3
"#,
                db_path
            ),
        )
        .unwrap();

        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("mcast-publish").unwrap();
        cmd.env("MEDIACAST_CONFIG", &self.config_path);
        cmd.env_remove("MEDIACAST_DB_PATH");
        cmd.env("MEDIACAST_LOG_LEVEL", "error");
        cmd
    }
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("mcast-publish")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("publish"))
        .stdout(predicate::str::contains("recheck"))
        .stdout(predicate::str::contains("insights"));
}

#[test]
fn test_non_http_media_url_is_invalid_input() {
    let env = TestEnv::new();

    env.cmd()
        .args([
            "publish",
            "--account",
            "meta-1",
            "--media-url",
            "/tmp/clip.mp4",
            "--caption",
            "hello",
        ])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Media URL must be http(s)"));
}

#[test]
fn test_unknown_format_is_rejected_by_parser() {
    let env = TestEnv::new();

    env.cmd()
        .args([
            "publish",
            "--account",
            "meta-1",
            "--media-url",
            "https://cdn.example.com/a.mp4",
            "--format",
            "carousel",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown format"));
}

#[test]
fn test_publish_to_unknown_account_reports_token_error() {
    let env = TestEnv::new();

    let output = env
        .cmd()
        .args([
            "publish",
            "--account",
            "meta-404",
            "--media-url",
            "https://cdn.example.com/a.mp4",
            "--caption",
            "hello",
            "--format-out",
            "json",
        ])
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["state"], "failed");
    assert_eq!(json["result"]["success"], false);
    assert_eq!(json["result"]["error_kind"], "token_error");
    assert!(json["job_id"].as_str().is_some());
}

#[test]
fn test_failed_job_is_listed() {
    let env = TestEnv::new();

    env.cmd()
        .args([
            "publish",
            "--account",
            "meta-404",
            "--media-url",
            "https://cdn.example.com/a.mp4",
            "--caption",
            "hello",
        ])
        .assert()
        .code(2);

    env.cmd()
        .args(["jobs", "--limit", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("meta-404"));
}

#[test]
fn test_recheck_unknown_job_is_not_found() {
    let env = TestEnv::new();

    env.cmd()
        .args(["recheck", "no-such-job"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Job no-such-job"));
}

#[test]
fn test_resume_with_nothing_to_do() {
    let env = TestEnv::new();

    env.cmd().arg("resume").assert().success().stdout("");
}

#[test]
fn test_zero_max_polls_is_invalid_config() {
    let env = TestEnv::new();

    env.cmd()
        .args(["--max-polls", "0", "resume"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("polling.max_attempts"));
}
