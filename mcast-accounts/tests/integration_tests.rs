//! Integration tests for the mcast-accounts CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Isolated config and database, with no platform adapters enabled
struct TestEnv {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("mediacast.db")
            .to_string_lossy()
            .replace('\\', "\\\\");
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, format!("[database]\npath = \"{}\"\n", db_path)).unwrap();

        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("mcast-accounts").unwrap();
        cmd.env("MEDIACAST_CONFIG", &self.config_path);
        cmd.env_remove("MEDIACAST_DB_PATH");
        cmd.env_remove("MEDIACAST_ACCESS_TOKEN");
        cmd.env_remove("MEDIACAST_REFRESH_TOKEN");
        cmd
    }
}

#[test]
fn test_list_without_accounts() {
    let env = TestEnv::new();

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No accounts connected"));
}

#[test]
fn test_list_json_is_empty_array() {
    let env = TestEnv::new();

    let output = env
        .cmd()
        .args(["list", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json, serde_json::json!([]));
}

#[test]
fn test_remove_unknown_account_is_not_found() {
    let env = TestEnv::new();

    env.cmd()
        .args(["remove", "meta-404"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("meta-404"));
}

#[test]
fn test_validate_unknown_account_is_not_found() {
    let env = TestEnv::new();

    env.cmd().args(["validate", "youtube-UC404"]).assert().code(3);
}

#[test]
fn test_discover_rejects_empty_token() {
    let env = TestEnv::new();

    env.cmd()
        .args(["discover", "--platform", "meta"])
        .write_stdin("   \n")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Access token cannot be empty"));
}

#[test]
fn test_discover_without_configured_adapter_fails() {
    let env = TestEnv::new();

    env.cmd()
        .args(["discover", "--platform", "youtube", "--kind", "long"])
        .env("MEDIACAST_ACCESS_TOKEN", "ya29.token")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No adapter registered for youtube"));
}

#[test]
fn test_unknown_platform_is_rejected_by_parser() {
    let env = TestEnv::new();

    env.cmd()
        .args(["discover", "--platform", "tiktok", "--token", "t"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown platform"));
}
