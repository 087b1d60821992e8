//! CLI smoke tests for mlabc.
//!
//! These tests run the binary against throwaway apps directories and check
//! exit codes and output.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use filetime::FileTime;
use predicates::prelude::*;
use tempfile::TempDir;

const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

fn mlabc_cmd() -> Command {
  cargo_bin_cmd!("mlabc")
}

/// Temp dir with `config.toml` pointing `apps_path` at `<temp>/apps`.
fn temp_env() -> (TempDir, PathBuf) {
  let temp = TempDir::new().unwrap();
  let apps = temp.path().join("apps");
  fs::create_dir_all(&apps).unwrap();
  let config = temp.path().join("config.toml");
  fs::write(&config, format!("apps_path = {:?}\n", apps.display().to_string())).unwrap();
  (temp, config)
}

fn app_dir(temp: &TempDir, app_id: &str, version: &str) -> PathBuf {
  let dir = temp.path().join("apps").join(app_id).join(version);
  fs::create_dir_all(dir.join("www")).unwrap();
  dir
}

fn checksum_of(dir: &Path) -> String {
  let output = mlabc_cmd().arg("checksum").arg(dir).output().unwrap();
  assert!(output.status.success());
  String::from_utf8(output.stdout).unwrap().trim().to_string()
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  mlabc_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  mlabc_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("mlabc"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["serve", "checksum", "status", "unlock"] {
    mlabc_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// checksum
// =============================================================================

#[test]
fn checksum_of_empty_dir_is_md5_of_nothing() {
  let temp = TempDir::new().unwrap();

  mlabc_cmd()
    .arg("checksum")
    .arg(temp.path())
    .env("MLABC_CONFIG", temp.path().join("absent.toml"))
    .assert()
    .success()
    .stdout(predicate::str::diff(format!("{}\n", EMPTY_MD5)));
}

#[test]
fn checksum_ignores_manifest_and_locks() {
  let temp = TempDir::new().unwrap();
  fs::write(temp.path().join("index.html"), "<h1>hi</h1>").unwrap();
  let before = checksum_of(temp.path());

  fs::write(temp.path().join("compile.json"), "{}").unwrap();
  fs::write(temp.path().join("compile-android.lock"), "{}").unwrap();

  assert_eq!(checksum_of(temp.path()), before);
  assert_ne!(before, EMPTY_MD5);
}

#[test]
fn checksum_honors_extra_excludes() {
  let temp = TempDir::new().unwrap();
  fs::write(temp.path().join(".DS_Store"), "junk").unwrap();

  mlabc_cmd()
    .arg("checksum")
    .arg(temp.path())
    .args(["--exclude", ".DS_Store"])
    .assert()
    .success()
    .stdout(predicate::str::contains(EMPTY_MD5));
}

#[test]
fn checksum_of_missing_dir_fails() {
  mlabc_cmd()
    .arg("checksum")
    .arg("/nonexistent/path/www")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Not a directory"));
}

// =============================================================================
// status
// =============================================================================

#[test]
fn status_with_no_apps() {
  let (_temp, config) = temp_env();

  mlabc_cmd()
    .arg("--config")
    .arg(&config)
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("No applications"));
}

#[test]
fn status_lists_unbuilt_platforms_as_json() {
  let (temp, config) = temp_env();
  app_dir(&temp, "com.acme.demo", "1");

  let output = mlabc_cmd()
    .arg("--config")
    .arg(&config)
    .args(["status", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let statuses: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(statuses[0]["app_id"], "com.acme.demo");
  assert_eq!(statuses[0]["version"], "1");
  assert_eq!(statuses[0]["platforms"]["android"]["compiled"], false);
  assert_eq!(statuses[0]["platforms"]["ios"]["compiled"], false);
}

#[test]
fn status_filters_by_app() {
  let (temp, config) = temp_env();
  app_dir(&temp, "com.acme.demo", "1");
  app_dir(&temp, "com.acme.other", "1");

  mlabc_cmd()
    .arg("--config")
    .arg(&config)
    .args(["status", "com.acme.other"])
    .assert()
    .success()
    .stdout(predicate::str::contains("com.acme.other").and(predicate::str::contains("com.acme.demo").not()));
}

#[test]
fn missing_explicit_config_fails() {
  mlabc_cmd()
    .args(["--config", "/nonexistent/config.toml", "status"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load config"));
}

// =============================================================================
// unlock
// =============================================================================

#[test]
fn unlock_without_lock_is_a_no_op() {
  let (temp, config) = temp_env();
  app_dir(&temp, "com.acme.demo", "1");

  mlabc_cmd()
    .arg("--config")
    .arg(&config)
    .args(["unlock", "com.acme.demo", "1", "android"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No build lock"));
}

#[test]
fn unlock_removes_lock() {
  let (temp, config) = temp_env();
  let dir = app_dir(&temp, "com.acme.demo", "1");
  let lock = dir.join("compile-android.lock");
  fs::write(&lock, "").unwrap();

  mlabc_cmd()
    .arg("--config")
    .arg(&config)
    .args(["unlock", "com.acme.demo", "1", "android"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed build lock"));

  assert!(!lock.exists());
}

#[test]
fn unlock_older_than_keeps_fresh_lock() {
  let (temp, config) = temp_env();
  let dir = app_dir(&temp, "com.acme.demo", "1");
  let lock = dir.join("compile-ios.lock");
  let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
  let token = serde_json::json!({
    "version": 1,
    "pid": 4242,
    "started_at_unix": now,
    "platform": "ios",
    "token": "abc",
  });
  fs::write(&lock, token.to_string()).unwrap();

  mlabc_cmd()
    .arg("--config")
    .arg(&config)
    .args(["unlock", "com.acme.demo", "1", "ios", "--older-than", "1h"])
    .assert()
    .success()
    .stdout(predicate::str::contains("4242"))
    .stderr(predicate::str::contains("leaving it in place"));

  assert!(lock.exists());
}

#[test]
fn unlock_older_than_judges_by_heartbeat_not_start_time() {
  let (temp, config) = temp_env();
  let dir = app_dir(&temp, "com.acme.demo", "1");
  let lock = dir.join("compile-android.lock");
  let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
  let token = serde_json::json!({
    "version": 1,
    "pid": 4242,
    "started_at_unix": now - 2 * 3600,
    "platform": "android",
    "token": "abc",
  });
  fs::write(&lock, token.to_string()).unwrap();

  // A long build whose heartbeat just touched the token.
  mlabc_cmd()
    .arg("--config")
    .arg(&config)
    .args(["unlock", "com.acme.demo", "1", "android", "--older-than", "1h"])
    .assert()
    .success()
    .stderr(predicate::str::contains("leaving it in place"));
  assert!(lock.exists());

  // The same build after its heartbeat stopped two hours ago.
  let silent = SystemTime::now() - Duration::from_secs(2 * 3600);
  filetime::set_file_mtime(&lock, FileTime::from_system_time(silent)).unwrap();

  mlabc_cmd()
    .arg("--config")
    .arg(&config)
    .args(["unlock", "com.acme.demo", "1", "android", "--older-than", "1h"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed build lock"));
  assert!(!lock.exists());
}

#[test]
fn unlock_rejects_path_traversal() {
  let (_temp, config) = temp_env();

  mlabc_cmd()
    .arg("--config")
    .arg(&config)
    .args(["unlock", "..", "1", "android"])
    .assert()
    .failure();
}
