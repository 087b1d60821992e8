//! Test doubles shared by unit and integration tests.

use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::app::{AppPaths, AppRef};
use crate::config::Config;
use crate::notify::{CallbackPayload, Notifier, NotifyError, Operation};
use crate::toolchain::{BuildArtifact, BuildRequest, Toolchain, ToolchainError};

pub const TEST_PASSPHRASE: &str = "s3cret";

/// Config rooted at `apps_path` with short lock timings.
pub fn test_config(apps_path: &Path) -> Config {
  let mut config = Config {
    apps_path: apps_path.to_path_buf(),
    passphrase: TEST_PASSPHRASE.to_string(),
    ..Config::default()
  };
  config.lock.poll_interval_ms = 10;
  config.lock.max_wait_ms = 2_000;
  config
}

/// Create an app directory with the given files under its source dir.
pub fn write_app(apps_path: &Path, app: &AppRef, files: &[(&str, &[u8])]) -> AppPaths {
  let paths = AppPaths::new(apps_path, app, "www");
  fs::create_dir_all(paths.source_root()).unwrap();
  for (name, content) in files {
    let path = paths.source_root().join(name);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
  }
  paths
}

/// Toolchain that writes a fixed artifact instead of compiling.
#[derive(Debug, Default)]
pub struct FakeToolchain {
  builds: AtomicUsize,
  creates: AtomicUsize,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
  fail: bool,
  delay: Duration,
}

impl FakeToolchain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn build_count(&self) -> usize {
    self.builds.load(Ordering::SeqCst)
  }

  pub fn create_count(&self) -> usize {
    self.creates.load(Ordering::SeqCst)
  }

  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Toolchain for FakeToolchain {
  async fn create_project(&self, _app: &AppRef, paths: &AppPaths, name: &str) -> Result<(), ToolchainError> {
    self.creates.fetch_add(1, Ordering::SeqCst);
    fs::create_dir_all(paths.source_root())?;
    fs::write(paths.source_root().join("index.html"), format!("<h1>{}</h1>", name))?;
    Ok(())
  }

  async fn build(&self, request: BuildRequest<'_>) -> Result<BuildArtifact, ToolchainError> {
    self.builds.fetch_add(1, Ordering::SeqCst);
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(self.delay).await;
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    if self.fail {
      return Err(ToolchainError::Failed {
        program: "fake".into(),
        code: Some(1),
      });
    }

    let extension = if request.platform == "ios" { "ipa" } else { "apk" };
    let out = request.paths.executable_dir(request.platform);
    fs::create_dir_all(&out)?;
    let path = out.join(format!("app.{}", extension));
    fs::write(&path, format!("binary for {}", request.platform))?;
    Ok(BuildArtifact { path })
  }
}

/// Notifier that records every callback.
#[derive(Debug, Default)]
pub struct CapturingNotifier {
  sent: Mutex<Vec<(Operation, CallbackPayload)>>,
}

impl CapturingNotifier {
  pub fn sent(&self) -> Vec<(Operation, CallbackPayload)> {
    self.sent.lock().unwrap().clone()
  }

  /// Wait until at least `count` callbacks were sent, or give up after `timeout`.
  pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<(Operation, CallbackPayload)> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
      let sent = self.sent();
      if sent.len() >= count || tokio::time::Instant::now() >= deadline {
        return sent;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  }
}

#[async_trait]
impl Notifier for CapturingNotifier {
  async fn notify(&self, operation: Operation, payload: &CallbackPayload) -> Result<(), NotifyError> {
    self.sent.lock().unwrap().push((operation, payload.clone()));
    Ok(())
  }
}
