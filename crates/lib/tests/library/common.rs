//! Shared test helpers for library tests.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use mlabc_lib::app::{AppPaths, AppRef};
use mlabc_lib::build::Orchestrator;
use mlabc_lib::config::Config;
use mlabc_lib::service::Service;
use mlabc_lib::toolchain::PlatformRegistry;
use mlabc_lib::util::testutil::{CapturingNotifier, FakeToolchain, test_config};
use tempfile::TempDir;

pub use mlabc_lib::util::testutil::TEST_PASSPHRASE as PASSPHRASE;

pub fn demo() -> AppRef {
  AppRef::new("com.acme.demo", "1").unwrap()
}

/// A service over a scratch apps directory.
pub struct TestEnv {
  pub temp: TempDir,
  pub service: Service,
  pub toolchain: Arc<FakeToolchain>,
  pub notifier: Arc<CapturingNotifier>,
}

impl TestEnv {
  pub fn new() -> Self {
    Self::with(FakeToolchain::new(), |_| {})
  }

  pub fn with(toolchain: FakeToolchain, tweak: impl FnOnce(&mut Config)) -> Self {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp.path().join("apps"));
    config.lock.poll_interval_ms = 20;
    config.lock.max_wait_ms = 5_000;
    tweak(&mut config);

    let toolchain = Arc::new(toolchain);
    let notifier = Arc::new(CapturingNotifier::default());
    let orchestrator = Orchestrator::new(Arc::new(config), toolchain.clone(), PlatformRegistry::default());
    let service = Service::new(Arc::new(orchestrator), notifier.clone());

    Self {
      temp,
      service,
      toolchain,
      notifier,
    }
  }

  pub fn apps_path(&self) -> &Path {
    &self.service.config().apps_path
  }

  pub fn paths(&self, app: &AppRef) -> AppPaths {
    self.service.orchestrator().paths(app)
  }

  /// Write a source file for `app` and return the tree checksum.
  pub fn write_source(&self, app: &AppRef, name: &str, content: &str) -> String {
    let root = self.paths(app).source_root();
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join(name), content).unwrap();
    self.service.orchestrator().checksum(app).unwrap().0
  }
}
