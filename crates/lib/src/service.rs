//! Fire-and-forget operations.
//!
//! `create_app`, `verify_app` and `compile_app` return as soon as their work is
//! spawned. The spawned task always ends with exactly one callback, whatever
//! happens inside it. `status` and `executable` answer directly.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::app::AppRef;
use crate::build::{BuildError, Executable, Orchestrator};
use crate::config::Config;
use crate::manifest::{ListFilter, Manifest};
use crate::notify::{self, CallbackPayload, Notifier, NotifyError, Operation, deliver};
use crate::toolchain::{CordovaToolchain, PlatformRegistry, ToolchainError};

#[derive(Debug, Error)]
pub enum ServiceError {
  #[error(transparent)]
  Toolchain(#[from] ToolchainError),

  #[error(transparent)]
  Notify(#[from] NotifyError),

  #[error(transparent)]
  Build(#[from] BuildError),
}

#[derive(Clone)]
pub struct Service {
  orchestrator: Arc<Orchestrator>,
  notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Service {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Service")
      .field("orchestrator", &self.orchestrator)
      .finish_non_exhaustive()
  }
}

impl Service {
  pub fn new(orchestrator: Arc<Orchestrator>, notifier: Arc<dyn Notifier>) -> Self {
    Self { orchestrator, notifier }
  }

  /// Wire up the Cordova toolchain and the configured notifier.
  pub fn from_config(config: Arc<Config>) -> Result<Self, ServiceError> {
    let registry = PlatformRegistry::default();
    let toolchain = CordovaToolchain::from_config(&config.toolchain, registry.clone())?;
    let notifier = notify::from_config(&config.callback)?;
    let orchestrator = Orchestrator::new(config, Arc::new(toolchain), registry);
    Ok(Self::new(Arc::new(orchestrator), notifier))
  }

  pub fn config(&self) -> &Config {
    self.orchestrator.config()
  }

  pub fn orchestrator(&self) -> &Orchestrator {
    &self.orchestrator
  }

  pub fn supports_platform(&self, platform: &str) -> bool {
    self.orchestrator.registry().get(platform).is_some()
  }

  /// Scaffold the app if needed and report its checksum.
  pub fn create_app(&self, app: AppRef, name: Option<String>) -> JoinHandle<()> {
    let this = self.clone();
    tokio::spawn(async move {
      let payload = match this.orchestrator.create(&app, name.as_deref()).await {
        Ok(checksum) => CallbackPayload::new(&app, true).with_checksum(checksum.0),
        Err(e) => {
          warn!(app = %app, error = %e, "create failed");
          CallbackPayload::new(&app, false).with_error(e)
        }
      };
      deliver(this.notifier.as_ref(), Operation::CreateApp, &payload).await;
    })
  }

  /// Compare the app's sources against `checksum`. The callback carries the
  /// actual checksum so a mismatch can be diagnosed.
  pub fn verify_app(&self, app: AppRef, checksum: String) -> JoinHandle<()> {
    let this = self.clone();
    tokio::spawn(async move {
      let payload = match this.orchestrator.verify_blocking(&app, &checksum).await {
        Ok(v) => CallbackPayload::new(&app, v.matches).with_checksum(v.actual.0),
        Err(e) => {
          warn!(app = %app, error = %e, "verify failed");
          CallbackPayload::new(&app, false).with_error(e)
        }
      };
      deliver(this.notifier.as_ref(), Operation::VerifyApp, &payload).await;
    })
  }

  /// Build `platform` if the sources match `checksum` and are not built yet.
  pub fn compile_app(&self, app: AppRef, platform: String, checksum: String, name: Option<String>) -> JoinHandle<()> {
    let this = self.clone();
    tokio::spawn(async move {
      let outcome = this
        .orchestrator
        .compile(&app, &platform, &checksum, name.as_deref())
        .await;
      info!(app = %app, platform = %platform, outcome = outcome.label(), "compile finished");

      let payload = CallbackPayload::for_build(&app, &platform, &checksum, &outcome);
      deliver(this.notifier.as_ref(), Operation::CompileApp, &payload).await;
    })
  }

  /// Status of every app matching `filter`, walked on the blocking pool.
  pub async fn status(&self, filter: ListFilter) -> Result<Vec<Manifest>, ServiceError> {
    let orchestrator = self.orchestrator.clone();
    let statuses = tokio::task::spawn_blocking(move || orchestrator.status(&filter))
      .await
      .map_err(BuildError::from)??;
    Ok(statuses)
  }

  pub async fn executable(&self, app: &AppRef, platform: &str) -> Result<Executable, ServiceError> {
    Ok(self.orchestrator.executable(app, platform).await?)
  }
}
