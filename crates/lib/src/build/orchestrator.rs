//! The build state machine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::app::{AppPaths, AppRef, lock_filename, name_from_config_xml};
use crate::checksum::{self, Checksum, Verification};
use crate::config::Config;
use crate::consts::MANIFEST_FILENAME;
use crate::lock::{BuildLock, WaitAcquire};
use crate::manifest::{ListFilter, Manifest, ManifestError, ManifestStore};
use crate::toolchain::platform::newest_file;
use crate::toolchain::{BuildRequest, PlatformRegistry, Toolchain};

use super::types::{BuildError, BuildOutcome, BuildState, Executable, ExecutableFile, FailureReason};

/// Runs builds and answers queries about their outcomes.
///
/// Cheap to share behind an `Arc`; build state lives on disk.
pub struct Orchestrator {
  config: Arc<Config>,
  store: ManifestStore,
  toolchain: Arc<dyn Toolchain>,
  registry: PlatformRegistry,
  /// One writer per manifest. Platform locks do not cover the shared file.
  manifest_writes: Mutex<HashMap<AppRef, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for Orchestrator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Orchestrator")
      .field("apps_path", &self.config.apps_path)
      .field("registry", &self.registry)
      .finish_non_exhaustive()
  }
}

impl Orchestrator {
  pub fn new(config: Arc<Config>, toolchain: Arc<dyn Toolchain>, registry: PlatformRegistry) -> Self {
    let store = ManifestStore::new(config.apps_path.clone());
    Self {
      config,
      store,
      toolchain,
      registry,
      manifest_writes: Mutex::new(HashMap::new()),
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn store(&self) -> &ManifestStore {
    &self.store
  }

  pub fn registry(&self) -> &PlatformRegistry {
    &self.registry
  }

  pub fn paths(&self, app: &AppRef) -> AppPaths {
    AppPaths::new(&self.config.apps_path, app, &self.config.checksum.source_dir)
  }

  /// Basenames never included in a checksum.
  pub fn excludes(&self) -> Vec<String> {
    checksum_excludes(&self.config.checksum.exclude, &self.registry)
  }

  /// Checksum the app's sources on the calling thread.
  pub fn checksum(&self, app: &AppRef) -> Result<Checksum, BuildError> {
    let paths = self.paths(app);
    Ok(checksum::compute_checksum(&paths.source_root(), &self.excludes())?)
  }

  /// Compare the app's sources against `expected` on the calling thread.
  pub fn verify(&self, app: &AppRef, expected: &str) -> Result<Verification, BuildError> {
    let paths = self.paths(app);
    let verification = checksum::verify(&paths.source_root(), &self.excludes(), expected)?;
    if !verification.matches {
      info!(app = %app, expected = %expected, actual = %verification.actual, "checksum mismatch");
    }
    Ok(verification)
  }

  /// [`checksum`](Self::checksum) on the blocking pool.
  pub async fn checksum_blocking(&self, app: &AppRef) -> Result<Checksum, BuildError> {
    let root = self.paths(app).source_root();
    let exclude = self.excludes();
    let sum = tokio::task::spawn_blocking(move || checksum::compute_checksum(&root, &exclude)).await??;
    Ok(sum)
  }

  /// [`verify`](Self::verify) on the blocking pool.
  pub async fn verify_blocking(&self, app: &AppRef, expected: &str) -> Result<Verification, BuildError> {
    let root = self.paths(app).source_root();
    let exclude = self.excludes();
    let wanted = expected.to_string();
    let verification = tokio::task::spawn_blocking(move || checksum::verify(&root, &exclude, &wanted)).await??;
    if !verification.matches {
      info!(app = %app, expected = %expected, actual = %verification.actual, "checksum mismatch");
    }
    Ok(verification)
  }

  /// Display name: the requested one, else `<name>` from `config.xml`, else the app id.
  pub fn display_name(&self, app: &AppRef, requested: Option<&str>) -> String {
    if let Some(name) = requested.map(str::trim).filter(|n| !n.is_empty()) {
      return name.to_string();
    }
    name_from_config_xml(&self.paths(app).config_xml_path()).unwrap_or_else(|| app.app_id().to_string())
  }

  /// Scaffold the application if its directory is missing, then checksum it.
  pub async fn create(&self, app: &AppRef, name: Option<&str>) -> Result<Checksum, BuildError> {
    let paths = self.paths(app);
    if paths.exists() {
      debug!(app = %app, "application exists, skipping scaffold");
    } else {
      let name = self.display_name(app, name);
      info!(app = %app, name = %name, "creating application");
      self.toolchain.create_project(app, &paths, &name).await?;
    }
    self.checksum_blocking(app).await
  }

  /// Build `platform` for `app` from sources whose checksum is `checksum`.
  ///
  /// Never returns an error: every failure is folded into the outcome.
  pub async fn compile(&self, app: &AppRef, platform: &str, checksum: &str, name: Option<&str>) -> BuildOutcome {
    transition(app, platform, BuildState::Unbuilt);

    if self.registry.get(platform).is_none() {
      return failed(app, platform, FailureReason::UnsupportedPlatform(platform.to_string()));
    }

    let paths = self.paths(app);
    if !paths.exists() {
      return failed(app, platform, FailureReason::MissingApp(paths.root().to_path_buf()));
    }

    if let Some(outcome) = self.already_built(app, platform, checksum) {
      return outcome;
    }

    transition(app, platform, BuildState::Verifying);
    let verified = match self.verify_blocking(app, checksum).await {
      Ok(v) if v.matches => v.actual,
      Ok(v) => return failed(app, platform, FailureReason::ChecksumMismatch { actual: v.actual }),
      Err(e) => return failed(app, platform, FailureReason::Checksum(e.to_string())),
    };

    let lock = BuildLock::new(
      paths.lock_path(platform),
      platform,
      self.config.lock.stale_after(platform),
    );
    let mut guard = match lock
      .wait_and_acquire(self.config.lock.poll_interval(), self.config.lock.max_wait())
      .await
    {
      Ok(WaitAcquire::Acquired(guard)) => guard,
      Ok(WaitAcquire::TimedOut { waited }) => {
        warn!(app = %app, platform = %platform, waited = ?waited, "build outcome unknown, lock still held");
        return BuildOutcome::Unknown { waited };
      }
      Err(e) => return failed(app, platform, FailureReason::Lock(e.to_string())),
    };

    if self.config.lock.heartbeat {
      guard.start_heartbeat(self.config.lock.heartbeat_interval(platform));
    }

    let outcome = self.build_locked(app, &paths, platform, verified, name).await;

    if let Err(e) = guard.release() {
      warn!(app = %app, platform = %platform, error = %e, "failed to release build lock");
    }
    outcome
  }

  /// Loads the manifest, tolerating a corrupt one as "not built".
  fn load_manifest(&self, app: &AppRef) -> Option<Manifest> {
    match self.store.load(app) {
      Ok(manifest) => manifest,
      Err(e) => {
        warn!(app = %app, error = %e, "unreadable manifest, treating as not built");
        None
      }
    }
  }

  fn already_built(&self, app: &AppRef, platform: &str, checksum: &str) -> Option<BuildOutcome> {
    let manifest = self.load_manifest(app)?;
    let record = manifest.platform(platform).filter(|r| r.is_built_from(checksum))?;
    transition(app, platform, BuildState::AlreadyBuilt);
    Some(BuildOutcome::AlreadyBuilt { record: record.clone() })
  }

  async fn build_locked(
    &self,
    app: &AppRef,
    paths: &AppPaths,
    platform: &str,
    verified: Checksum,
    name: Option<&str>,
  ) -> BuildOutcome {
    // Someone may have finished the same build while we waited.
    if let Some(outcome) = self.already_built(app, platform, verified.as_str()) {
      return outcome;
    }

    let stored_name = self.load_manifest(app).map(|m| m.name).filter(|n| !n.is_empty());
    let name = match (name, stored_name) {
      (None, Some(stored)) => stored,
      (requested, _) => self.display_name(app, requested),
    };

    transition(app, platform, BuildState::Building);
    let request = BuildRequest {
      app,
      paths,
      platform,
      name: &name,
    };
    let artifact = match self.toolchain.build(request).await {
      Ok(artifact) => artifact,
      Err(e) => return failed(app, platform, FailureReason::Toolchain(e.to_string())),
    };

    let executable_checksum = match hash_artifact(artifact.path).await {
      Ok(sum) => Some(sum),
      Err(e) => {
        warn!(app = %app, platform = %platform, error = %e, "failed to checksum executable");
        None
      }
    };

    let manifest = match self.record_build(app, platform, name, verified, executable_checksum) {
      Ok(manifest) => manifest,
      Err(e) => {
        error!(app = %app, platform = %platform, error = %e, "build finished but manifest could not be saved");
        return failed(app, platform, FailureReason::Persistence(e.to_string()));
      }
    };

    transition(app, platform, BuildState::Built);
    match manifest.platform(platform) {
      Some(record) => BuildOutcome::Built { record: record.clone() },
      None => failed(app, platform, FailureReason::Persistence("record missing after save".into())),
    }
  }

  /// Merge one platform's result into the manifest as it is on disk now.
  ///
  /// Builds of other platforms may have saved since this one started, so the
  /// manifest is re-read under the app's writer lock rather than reused.
  fn record_build(
    &self,
    app: &AppRef,
    platform: &str,
    name: String,
    source: Checksum,
    executable: Option<Checksum>,
  ) -> Result<Manifest, ManifestError> {
    let writer = self.manifest_writer(app);
    let _writing = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let mut manifest = self.load_manifest(app).unwrap_or_else(|| Manifest::new(app, String::new()));
    manifest.name = name;
    manifest.platform_mut(platform).mark_built(Utc::now(), source, executable);
    self.store.save(&manifest)?;
    Ok(manifest)
  }

  fn manifest_writer(&self, app: &AppRef) -> Arc<Mutex<()>> {
    let mut writers = self.manifest_writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    writers.entry(app.clone()).or_default().clone()
  }

  /// Manifests for every app matching `filter`, with a "not compiled" record
  /// for each known platform that has never been built.
  ///
  /// Walks the apps directory; async callers go through the blocking pool.
  pub fn status(&self, filter: &ListFilter) -> Result<Vec<Manifest>, BuildError> {
    let listed = self.store.list(filter)?;
    let statuses = listed
      .into_iter()
      .map(|entry| {
        let mut manifest = entry
          .manifest
          .unwrap_or_else(|| Manifest::new(&entry.app, self.display_name(&entry.app, None)));
        for platform in self.registry.names() {
          manifest.platform_mut(platform);
        }
        manifest
      })
      .collect();
    Ok(statuses)
  }

  /// The built executable for `platform`, or [`Executable::NotCompiled`].
  pub async fn executable(&self, app: &AppRef, platform: &str) -> Result<Executable, BuildError> {
    let strategy = self
      .registry
      .get(platform)
      .ok_or_else(|| BuildError::UnsupportedPlatform(platform.to_string()))?;

    let Some(manifest) = self.load_manifest(app) else {
      return Ok(Executable::NotCompiled);
    };
    if !manifest.is_compiled(platform) {
      return Ok(Executable::NotCompiled);
    }

    let extension = strategy.executable_extension();
    let Some(path) = newest_file(&self.paths(app).executable_dir(platform), extension) else {
      warn!(app = %app, platform = %platform, "compiled but no executable found");
      return Ok(Executable::NotCompiled);
    };

    let bytes = tokio::fs::read(&path).await.map_err(|source| BuildError::ReadExecutable {
      path: path.clone(),
      source,
    })?;

    let name = if manifest.name.is_empty() {
      self.display_name(app, None)
    } else {
      manifest.name.clone()
    };

    Ok(Executable::Found(ExecutableFile {
      path,
      file_name: format!("{}-v{}.{}", name, app.version(), extension),
      mime_type: strategy.mime_type(),
      bytes,
    }))
  }
}

/// `configured` plus the manifest and the lock token of every platform in `registry`.
pub fn checksum_excludes(configured: &[String], registry: &PlatformRegistry) -> Vec<String> {
  let mut exclude = configured.to_vec();
  exclude.push(MANIFEST_FILENAME.to_string());
  exclude.extend(registry.names().map(lock_filename));
  exclude
}

async fn hash_artifact(path: PathBuf) -> Result<Checksum, BuildError> {
  Ok(tokio::task::spawn_blocking(move || checksum::hash_file(&path)).await??)
}

fn transition(app: &AppRef, platform: &str, state: BuildState) {
  debug!(app = %app, platform = %platform, state = %state, "build state");
}

fn failed(app: &AppRef, platform: &str, reason: FailureReason) -> BuildOutcome {
  warn!(app = %app, platform = %platform, state = %BuildState::Failed, reason = %reason, "build failed");
  BuildOutcome::Failed { reason }
}
