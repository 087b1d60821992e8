//! Per-platform build steps.
//!
//! Each target platform supplies a [`PlatformStrategy`] with a `prepare` step
//! (run before the toolchain build) and a `finalize` step that leaves exactly
//! the finished executable in `platforms/<platform>/out/`. Strategies are
//! selected by name from a [`PlatformRegistry`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::app::AppPaths;
use crate::config::ToolchainConfig;

use super::command::CommandRunner;
use super::{BuildArtifact, ToolchainError};

/// Everything a strategy step may need.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
  pub runner: &'a CommandRunner,
  pub config: &'a ToolchainConfig,
  pub paths: &'a AppPaths,
  pub platform: &'a str,
  pub name: &'a str,
}

#[async_trait]
pub trait PlatformStrategy: Send + Sync + std::fmt::Debug {
  /// File extension of the produced executable, without the dot.
  fn executable_extension(&self) -> &'static str;

  /// MIME type used when the executable is downloaded.
  fn mime_type(&self) -> &'static str;

  /// Runs before the build. Defaults to adding the platform to the project.
  async fn prepare(&self, ctx: StepContext<'_>) -> Result<(), ToolchainError> {
    add_platform(ctx).await;
    Ok(())
  }

  /// Runs after a successful build and returns the collected executable.
  async fn finalize(&self, ctx: StepContext<'_>) -> Result<BuildArtifact, ToolchainError>;
}

/// `<bin> platform add <platform>`. Failure is logged and ignored; the platform
/// is usually present already.
pub async fn add_platform(ctx: StepContext<'_>) {
  let result = ctx
    .runner
    .run(&ctx.config.bin_path, &["platform", "add", ctx.platform], ctx.paths.root())
    .await;
  if let Err(e) = result {
    debug!(platform = %ctx.platform, error = %e, "platform add failed, continuing");
  }
}

#[derive(Debug, Default)]
pub struct Android;

#[async_trait]
impl PlatformStrategy for Android {
  fn executable_extension(&self) -> &'static str {
    "apk"
  }

  fn mime_type(&self) -> &'static str {
    "application/vnd.android.package-archive"
  }

  async fn finalize(&self, ctx: StepContext<'_>) -> Result<BuildArtifact, ToolchainError> {
    let out_dir = ctx.paths.executable_dir(ctx.platform);
    let extension = self.executable_extension();

    let built = newest_file_recursive(&ctx.paths.platform_dir(ctx.platform), extension, &out_dir).ok_or_else(|| {
      ToolchainError::ArtifactNotFound {
        dir: ctx.paths.platform_dir(ctx.platform),
        extension: extension.to_string(),
      }
    })?;

    fs::create_dir_all(&out_dir)?;
    clear_artifacts(&out_dir, extension)?;
    let file_name = built.file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("app.apk"));
    let dest = out_dir.join(file_name);
    fs::copy(&built, &dest)?;

    info!(artifact = %dest.display(), "collected android executable");
    Ok(BuildArtifact { path: dest })
  }
}

#[derive(Debug, Default)]
pub struct Ios;

#[async_trait]
impl PlatformStrategy for Ios {
  fn executable_extension(&self) -> &'static str {
    "ipa"
  }

  fn mime_type(&self) -> &'static str {
    "application/octet-stream"
  }

  async fn finalize(&self, ctx: StepContext<'_>) -> Result<BuildArtifact, ToolchainError> {
    let platform_dir = ctx.paths.platform_dir(ctx.platform);
    let script = absolute(&ctx.config.ios_script)?;
    let platform_arg = platform_dir.to_string_lossy().to_string();

    ctx
      .runner
      .run(
        &script.to_string_lossy(),
        &[
          platform_arg.as_str(),
          ctx.name,
          ctx.config.ios_provisioning_profile.as_str(),
        ],
        &platform_dir,
      )
      .await?;

    let out_dir = ctx.paths.executable_dir(ctx.platform);
    fs::create_dir_all(&out_dir)?;
    clear_artifacts(&out_dir, self.executable_extension())?;

    for entry in fs::read_dir(&platform_dir)? {
      let path = entry?.path();
      if path.is_file()
        && has_extension(&path, self.executable_extension())
        && let Some(file_name) = path.file_name()
      {
        fs::rename(&path, out_dir.join(file_name))?;
      }
    }

    let artifact = newest_file(&out_dir, self.executable_extension()).ok_or_else(|| ToolchainError::ArtifactNotFound {
      dir: out_dir.clone(),
      extension: self.executable_extension().to_string(),
    })?;

    info!(artifact = %artifact.display(), "collected ios executable");
    Ok(BuildArtifact { path: artifact })
  }
}

/// Lookup table of supported platforms.
#[derive(Debug, Clone)]
pub struct PlatformRegistry {
  strategies: BTreeMap<String, Arc<dyn PlatformStrategy>>,
}

impl Default for PlatformRegistry {
  fn default() -> Self {
    let mut registry = Self::empty();
    registry.register("android", Arc::new(Android));
    registry.register("ios", Arc::new(Ios));
    registry
  }
}

impl PlatformRegistry {
  pub fn empty() -> Self {
    Self {
      strategies: BTreeMap::new(),
    }
  }

  pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn PlatformStrategy>) {
    self.strategies.insert(name.into(), strategy);
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn PlatformStrategy>> {
    self.strategies.get(name).cloned()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.strategies.keys().map(String::as_str)
  }
}

fn has_extension(path: &Path, extension: &str) -> bool {
  path.extension().and_then(|e| e.to_str()) == Some(extension)
}

fn modified(path: &Path) -> SystemTime {
  fs::metadata(path)
    .and_then(|m| m.modified())
    .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Newest file with `extension` directly inside `dir`.
pub fn newest_file(dir: &Path, extension: &str) -> Option<PathBuf> {
  fs::read_dir(dir)
    .ok()?
    .flatten()
    .map(|e| e.path())
    .filter(|p| p.is_file() && has_extension(p, extension))
    .max_by(|a, b| modified(a).cmp(&modified(b)).then_with(|| a.cmp(b)))
}

/// Newest file with `extension` anywhere under `dir`, ignoring `skip`.
fn newest_file_recursive(dir: &Path, extension: &str, skip: &Path) -> Option<PathBuf> {
  WalkDir::new(dir)
    .into_iter()
    .filter_entry(|e| e.path() != skip)
    .flatten()
    .filter(|e| e.file_type().is_file() && has_extension(e.path(), extension))
    .map(|e| e.into_path())
    .max_by(|a, b| modified(a).cmp(&modified(b)).then_with(|| a.cmp(b)))
}

fn clear_artifacts(dir: &Path, extension: &str) -> Result<(), ToolchainError> {
  for entry in fs::read_dir(dir)? {
    let path = entry?.path();
    if path.is_file() && has_extension(&path, extension) {
      warn!(path = %path.display(), "removing previous executable");
      fs::remove_file(&path)?;
    }
  }
  Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf, ToolchainError> {
  if path.is_absolute() {
    return Ok(path.to_path_buf());
  }
  Ok(std::env::current_dir()?.join(path))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::app::AppRef;
  use tempfile::TempDir;

  fn paths_in(temp: &TempDir) -> AppPaths {
    let app = AppRef::new("com.acme.demo", "1").unwrap();
    AppPaths::new(temp.path(), &app, "www")
  }

  #[test]
  fn default_registry_knows_android_and_ios() {
    let registry = PlatformRegistry::default();
    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["android", "ios"]);
    assert_eq!(registry.get("android").unwrap().executable_extension(), "apk");
    assert_eq!(registry.get("ios").unwrap().executable_extension(), "ipa");
    assert!(registry.get("windows").is_none());
  }

  #[tokio::test]
  async fn android_finalize_collects_newest_apk() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let apk_dir = paths.platform_dir("android").join("app/build/outputs/apk/debug");
    fs::create_dir_all(&apk_dir).unwrap();
    fs::write(apk_dir.join("app-debug.apk"), b"apk-bytes").unwrap();

    let runner = CommandRunner::default();
    let config = ToolchainConfig::default();
    let ctx = StepContext {
      runner: &runner,
      config: &config,
      paths: &paths,
      platform: "android",
      name: "Demo",
    };

    let artifact = Android.finalize(ctx).await.unwrap();
    assert_eq!(artifact.path, paths.executable_dir("android").join("app-debug.apk"));
    assert_eq!(fs::read(&artifact.path).unwrap(), b"apk-bytes");
  }

  #[tokio::test]
  async fn android_finalize_without_apk_fails() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    fs::create_dir_all(paths.platform_dir("android")).unwrap();

    let runner = CommandRunner::default();
    let config = ToolchainConfig::default();
    let ctx = StepContext {
      runner: &runner,
      config: &config,
      paths: &paths,
      platform: "android",
      name: "Demo",
    };

    let err = Android.finalize(ctx).await.unwrap_err();
    assert!(matches!(err, ToolchainError::ArtifactNotFound { .. }));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn ios_finalize_moves_ipa_into_out() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    fs::create_dir_all(paths.platform_dir("ios")).unwrap();

    let script = temp.path().join("compileios.sh");
    fs::write(&script, "#!/bin/sh\necho \"$2\" > \"$1/Demo.ipa\"\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let runner = CommandRunner::default();
    let config = ToolchainConfig {
      ios_script: script,
      ..ToolchainConfig::default()
    };
    let ctx = StepContext {
      runner: &runner,
      config: &config,
      paths: &paths,
      platform: "ios",
      name: "Demo",
    };

    let artifact = Ios.finalize(ctx).await.unwrap();
    assert_eq!(artifact.path, paths.executable_dir("ios").join("Demo.ipa"));
    assert!(!paths.platform_dir("ios").join("Demo.ipa").exists());
  }

  #[test]
  fn newest_file_ignores_other_extensions() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("notes.txt"), "x").unwrap();
    assert!(newest_file(temp.path(), "apk").is_none());

    fs::write(temp.path().join("app.apk"), "x").unwrap();
    assert_eq!(newest_file(temp.path(), "apk"), Some(temp.path().join("app.apk")));
  }
}
