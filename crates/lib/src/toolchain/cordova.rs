//! Cordova CLI implementation of [`Toolchain`].

use std::fs;

use async_trait::async_trait;
use tracing::info;

use crate::app::{AppPaths, AppRef};
use crate::config::ToolchainConfig;

use super::command::CommandRunner;
use super::platform::{PlatformRegistry, StepContext};
use super::{BuildArtifact, BuildRequest, Toolchain, ToolchainError};

#[derive(Debug, Clone)]
pub struct CordovaToolchain {
  config: ToolchainConfig,
  runner: CommandRunner,
  registry: PlatformRegistry,
}

impl CordovaToolchain {
  pub fn new(config: ToolchainConfig, runner: CommandRunner, registry: PlatformRegistry) -> Self {
    Self {
      config,
      runner,
      registry,
    }
  }

  /// Build from config, resolving the environment and run-as user.
  pub fn from_config(config: &ToolchainConfig, registry: PlatformRegistry) -> Result<Self, ToolchainError> {
    let runner = CommandRunner::from_config(config)?;
    Ok(Self::new(config.clone(), runner, registry))
  }

  pub fn registry(&self) -> &PlatformRegistry {
    &self.registry
  }
}

#[async_trait]
impl Toolchain for CordovaToolchain {
  async fn create_project(&self, app: &AppRef, paths: &AppPaths, name: &str) -> Result<(), ToolchainError> {
    let root = paths.root();
    let parent = root.parent().unwrap_or(root);
    fs::create_dir_all(parent)?;

    let root_arg = root.to_string_lossy().to_string();
    self
      .runner
      .run(
        &self.config.bin_path,
        &["create", root_arg.as_str(), app.app_id(), name],
        parent,
      )
      .await?;

    info!(app = %app, root = %root.display(), "project created");
    Ok(())
  }

  async fn build(&self, request: BuildRequest<'_>) -> Result<BuildArtifact, ToolchainError> {
    let strategy = self
      .registry
      .get(request.platform)
      .ok_or_else(|| ToolchainError::UnsupportedPlatform(request.platform.to_string()))?;

    let ctx = StepContext {
      runner: &self.runner,
      config: &self.config,
      paths: request.paths,
      platform: request.platform,
      name: request.name,
    };

    strategy.prepare(ctx).await?;
    self
      .runner
      .run(&self.config.bin_path, &["build", request.platform], request.paths.root())
      .await?;
    let artifact = strategy.finalize(ctx).await?;

    info!(app = %request.app, platform = %request.platform, artifact = %artifact.path.display(), "build finished");
    Ok(artifact)
  }
}
