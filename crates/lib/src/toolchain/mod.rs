//! Compiler toolchain collaborator.
//!
//! The orchestrator only sees the [`Toolchain`] trait: scaffold a project,
//! and build one platform into an artifact. The default implementation drives
//! a Cordova-compatible CLI; tests substitute their own.
//!
//! # Submodules
//!
//! - [`command`] - Process spawning with configured environment and user
//! - [`platform`] - Per-platform prepare/finalize strategies
//! - [`cordova`] - Cordova CLI implementation of [`Toolchain`]

pub mod command;
pub mod cordova;
pub mod platform;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::app::{AppPaths, AppRef};

pub use cordova::CordovaToolchain;
pub use platform::{PlatformRegistry, PlatformStrategy};

#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{program} exited with code {code:?}")]
  Failed { program: String, code: Option<i32> },

  #[error("unsupported platform: {0}")]
  UnsupportedPlatform(String),

  #[error("no {extension} artifact found under {dir}")]
  ArtifactNotFound { dir: PathBuf, extension: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("unknown user {0}")]
  UnknownUser(String),
}

/// Input for a single build.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
  pub app: &'a AppRef,
  pub paths: &'a AppPaths,
  pub platform: &'a str,
  /// Display name, used by post-build steps that name the artifact.
  pub name: &'a str,
}

/// A finished executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
  pub path: PathBuf,
}

#[async_trait]
pub trait Toolchain: Send + Sync {
  /// Scaffold a new project at `paths.root()`.
  async fn create_project(&self, app: &AppRef, paths: &AppPaths, name: &str) -> Result<(), ToolchainError>;

  /// Build `request.platform` and return the produced artifact.
  ///
  /// Runs to completion; there is no cancellation.
  async fn build(&self, request: BuildRequest<'_>) -> Result<BuildArtifact, ToolchainError>;
}
