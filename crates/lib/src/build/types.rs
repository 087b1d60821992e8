use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::app::AppRefError;
use crate::checksum::{Checksum, ChecksumError};
use crate::lock::LockError;
use crate::manifest::{ManifestError, PlatformRecord};
use crate::toolchain::ToolchainError;

/// States of one `(app, platform)` build attempt. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
  Unbuilt,
  Verifying,
  Building,
  Built,
  Failed,
  AlreadyBuilt,
}

impl fmt::Display for BuildState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BuildState::Unbuilt => "unbuilt",
      BuildState::Verifying => "verifying",
      BuildState::Building => "building",
      BuildState::Built => "built",
      BuildState::Failed => "failed",
      BuildState::AlreadyBuilt => "already_built",
    };
    f.write_str(s)
  }
}

/// Why a build attempt ended in [`BuildOutcome::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
  /// The source tree does not have the checksum the caller supplied.
  ChecksumMismatch { actual: Checksum },
  /// The source tree could not be checksummed.
  Checksum(String),
  UnsupportedPlatform(String),
  MissingApp(PathBuf),
  Lock(String),
  Toolchain(String),
  /// The build succeeded but its outcome could not be recorded.
  Persistence(String),
}

impl fmt::Display for FailureReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureReason::ChecksumMismatch { actual } => write!(f, "checksum mismatch (actual {})", actual),
      FailureReason::Checksum(e) => write!(f, "checksum failed: {}", e),
      FailureReason::UnsupportedPlatform(p) => write!(f, "unsupported platform: {}", p),
      FailureReason::MissingApp(p) => write!(f, "application not found at {}", p.display()),
      FailureReason::Lock(e) => write!(f, "lock error: {}", e),
      FailureReason::Toolchain(e) => write!(f, "toolchain failed: {}", e),
      FailureReason::Persistence(e) => write!(f, "failed to record build: {}", e),
    }
  }
}

/// Terminal result of [`Orchestrator::compile`](super::Orchestrator::compile).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
  /// A previous build already used this exact checksum; nothing was run.
  AlreadyBuilt { record: PlatformRecord },
  /// The toolchain ran and the result was persisted.
  Built { record: PlatformRecord },
  Failed { reason: FailureReason },
  /// The lock could not be acquired in time. Whether the content is built is
  /// not known; callers must not treat this as either success or failure.
  Unknown { waited: Duration },
}

impl BuildOutcome {
  /// The boolean reported to callers: true only for a usable build.
  pub fn result(&self) -> bool {
    matches!(self, BuildOutcome::AlreadyBuilt { .. } | BuildOutcome::Built { .. })
  }

  pub fn label(&self) -> &'static str {
    match self {
      BuildOutcome::AlreadyBuilt { .. } => "already_built",
      BuildOutcome::Built { .. } => "built",
      BuildOutcome::Failed { .. } => "failed",
      BuildOutcome::Unknown { .. } => "unknown",
    }
  }

  pub fn record(&self) -> Option<&PlatformRecord> {
    match self {
      BuildOutcome::AlreadyBuilt { record } | BuildOutcome::Built { record } => Some(record),
      _ => None,
    }
  }

  pub fn executable_checksum(&self) -> Option<&Checksum> {
    self.record().and_then(|r| r.executable_checksum.as_ref())
  }

  pub fn error(&self) -> Option<String> {
    match self {
      BuildOutcome::Failed { reason } => Some(reason.to_string()),
      BuildOutcome::Unknown { waited } => Some(format!("lock not acquired after {:?}", waited)),
      _ => None,
    }
  }
}

/// A downloadable executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableFile {
  pub path: PathBuf,
  /// Download name, `<name>-v<version>.<ext>`.
  pub file_name: String,
  pub mime_type: &'static str,
  pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executable {
  Found(ExecutableFile),
  /// No successful build, or its artifact is gone.
  NotCompiled,
}

/// Errors from operations outside the compile state machine.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  AppRef(#[from] AppRefError),

  #[error(transparent)]
  Checksum(#[from] ChecksumError),

  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Toolchain(#[from] ToolchainError),

  #[error("unsupported platform: {0}")]
  UnsupportedPlatform(String),

  #[error("failed to read executable {path}: {source}")]
  ReadExecutable {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("blocking task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}
