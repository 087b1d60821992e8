//! Toolchain process execution.
//!
//! Spawned commands inherit the service's environment, extended with the
//! configured variables, and optionally run as a different Unix user. The
//! environment is resolved once at startup and never written back to the
//! process environment.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info, trace, warn};

use crate::config::ToolchainConfig;

use super::ToolchainError;

/// Prefix marking a value that is appended to the inherited variable.
const APPEND_PREFIX: &str = "$:";

/// Numeric identity to run toolchain processes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAs {
  pub uid: u32,
  pub gid: u32,
}

/// Runs toolchain commands with a fixed environment and identity.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
  env: BTreeMap<String, String>,
  run_as: Option<RunAs>,
}

impl CommandRunner {
  pub fn new(env: BTreeMap<String, String>, run_as: Option<RunAs>) -> Self {
    Self { env, run_as }
  }

  pub fn from_config(config: &ToolchainConfig) -> Result<Self, ToolchainError> {
    let env = resolve_environment(&config.environment, |key| std::env::var(key).ok());
    let run_as = match &config.user {
      Some(user) => resolve_user(user)?,
      None => None,
    };
    if let Some(id) = run_as {
      info!(uid = id.uid, gid = id.gid, "toolchain commands will run as configured user");
    }
    Ok(Self::new(env, run_as))
  }

  pub fn env(&self) -> &BTreeMap<String, String> {
    &self.env
  }

  /// Run `program` in `cwd` and wait for it to exit.
  ///
  /// Stdout is logged at trace level, stderr at warn. A nonzero exit status is an error.
  pub async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<(), ToolchainError> {
    info!(program = %program, args = ?args, cwd = %cwd.display(), "running toolchain command");

    let mut command = Command::new(program);
    command.args(args).current_dir(cwd).envs(&self.env);
    apply_run_as(&mut command, self.run_as);

    let output = command.output().await.map_err(|source| ToolchainError::Spawn {
      program: program.to_string(),
      source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
      trace!(program = %program, "stdout: {}", line);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines() {
      warn!(program = %program, "stderr: {}", line);
    }

    if !output.status.success() {
      return Err(ToolchainError::Failed {
        program: program.to_string(),
        code: output.status.code(),
      });
    }

    debug!(program = %program, "toolchain command finished");
    Ok(())
  }
}

#[cfg(unix)]
fn apply_run_as(command: &mut Command, run_as: Option<RunAs>) {
  if let Some(id) = run_as {
    command.uid(id.uid).gid(id.gid);
  }
}

#[cfg(not(unix))]
fn apply_run_as(_command: &mut Command, _run_as: Option<RunAs>) {}

/// Resolve configured variables against the inherited environment.
///
/// `KEY = "$:/extra"` yields `<inherited>:/extra`, or `/extra` if `KEY` is not
/// inherited. Other values replace the inherited value.
pub fn resolve_environment<F>(configured: &BTreeMap<String, String>, inherited: F) -> BTreeMap<String, String>
where
  F: Fn(&str) -> Option<String>,
{
  configured
    .iter()
    .map(|(key, value)| {
      let resolved = match value.strip_prefix(APPEND_PREFIX) {
        Some(suffix) => match inherited(key) {
          Some(existing) if !existing.is_empty() => format!("{}:{}", existing, suffix),
          _ => suffix.to_string(),
        },
        None => value.clone(),
      };
      (key.clone(), resolved)
    })
    .collect()
}

/// Look up `user`; returns `None` when it is the current user.
#[cfg(unix)]
pub fn resolve_user(user: &str) -> Result<Option<RunAs>, ToolchainError> {
  use nix::unistd::{Uid, User};

  let found = User::from_name(user)
    .map_err(|e| ToolchainError::Io(std::io::Error::other(e)))?
    .ok_or_else(|| ToolchainError::UnknownUser(user.to_string()))?;

  if found.uid == Uid::current() {
    return Ok(None);
  }

  Ok(Some(RunAs {
    uid: found.uid.as_raw(),
    gid: found.gid.as_raw(),
  }))
}

#[cfg(not(unix))]
pub fn resolve_user(user: &str) -> Result<Option<RunAs>, ToolchainError> {
  warn!(user = %user, "running as another user is not supported on this platform");
  Ok(None)
}
