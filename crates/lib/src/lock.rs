//! File-based build locks.
//!
//! A lock token `compile-<platform>.lock` in the app directory marks a build
//! in progress for `(app, version, platform)`. The toolchain mutates the
//! platform directory in place, so two builds of the same triple must never
//! overlap. Different platforms and different versions lock independently.
//!
//! Tokens are created with `O_EXCL` semantics, so creation is the atomic
//! acquisition step. A token whose mtime is older than the staleness threshold
//! is treated as abandoned and removed. While a build runs, the holder touches
//! its token's mtime periodically (heartbeat) so a long build is not mistaken for a
//! crashed one.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::consts::LOCK_METADATA_VERSION;

/// Serializes stale-token recovery within the process.
static STALE_RECOVERY: Mutex<()> = Mutex::new(());

/// Contents of a lock token. Only existence and mtime are significant for
/// locking; the rest is for diagnostics and ownership checks on release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub platform: String,
  pub token: String,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("failed to create lock directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to create lock {path}: {source}")]
  Create {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to inspect lock {path}: {source}")]
  Inspect {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to remove lock {path}: {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock metadata {path}: {source}")]
  WriteMetadata {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Outcome of a single acquisition attempt.
#[derive(Debug)]
pub enum TryAcquire {
  Acquired(LockGuard),
  /// Another holder owns a fresh token.
  Busy { age: Duration },
}

/// Outcome of a bounded polling wait.
#[derive(Debug)]
pub enum WaitAcquire {
  Acquired(LockGuard),
  /// The wait budget ran out. Callers must treat this as "unknown", not failure.
  TimedOut { waited: Duration },
}

/// Lock for one `(app, version, platform)` triple.
#[derive(Debug, Clone)]
pub struct BuildLock {
  lock_path: PathBuf,
  platform: String,
  stale_after: Duration,
}

impl BuildLock {
  pub fn new(lock_path: impl Into<PathBuf>, platform: impl Into<String>, stale_after: Duration) -> Self {
    Self {
      lock_path: lock_path.into(),
      platform: platform.into(),
      stale_after,
    }
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  /// Try to create the lock token once.
  ///
  /// A stale token is removed and creation retried exactly once. Recovery is
  /// serialized per process, so two tasks never both remove and recreate.
  pub fn try_acquire(&self) -> Result<TryAcquire, LockError> {
    if let Some(guard) = self.create_token()? {
      return Ok(TryAcquire::Acquired(guard));
    }

    match token_age(&self.lock_path)? {
      Some(age) if age < self.stale_after => {
        debug!(path = %self.lock_path.display(), age = ?age, "lock busy");
        Ok(TryAcquire::Busy { age })
      }
      // Stale, or released between our attempt and the stat.
      _ => self.recover_stale(),
    }
  }

  /// Remove a stale token and retry creation, one recovery at a time.
  ///
  /// The age is judged again under [`STALE_RECOVERY`]: another task may have
  /// recovered the same token and created a fresh one since the first stat.
  fn recover_stale(&self) -> Result<TryAcquire, LockError> {
    let _recovering = STALE_RECOVERY.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    match token_age(&self.lock_path)? {
      Some(age) if age < self.stale_after => {
        debug!(path = %self.lock_path.display(), age = ?age, "lock recovered by another holder");
        return Ok(TryAcquire::Busy { age });
      }
      Some(age) => {
        warn!(
          path = %self.lock_path.display(),
          age = ?age,
          stale_after = ?self.stale_after,
          "removing stale lock"
        );
        remove_token(&self.lock_path)?;
      }
      None => {}
    }

    match self.create_token()? {
      Some(guard) => Ok(TryAcquire::Acquired(guard)),
      None => Ok(TryAcquire::Busy { age: Duration::ZERO }),
    }
  }

  /// Age of the token by mtime, or `None` when no token exists.
  ///
  /// This is the age staleness is judged by; a heartbeat keeps it low.
  pub fn age(&self) -> Result<Option<Duration>, LockError> {
    token_age(&self.lock_path)
  }

  /// Poll [`try_acquire`](Self::try_acquire) every `poll_interval` until it
  /// succeeds or `max_wait` has elapsed.
  pub async fn wait_and_acquire(&self, poll_interval: Duration, max_wait: Duration) -> Result<WaitAcquire, LockError> {
    let started = Instant::now();

    loop {
      if let TryAcquire::Acquired(guard) = self.try_acquire()? {
        return Ok(WaitAcquire::Acquired(guard));
      }

      let waited = started.elapsed();
      if waited >= max_wait {
        warn!(path = %self.lock_path.display(), waited = ?waited, "gave up waiting for lock");
        return Ok(WaitAcquire::TimedOut { waited });
      }

      debug!(path = %self.lock_path.display(), "waiting for lock to be released");
      tokio::time::sleep(poll_interval.min(max_wait - waited)).await;
    }
  }

  /// Delete the token regardless of owner. Idempotent.
  pub fn release(&self) -> Result<(), LockError> {
    remove_token(&self.lock_path)
  }

  /// Returns the holder's metadata, if a readable token exists.
  pub fn holder(&self) -> Option<LockMetadata> {
    read_metadata(&self.lock_path)
  }

  fn create_token(&self) -> Result<Option<LockGuard>, LockError> {
    if let Some(parent) = self.lock_path.parent()
      && !parent.exists()
    {
      fs::create_dir_all(parent).map_err(|source| LockError::CreateDir {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&self.lock_path) {
      Ok(file) => file,
      Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
      Err(source) => {
        return Err(LockError::Create {
          path: self.lock_path.clone(),
          source,
        });
      }
    };

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let metadata = LockMetadata {
      version: LOCK_METADATA_VERSION,
      pid: std::process::id(),
      started_at_unix: now.as_secs(),
      platform: self.platform.clone(),
      token: format!("{}-{}", std::process::id(), now.as_nanos()),
    };
    let content = serde_json::to_vec(&metadata).map_err(|e| LockError::WriteMetadata {
      path: self.lock_path.clone(),
      source: io::Error::other(e),
    })?;
    file.write_all(&content).map_err(|source| LockError::WriteMetadata {
      path: self.lock_path.clone(),
      source,
    })?;

    info!(path = %self.lock_path.display(), platform = %self.platform, "lock acquired");

    Ok(Some(LockGuard {
      lock_path: self.lock_path.clone(),
      token: metadata.token,
      heartbeat: None,
      released: false,
    }))
  }
}

/// Ownership of an acquired lock token.
///
/// The token is deleted by [`release`](Self::release) or, on any other exit
/// path, when the guard is dropped. A guard only deletes the token it created.
#[derive(Debug)]
pub struct LockGuard {
  lock_path: PathBuf,
  token: String,
  heartbeat: Option<JoinHandle<()>>,
  released: bool,
}

impl LockGuard {
  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  /// Touch the token's mtime every `interval` so it stays fresh.
  ///
  /// Stops once the token is gone or belongs to another holder; it never
  /// creates or rewrites a token. Must be called from within a tokio runtime.
  pub fn start_heartbeat(&mut self, interval: Duration) {
    if self.heartbeat.is_some() {
      return;
    }
    let path = self.lock_path.clone();
    let token = self.token.clone();
    self.heartbeat = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        if !read_metadata(&path).is_some_and(|meta| meta.token == token) {
          debug!(path = %path.display(), "lock no longer ours, stopping heartbeat");
          break;
        }
        if let Err(e) = filetime::set_file_mtime(&path, FileTime::now()) {
          warn!(path = %path.display(), error = %e, "lock heartbeat failed");
        }
      }
    }));
  }

  /// Release the lock, reporting removal errors.
  pub fn release(mut self) -> Result<(), LockError> {
    self.released = true;
    self.release_inner()
  }

  fn release_inner(&mut self) -> Result<(), LockError> {
    if let Some(heartbeat) = self.heartbeat.take() {
      heartbeat.abort();
    }

    match read_metadata(&self.lock_path) {
      Some(meta) if meta.token != self.token => {
        warn!(
          path = %self.lock_path.display(),
          holder_pid = meta.pid,
          "lock was taken over by another holder, leaving it in place"
        );
        return Ok(());
      }
      _ => {}
    }

    remove_token(&self.lock_path)?;
    info!(path = %self.lock_path.display(), "lock released");
    Ok(())
  }
}

impl Drop for LockGuard {
  fn drop(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    if let Err(e) = self.release_inner() {
      warn!(error = %e, "failed to release lock on drop");
    }
  }
}

fn remove_token(path: &Path) -> Result<(), LockError> {
  match fs::remove_file(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(source) => Err(LockError::Remove {
      path: path.to_path_buf(),
      source,
    }),
  }
}

/// Age of the token by mtime, or `None` if it does not exist.
fn token_age(path: &Path) -> Result<Option<Duration>, LockError> {
  let metadata = match fs::metadata(path) {
    Ok(metadata) => metadata,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => {
      return Err(LockError::Inspect {
        path: path.to_path_buf(),
        source,
      });
    }
  };
  let modified = metadata.modified().map_err(|source| LockError::Inspect {
    path: path.to_path_buf(),
    source,
  })?;
  // A token from the future (clock skew) counts as brand new.
  Ok(Some(SystemTime::now().duration_since(modified).unwrap_or_default()))
}

fn read_metadata(path: &Path) -> Option<LockMetadata> {
  let content = fs::read(path).ok()?;
  serde_json::from_slice(&content).ok()
}
