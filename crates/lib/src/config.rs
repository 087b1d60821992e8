//! Service configuration.
//!
//! Loaded once from a TOML file and shared read-only as `Arc<Config>`. Every
//! field has a default, so an empty file (or no file) is a valid config.
//!
//! ```toml
//! listen = "127.0.0.1:8080"
//! apps_path = "/srv/mlab/apps"
//! passphrase = "secret"
//!
//! [callback]
//! base_url = "https://mlab.example.org/callback"
//!
//! [lock]
//! max_wait_ms = 60000
//! stale_after_secs = 300
//! platform_stale_after_secs = { ios = 900 }
//!
//! [toolchain]
//! bin_path = "/usr/local/bin/cordova"
//! user = "builder"
//! environment = { ANDROID_HOME = "/opt/android", PATH = "$:/opt/android/tools" }
//! ```

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{
  DEFAULT_CALLBACK_TIMEOUT_SECS, DEFAULT_LISTEN, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, DEFAULT_SOURCE_DIR,
  DEFAULT_STALE_AFTER, DEFAULT_TOOLCHAIN_BIN,
};
use crate::paths::default_apps_path;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("invalid listen address {value}: {message}")]
  InvalidListen { value: String, message: String },

  #[error("invalid config: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Socket address the HTTP layer binds to.
  pub listen: String,
  /// Root directory holding `<app_id>/<version>/` source trees.
  pub apps_path: PathBuf,
  /// Shared secret every request must carry.
  pub passphrase: String,
  /// Accept requests without a passphrase when `passphrase` is empty.
  pub allow_anonymous: bool,
  pub callback: CallbackConfig,
  pub lock: LockConfig,
  pub toolchain: ToolchainConfig,
  pub checksum: ChecksumConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      listen: DEFAULT_LISTEN.to_string(),
      apps_path: default_apps_path(),
      passphrase: String::new(),
      allow_anonymous: false,
      callback: CallbackConfig::default(),
      lock: LockConfig::default(),
      toolchain: ToolchainConfig::default(),
      checksum: ChecksumConfig::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
  /// Base URL; the operation name is appended as a path segment.
  /// Callbacks are logged and dropped when unset.
  pub base_url: Option<String>,
  pub timeout_secs: u64,
}

impl Default for CallbackConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout_secs: DEFAULT_CALLBACK_TIMEOUT_SECS,
    }
  }
}

impl CallbackConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
  pub poll_interval_ms: u64,
  pub max_wait_ms: u64,
  pub stale_after_secs: u64,
  /// Per-platform staleness overrides.
  pub platform_stale_after_secs: BTreeMap<String, u64>,
  /// Refresh the lock token while a build runs.
  pub heartbeat: bool,
}

impl Default for LockConfig {
  fn default() -> Self {
    Self {
      poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
      max_wait_ms: DEFAULT_MAX_WAIT.as_millis() as u64,
      stale_after_secs: DEFAULT_STALE_AFTER.as_secs(),
      platform_stale_after_secs: BTreeMap::new(),
      heartbeat: true,
    }
  }
}

impl LockConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  pub fn max_wait(&self) -> Duration {
    Duration::from_millis(self.max_wait_ms)
  }

  pub fn stale_after(&self, platform: &str) -> Duration {
    let secs = self
      .platform_stale_after_secs
      .get(platform)
      .copied()
      .unwrap_or(self.stale_after_secs);
    Duration::from_secs(secs)
  }

  /// Heartbeat period for `platform`: a third of its staleness threshold, at least one second.
  pub fn heartbeat_interval(&self, platform: &str) -> Duration {
    (self.stale_after(platform) / 3).max(Duration::from_secs(1))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
  /// Cordova-compatible CLI.
  pub bin_path: String,
  /// Unix user to run the toolchain as.
  pub user: Option<String>,
  /// Extra environment; a value starting with `$:` is appended to the inherited one.
  pub environment: BTreeMap<String, String>,
  /// Post-build script for iOS, called with `(platform_dir, app_name, provisioning_profile)`.
  pub ios_script: PathBuf,
  pub ios_provisioning_profile: String,
}

impl Default for ToolchainConfig {
  fn default() -> Self {
    Self {
      bin_path: DEFAULT_TOOLCHAIN_BIN.to_string(),
      user: None,
      environment: BTreeMap::new(),
      ios_script: PathBuf::from("./bin/compileios.sh"),
      ios_provisioning_profile: String::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksumConfig {
  /// Subdirectory of the app that is checksummed.
  pub source_dir: String,
  /// Additional basenames excluded from checksums.
  pub exclude: Vec<String>,
}

impl Default for ChecksumConfig {
  fn default() -> Self {
    Self {
      source_dir: DEFAULT_SOURCE_DIR.to_string(),
      exclude: Vec::new(),
    }
  }
}

impl Config {
  /// Load and validate the config at `path`.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml_str(&content)
  }

  /// Load `path` if it exists, otherwise use defaults.
  pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
    if path.exists() {
      Self::load(path)
    } else {
      let config = Self::default();
      config.validate()?;
      Ok(config)
    }
  }

  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.listen_addr()?;
    if self.lock.poll_interval_ms == 0 {
      return Err(ConfigError::Invalid("lock.poll_interval_ms must be positive".into()));
    }
    if self.lock.stale_after_secs == 0 || self.lock.platform_stale_after_secs.values().any(|s| *s == 0) {
      return Err(ConfigError::Invalid("lock staleness thresholds must be positive".into()));
    }
    if self.checksum.source_dir.is_empty() {
      return Err(ConfigError::Invalid("checksum.source_dir must not be empty".into()));
    }
    Ok(())
  }

  pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
    self.listen.parse().map_err(|e: std::net::AddrParseError| ConfigError::InvalidListen {
      value: self.listen.clone(),
      message: e.to_string(),
    })
  }

  /// Whether `given` satisfies the shared-secret check.
  pub fn accepts_passphrase(&self, given: Option<&str>) -> bool {
    if self.passphrase.is_empty() {
      return self.allow_anonymous;
    }
    given.is_some_and(|g| g == self.passphrase)
  }
}
