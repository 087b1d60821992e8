//! Default filesystem locations.

use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Environment variable overriding the default apps directory.
pub const APPS_PATH_ENV: &str = "MLABC_APPS_PATH";

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "MLABC_CONFIG";

/// Returns the user's home directory, if `HOME` is set.
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the user's home directory, if `USERPROFILE` is set.
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var_os("XDG_DATA_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".local").join("share")))
    .unwrap_or_else(|| PathBuf::from("."));
  data_home.join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
    .join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var_os("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".config")))
    .unwrap_or_else(|| PathBuf::from("."));
  config_home.join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  data_dir()
}

/// Where application source trees live unless configured otherwise.
pub fn default_apps_path() -> PathBuf {
  std::env::var_os(APPS_PATH_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|| data_dir().join("apps"))
}

/// Config file path: `MLABC_CONFIG`, else `<config_dir>/config.toml`.
pub fn default_config_path() -> PathBuf {
  std::env::var_os(CONFIG_PATH_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|| config_dir().join("config.toml"))
}
