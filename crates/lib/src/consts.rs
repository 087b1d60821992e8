//! Shared constants.

use std::time::Duration;

pub const APP_NAME: &str = "mlabc";

/// Manifest file kept in every `<apps_path>/<app_id>/<version>/` directory.
pub const MANIFEST_FILENAME: &str = "compile.json";

/// Prefix and suffix of per-platform lock tokens (`compile-<platform>.lock`).
pub const LOCK_PREFIX: &str = "compile-";
pub const LOCK_SUFFIX: &str = ".lock";

/// Cordova project config, read for the app's display name.
pub const CONFIG_XML_FILENAME: &str = "config.xml";

/// Directory inside an app that holds the checksummed web sources.
pub const DEFAULT_SOURCE_DIR: &str = "www";

/// Current lock token metadata version.
pub const LOCK_METADATA_VERSION: u32 = 1;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_TOOLCHAIN_BIN: &str = "cordova";
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 30;
