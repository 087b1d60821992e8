//! Manifest types.
//!
//! # Format
//!
//! ```json
//! {
//!   "app_id": "com.acme.demo",
//!   "version": "1",
//!   "name": "Demo",
//!   "platforms": {
//!     "android": {
//!       "compiled": true,
//!       "compiled_at": "2015-06-01T12:00:00Z",
//!       "source_checksum": "0cc175b9c0f1b6a831c399e269772661",
//!       "executable_checksum": "92eb5ffee6ae2fec3ad71c777531578f"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::AppRef;
use crate::checksum::Checksum;

/// Build outcome for one `(app, platform)` pair.
///
/// `compiled == true` implies `compiled_at` and `source_checksum` are set.
/// A record that is not compiled never has a `compiled_at`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRecord {
  pub compiled: bool,
  pub compiled_at: Option<DateTime<Utc>>,
  /// Checksum of the source tree at the time of the last successful build.
  pub source_checksum: Option<Checksum>,
  /// Checksum of the produced artifact.
  pub executable_checksum: Option<Checksum>,
}

impl PlatformRecord {
  /// True when the last successful build used exactly `checksum`.
  pub fn is_built_from(&self, checksum: &str) -> bool {
    self.compiled && self.source_checksum.as_ref().is_some_and(|c| c == checksum)
  }

  pub fn mark_built(&mut self, at: DateTime<Utc>, source: Checksum, executable: Option<Checksum>) {
    self.compiled = true;
    self.compiled_at = Some(at);
    self.source_checksum = Some(source);
    self.executable_checksum = executable;
  }

  pub fn is_consistent(&self) -> bool {
    if self.compiled {
      self.compiled_at.is_some() && self.source_checksum.is_some()
    } else {
      self.compiled_at.is_none()
    }
  }
}

/// Persisted record of build outcomes for one application version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
  pub app_id: String,
  pub version: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub platforms: BTreeMap<String, PlatformRecord>,
}

impl Manifest {
  pub fn new(app: &AppRef, name: impl Into<String>) -> Self {
    Self {
      app_id: app.app_id().to_string(),
      version: app.version().to_string(),
      name: name.into(),
      platforms: BTreeMap::new(),
    }
  }

  /// True when this manifest belongs to `app`.
  pub fn matches(&self, app: &AppRef) -> bool {
    self.app_id == app.app_id() && self.version == app.version()
  }

  pub fn platform(&self, platform: &str) -> Option<&PlatformRecord> {
    self.platforms.get(platform)
  }

  /// Record for `platform`, created zero-valued on first touch.
  pub fn platform_mut(&mut self, platform: &str) -> &mut PlatformRecord {
    self.platforms.entry(platform.to_string()).or_default()
  }

  pub fn is_built_from(&self, platform: &str, checksum: &str) -> bool {
    self.platform(platform).is_some_and(|r| r.is_built_from(checksum))
  }

  pub fn is_compiled(&self, platform: &str) -> bool {
    self.platform(platform).is_some_and(|r| r.compiled)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn demo() -> AppRef {
    AppRef::new("com.acme.demo", "1").unwrap()
  }

  #[test]
  fn new_record_is_unbuilt_and_consistent() {
    let record = PlatformRecord::default();
    assert!(!record.compiled);
    assert!(record.is_consistent());
    assert!(!record.is_built_from("abc123"));
  }

  #[test]
  fn mark_built_keeps_invariant() {
    let mut record = PlatformRecord::default();
    record.mark_built(Utc::now(), Checksum("abc123".into()), None);
    assert!(record.is_consistent());
    assert!(record.is_built_from("abc123"));
    assert!(!record.is_built_from("zzz999"));
  }

  #[test]
  fn platform_mut_creates_zero_record() {
    let mut manifest = Manifest::new(&demo(), "Demo");
    assert!(manifest.platform("android").is_none());

    let record = manifest.platform_mut("android");
    assert_eq!(*record, PlatformRecord::default());
    assert!(manifest.platform("android").is_some());
    assert!(!manifest.is_compiled("android"));
  }

  #[test]
  fn matches_requires_id_and_version() {
    let manifest = Manifest::new(&demo(), "Demo");
    assert!(manifest.matches(&demo()));
    assert!(!manifest.matches(&AppRef::new("com.acme.demo", "2").unwrap()));
    assert!(!manifest.matches(&AppRef::new("com.acme.other", "1").unwrap()));
  }

  #[test]
  fn deserializes_without_optional_fields() {
    let json = r#"{"app_id":"com.acme.demo","version":"1"}"#;
    let manifest: Manifest = serde_json::from_str(json).unwrap();
    assert!(manifest.platforms.is_empty());
    assert_eq!(manifest.name, "");
  }
}
