//! Application references and on-disk layout.
//!
//! Every application version lives in its own directory:
//!
//! ```text
//! <apps_path>/<app_id>/<version>/
//! ├── config.xml              # Cordova project config (display name)
//! ├── compile.json            # Manifest of build outcomes
//! ├── compile-<platform>.lock # Lock token while a build is running
//! ├── www/                    # Checksummed web sources
//! └── platforms/<platform>/out/  # Produced executables
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{CONFIG_XML_FILENAME, LOCK_PREFIX, LOCK_SUFFIX, MANIFEST_FILENAME};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AppRefError {
  #[error("{field} must not be empty")]
  Empty { field: &'static str },

  #[error("{field} contains invalid characters: {value}")]
  InvalidComponent { field: &'static str, value: String },
}

/// Identity of one application source tree: `(app_id, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppRef {
  app_id: String,
  version: String,
}

impl AppRef {
  /// Create a reference, rejecting values that could escape the apps directory.
  pub fn new(app_id: impl Into<String>, version: impl Into<String>) -> Result<Self, AppRefError> {
    let app_id = app_id.into();
    let version = version.into();
    validate_component("app_id", &app_id)?;
    validate_component("version", &version)?;
    Ok(Self { app_id, version })
  }

  pub fn app_id(&self) -> &str {
    &self.app_id
  }

  pub fn version(&self) -> &str {
    &self.version
  }
}

impl std::fmt::Display for AppRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}@{}", self.app_id, self.version)
  }
}

fn validate_component(field: &'static str, value: &str) -> Result<(), AppRefError> {
  if value.is_empty() {
    return Err(AppRefError::Empty { field });
  }
  let bad = value == "."
    || value == ".."
    || value
      .chars()
      .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());
  if bad {
    return Err(AppRefError::InvalidComponent {
      field,
      value: value.to_string(),
    });
  }
  Ok(())
}

/// Path resolution for one application version.
#[derive(Debug, Clone)]
pub struct AppPaths {
  root: PathBuf,
  source_dir: String,
}

impl AppPaths {
  pub fn new(apps_path: &Path, app: &AppRef, source_dir: &str) -> Self {
    Self {
      root: apps_path.join(app.app_id()).join(app.version()),
      source_dir: source_dir.to_string(),
    }
  }

  /// Base directory of the app version.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Directory whose contents are checksummed.
  pub fn source_root(&self) -> PathBuf {
    self.root.join(&self.source_dir)
  }

  pub fn manifest_path(&self) -> PathBuf {
    self.root.join(MANIFEST_FILENAME)
  }

  pub fn lock_path(&self, platform: &str) -> PathBuf {
    self.root.join(lock_filename(platform))
  }

  pub fn config_xml_path(&self) -> PathBuf {
    self.root.join(CONFIG_XML_FILENAME)
  }

  pub fn platform_dir(&self, platform: &str) -> PathBuf {
    self.root.join("platforms").join(platform)
  }

  /// Directory where finished executables for `platform` are collected.
  pub fn executable_dir(&self, platform: &str) -> PathBuf {
    self.platform_dir(platform).join("out")
  }

  pub fn exists(&self) -> bool {
    self.root.is_dir()
  }
}

pub fn lock_filename(platform: &str) -> String {
  format!("{}{}{}", LOCK_PREFIX, platform, LOCK_SUFFIX)
}

/// Read the display name from the `<name>` element of `config.xml`.
///
/// Returns `None` when the file is missing or has no usable name.
pub fn name_from_config_xml(path: &Path) -> Option<String> {
  let content = fs::read_to_string(path).ok()?;
  extract_name_element(&content)
}

fn extract_name_element(xml: &str) -> Option<String> {
  let mut rest = xml;
  loop {
    let start = rest.find("<name")?;
    let after = &rest[start + "<name".len()..];
    // Skip longer tags such as <namespace>.
    match after.chars().next() {
      Some('>') | Some(' ') | Some('\t') | Some('\n') | Some('\r') => {}
      _ => {
        rest = after;
        continue;
      }
    }
    let open_end = after.find('>')?;
    if after[..open_end].ends_with('/') {
      rest = &after[open_end + 1..];
      continue;
    }
    let body = &after[open_end + 1..];
    let close = body.find("</name>")?;
    let name = unescape_xml(body[..close].trim());
    return if name.is_empty() { None } else { Some(name) };
  }
}

fn unescape_xml(text: &str) -> String {
  text
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&quot;", "\"")
    .replace("&apos;", "'")
    .replace("&amp;", "&")
}
