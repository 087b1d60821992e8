//! Manifest storage.
//!
//! `save` is the only path that writes `compile.json`. Writes go to a temporary
//! file in the same directory which is then renamed over the old manifest, so
//! readers see either the previous or the new document, never a torn one.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::app::{AppPaths, AppRef};
use crate::consts::DEFAULT_SOURCE_DIR;

use super::types::Manifest;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse manifest {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize manifest: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to write manifest {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("application directory does not exist: {0}")]
  MissingAppDir(PathBuf),

  #[error("invalid manifest for {app}")]
  InvalidAppRef { app: String },
}

/// Filter for [`ManifestStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
  pub app_id: Option<String>,
  pub version: Option<String>,
}

/// Entry returned by [`ManifestStore::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct ListedApp {
  pub app: AppRef,
  /// `None` when the app has never been compiled.
  pub manifest: Option<Manifest>,
}

/// Reads and writes manifests under the apps directory.
#[derive(Debug, Clone)]
pub struct ManifestStore {
  apps_path: PathBuf,
}

impl ManifestStore {
  pub fn new(apps_path: impl Into<PathBuf>) -> Self {
    Self {
      apps_path: apps_path.into(),
    }
  }

  pub fn apps_path(&self) -> &Path {
    &self.apps_path
  }

  fn manifest_path(&self, app: &AppRef) -> PathBuf {
    AppPaths::new(&self.apps_path, app, DEFAULT_SOURCE_DIR).manifest_path()
  }

  /// Load the manifest for `app`.
  ///
  /// Returns `Ok(None)` if there is no manifest, or if the stored `app_id` /
  /// `version` do not match `app` (a stale or copied file is never trusted).
  pub fn load(&self, app: &AppRef) -> Result<Option<Manifest>, ManifestError> {
    let path = self.manifest_path(app);

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => return Err(ManifestError::Read { path, source }),
    };

    let manifest: Manifest = serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
      path: path.clone(),
      source,
    })?;

    if !manifest.matches(app) {
      warn!(
        path = %path.display(),
        expected = %app,
        found_id = %manifest.app_id,
        found_version = %manifest.version,
        "ignoring manifest for a different application"
      );
      return Ok(None);
    }

    Ok(Some(manifest))
  }

  /// Atomically overwrite the manifest of the app it describes.
  pub fn save(&self, manifest: &Manifest) -> Result<(), ManifestError> {
    let app = AppRef::new(manifest.app_id.clone(), manifest.version.clone()).map_err(|_| {
      ManifestError::InvalidAppRef {
        app: format!("{}@{}", manifest.app_id, manifest.version),
      }
    })?;
    let path = self.manifest_path(&app);
    let dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| self.apps_path.clone());

    if !dir.is_dir() {
      return Err(ManifestError::MissingAppDir(dir));
    }

    let content = serde_json::to_string_pretty(manifest).map_err(ManifestError::Serialize)?;
    let write_err = |source| ManifestError::Write {
      path: path.clone(),
      source,
    };

    let mut temp = NamedTempFile::new_in(&dir).map_err(write_err)?;
    temp.write_all(content.as_bytes()).map_err(write_err)?;
    temp.write_all(b"\n").map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(&path).map_err(|e| write_err(e.error))?;

    debug!(path = %path.display(), app = %app, "manifest saved");
    Ok(())
  }

  /// Enumerate `<apps_path>/<app_id>/<version>` directories with their manifests.
  ///
  /// Entries are sorted by app id, then version. Directories whose names are
  /// not valid references are skipped. A manifest that fails to parse is
  /// reported as absent.
  pub fn list(&self, filter: &ListFilter) -> Result<Vec<ListedApp>, ManifestError> {
    let mut found = Vec::new();

    for app_id in sorted_subdirs(&self.apps_path)? {
      if filter.app_id.as_deref().is_some_and(|f| f != app_id) {
        continue;
      }
      for version in sorted_subdirs(&self.apps_path.join(&app_id))? {
        if filter.version.as_deref().is_some_and(|f| f != version) {
          continue;
        }
        let Ok(app) = AppRef::new(app_id.clone(), version) else {
          continue;
        };
        let manifest = match self.load(&app) {
          Ok(manifest) => manifest,
          Err(e) => {
            warn!(app = %app, error = %e, "unreadable manifest");
            None
          }
        };
        found.push(ListedApp { app, manifest });
      }
    }

    Ok(found)
  }
}

fn sorted_subdirs(path: &Path) -> Result<Vec<String>, ManifestError> {
  let entries = match fs::read_dir(path) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(source) => {
      return Err(ManifestError::Read {
        path: path.to_path_buf(),
        source,
      });
    }
  };

  let mut names: Vec<String> = entries
    .flatten()
    .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
    .filter_map(|e| e.file_name().to_str().map(str::to_string))
    .collect();
  names.sort();
  Ok(names)
}
