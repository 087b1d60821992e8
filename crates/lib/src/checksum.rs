//! Content checksums for application source trees.
//!
//! A tree checksum is built from the MD5 digest of every included file. The
//! per-file digests are sorted by value (not by path), concatenated and
//! digested again. The result depends only on file contents and file count:
//!
//! - enumeration order does not matter
//! - renaming files does not matter, as long as the multiset of contents is kept
//! - changing any byte of an included file changes the checksum
//!
//! Clients compute the same value on their side and send it with verify and
//! compile requests, so the algorithm must stay byte-compatible.

use std::fs;
use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

/// Lowercase 32-character hex MD5 digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(pub String);

impl Checksum {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for Checksum {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl PartialEq<str> for Checksum {
  fn eq(&self, other: &str) -> bool {
    self.0 == other
  }
}

impl PartialEq<&str> for Checksum {
  fn eq(&self, other: &&str) -> bool {
    self.0 == *other
  }
}

/// Error during checksum computation.
///
/// Any error aborts the whole computation; partial checksums are never returned.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
  #[error("source tree not found: {path}")]
  MissingRoot { path: String },

  #[error("failed to walk {path}: {message}")]
  WalkDir { path: String, message: String },

  #[error("failed to read file {path}: {source}")]
  ReadFile {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Result of comparing a tree against an expected checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
  pub matches: bool,
  pub actual: Checksum,
}

/// Compute the checksum of every regular file under `root`.
///
/// Files whose basename appears in `exclude` are skipped; directories are
/// always descended into. Symlinks are followed so linked files contribute
/// their content.
pub fn compute_checksum(root: &Path, exclude: &[String]) -> Result<Checksum, ChecksumError> {
  if !root.is_dir() {
    return Err(ChecksumError::MissingRoot {
      path: root.display().to_string(),
    });
  }

  let mut digests: Vec<String> = Vec::new();

  for entry in WalkDir::new(root).follow_links(true) {
    let entry = entry.map_err(|e| ChecksumError::WalkDir {
      path: root.display().to_string(),
      message: e.to_string(),
    })?;

    if !entry.file_type().is_file() {
      continue;
    }

    let excluded = entry
      .file_name()
      .to_str()
      .map(|name| exclude.iter().any(|x| x == name))
      .unwrap_or(false);
    if excluded {
      continue;
    }

    digests.push(hash_file(entry.path())?.0);
  }

  digests.sort();
  debug!(root = %root.display(), files = digests.len(), "computed file digests");

  Ok(hash_bytes(digests.concat().as_bytes()))
}

/// Recompute the checksum of `root` and compare it to `expected`.
///
/// The actual checksum is always returned so callers can report a concrete mismatch.
pub fn verify(root: &Path, exclude: &[String], expected: &str) -> Result<Verification, ChecksumError> {
  let actual = compute_checksum(root, exclude)?;
  Ok(Verification {
    matches: actual == expected,
    actual,
  })
}

/// MD5 of a single file's contents.
pub fn hash_file(path: &Path) -> Result<Checksum, ChecksumError> {
  let read_err = |source| ChecksumError::ReadFile {
    path: path.display().to_string(),
    source,
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Md5::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_err)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(Checksum(hex::encode(hasher.finalize())))
}

/// MD5 of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Checksum {
  Checksum(hex::encode(Md5::digest(data)))
}
