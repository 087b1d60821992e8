//! Implementation of the `mlabc checksum` command.
//!
//! Prints the same checksum the service computes for an application's
//! sources, so a client can be checked against it by hand.

use std::path::Path;

use anyhow::{Context, Result, bail};

use mlabc_lib::build::checksum_excludes;
use mlabc_lib::checksum::compute_checksum;
use mlabc_lib::toolchain::PlatformRegistry;

use super::load_config;

pub fn cmd_checksum(config_path: Option<&Path>, dir: &Path, extra: Vec<String>) -> Result<()> {
  if !dir.is_dir() {
    bail!("Not a directory: {}", dir.display());
  }
  let config = load_config(config_path)?;

  let mut exclude = checksum_excludes(&config.checksum.exclude, &PlatformRegistry::default());
  exclude.extend(extra);

  let checksum = compute_checksum(dir, &exclude).with_context(|| format!("Failed to checksum {}", dir.display()))?;
  println!("{}", checksum);
  Ok(())
}
