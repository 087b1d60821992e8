//! Implementation of the `mlabc status` command.
//!
//! Reads manifests straight from the apps directory; the service does not
//! need to be running.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use mlabc_lib::manifest::{ListFilter, Manifest, ManifestStore};
use mlabc_lib::toolchain::PlatformRegistry;

use crate::output::{OutputFormat, print_info, print_json, print_stat, symbols, truncate_hash};

use super::load_config;

pub fn cmd_status(
  config_path: Option<&Path>,
  app: Option<String>,
  version: Option<String>,
  output: OutputFormat,
) -> Result<()> {
  let config = load_config(config_path)?;
  let store = ManifestStore::new(config.apps_path.clone());
  let registry = PlatformRegistry::default();

  let filter = ListFilter { app_id: app, version };
  let listed = store
    .list(&filter)
    .with_context(|| format!("Failed to list {}", config.apps_path.display()))?;

  let manifests: Vec<Manifest> = listed
    .into_iter()
    .map(|entry| {
      let mut manifest = entry.manifest.unwrap_or_else(|| Manifest::new(&entry.app, ""));
      for platform in registry.names() {
        manifest.platform_mut(platform);
      }
      manifest
    })
    .collect();

  if output.is_json() {
    return print_json(&manifests);
  }

  if manifests.is_empty() {
    print_info(&format!("No applications under {}", config.apps_path.display()));
    return Ok(());
  }

  for manifest in &manifests {
    let title = format!("{} {}", manifest.app_id, manifest.version);
    if manifest.name.is_empty() {
      println!("{}", title.if_supports_color(Stream::Stdout, |s| s.bold()));
    } else {
      println!(
        "{} ({})",
        title.if_supports_color(Stream::Stdout, |s| s.bold()),
        manifest.name
      );
    }
    for (platform, record) in &manifest.platforms {
      let value = match (&record.compiled_at, &record.source_checksum) {
        (Some(at), Some(sum)) if record.compiled => format!(
          "{} compiled {} from {}",
          symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
          at.format("%Y-%m-%d %H:%M:%S"),
          truncate_hash(sum.as_str())
        ),
        _ => format!(
          "{} not compiled",
          symbols::MINUS.if_supports_color(Stream::Stdout, |s| s.dimmed())
        ),
      };
      print_stat(platform, &value);
    }
  }
  Ok(())
}
