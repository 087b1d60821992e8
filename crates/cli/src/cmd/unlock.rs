//! Implementation of the `mlabc unlock` command.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use mlabc_lib::app::{AppPaths, AppRef};
use mlabc_lib::lock::BuildLock;

use crate::output::{format_duration, print_info, print_stat, print_success, print_warning};

use super::load_config;

pub fn cmd_unlock(
  config_path: Option<&Path>,
  app_id: &str,
  version: &str,
  platform: &str,
  older_than: Option<Duration>,
) -> Result<()> {
  let config = load_config(config_path)?;
  let app = AppRef::new(app_id, version)?;
  let paths = AppPaths::new(&config.apps_path, &app, &config.checksum.source_dir);
  let lock = BuildLock::new(paths.lock_path(platform), platform, config.lock.stale_after(platform));

  if !lock.lock_path().exists() {
    print_info(&format!("No build lock for {} {}", app, platform));
    return Ok(());
  }

  // Age since the last heartbeat, the same measure stale recovery uses.
  let age = lock
    .age()
    .with_context(|| format!("Failed to inspect {}", lock.lock_path().display()))?;

  if let Some(holder) = lock.holder() {
    print_stat("Held by pid", &holder.pid.to_string());
  }
  if let Some(age) = age {
    print_stat("Last heartbeat", &format!("{} ago", format_duration(age)));
  }

  if let Some(min) = older_than
    && age.is_none_or(|age| age < min)
  {
    print_warning(&format!(
      "Lock is not known to be older than {}, leaving it in place",
      format_duration(min)
    ));
    return Ok(());
  }

  lock
    .release()
    .with_context(|| format!("Failed to remove {}", lock.lock_path().display()))?;
  print_success(&format!("Removed build lock for {} {}", app, platform));
  Ok(())
}
