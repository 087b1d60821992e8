mod checksum;
mod serve;
mod status;
mod unlock;

use std::path::Path;

use anyhow::{Context, Result};
use mlabc_lib::config::Config;
use mlabc_lib::paths::default_config_path;

pub use checksum::cmd_checksum;
pub use serve::cmd_serve;
pub use status::cmd_status;
pub use unlock::cmd_unlock;

/// An explicit path must exist; the default location may be absent.
fn load_config(path: Option<&Path>) -> Result<Config> {
  match path {
    Some(path) => Config::load(path).with_context(|| format!("Failed to load config {}", path.display())),
    None => {
      let path = default_config_path();
      Config::load_or_default(&path).with_context(|| format!("Failed to load config {}", path.display()))
    }
  }
}
