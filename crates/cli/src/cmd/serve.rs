//! Implementation of the `mlabc serve` command.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use mlabc_lib::server;
use mlabc_lib::service::Service;

use super::load_config;

pub fn cmd_serve(config_path: Option<&Path>, listen: Option<String>) -> Result<()> {
  let mut config = load_config(config_path)?;
  if let Some(listen) = listen {
    config.listen = listen;
  }
  let addr = config.listen_addr()?;
  if config.passphrase.is_empty() && !config.allow_anonymous {
    warn!("no passphrase configured, every request will be rejected");
  }

  let service = Service::from_config(Arc::new(config)).context("Failed to set up service")?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async move {
    let listener = TcpListener::bind(addr)
      .await
      .with_context(|| format!("Failed to bind {}", addr))?;
    server::serve(listener, service, shutdown_signal())
      .await
      .context("Server error")
  })?;

  info!("server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "failed to listen for ctrl-c");
    std::future::pending::<()>().await;
  }
  info!("shutting down");
}
