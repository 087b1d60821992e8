//! Completion callbacks.
//!
//! Every asynchronous operation ends with exactly one callback. Delivery is
//! best-effort: a failed request is logged and dropped, never retried, and
//! never feeds back into the build.
//!
//! The HTTP notifier issues `GET <base_url>/<operation>?<payload>`, e.g.
//!
//! ```text
//! GET https://mlab.example.org/callback/compileApp?app_uid=com.acme.demo&app_version=1
//!     &platform=android&checksum=...&executable_checksum=...&outcome=built&result=true
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::app::AppRef;
use crate::build::BuildOutcome;
use crate::config::CallbackConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
  #[error("failed to build http client: {0}")]
  Client(#[source] reqwest::Error),

  #[error("callback to {url} failed: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },
}

/// Operation a callback reports on. Its name is the last path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  CreateApp,
  VerifyApp,
  CompileApp,
}

impl Operation {
  pub fn as_str(&self) -> &'static str {
    match self {
      Operation::CreateApp => "createApp",
      Operation::VerifyApp => "verifyApp",
      Operation::CompileApp => "compileApp",
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Query-string payload of a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackPayload {
  pub app_uid: String,
  pub app_version: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub platform: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub checksum: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub executable_checksum: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub outcome: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub result: bool,
}

impl CallbackPayload {
  pub fn new(app: &AppRef, result: bool) -> Self {
    Self {
      app_uid: app.app_id().to_string(),
      app_version: app.version().to_string(),
      platform: None,
      checksum: None,
      executable_checksum: None,
      outcome: None,
      error: None,
      result,
    }
  }

  pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
    self.checksum = Some(checksum.into());
    self
  }

  pub fn with_error(mut self, error: impl fmt::Display) -> Self {
    self.error = Some(error.to_string());
    self
  }

  /// Payload for a finished compile.
  pub fn for_build(app: &AppRef, platform: &str, checksum: &str, outcome: &BuildOutcome) -> Self {
    Self {
      platform: Some(platform.to_string()),
      checksum: Some(checksum.to_string()),
      executable_checksum: outcome.executable_checksum().map(|c| c.to_string()),
      outcome: Some(outcome.label().to_string()),
      error: outcome.error(),
      ..Self::new(app, outcome.result())
    }
  }
}

#[async_trait]
pub trait Notifier: Send + Sync {
  async fn notify(&self, operation: Operation, payload: &CallbackPayload) -> Result<(), NotifyError>;
}

/// Send a callback, logging instead of returning delivery failures.
pub async fn deliver(notifier: &dyn Notifier, operation: Operation, payload: &CallbackPayload) {
  match notifier.notify(operation, payload).await {
    Ok(()) => debug!(operation = %operation, app_uid = %payload.app_uid, "callback delivered"),
    Err(e) => warn!(
      operation = %operation,
      app_uid = %payload.app_uid,
      app_version = %payload.app_version,
      error = %e,
      "callback delivery failed"
    ),
  }
}

/// Sends callbacks as HTTP GET requests.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
  client: reqwest::Client,
  base_url: String,
}

impl HttpNotifier {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(NotifyError::Client)?;
    Ok(Self {
      client,
      base_url: base_url.into(),
    })
  }

  pub fn url_for(&self, operation: Operation) -> String {
    format!("{}/{}", self.base_url.trim_end_matches('/'), operation)
  }
}

#[async_trait]
impl Notifier for HttpNotifier {
  async fn notify(&self, operation: Operation, payload: &CallbackPayload) -> Result<(), NotifyError> {
    let url = self.url_for(operation);
    let request_err = |source| NotifyError::Request {
      url: url.clone(),
      source,
    };

    self
      .client
      .get(&url)
      .query(payload)
      .send()
      .await
      .map_err(request_err)?
      .error_for_status()
      .map_err(request_err)?;
    Ok(())
  }
}

/// Logs callbacks when no callback endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn notify(&self, operation: Operation, payload: &CallbackPayload) -> Result<(), NotifyError> {
    info!(
      operation = %operation,
      app_uid = %payload.app_uid,
      app_version = %payload.app_version,
      result = payload.result,
      outcome = ?payload.outcome,
      "callback (no endpoint configured)"
    );
    Ok(())
  }
}

/// The notifier selected by `config`.
pub fn from_config(config: &CallbackConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
  match &config.base_url {
    Some(url) => Ok(Arc::new(HttpNotifier::new(url.clone(), config.timeout())?)),
    None => Ok(Arc::new(LogNotifier)),
  }
}
