//! HTTP interface.
//!
//! | Method | Path            | Required parameters                          |
//! |--------|-----------------|----------------------------------------------|
//! | GET    | `/getAppStatus` | (optional `app_uid`, `app_version`)          |
//! | POST   | `/createApp`    | `app_uid`, `app_version` (optional `app_name`)|
//! | GET    | `/verifyApp`    | `app_uid`, `app_version`, `checksum`         |
//! | POST   | `/compileApp`   | `app_uid`, `app_version`, `checksum`, `platform` |
//! | GET    | `/getApp`       | `app_uid`, `app_version`, `platform`         |
//!
//! Parameters are read from the query string and, for form-encoded bodies,
//! from the body. Every request carries `passphrase`. The asynchronous
//! operations answer `true` at once; their outcome arrives by callback.

use std::future::Future;

use axum::{
  Form, Router,
  extract::{Query, State},
  http::{StatusCode, header},
  response::{IntoResponse, Json, Response},
  routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::app::AppRef;
use crate::build::Executable;
use crate::manifest::ListFilter;
use crate::service::Service;

/// Request parameters. All optional at this level; handlers decide what is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Params {
  pub passphrase: Option<String>,
  pub app_uid: Option<String>,
  pub app_version: Option<String>,
  pub checksum: Option<String>,
  pub platform: Option<String>,
  pub app_name: Option<String>,
}

impl Params {
  /// Fill fields missing from `self` with those from `body`.
  fn merge(self, body: Option<Params>) -> Params {
    let Some(body) = body else {
      return self;
    };
    Params {
      passphrase: self.passphrase.or(body.passphrase),
      app_uid: self.app_uid.or(body.app_uid),
      app_version: self.app_version.or(body.app_version),
      checksum: self.checksum.or(body.checksum),
      platform: self.platform.or(body.platform),
      app_name: self.app_name.or(body.app_name),
    }
  }

  fn require<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ApiError> {
    match value.as_deref() {
      Some(v) if !v.is_empty() => Ok(v),
      _ => Err(ApiError::MissingParam(name)),
    }
  }

  fn app(&self) -> Result<AppRef, ApiError> {
    let app_uid = Self::require(&self.app_uid, "app_uid")?;
    let app_version = Self::require(&self.app_version, "app_version")?;
    AppRef::new(app_uid, app_version).map_err(|e| ApiError::Invalid(e.to_string()))
  }
}

#[derive(Debug)]
pub enum ApiError {
  Forbidden,
  MissingParam(&'static str),
  Invalid(String),
  NotCompiled,
  Internal(String),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::Forbidden => (StatusCode::FORBIDDEN, Json(json!({ "error": "bad passphrase" }))).into_response(),
      ApiError::MissingParam(name) => (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": format!("missing parameter {}", name) })),
      )
        .into_response(),
      ApiError::Invalid(message) => (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response(),
      ApiError::NotCompiled => (StatusCode::NOT_FOUND, Json(json!({ "compiled": false }))).into_response(),
      ApiError::Internal(message) => {
        error!(error = %message, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
      }
    }
  }
}

#[derive(Clone, Debug)]
pub struct AppState {
  pub service: Service,
}

impl AppState {
  fn authorize(&self, params: &Params) -> Result<(), ApiError> {
    if self.service.config().accepts_passphrase(params.passphrase.as_deref()) {
      Ok(())
    } else {
      warn!(app_uid = ?params.app_uid, "bad passphrase");
      Err(ApiError::Forbidden)
    }
  }

  fn platform<'a>(&self, params: &'a Params) -> Result<&'a str, ApiError> {
    let platform = Params::require(&params.platform, "platform")?;
    if !self.service.supports_platform(platform) {
      return Err(ApiError::Invalid(format!("unsupported platform {}", platform)));
    }
    Ok(platform)
  }
}

/// GET /getAppStatus
async fn get_app_status(
  State(state): State<AppState>,
  Query(params): Query<Params>,
) -> Result<impl IntoResponse, ApiError> {
  state.authorize(&params)?;
  let filter = ListFilter {
    app_id: params.app_uid.filter(|s| !s.is_empty()),
    version: params.app_version.filter(|s| !s.is_empty()),
  };
  let statuses = state
    .service
    .status(filter)
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;
  Ok(Json(statuses))
}

/// POST /createApp
async fn create_app(
  State(state): State<AppState>,
  Query(query): Query<Params>,
  body: Option<Form<Params>>,
) -> Result<impl IntoResponse, ApiError> {
  let params = query.merge(body.map(|Form(b)| b));
  state.authorize(&params)?;
  let app = params.app()?;

  debug!(app = %app, "createApp accepted");
  state.service.create_app(app, params.app_name);
  Ok(Json(true))
}

/// GET /verifyApp
async fn verify_app(
  State(state): State<AppState>,
  Query(params): Query<Params>,
) -> Result<impl IntoResponse, ApiError> {
  state.authorize(&params)?;
  let app = params.app()?;
  let checksum = Params::require(&params.checksum, "checksum")?;

  debug!(app = %app, "verifyApp accepted");
  state.service.verify_app(app, checksum.to_string());
  Ok(Json(true))
}

/// POST /compileApp
async fn compile_app(
  State(state): State<AppState>,
  Query(query): Query<Params>,
  body: Option<Form<Params>>,
) -> Result<impl IntoResponse, ApiError> {
  let params = query.merge(body.map(|Form(b)| b));
  state.authorize(&params)?;
  let app = params.app()?;
  let checksum = Params::require(&params.checksum, "checksum")?;
  let platform = state.platform(&params)?;

  debug!(app = %app, platform = %platform, "compileApp accepted");
  state
    .service
    .compile_app(app, platform.to_string(), checksum.to_string(), params.app_name.clone());
  Ok(Json(true))
}

/// GET /getApp
async fn get_app(State(state): State<AppState>, Query(params): Query<Params>) -> Result<Response, ApiError> {
  state.authorize(&params)?;
  let app = params.app()?;
  let platform = state.platform(&params)?;

  let executable = state
    .service
    .executable(&app, platform)
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;

  match executable {
    Executable::Found(file) => {
      info!(app = %app, platform = %platform, file = %file.file_name, "serving executable");
      let disposition = format!("attachment; filename=\"{}\"", file.file_name.replace('"', ""));
      Ok(
        (
          [
            (header::CONTENT_TYPE, file.mime_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
          ],
          file.bytes,
        )
          .into_response(),
      )
    }
    Executable::NotCompiled => Err(ApiError::NotCompiled),
  }
}

pub fn router(service: Service) -> Router {
  Router::new()
    .route("/getAppStatus", get(get_app_status))
    .route("/createApp", post(create_app))
    .route("/verifyApp", get(verify_app))
    .route("/compileApp", post(compile_app))
    .route("/getApp", get(get_app))
    .layer(TraceLayer::new_for_http())
    .with_state(AppState { service })
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, service: Service, shutdown: F) -> std::io::Result<()>
where
  F: Future<Output = ()> + Send + 'static,
{
  if let Ok(addr) = listener.local_addr() {
    info!(addr = %addr, apps_path = %service.config().apps_path.display(), "listening");
  }
  axum::serve(listener, router(service))
    .with_graceful_shutdown(shutdown)
    .await
}
