//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("service unavailable: {0}")]
  Unavailable(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl From<uplink_reconcile::Error> for ApiError {
  fn from(e: uplink_reconcile::Error) -> Self {
    use uplink_reconcile::Error;

    match e {
      Error::QueueFull | Error::QueueClosed => ApiError::Unavailable(e.to_string()),
      other => ApiError::Internal(other.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
      ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
