//! Route handlers.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use uplink_core::feed::IntakeBatch;
use uplink_reconcile::health::HealthSnapshot;

use crate::{AppState, error::ApiError};

// ─── Health ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthBody {
  pub alive:     bool,
  pub connected: bool,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
  let body = HealthBody {
    alive:     state.service.is_alive(),
    connected: state.service.is_connected(),
  };
  let status = if body.alive { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
  (status, Json(body))
}

// ─── Intake ───────────────────────────────────────────────────────────────────

/// `POST /intake`: body: an `IntakeBatch`
pub async fn intake(
  State(state): State<AppState>,
  Json(batch): Json<IntakeBatch>,
) -> Result<impl IntoResponse, ApiError> {
  let radiation = batch.radiation_list.len();
  let incremental = batch.incremental.len();

  state.service.intake().submit(batch)?;
  debug!(radiation, incremental, "Batch accepted");

  Ok((
    StatusCode::ACCEPTED,
    Json(json!({ "radiation": radiation, "incremental": incremental })),
  ))
}

// ─── Stats ────────────────────────────────────────────────────────────────────

/// `GET /stats`
pub async fn stats(State(state): State<AppState>) -> Json<HealthSnapshot> {
  Json(state.service.stats())
}
