//! HTTP surface and wiring for the `uplinkd` daemon.
//!
//! | Method | Path      | Notes |
//! |--------|-----------|-------|
//! | `GET`  | `/health` | 200 while the worker lives, 503 once it has died |
//! | `POST` | `/intake` | Body: an `IntakeBatch`. 202 on enqueue, 503 when the queue refuses it |
//! | `GET`  | `/stats`  | Counters from the last completed pass |

pub mod archiver;
pub mod error;
pub mod handlers;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use uplink_reconcile::{ReconcileConfig, ServiceHandle};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime daemon configuration, deserialised from `config.toml`.
#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
  #[serde(default = "default_host")]
  pub host:       String,
  #[serde(default = "default_port")]
  pub port:       u16,
  pub store_path: PathBuf,
  #[serde(default)]
  pub reconcile:  ReconcileConfig,
}

fn default_host() -> String { "127.0.0.1".to_owned() }
fn default_port() -> u16 { 7420 }

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState {
  pub service: Arc<ServiceHandle>,
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/health", get(handlers::health))
    .route("/intake", post(handlers::intake))
    .route("/stats",  get(handlers::stats))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Shutdown ─────────────────────────────────────────────────────────────────

/// Await background tasks after shutdown, logging any that panicked.
/// Returns how many failed.
pub async fn join_background(tasks: Vec<(&'static str, JoinHandle<()>)>) -> usize {
  let mut failed = 0;
  for (task, handle) in tasks {
    if let Err(e) = handle.await {
      tracing::error!(task, error = %e, "Background task failed");
      failed += 1;
    }
  }
  failed
}

#[cfg(test)]
mod tests;
