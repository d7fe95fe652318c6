use std::{sync::Arc, time::Duration};

use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt as _;
use uplink_core::{
  feed::IntakeBatch,
  publish::UplinkStatusEvent,
  status::{CommandStatus, MasterKey, StatusRecord, UplinkMetadata},
};
use uplink_reconcile::{
  ReconcileConfig, ReconcileService, bus::BroadcastBus, publisher::BusPublisher,
};
use uplink_store_sqlite::{NewCommand, SqliteArchive};

use super::*;

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn key() -> MasterKey { MasterKey::new(42, 0, 1) }

fn live(id: &str, status: CommandStatus) -> StatusRecord {
  StatusRecord::new(id, status)
    .with_timestamp(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    .with_metadata(UplinkMetadata {
      session_id:       42,
      session_host_id:  1,
      session_fragment: 0,
      topic_name:       Some("uplink.a".into()),
      spacecraft_id:    168,
    })
}

async fn make_state(store: SqliteArchive, bus: &BroadcastBus) -> AppState {
  let cfg = ReconcileConfig { poll_timeout_ms: 10, ..ReconcileConfig::default() };
  let publisher = BusPublisher::new(bus.clone(), cfg.ambient_context());
  AppState {
    service: Arc::new(ReconcileService::start(store, publisher, &cfg)),
  }
}

async fn oneshot_raw(
  state: AppState,
  method: &str,
  uri: &str,
  body: &str,
) -> axum::response::Response {
  let req = Request::builder()
    .method(method)
    .uri(uri)
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(body.to_string()))
    .unwrap();
  router(state).oneshot(req).await.unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
  let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

// ── Health ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_live_worker() {
  let store = SqliteArchive::open_in_memory().await.unwrap();
  let state = make_state(store, &BroadcastBus::new()).await;

  let resp = oneshot_raw(state.clone(), "GET", "/health", "").await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  assert_eq!(body["alive"], true);

  state.service.stop().await;
}

#[tokio::test]
async fn health_is_unavailable_once_worker_stops() {
  let store = SqliteArchive::open_in_memory().await.unwrap();
  let state = make_state(store, &BroadcastBus::new()).await;
  state.service.stop().await;

  let resp = oneshot_raw(state, "GET", "/health", "").await;
  assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
  let body = json_body(resp).await;
  assert_eq!(body["alive"], false);
  assert_eq!(body["connected"], false);
}

// ── Intake ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn intake_accepts_batch_and_publishes() {
  let store = SqliteArchive::open_in_memory().await.unwrap();
  store
    .record_command(NewCommand {
      key:           key(),
      request_id:    "R1".into(),
      original_file: Some("/cmd/load_17.scmf".into()),
    })
    .await
    .unwrap();
  store
    .record_status(key(), "R1", CommandStatus::Submitted, Utc::now())
    .await
    .unwrap();

  let bus = BroadcastBus::new();
  let mut events = bus.subscribe("uplink.a");
  let state = make_state(store, &bus).await;

  let batch = IntakeBatch::radiation(vec![live("R1", CommandStatus::Submitted)]);
  let resp = oneshot_raw(
    state.clone(),
    "POST",
    "/intake",
    &serde_json::to_string(&batch).unwrap(),
  )
  .await;
  assert_eq!(resp.status(), StatusCode::ACCEPTED);
  assert_eq!(json_body(resp).await["radiation"], 1);

  let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(event.status.request_id, "R1");
  assert_eq!(event.context.master_key(), key());
  assert!(event.do_not_insert);

  state.service.stop().await;
}

#[tokio::test]
async fn intake_rejects_malformed_json() {
  let store = SqliteArchive::open_in_memory().await.unwrap();
  let state = make_state(store, &BroadcastBus::new()).await;

  let resp = oneshot_raw(state.clone(), "POST", "/intake", "{not json").await;
  assert!(resp.status().is_client_error());

  state.service.stop().await;
}

#[tokio::test]
async fn intake_is_unavailable_once_worker_stops() {
  let store = SqliteArchive::open_in_memory().await.unwrap();
  let state = make_state(store, &BroadcastBus::new()).await;
  state.service.stop().await;

  let batch = IntakeBatch::radiation(vec![live("R1", CommandStatus::Submitted)]);
  let resp = oneshot_raw(state, "POST", "/intake", &serde_json::to_string(&batch).unwrap()).await;
  assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ── Stats ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stats_reports_completed_passes() {
  let store = SqliteArchive::open_in_memory().await.unwrap();
  let state = make_state(store, &BroadcastBus::new()).await;

  tokio::time::timeout(Duration::from_secs(5), async {
    while state.service.stats().passes == 0 {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .unwrap();

  let resp = oneshot_raw(state.clone(), "GET", "/stats", "").await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  assert_eq!(body["alive"], true);
  assert!(body["passes"].as_u64().unwrap() >= 1);
  assert_eq!(body["report"]["tracked"], 0);

  state.service.stop().await;
}

// ── Archiver ────────────────────────────────────────────────────────────────

fn event(status: CommandStatus, do_not_insert: bool) -> UplinkStatusEvent {
  let cfg = ReconcileConfig::default();
  UplinkStatusEvent {
    event_id: uuid::Uuid::new_v4(),
    published_at: Utc::now(),
    topic: "uplink.a".into(),
    context: cfg.ambient_context().stamped(key()),
    do_not_insert,
    status: live("R1", status),
  }
}

#[tokio::test]
async fn archiver_inserts_only_unsuppressed_statuses() {
  let store = SqliteArchive::open_in_memory().await.unwrap();

  let written = archiver::archive_event(&store, &event(CommandStatus::Submitted, true))
    .await
    .unwrap();
  assert!(!written);
  assert_eq!(store.is_finalized(key(), "R1").await.unwrap(), None);

  let written = archiver::archive_event(&store, &event(CommandStatus::Radiated, false))
    .await
    .unwrap();
  assert!(written);
  assert_eq!(store.is_finalized(key(), "R1").await.unwrap(), Some(false));

  let again = archiver::archive_event(&store, &event(CommandStatus::Radiated, false))
    .await
    .unwrap();
  assert!(!again);
}

// ── Shutdown ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn join_background_counts_panicked_tasks() {
  let ok = tokio::spawn(async {});
  let boom = tokio::spawn(async { panic!("archiver blew up"); });

  let failed = join_background(vec![("sweeper", ok), ("archiver", boom)]).await;
  assert_eq!(failed, 1);
}
