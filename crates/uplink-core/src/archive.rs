//! The `CommandArchive` trait: the reconciler's narrow view of the
//! historical command store.
//!
//! Only two operations are needed: a paged lookup of historical status rows
//! for request-ids the reconciler cannot yet attribute to a session, and a
//! finalize-write once a request reaches a terminal status.

use std::{collections::BTreeSet, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{CommandStatus, MasterKey};

// ─── Rows ────────────────────────────────────────────────────────────────────

/// One status row of one request, as recorded by the owning session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRow {
  pub request_id:       String,
  pub status:           CommandStatus,
  pub finalized:        bool,
  pub event_time:       DateTime<Utc>,
  pub session_id:       i64,
  pub session_host_id:  i32,
  pub session_fragment: i32,
  pub original_file:    Option<String>,
}

impl HistoricalRow {
  pub fn master_key(&self) -> MasterKey {
    MasterKey::new(self.session_id, self.session_fragment, self.session_host_id)
  }
}

// ─── Query ───────────────────────────────────────────────────────────────────

/// A paged lookup over historical rows.
///
/// Pass the same query to [`CommandArchive::fetch_batch`] repeatedly; the
/// store advances `cursor` after every page. An empty page ends the lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupQuery {
  pub request_ids: BTreeSet<String>,
  /// Ignore rows with an event time before this instant.
  pub epoch_start: Option<DateTime<Utc>>,
  pub batch_size:  usize,
  /// Opaque continuation owned by the store. `None` starts from the top.
  pub cursor:      Option<i64>,
}

impl LookupQuery {
  pub fn new(
    request_ids: BTreeSet<String>,
    epoch_start: Option<DateTime<Utc>>,
    batch_size: usize,
  ) -> Self {
    Self { request_ids, epoch_start, batch_size: batch_size.max(1), cursor: None }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the historical command store.
pub trait CommandArchive: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch the next page of rows matching `query`, advancing its cursor.
  fn fetch_batch<'a>(
    &'a self,
    query: &'a mut LookupQuery,
  ) -> impl Future<Output = Result<Vec<HistoricalRow>, Self::Error>> + Send + 'a;

  /// Mark the request owned by `key` as finalized.
  ///
  /// Idempotent: finalizing an already-finalized request succeeds.
  fn finalize<'a>(
    &'a self,
    key: MasterKey,
    request_id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Whether the underlying connection is usable.
  fn is_connected(&self) -> bool { true }
}
