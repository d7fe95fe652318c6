//! The reconciliation engine.
//!
//! A [`Reconciler`] owns the request table. Each pass walks the same four
//! stages in order, whether or not a batch arrived:
//!
//! 1. **merge**: ingest the batch, one status at a time
//! 2. **resolve**: look up request-ids with no master key in the archive
//! 3. **publish**: emit unreported statuses, finalize terminal requests
//! 4. **evict**: apply the age-out policy

use std::{
  collections::{BTreeSet, HashMap},
  sync::Arc,
  time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uplink_core::{
  archive::{CommandArchive, HistoricalRow, LookupQuery},
  feed::{IncrementalEvent, IntakeBatch},
  publish::StatusPublisher,
  status::{StatusRecord, UplinkMetadata},
};

use crate::{
  ageout::AgeoutPolicy,
  config::ReconcileConfig,
  health::Health,
  intake::{IntakeQueue, normalize_requests, synthesize_deletion},
  item::{ReportState, RequestItem},
};

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// What happened to one ingested status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
  /// Not from a tracked session; dropped.
  Foreign,
  /// First status seen for this request-id.
  Created,
  /// New status appended to an existing request.
  Appended,
  /// Unreported database entry replaced by the live record.
  Replaced,
  /// Already known; dropped.
  Redundant,
}

/// Counters for one pass of the worker loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
  pub merged:         usize,
  pub resolved:       usize,
  pub published:      usize,
  pub finalized:      usize,
  pub publish_failed: usize,
  pub lookup_failed:  bool,
  pub expired:        usize,
  pub hung:           usize,
  pub tracked:        usize,
  pub unresolved:     usize,
}

impl PassReport {
  fn is_idle(&self) -> bool {
    self.merged == 0
      && self.resolved == 0
      && self.published == 0
      && self.expired == 0
      && self.hung == 0
      && !self.lookup_failed
  }
}

#[derive(Debug, Default)]
struct PublishTally {
  published: usize,
  finalized: usize,
  failed:    usize,
}

enum Wake {
  Batch(IntakeBatch),
  Idle,
  Closed,
}

// ─── Reconciler ──────────────────────────────────────────────────────────────

pub struct Reconciler<A, P> {
  archive:           A,
  publisher:         P,
  policy:            AgeoutPolicy,
  spacecraft_id:     i32,
  lookup_batch_size: usize,
  table:             HashMap<String, RequestItem>,
}

impl<A, P> Reconciler<A, P>
where
  A: CommandArchive,
  P: StatusPublisher,
{
  pub fn new(archive: A, publisher: P, config: &ReconcileConfig) -> Self {
    Self {
      archive,
      publisher,
      policy: config.policy(),
      spacecraft_id: config.spacecraft_id,
      lookup_batch_size: config.lookup_batch_size,
      table: HashMap::new(),
    }
  }

  // ── Accessors ─────────────────────────────────────────────────────────────

  pub fn item(&self, request_id: &str) -> Option<&RequestItem> { self.table.get(request_id) }

  pub fn len(&self) -> usize { self.table.len() }

  pub fn is_empty(&self) -> bool { self.table.is_empty() }

  /// Request-ids not yet attributed to a session.
  pub fn unresolved(&self) -> BTreeSet<String> {
    self
      .table
      .values()
      .filter(|item| !item.is_resolved())
      .map(|item| item.request_id().to_owned())
      .collect()
  }

  pub fn policy(&self) -> &AgeoutPolicy { &self.policy }

  pub fn archive(&self) -> &A { &self.archive }

  pub fn publisher(&self) -> &P { &self.publisher }

  // ── Merge ─────────────────────────────────────────────────────────────────

  /// Fold one live status into the table.
  pub fn ingest(&mut self, record: StatusRecord, now: DateTime<Utc>) -> Ingest {
    if record.is_foreign() {
      debug!(request_id = %record.request_id, "Foreign status dropped");
      return Ingest::Foreign;
    }

    let Some(item) = self.table.get_mut(&record.request_id) else {
      let request_id = record.request_id.clone();
      match record.topic() {
        Some(topic) => debug!(%request_id, %topic, "New request-id"),
        None => debug!(%request_id, "New request-id, topic not yet known"),
      }

      let mut item = RequestItem::new(&request_id, now, &self.policy);
      item.push_live(record);
      self.table.insert(request_id, item);
      return Ingest::Created;
    };

    let status = record.status;
    let existing = item
      .entry(status)
      .map(|e| (e.came_from_database(), e.is_reported()));

    match existing {
      None => {
        trace!(request_id = %record.request_id, %status, "Status appended");
        item.push_live(record);
        Ingest::Appended
      }
      Some((true, false)) if item.is_resolved() => {
        if let Some(entry) = item.entry_mut(status) {
          entry.replace_record(record);
        }
        trace!(request_id = %item.request_id(), %status, "Database status replaced by live");
        Ingest::Replaced
      }
      Some(_) => {
        trace!(request_id = %item.request_id(), %status, "Redundant status dropped");
        Ingest::Redundant
      }
    }
  }

  /// Fold a whole batch: the radiation list first, then each incremental
  /// event in order. Returns how many statuses changed the table.
  pub fn merge_batch(&mut self, batch: IntakeBatch, now: DateTime<Utc>) -> usize {
    let mut changed = 0;
    let mut count = |outcome: Ingest| {
      if matches!(outcome, Ingest::Created | Ingest::Appended | Ingest::Replaced) {
        changed += 1;
      }
    };

    for record in batch.radiation_list {
      count(self.ingest(record, now));
    }

    for event in batch.incremental {
      let kind = event.kind();
      match event {
        IncrementalEvent::Added { requests, .. } | IncrementalEvent::Updated { requests, .. } => {
          for record in normalize_requests(kind, requests) {
            count(self.ingest(record, now));
          }
        }
        IncrementalEvent::Deleted { timestamp, request_ids } => {
          trace!(count = request_ids.len(), "Processing deletions");
          for request_id in request_ids {
            let last = self.table.get(&request_id).and_then(RequestItem::last_record);
            if let Some(record) = synthesize_deletion(&request_id, last, timestamp) {
              count(self.ingest(record, now));
            }
          }
        }
      }
    }

    changed
  }

  // ── Resolve ───────────────────────────────────────────────────────────────

  /// Look up every unresolved request-id in the archive and fold the rows
  /// in. Returns how many items gained a master key. On error, rows from
  /// pages already fetched stay applied and the rest is retried next pass.
  pub async fn resolve_unknown(&mut self, now: DateTime<Utc>) -> Result<usize, A::Error> {
    let request_ids = self.unresolved();
    if request_ids.is_empty() {
      return Ok(0);
    }

    debug!(count = request_ids.len(), "Looking up unresolved request-ids");
    let mut query = LookupQuery::new(
      request_ids,
      self.policy.epoch_start(now),
      self.lookup_batch_size,
    );

    let mut resolved = 0;
    loop {
      let rows = self.archive.fetch_batch(&mut query).await?;
      if rows.is_empty() {
        break;
      }
      trace!(rows = rows.len(), "Lookup page");

      for row in rows {
        if self.apply_row(row, now) {
          resolved += 1;
        }
      }
    }

    if resolved > 0 {
      debug!(resolved, "Request-ids resolved from archive");
    }
    Ok(resolved)
  }

  /// Returns `true` when the row gave its item a master key.
  fn apply_row(&mut self, row: HistoricalRow, now: DateTime<Utc>) -> bool {
    let Some(item) = self.table.get_mut(&row.request_id) else {
      trace!(request_id = %row.request_id, "Row for request-id no longer tracked");
      return false;
    };

    let key = row.master_key();
    let newly_resolved = match item.master_key() {
      None => item.set_master_key(key),
      Some(existing) => {
        if existing != key {
          warn!(
            request_id = %row.request_id,
            %existing,
            found = %key,
            "Archive row disagrees with resolved master key, keeping existing"
          );
        }
        false
      }
    };

    if row.finalized && item.mark_finalized(now, &self.policy) {
      debug!(request_id = %row.request_id, "Request finalized from archive");
    }

    if let Some(entry) = item.entry_mut(row.status) {
      entry.suppress_insert();
      if row.finalized {
        entry.mark_reported();
      }
      return newly_resolved;
    }

    let filename = row
      .original_file
      .as_deref()
      .map(str::trim)
      .filter(|f| !f.is_empty())
      .map(str::to_owned);

    let mut record = StatusRecord::new(&row.request_id, row.status)
      .with_timestamp(row.event_time)
      .with_metadata(UplinkMetadata {
        session_id:       row.session_id,
        session_host_id:  row.session_host_id,
        session_fragment: row.session_fragment,
        topic_name:       item.topic().map(str::to_owned),
        spacecraft_id:    self.spacecraft_id,
      });
    record.filename = filename;

    trace!(request_id = %row.request_id, status = %row.status, "Status added from archive");
    item.push_from_database(record, row.finalized);
    newly_resolved
  }

  // ── Publish ───────────────────────────────────────────────────────────────

  async fn publish_pending(&mut self, now: DateTime<Utc>) -> PublishTally {
    let mut tally = PublishTally::default();
    let policy = self.policy;

    for item in self.table.values_mut() {
      let Some(key) = item.master_key() else { continue };
      let Some(topic) = item.topic().map(str::to_owned) else { continue };
      if item.unreported() == 0 {
        continue;
      }

      for idx in 0..item.history().len() {
        let (status, outcome) = {
          let entry = &mut item.entries_mut()[idx];
          if entry.is_reported() {
            continue;
          }

          let suppress = entry.state() == ReportState::UnreportedSuppressInsert;
          if entry.record().topic().is_none() && !entry.record_mut().set_topic_name(&topic) {
            warn!(
              request_id = %entry.record().request_id,
              status = %entry.status(),
              "Status has no metadata to carry a topic"
            );
          }

          let outcome = self.publisher.publish(entry.record(), key, suppress).await;
          if outcome.is_ok() {
            entry.mark_reported();
          }
          (entry.status(), outcome)
        };

        if let Err(e) = outcome {
          error!(
            request_id = %item.request_id(),
            %status,
            error = %e,
            "Publish failed, will retry"
          );
          tally.failed += 1;
          break;
        }
        tally.published += 1;

        if !item.is_finalized() && status.is_final() {
          if let Err(e) = self.archive.finalize(key, item.request_id()).await {
            error!(request_id = %item.request_id(), %key, error = %e, "Finalize write failed");
          }
          item.mark_finalized(now, &policy);
          tally.finalized += 1;
          debug!(request_id = %item.request_id(), %status, "Request finalized");
        }
      }
    }

    tally
  }

  // ── Evict ─────────────────────────────────────────────────────────────────

  /// Apply the age-out policy. Returns (expired, hung).
  pub fn evict(&mut self, now: DateTime<Utc>) -> (usize, usize) {
    self.policy.sweep(&mut self.table, now)
  }

  // ── Pass ──────────────────────────────────────────────────────────────────

  /// Run one full pass. Every stage runs even without a batch.
  pub async fn run_pass(&mut self, batch: Option<IntakeBatch>, now: DateTime<Utc>) -> PassReport {
    let mut report = PassReport::default();

    if let Some(batch) = batch {
      report.merged = self.merge_batch(batch, now);
    }

    match self.resolve_unknown(now).await {
      Ok(resolved) => report.resolved = resolved,
      Err(e) => {
        error!(error = %e, "Lookup of unresolved request-ids failed");
        report.lookup_failed = true;
      }
    }

    let tally = self.publish_pending(now).await;
    report.published = tally.published;
    report.finalized = tally.finalized;
    report.publish_failed = tally.failed;

    (report.expired, report.hung) = self.evict(now);

    report.tracked = self.table.len();
    report.unresolved = self.table.values().filter(|i| !i.is_resolved()).count();

    if report.is_idle() {
      trace!(tracked = report.tracked, "Idle pass");
    } else {
      debug!(?report, "Pass complete");
    }
    report
  }

  /// Drive the worker loop until `shutdown` is cancelled. A pass in flight
  /// always completes before the token is observed.
  pub async fn run(
    mut self,
    queue: IntakeQueue,
    shutdown: CancellationToken,
    poll_timeout: Duration,
    health: Arc<Health>,
  ) {
    info!(
      poll_timeout_ms = poll_timeout.as_millis() as u64,
      ageout = ?self.policy.ageout(),
      extreme_ageout = ?self.policy.extreme_ageout(),
      epoch = ?self.policy.epoch(),
      "Reconciler started"
    );

    let mut queue = Some(queue);
    loop {
      let wake = match queue.as_mut() {
        Some(rx) => tokio::select! {
          biased;
          _ = shutdown.cancelled() => break,
          polled = tokio::time::timeout(poll_timeout, rx.recv()) => match polled {
            Ok(Some(batch)) => Wake::Batch(batch),
            Ok(None) => Wake::Closed,
            Err(_) => Wake::Idle,
          },
        },
        None => tokio::select! {
          biased;
          _ = shutdown.cancelled() => break,
          _ = tokio::time::sleep(poll_timeout) => Wake::Idle,
        },
      };

      let batch = match wake {
        Wake::Batch(batch) => Some(batch),
        Wake::Idle => None,
        Wake::Closed => {
          warn!("Intake queue closed, continuing on timer");
          queue = None;
          None
        }
      };

      let now = Utc::now();
      let report = self.run_pass(batch, now).await;
      let connected = self.archive.is_connected() && !report.lookup_failed;
      health.record_pass(now, report, connected);
    }

    info!(tracked = self.table.len(), "Reconciler stopped");
  }
}
