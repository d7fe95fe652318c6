//! Per-request aggregate: everything known about one request-id.
//!
//! A [`RequestItem`] keeps an ordered history with at most one
//! [`StatusEntry`] per status value. Entries learned from the database sit
//! at the front of the history, ahead of entries from the live feed, because
//! the database usually knows about the earliest statuses the feed never
//! repeats.

use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uplink_core::status::{CommandStatus, MasterKey, StatusRecord};

use crate::ageout::AgeoutPolicy;

// ─── Report state ────────────────────────────────────────────────────────────

/// Publication progress of one history entry. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReportState {
  /// Must be published and inserted downstream.
  Unreported,
  /// Must be published, but the store already has it.
  UnreportedSuppressInsert,
  Reported,
}

// ─── History entry ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StatusEntry {
  record:        StatusRecord,
  state:         ReportState,
  from_database: bool,
}

impl StatusEntry {
  pub fn record(&self) -> &StatusRecord { &self.record }

  pub fn status(&self) -> CommandStatus { self.record.status }

  pub fn state(&self) -> ReportState { self.state }

  pub fn came_from_database(&self) -> bool { self.from_database }

  pub fn is_reported(&self) -> bool { self.state == ReportState::Reported }

  pub(crate) fn record_mut(&mut self) -> &mut StatusRecord { &mut self.record }

  /// Keep this entry out of downstream inserts. No effect once reported.
  pub(crate) fn suppress_insert(&mut self) {
    if self.state == ReportState::Unreported {
      self.state = ReportState::UnreportedSuppressInsert;
    }
  }

  pub(crate) fn mark_reported(&mut self) { self.state = ReportState::Reported; }

  /// Swap in a richer live record. The report state is left alone.
  pub(crate) fn replace_record(&mut self, record: StatusRecord) {
    self.record = record;
    self.from_database = false;
  }
}

// ─── Request item ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RequestItem {
  request_id:       String,
  history:          Vec<StatusEntry>,
  master_key:       Option<MasterKey>,
  topic:            Option<String>,
  role:             Option<String>,
  finalized:        bool,
  created_at:       DateTime<Utc>,
  /// `None` means never.
  drop_dead:        Option<DateTime<Utc>>,
  drop_really_dead: Option<DateTime<Utc>>,
}

impl RequestItem {
  pub fn new(request_id: impl Into<String>, now: DateTime<Utc>, policy: &AgeoutPolicy) -> Self {
    Self {
      request_id:       request_id.into(),
      history:          Vec::new(),
      master_key:       None,
      topic:            None,
      role:             None,
      finalized:        false,
      created_at:       now,
      drop_dead:        None,
      drop_really_dead: policy.hung_deadline(now),
    }
  }

  // ── Accessors ─────────────────────────────────────────────────────────────

  pub fn request_id(&self) -> &str { &self.request_id }

  pub fn history(&self) -> &[StatusEntry] { &self.history }

  pub fn master_key(&self) -> Option<MasterKey> { self.master_key }

  pub fn is_resolved(&self) -> bool { self.master_key.is_some() }

  pub fn topic(&self) -> Option<&str> { self.topic.as_deref() }

  pub fn role(&self) -> Option<&str> { self.role.as_deref() }

  pub fn is_finalized(&self) -> bool { self.finalized }

  pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

  pub fn drop_dead(&self) -> Option<DateTime<Utc>> { self.drop_dead }

  pub fn drop_really_dead(&self) -> Option<DateTime<Utc>> { self.drop_really_dead }

  pub fn entry(&self, status: CommandStatus) -> Option<&StatusEntry> {
    self.history.iter().find(|e| e.status() == status)
  }

  pub(crate) fn entry_mut(&mut self, status: CommandStatus) -> Option<&mut StatusEntry> {
    self.history.iter_mut().find(|e| e.status() == status)
  }

  pub(crate) fn entries_mut(&mut self) -> &mut [StatusEntry] { &mut self.history }

  /// The most recently appended record, if any.
  pub fn last_record(&self) -> Option<&StatusRecord> {
    self.history.last().map(StatusEntry::record)
  }

  pub fn unreported(&self) -> usize {
    self.history.iter().filter(|e| !e.is_reported()).count()
  }

  // ── Mutation ──────────────────────────────────────────────────────────────

  /// Append a live-feed record as unreported. Adopts the record's role and
  /// topic when this item has none yet.
  pub(crate) fn push_live(&mut self, record: StatusRecord) {
    if self.role.is_none()
      && let Some(role) = record.role_id.as_deref()
    {
      self.role = Some(role.to_owned());
    }

    if let Some(topic) = record.topic() {
      match &self.topic {
        None => self.topic = Some(topic.to_owned()),
        Some(existing) if !existing.eq_ignore_ascii_case(topic) => {
          warn!(
            request_id = %self.request_id,
            existing = %existing,
            attempted = %topic,
            "Attempt to change topic ignored"
          );
        }
        Some(_) => {}
      }
    }

    self.history.push(StatusEntry {
      record,
      state: ReportState::Unreported,
      from_database: false,
    });
  }

  /// Insert a database-sourced record after any earlier database entries
  /// and ahead of all live entries. Rows already finalized in the database
  /// are never reported again; the rest are reported without insertion.
  pub(crate) fn push_from_database(&mut self, record: StatusRecord, finalized: bool) {
    let index = self
      .history
      .iter()
      .take_while(|e| e.from_database)
      .count();

    let state = if finalized {
      ReportState::Reported
    } else {
      ReportState::UnreportedSuppressInsert
    };

    self.history.insert(index, StatusEntry { record, state, from_database: true });
  }

  /// Set the master key. Returns `false`, leaving the key unchanged, when
  /// one is already present.
  pub(crate) fn set_master_key(&mut self, key: MasterKey) -> bool {
    if let Some(existing) = self.master_key {
      error!(
        request_id = %self.request_id,
        %existing,
        attempted = %key,
        "Attempt to set master key twice"
      );
      return false;
    }
    self.master_key = Some(key);
    true
  }

  /// Mark finalized and start the age-out clock. Returns `true` only on the
  /// transition.
  pub(crate) fn mark_finalized(&mut self, now: DateTime<Utc>, policy: &AgeoutPolicy) -> bool {
    if self.finalized {
      return false;
    }
    self.finalized = true;
    self.drop_dead = policy.retention_deadline(now);
    true
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};
  use uplink_core::status::UplinkMetadata;

  use super::*;

  fn t0() -> DateTime<Utc> { Utc.timestamp_opt(1_700_000_000, 0).unwrap() }

  fn policy() -> AgeoutPolicy { AgeoutPolicy::from_secs(3600, 7200, 0) }

  fn live(status: CommandStatus, topic: Option<&str>) -> StatusRecord {
    StatusRecord::new("R1", status).with_metadata(UplinkMetadata {
      session_id:       42,
      session_host_id:  1,
      session_fragment: 0,
      topic_name:       topic.map(str::to_owned),
      spacecraft_id:    168,
    })
  }

  #[test]
  fn new_item_deadlines() {
    let item = RequestItem::new("R1", t0(), &policy());
    assert_eq!(item.drop_dead(), None);
    assert_eq!(item.drop_really_dead(), Some(t0() + Duration::seconds(7200)));
    assert!(!item.is_resolved());
    assert!(!item.is_finalized());
  }

  #[test]
  fn first_topic_wins() {
    let mut item = RequestItem::new("R1", t0(), &policy());
    item.push_live(live(CommandStatus::Submitted, None));
    assert_eq!(item.topic(), None);

    item.push_live(live(CommandStatus::Radiating, Some("uplink.a")));
    item.push_live(live(CommandStatus::Radiated, Some("uplink.b")));
    assert_eq!(item.topic(), Some("uplink.a"));
    assert_eq!(item.history().len(), 3);
  }

  #[test]
  fn database_entries_go_in_front_in_arrival_order() {
    let mut item = RequestItem::new("R1", t0(), &policy());
    item.push_live(live(CommandStatus::Radiated, None));
    item.push_from_database(StatusRecord::new("R1", CommandStatus::Submitted), false);
    item.push_from_database(StatusRecord::new("R1", CommandStatus::Radiating), true);

    let order: Vec<_> = item.history().iter().map(StatusEntry::status).collect();
    assert_eq!(
      order,
      vec![
        CommandStatus::Submitted,
        CommandStatus::Radiating,
        CommandStatus::Radiated,
      ]
    );
    assert_eq!(item.history()[0].state(), ReportState::UnreportedSuppressInsert);
    assert_eq!(item.history()[1].state(), ReportState::Reported);
    assert!(item.history()[0].came_from_database());
    assert!(!item.history()[2].came_from_database());
  }

  #[test]
  fn master_key_is_set_once() {
    let mut item = RequestItem::new("R1", t0(), &policy());
    assert!(item.set_master_key(MasterKey::new(42, 0, 1)));
    assert!(!item.set_master_key(MasterKey::new(43, 0, 1)));
    assert_eq!(item.master_key(), Some(MasterKey::new(42, 0, 1)));
  }

  #[test]
  fn finalization_is_monotonic_and_starts_retention() {
    let mut item = RequestItem::new("R1", t0(), &policy());
    assert!(item.mark_finalized(t0(), &policy()));
    let deadline = item.drop_dead();
    assert_eq!(deadline, Some(t0() + Duration::seconds(3600)));

    assert!(!item.mark_finalized(t0() + Duration::seconds(10), &policy()));
    assert!(item.is_finalized());
    assert_eq!(item.drop_dead(), deadline);
  }

  #[test]
  fn suppression_never_regresses_reported() {
    let mut item = RequestItem::new("R1", t0(), &policy());
    item.push_live(live(CommandStatus::Submitted, None));
    let entry = item.entry_mut(CommandStatus::Submitted).unwrap();
    entry.mark_reported();
    entry.suppress_insert();
    assert_eq!(entry.state(), ReportState::Reported);
  }
}
