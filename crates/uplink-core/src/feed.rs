//! Notification feed payloads.
//!
//! The remote command service pushes two kinds of data: radiation lists
//! (already-normalized status snapshots) and incremental request events.
//! Both arrive bundled in an [`IntakeBatch`]. Incremental ADDED/UPDATED
//! events carry raw [`UplinkRequest`] records which are normalized into
//! [`StatusRecord`]s before ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  status::{CommandStatus, StatusRecord, UplinkMetadata},
};

// ─── Raw request records ─────────────────────────────────────────────────────

/// One entry of a request's radiation status list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiationStatus {
  /// State as spelled by the command service (e.g. `"Send-Failure"`).
  pub state:             String,
  pub update_time:       Option<DateTime<Utc>>,
  pub bit1_rad_time:     Option<DateTime<Utc>>,
  pub last_bit_rad_time: Option<DateTime<Utc>>,
  pub station_id:        Option<u16>,
}

/// File information attached to a file-based request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
  pub filename:      Option<String>,
  /// Hex digits without a prefix.
  pub checksum:      Option<String>,
  pub total_cltus:   Option<u32>,
  pub creation_time: Option<String>,
}

/// A request record as delivered by ADDED/UPDATED incremental events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkRequest {
  pub request_id:         String,
  #[serde(default)]
  pub status_list:        Vec<RadiationStatus>,
  pub file_info:          Option<FileInfo>,
  #[serde(default)]
  pub bitrates:           Vec<f32>,
  #[serde(default)]
  pub radiation_durations: Vec<f32>,
  pub user_id:            Option<String>,
  pub role_id:            Option<String>,
  pub submit_time:        Option<String>,
  /// Session metadata stamped by the sender; absent for requests not
  /// originated by a tracked session.
  pub sender:             Option<UplinkMetadata>,
}

impl TryFrom<UplinkRequest> for StatusRecord {
  type Error = Error;

  /// Normalize a request record. The last entry of the status list is the
  /// current status.
  fn try_from(req: UplinkRequest) -> Result<Self> {
    let Some(latest) = req.status_list.last() else {
      return Err(Error::EmptyStatusList(req.request_id));
    };
    let status = CommandStatus::parse_feed(&latest.state)?;

    let mut record = StatusRecord::new(req.request_id.clone(), status);
    record.timestamp = latest.update_time;
    record.bit1_rad_time = latest.bit1_rad_time;
    record.last_bit_rad_time = latest.last_bit_rad_time;
    record.dss_id = latest.station_id;

    if let Some(info) = req.file_info {
      record.filename = info.filename;
      record.checksum = info.checksum.map(|c| format!("0x{c}"));
      record.total_cltus = info.total_cltus;
    }

    record.bitrates = req.bitrates;
    record.est_rad_durations = req.radiation_durations;
    record.user_id = req.user_id;
    record.role_id = req.role_id;
    record.submit_time = req.submit_time;
    record.metadata = req.sender;

    Ok(record)
  }
}

// ─── Incremental events ──────────────────────────────────────────────────────

/// An incremental change notification. Each kind is handled explicitly;
/// there is no catch-all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncrementalEvent {
  Added {
    timestamp: Option<DateTime<Utc>>,
    requests:  Vec<UplinkRequest>,
  },
  Updated {
    timestamp: Option<DateTime<Utc>>,
    requests:  Vec<UplinkRequest>,
  },
  /// Deletions carry only request ids; the new status is synthesized from
  /// what is already known about each request.
  Deleted {
    timestamp:   Option<DateTime<Utc>>,
    request_ids: Vec<String>,
  },
}

impl IncrementalEvent {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Added { .. } => "ADDED",
      Self::Updated { .. } => "UPDATED",
      Self::Deleted { .. } => "DELETED",
    }
  }
}

// ─── Batch ───────────────────────────────────────────────────────────────────

/// Everything delivered by one push from the command service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntakeBatch {
  #[serde(default)]
  pub radiation_list: Vec<StatusRecord>,
  #[serde(default)]
  pub incremental:    Vec<IncrementalEvent>,
}

impl IntakeBatch {
  pub fn radiation(records: Vec<StatusRecord>) -> Self {
    Self { radiation_list: records, incremental: Vec::new() }
  }

  pub fn incremental(events: Vec<IncrementalEvent>) -> Self {
    Self { radiation_list: Vec::new(), incremental: events }
  }

  pub fn is_empty(&self) -> bool {
    self.radiation_list.is_empty() && self.incremental.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn request(states: &[&str]) -> UplinkRequest {
    UplinkRequest {
      request_id:          "R7".into(),
      status_list:         states
        .iter()
        .map(|s| RadiationStatus {
          state:             (*s).to_owned(),
          update_time:       Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
          bit1_rad_time:     None,
          last_bit_rad_time: None,
          station_id:        Some(14),
        })
        .collect(),
      file_info:           Some(FileInfo {
        filename:      Some("/scmf/cmd.scmf".into()),
        checksum:      Some("beef".into()),
        total_cltus:   Some(12),
        creation_time: None,
      }),
      bitrates:            vec![2000.0],
      radiation_durations: vec![3.5],
      user_id:             Some("ops".into()),
      role_id:             Some("ACE".into()),
      submit_time:         None,
      sender:              Some(UplinkMetadata {
        session_id:       42,
        session_host_id:  1,
        session_fragment: 0,
        topic_name:       Some("uplink.m20".into()),
        spacecraft_id:    168,
      }),
    }
  }

  #[test]
  fn normalization_uses_last_status() {
    let rec = StatusRecord::try_from(request(&["Submitted", "Radiating"])).unwrap();
    assert_eq!(rec.request_id, "R7");
    assert_eq!(rec.status, CommandStatus::Radiating);
    assert_eq!(rec.checksum.as_deref(), Some("0xbeef"));
    assert_eq!(rec.total_cltus, Some(12));
    assert_eq!(rec.dss_id, Some(14));
    assert_eq!(rec.role_id.as_deref(), Some("ACE"));
    assert_eq!(rec.topic(), Some("uplink.m20"));
    assert!(!rec.is_foreign());
  }

  #[test]
  fn normalization_rejects_empty_status_list() {
    let err = StatusRecord::try_from(request(&[])).unwrap_err();
    assert!(matches!(err, Error::EmptyStatusList(id) if id == "R7"));
  }

  #[test]
  fn normalization_rejects_unknown_state() {
    let err = StatusRecord::try_from(request(&["Vaporized"])).unwrap_err();
    assert!(matches!(err, Error::UnknownStatus(_)));
  }

  #[test]
  fn missing_sender_is_foreign() {
    let mut req = request(&["Submitted"]);
    req.sender = None;
    let rec = StatusRecord::try_from(req).unwrap();
    assert!(rec.is_foreign());
  }

  #[test]
  fn incremental_events_decode_from_tagged_json() {
    let json = r#"{
      "radiation_list": [],
      "incremental": [
        { "type": "DELETED", "timestamp": null, "request_ids": ["R1", "R2"] },
        { "type": "ADDED", "requests": [] }
      ]
    }"#;
    let batch: IntakeBatch = serde_json::from_str(json).unwrap();
    assert_eq!(batch.incremental.len(), 2);
    assert_eq!(batch.incremental[0].kind(), "DELETED");
    assert!(matches!(
      &batch.incremental[1],
      IncrementalEvent::Added { timestamp: None, requests } if requests.is_empty()
    ));
  }

  #[test]
  fn unknown_event_type_is_a_decode_error() {
    let json = r#"{ "incremental": [ { "type": "MUTATED", "requests": [] } ] }"#;
    assert!(serde_json::from_str::<IntakeBatch>(json).is_err());
  }
}
