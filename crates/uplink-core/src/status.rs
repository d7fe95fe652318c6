//! Status records: the unit of information flowing through the reconciler.
//!
//! A [`StatusRecord`] is one observed status of one uplink request. Records
//! arrive either from the live notification feed (rich: bit rates, role,
//! radiation times) or are reconstructed from a historical database row
//! (sparse: most payload fields are empty).

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

use crate::{Error, Result};

// ─── Command status ──────────────────────────────────────────────────────────

/// Lifecycle state of an uplink request as reported by the command service.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CommandStatus {
  Unknown,
  Submitted,
  Radiating,
  Radiated,
  Failed,
  Deleted,
  Cancelled,
  SendFailure,
}

impl CommandStatus {
  /// True when the request will not progress any further.
  pub fn is_final(self) -> bool {
    matches!(
      self,
      Self::Radiated
        | Self::Failed
        | Self::Deleted
        | Self::Cancelled
        | Self::SendFailure
    )
  }

  /// Parse a state string as the command service spells it.
  ///
  /// Matching ignores case and treats `-` and blanks as `_`, so
  /// `"Send-Failure"` and `"SEND FAILURE"` both parse.
  pub fn parse_feed(raw: &str) -> Result<Self> {
    let normalized = raw.trim().replace(['-', ' '], "_");
    CommandStatus::from_str(&normalized)
      .map_err(|_| Error::UnknownStatus(raw.to_owned()))
  }
}

// ─── Session identity ────────────────────────────────────────────────────────

/// Identifies the session record that owns a request in the historical
/// store. Used to address finalize-writes and to stamp republished events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MasterKey {
  pub session_id:       i64,
  pub session_fragment: i32,
  pub host_id:          i32,
}

impl MasterKey {
  pub fn new(session_id: i64, session_fragment: i32, host_id: i32) -> Self {
    Self { session_id, session_fragment, host_id }
  }
}

impl fmt::Display for MasterKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}/{}/{}",
      self.host_id, self.session_id, self.session_fragment
    )
  }
}

/// Routing and ownership data attached to a status by the sending session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkMetadata {
  /// Owning session number; zero or negative means the request was not
  /// sent by a session this deployment tracks.
  pub session_id:       i64,
  pub session_host_id:  i32,
  #[serde(default)]
  pub session_fragment: i32,
  /// Topic the status must be republished on, when known.
  #[serde(default)]
  pub topic_name:       Option<String>,
  pub spacecraft_id:    i32,
}

impl UplinkMetadata {
  /// The topic name, treating an empty string as absent.
  pub fn topic(&self) -> Option<&str> {
    self.topic_name.as_deref().filter(|t| !t.is_empty())
  }
}

// ─── Status record ───────────────────────────────────────────────────────────

/// One observed status for one request-id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
  pub request_id:        String,
  pub status:            CommandStatus,
  /// When the command service reported this status. May be missing on
  /// synthesized records.
  pub timestamp:         Option<DateTime<Utc>>,
  pub role_id:           Option<String>,
  pub user_id:           Option<String>,
  pub filename:          Option<String>,
  #[serde(default)]
  pub bitrates:          Vec<f32>,
  #[serde(default)]
  pub est_rad_durations: Vec<f32>,
  pub checksum:          Option<String>,
  pub total_cltus:       Option<u32>,
  pub bit1_rad_time:     Option<DateTime<Utc>>,
  pub last_bit_rad_time: Option<DateTime<Utc>>,
  pub submit_time:       Option<String>,
  pub dss_id:            Option<u16>,
  pub metadata:          Option<UplinkMetadata>,
}

impl StatusRecord {
  /// A record carrying only the request id and status; every other field is
  /// empty.
  pub fn new(request_id: impl Into<String>, status: CommandStatus) -> Self {
    Self {
      request_id: request_id.into(),
      status,
      timestamp: None,
      role_id: None,
      user_id: None,
      filename: None,
      bitrates: Vec::new(),
      est_rad_durations: Vec::new(),
      checksum: None,
      total_cltus: None,
      bit1_rad_time: None,
      last_bit_rad_time: None,
      submit_time: None,
      dss_id: None,
      metadata: None,
    }
  }

  pub fn with_metadata(mut self, metadata: UplinkMetadata) -> Self {
    self.metadata = Some(metadata);
    self
  }

  pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
    self.timestamp = Some(timestamp);
    self
  }

  /// Overwrite the status timestamp. Only used when synthesizing a record
  /// from an earlier one.
  pub fn set_timestamp(&mut self, timestamp: Option<DateTime<Utc>>) {
    self.timestamp = timestamp;
  }

  /// Fill in the topic when the metadata has none. Returns `false` when
  /// the record has no metadata to carry it.
  pub fn set_topic_name(&mut self, topic: &str) -> bool {
    match self.metadata.as_mut() {
      Some(m) => {
        if m.topic().is_none() {
          m.topic_name = Some(topic.to_owned());
        }
        true
      }
      None => false,
    }
  }

  /// Records without metadata, or with a non-positive session id, belong to
  /// sessions we do not track.
  pub fn is_foreign(&self) -> bool {
    self.metadata.as_ref().is_none_or(|m| m.session_id <= 0)
  }

  pub fn topic(&self) -> Option<&str> {
    self.metadata.as_ref().and_then(UplinkMetadata::topic)
  }
}
