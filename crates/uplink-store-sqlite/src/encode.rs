//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`
//! suffix) so that lexical comparison in SQL matches chronological order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use uplink_core::{archive::HistoricalRow, status::CommandStatus};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── CommandStatus ───────────────────────────────────────────────────────────

/// Stored as the strum `snake_case` name, the same form `decode_status`
/// parses.
pub fn encode_status(status: CommandStatus) -> &'static str { status.into() }

pub fn decode_status(s: &str) -> Result<CommandStatus> {
  CommandStatus::from_str(s)
    .map_err(|_| Error::Core(uplink_core::Error::UnknownStatus(s.to_owned())))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read from `command_statuses` joined with `command_messages`.
pub struct RawHistoricalRow {
  pub status_id:        i64,
  pub request_id:       String,
  pub status:           String,
  pub event_time:       String,
  pub session_id:       i64,
  pub host_id:          i32,
  pub session_fragment: i32,
  pub finalized:        bool,
  pub original_file:    Option<String>,
}

impl RawHistoricalRow {
  pub fn into_row(self) -> Result<HistoricalRow> {
    Ok(HistoricalRow {
      request_id:       self.request_id,
      status:           decode_status(&self.status)?,
      finalized:        self.finalized,
      event_time:       decode_dt(&self.event_time)?,
      session_id:       self.session_id,
      session_host_id:  self.host_id,
      session_fragment: self.session_fragment,
      original_file:    self.original_file,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn status_names_round_trip_through_strum() {
    for status in [
      CommandStatus::Unknown,
      CommandStatus::Submitted,
      CommandStatus::Radiating,
      CommandStatus::Radiated,
      CommandStatus::Failed,
      CommandStatus::Deleted,
      CommandStatus::Cancelled,
      CommandStatus::SendFailure,
    ] {
      assert_eq!(encode_status(status), status.as_ref());
      assert_eq!(decode_status(encode_status(status)).unwrap(), status);
    }
  }

  #[test]
  fn encoded_times_sort_lexically() {
    let a = Utc.timestamp_opt(1_700_000_000, 5_000).unwrap();
    let b = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
    let c = Utc.timestamp_opt(1_700_000_001, 0).unwrap();
    assert!(encode_dt(a) < encode_dt(b));
    assert!(encode_dt(b) < encode_dt(c));
    assert_eq!(decode_dt(&encode_dt(b)).unwrap(), b);
  }
}
