//! Age-out policy: bounds on how long request items stay in memory.
//!
//! Three independent windows, each disabled by a zero value:
//!
//! - **ageout**: how long a finalized item is retained.
//! - **extreme ageout**: hard ceiling on the life of any item, so requests
//!   that never resolve cannot grow memory without bound. Never shorter than
//!   ageout when both are enabled.
//! - **epoch**: how far back database lookups reach. Not an eviction
//!   control.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::item::RequestItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeoutPolicy {
  ageout:         Option<Duration>,
  extreme_ageout: Option<Duration>,
  epoch:          Option<Duration>,
}

/// Why an item left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
  /// Finalized (or never attributed to a session) and past its retention.
  Expired,
  /// Outlived the extreme ageout.
  Hung,
}

/// A zero window is disabled. A window too large for chrono is treated the
/// same way, as one that never elapses.
fn window(secs: u64) -> Option<Duration> {
  if secs == 0 {
    return None;
  }
  let window = i64::try_from(secs).ok().and_then(Duration::try_seconds);
  if window.is_none() {
    warn!(secs, "Age-out window out of range, treating as unbounded");
  }
  window
}

impl AgeoutPolicy {
  pub fn from_secs(ageout: u64, extreme_ageout: u64, epoch: u64) -> Self {
    let extreme_ageout = if extreme_ageout > 0 && extreme_ageout < ageout {
      ageout
    } else {
      extreme_ageout
    };

    Self {
      ageout:         window(ageout),
      extreme_ageout: window(extreme_ageout),
      epoch:          window(epoch),
    }
  }

  pub fn ageout(&self) -> Option<Duration> { self.ageout }

  pub fn extreme_ageout(&self) -> Option<Duration> { self.extreme_ageout }

  pub fn epoch(&self) -> Option<Duration> { self.epoch }

  /// Eviction deadline for an item finalized at `now`.
  pub fn retention_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    self.ageout.and_then(|d| now.checked_add_signed(d))
  }

  /// Hard eviction deadline for an item created at `created`.
  pub fn hung_deadline(&self, created: DateTime<Utc>) -> Option<DateTime<Utc>> {
    self.extreme_ageout.and_then(|d| created.checked_add_signed(d))
  }

  /// Earliest event time worth looking up in the database.
  pub fn epoch_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    self.epoch.and_then(|d| now.checked_sub_signed(d))
  }

  /// Decide whether `item` must leave the table at `now`.
  pub fn verdict(&self, item: &RequestItem, now: DateTime<Utc>) -> Option<Eviction> {
    let expired = item.drop_dead().is_some_and(|t| now >= t);
    if expired && (item.is_finalized() || !item.is_resolved()) {
      return Some(Eviction::Expired);
    }
    if item.drop_really_dead().is_some_and(|t| now >= t) {
      return Some(Eviction::Hung);
    }
    None
  }

  /// Remove every item whose deadline has passed. Returns the number of
  /// (expired, hung) evictions.
  pub fn sweep(
    &self,
    table: &mut HashMap<String, RequestItem>,
    now: DateTime<Utc>,
  ) -> (usize, usize) {
    let mut expired = 0;
    let mut hung = 0;

    table.retain(|request_id, item| match self.verdict(item, now) {
      None => true,
      Some(Eviction::Expired) => {
        if item.is_finalized() {
          debug!(%request_id, "Finalized request-id purged");
        } else {
          debug!(%request_id, "Foreign request-id purged");
        }
        expired += 1;
        false
      }
      Some(Eviction::Hung) => {
        warn!(
          %request_id,
          resolved = item.is_resolved(),
          finalized = item.is_finalized(),
          "Hung request-id purged"
        );
        hung += 1;
        false
      }
    });

    (expired, hung)
  }
}

impl Default for AgeoutPolicy {
  fn default() -> Self {
    Self::from_secs(
      crate::config::DEFAULT_AGEOUT_SECS,
      crate::config::DEFAULT_EXTREME_AGEOUT_SECS,
      crate::config::DEFAULT_EPOCH_SECS,
    )
  }
}
