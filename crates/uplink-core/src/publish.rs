//! The `StatusPublisher` trait and the event it emits.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{MasterKey, StatusRecord};

// ─── Session context ─────────────────────────────────────────────────────────

/// Session identity carried in the header of every republished event.
///
/// The publisher is configured with an ambient context (venue, user,
/// spacecraft); the identity fields are always replaced by the owning
/// request's [`MasterKey`] before publication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
  pub venue:            String,
  pub user:             String,
  pub spacecraft_id:    i32,
  pub session_id:       i64,
  pub session_fragment: i32,
  pub host_id:          i32,
}

impl SessionContext {
  /// Copy this context with its identity overridden by `key`.
  pub fn stamped(&self, key: MasterKey) -> Self {
    Self {
      session_id: key.session_id,
      session_fragment: key.session_fragment,
      host_id: key.host_id,
      ..self.clone()
    }
  }

  pub fn master_key(&self) -> MasterKey {
    MasterKey::new(self.session_id, self.session_fragment, self.host_id)
  }
}

// ─── Event ───────────────────────────────────────────────────────────────────

/// A status republished to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkStatusEvent {
  pub event_id:      Uuid,
  pub published_at:  DateTime<Utc>,
  pub topic:         String,
  pub context:       SessionContext,
  /// Downstream archivers must not insert this status; the store already
  /// has it.
  pub do_not_insert: bool,
  pub status:        StatusRecord,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Sink for reconciled status events.
pub trait StatusPublisher: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Publish `status` on its topic, stamped with the session identity of
  /// `key`. `suppress_insert` marks the event as already archived.
  fn publish<'a>(
    &'a self,
    status: &'a StatusRecord,
    key: MasterKey,
    suppress_insert: bool,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stamping_overrides_identity_only() {
    let ambient = SessionContext {
      venue:            "TESTBED".into(),
      user:             "uplinkd".into(),
      spacecraft_id:    168,
      session_id:       9,
      session_fragment: 3,
      host_id:          7,
    };

    let stamped = ambient.stamped(MasterKey::new(42, 0, 1));
    assert_eq!(stamped.venue, "TESTBED");
    assert_eq!(stamped.spacecraft_id, 168);
    assert_eq!(stamped.master_key(), MasterKey::new(42, 0, 1));
  }
}
