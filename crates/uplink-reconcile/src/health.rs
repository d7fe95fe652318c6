//! Liveness and connectivity, as seen by whoever supervises the worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::engine::PassReport;

#[derive(Debug)]
pub struct Health {
  alive:     AtomicBool,
  connected: AtomicBool,
  passes:    AtomicU64,
  last:      Mutex<Option<(DateTime<Utc>, PassReport)>>,
}

/// Point-in-time view of the worker, served by the daemon's stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
  pub alive:     bool,
  pub connected: bool,
  pub passes:    u64,
  pub last_pass: Option<DateTime<Utc>>,
  pub report:    Option<PassReport>,
}

impl Default for Health {
  fn default() -> Self {
    Self {
      alive:     AtomicBool::new(true),
      connected: AtomicBool::new(true),
      passes:    AtomicU64::new(0),
      last:      Mutex::new(None),
    }
  }
}

impl Health {
  pub fn new() -> Self { Self::default() }

  pub(crate) fn record_pass(&self, at: DateTime<Utc>, report: PassReport, connected: bool) {
    self.connected.store(connected, Ordering::Release);
    self.passes.fetch_add(1, Ordering::AcqRel);
    *self.last.lock() = Some((at, report));
  }

  pub(crate) fn mark_dead(&self) {
    self.alive.store(false, Ordering::Release);
    self.connected.store(false, Ordering::Release);
  }

  pub fn is_alive(&self) -> bool { self.alive.load(Ordering::Acquire) }

  /// Alive, and the last pass reached the command store.
  pub fn is_connected(&self) -> bool {
    self.is_alive() && self.connected.load(Ordering::Acquire)
  }

  pub fn snapshot(&self) -> HealthSnapshot {
    let last = self.last.lock().clone();
    HealthSnapshot {
      alive:     self.is_alive(),
      connected: self.is_connected(),
      passes:    self.passes.load(Ordering::Acquire),
      last_pass: last.as_ref().map(|(at, _)| *at),
      report:    last.map(|(_, report)| report),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dead_worker_is_never_connected() {
    let health = Health::new();
    assert!(health.is_alive());
    assert!(health.is_connected());

    health.record_pass(Utc::now(), PassReport::default(), true);
    health.mark_dead();
    assert!(!health.is_alive());
    assert!(!health.is_connected());
    assert_eq!(health.snapshot().passes, 1);
  }

  #[test]
  fn failed_lookup_reports_disconnected() {
    let health = Health::new();
    health.record_pass(Utc::now(), PassReport::default(), false);
    assert!(health.is_alive());
    assert!(!health.is_connected());
  }
}
