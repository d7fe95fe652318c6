//! Runtime configuration for the reconciliation service.

use std::time::Duration;

use serde::Deserialize;
use uplink_core::publish::SessionContext;

use crate::ageout::AgeoutPolicy;

/// Eight hours.
pub const DEFAULT_AGEOUT_SECS: u64 = 8 * 60 * 60;

/// Twenty-four hours.
pub const DEFAULT_EXTREME_AGEOUT_SECS: u64 = 24 * 60 * 60;

/// Seven days.
pub const DEFAULT_EPOCH_SECS: u64 = 7 * 24 * 60 * 60;

pub const DEFAULT_PUBLISHER_IDLE_TIMEOUT_MS: u64 = 60_000;

pub const DEFAULT_PUBLISHER_SWEEP_INTERVAL_MS: u64 = 10_000;

pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 5_000;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

pub const DEFAULT_LOOKUP_BATCH_SIZE: usize = 1000;

/// Reconciler settings, deserialised from the daemon's config file.
///
/// Every window is in seconds; zero disables it.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
  #[serde(default = "default_ageout")]
  pub ageout_secs:                 u64,
  #[serde(default = "default_extreme_ageout")]
  pub extreme_ageout_secs:         u64,
  #[serde(default = "default_epoch")]
  pub epoch_secs:                  u64,
  #[serde(default = "default_publisher_idle_timeout")]
  pub publisher_idle_timeout_ms:   u64,
  #[serde(default = "default_publisher_sweep_interval")]
  pub publisher_sweep_interval_ms: u64,
  #[serde(default = "default_poll_timeout")]
  pub poll_timeout_ms:             u64,
  #[serde(default = "default_queue_capacity")]
  pub queue_capacity:              usize,
  #[serde(default = "default_lookup_batch_size")]
  pub lookup_batch_size:           usize,
  /// Spacecraft stamped on records reconstructed from the database.
  #[serde(default)]
  pub spacecraft_id:               i32,
  #[serde(default)]
  pub venue:                       String,
  #[serde(default)]
  pub user:                        String,
}

fn default_ageout() -> u64 { DEFAULT_AGEOUT_SECS }
fn default_extreme_ageout() -> u64 { DEFAULT_EXTREME_AGEOUT_SECS }
fn default_epoch() -> u64 { DEFAULT_EPOCH_SECS }
fn default_publisher_idle_timeout() -> u64 { DEFAULT_PUBLISHER_IDLE_TIMEOUT_MS }
fn default_publisher_sweep_interval() -> u64 { DEFAULT_PUBLISHER_SWEEP_INTERVAL_MS }
fn default_poll_timeout() -> u64 { DEFAULT_POLL_TIMEOUT_MS }
fn default_queue_capacity() -> usize { DEFAULT_QUEUE_CAPACITY }
fn default_lookup_batch_size() -> usize { DEFAULT_LOOKUP_BATCH_SIZE }

impl Default for ReconcileConfig {
  fn default() -> Self {
    Self {
      ageout_secs:                 DEFAULT_AGEOUT_SECS,
      extreme_ageout_secs:         DEFAULT_EXTREME_AGEOUT_SECS,
      epoch_secs:                  DEFAULT_EPOCH_SECS,
      publisher_idle_timeout_ms:   DEFAULT_PUBLISHER_IDLE_TIMEOUT_MS,
      publisher_sweep_interval_ms: DEFAULT_PUBLISHER_SWEEP_INTERVAL_MS,
      poll_timeout_ms:             DEFAULT_POLL_TIMEOUT_MS,
      queue_capacity:              DEFAULT_QUEUE_CAPACITY,
      lookup_batch_size:           DEFAULT_LOOKUP_BATCH_SIZE,
      spacecraft_id:               0,
      venue:                       String::new(),
      user:                        String::new(),
    }
  }
}

impl ReconcileConfig {
  pub fn policy(&self) -> AgeoutPolicy {
    AgeoutPolicy::from_secs(self.ageout_secs, self.extreme_ageout_secs, self.epoch_secs)
  }

  pub fn poll_timeout(&self) -> Duration {
    Duration::from_millis(self.poll_timeout_ms.max(1))
  }

  pub fn publisher_idle_timeout(&self) -> Duration {
    Duration::from_millis(self.publisher_idle_timeout_ms)
  }

  pub fn publisher_sweep_interval(&self) -> Duration {
    Duration::from_millis(self.publisher_sweep_interval_ms.max(1))
  }

  /// Ambient session context; identity fields are filled per event.
  pub fn ambient_context(&self) -> SessionContext {
    SessionContext {
      venue: self.venue.clone(),
      user: self.user.clone(),
      spacecraft_id: self.spacecraft_id,
      ..SessionContext::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_fields_take_defaults() {
    let cfg: ReconcileConfig = serde_json::from_str(r#"{ "epoch_secs": 0 }"#).unwrap();
    assert_eq!(cfg.ageout_secs, DEFAULT_AGEOUT_SECS);
    assert_eq!(cfg.epoch_secs, 0);
    assert_eq!(cfg.poll_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.policy().epoch(), None);
  }
}
