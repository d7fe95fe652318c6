//! Notification intake.
//!
//! Producers (the push-transport callback, the HTTP endpoint) hold an
//! [`IntakeSender`] and only ever enqueue. Normalization of the queued
//! batches happens on the worker, through the helpers below, so the request
//! table is never touched from a producer thread.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, trace, warn};
use uplink_core::{
  feed::{IntakeBatch, UplinkRequest},
  status::StatusRecord,
};

use crate::{Error, Result};

/// Receiving end of the intake queue, owned by the worker.
pub type IntakeQueue = mpsc::Receiver<IntakeBatch>;

/// Create a bounded intake queue.
pub fn channel(capacity: usize) -> (IntakeSender, IntakeQueue) {
  let (tx, rx) = mpsc::channel(capacity.max(1));
  (IntakeSender { tx }, rx)
}

/// Cloneable, non-blocking handle for pushing batches to the worker.
#[derive(Debug, Clone)]
pub struct IntakeSender {
  tx: mpsc::Sender<IntakeBatch>,
}

impl IntakeSender {
  /// Enqueue a batch without waiting. A full queue is reported back to the
  /// caller; backpressure belongs to the transport.
  pub fn submit(&self, batch: IntakeBatch) -> Result<()> {
    let radiation = batch.radiation_list.len();
    let incremental = batch.incremental.len();

    match self.tx.try_send(batch) {
      Ok(()) => {
        trace!(radiation, incremental, "Batch enqueued");
        Ok(())
      }
      Err(TrySendError::Full(_)) => {
        warn!(radiation, incremental, "Intake queue full, batch rejected");
        Err(Error::QueueFull)
      }
      Err(TrySendError::Closed(_)) => Err(Error::QueueClosed),
    }
  }

  pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

/// Normalize ADDED/UPDATED request records. Malformed records are logged
/// and skipped.
pub(crate) fn normalize_requests(kind: &str, requests: Vec<UplinkRequest>) -> Vec<StatusRecord> {
  trace!(kind, count = requests.len(), "Processing incremental requests");

  requests
    .into_iter()
    .filter_map(|req| {
      let request_id = req.request_id.clone();
      match StatusRecord::try_from(req) {
        Ok(record) => Some(record),
        Err(e) => {
          debug!(kind, %request_id, error = %e, "Malformed request record skipped");
          None
        }
      }
    })
    .collect()
}

/// Build the status record for a deletion notice from the last record known
/// for that request. Returns `None` when nothing is known.
pub(crate) fn synthesize_deletion(
  request_id: &str,
  last: Option<&StatusRecord>,
  timestamp: Option<DateTime<Utc>>,
) -> Option<StatusRecord> {
  let Some(last) = last else {
    debug!(%request_id, "Deletion for request-id with no history, nothing to do");
    return None;
  };

  if timestamp.is_none() {
    error!(%request_id, "Deletion notice has no timestamp");
  }

  let mut record = last.clone();
  record.set_timestamp(timestamp);
  Some(record)
}
