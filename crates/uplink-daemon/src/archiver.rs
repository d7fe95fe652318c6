//! Downstream archiver: records published statuses in the command store so
//! a restarted daemon resolves them from history.

use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};
use uplink_core::publish::UplinkStatusEvent;
use uplink_store_sqlite::SqliteArchive;

/// Insert one event's status unless the event says the store already has
/// it. Returns whether a row was written.
pub async fn archive_event(
  store: &SqliteArchive,
  event: &UplinkStatusEvent,
) -> uplink_store_sqlite::Result<bool> {
  if event.do_not_insert {
    trace!(request_id = %event.status.request_id, status = %event.status.status, "Insert suppressed");
    return Ok(false);
  }

  store
    .record_status(
      event.context.master_key(),
      &event.status.request_id,
      event.status.status,
      event.status.timestamp.unwrap_or(event.published_at),
    )
    .await
}

/// Consume `events` until `shutdown` is cancelled or the bus goes away.
pub async fn run(
  mut events: Receiver<UplinkStatusEvent>,
  store: SqliteArchive,
  shutdown: CancellationToken,
) {
  info!("Archiver started");

  loop {
    let event = tokio::select! {
      _ = shutdown.cancelled() => break,
      received = events.recv() => match received {
        Ok(event) => event,
        Err(RecvError::Lagged(skipped)) => {
          warn!(skipped, "Archiver lagged, events not archived");
          continue;
        }
        Err(RecvError::Closed) => break,
      },
    };

    if let Err(e) = archive_event(&store, &event).await {
      error!(
        request_id = %event.status.request_id,
        status = %event.status.status,
        error = %e,
        "Failed to archive status"
      );
    }
  }

  info!("Archiver stopped");
}
