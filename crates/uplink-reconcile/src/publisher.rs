//! Publication bridge: turns reconciled statuses into bus events.
//!
//! Per-topic handles are cached and reused across publishes. A
//! [`HandleSweeper`] closes handles that have sat idle, on its own timer.

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uplink_core::{
  publish::{SessionContext, StatusPublisher, UplinkStatusEvent},
  status::{MasterKey, StatusRecord},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  bus::{MessageBus, TopicHandle},
  cache::TtlCache,
};

pub type HandleCache<H> = TtlCache<String, H>;

// ─── Publisher ───────────────────────────────────────────────────────────────

pub struct BusPublisher<B: MessageBus> {
  bus:     B,
  ambient: SessionContext,
  handles: Arc<HandleCache<B::Handle>>,
}

impl<B: MessageBus> BusPublisher<B> {
  pub fn new(bus: B, ambient: SessionContext) -> Self {
    Self { bus, ambient, handles: Arc::new(TtlCache::new()) }
  }

  pub fn handles(&self) -> Arc<HandleCache<B::Handle>> { self.handles.clone() }

  /// A sweeper over this publisher's handle cache.
  pub fn sweeper(&self, max_idle: Duration, interval: Duration) -> HandleSweeper<B::Handle> {
    HandleSweeper::new(self.handles.clone(), max_idle, interval)
  }

  /// Close every cached handle.
  pub fn close_all(&self) {
    for (topic, handle) in self.handles.drain() {
      debug!(%topic, "Closing publisher handle");
      handle.close();
    }
  }
}

impl<B: MessageBus> Drop for BusPublisher<B> {
  fn drop(&mut self) { self.close_all(); }
}

impl<B: MessageBus> StatusPublisher for BusPublisher<B> {
  type Error = Error;

  async fn publish(
    &self,
    status: &StatusRecord,
    key: MasterKey,
    suppress_insert: bool,
  ) -> Result<()> {
    let Some(topic) = status.topic() else {
      return Err(Error::NoTopic {
        request_id: status.request_id.clone(),
        status:     status.status.to_string(),
      });
    };

    let handle = self
      .handles
      .get_or_try_insert_with(topic.to_owned(), || self.bus.open_topic(topic))?;

    let event = UplinkStatusEvent {
      event_id:      Uuid::new_v4(),
      published_at:  Utc::now(),
      topic:         topic.to_owned(),
      context:       self.ambient.stamped(key),
      do_not_insert: suppress_insert,
      status:        status.clone(),
    };

    if let Err(e) = handle.send(event) {
      // Drop the broken handle so the next publish reopens it.
      if let Some(stale) = self.handles.remove(&topic.to_owned()) {
        stale.close();
      }
      return Err(e);
    }

    debug!(
      request_id = %status.request_id,
      status = %status.status,
      %topic,
      %key,
      suppress_insert,
      "Status published"
    );
    Ok(())
  }
}

// ─── Idle handle sweeper ─────────────────────────────────────────────────────

/// Periodically closes publisher handles unused for longer than `max_idle`.
pub struct HandleSweeper<H: TopicHandle> {
  handles:  Arc<HandleCache<H>>,
  max_idle: Duration,
  interval: Duration,
}

impl<H: TopicHandle> HandleSweeper<H> {
  pub fn new(handles: Arc<HandleCache<H>>, max_idle: Duration, interval: Duration) -> Self {
    Self { handles, max_idle, interval }
  }

  /// Run until `shutdown` is cancelled. The first sweep happens one
  /// interval after start.
  pub async fn run(self, shutdown: CancellationToken) {
    info!(
      max_idle_ms = self.max_idle.as_millis() as u64,
      interval_ms = self.interval.as_millis() as u64,
      "Publisher handle sweeper started"
    );

    let mut ticker = tokio::time::interval(self.interval);
    ticker.tick().await;

    loop {
      tokio::select! {
        _ = shutdown.cancelled() => break,
        _ = ticker.tick() => {
          self.sweep_once(Instant::now());
        }
      }
    }

    info!("Publisher handle sweeper stopped");
  }

  /// Close handles idle as of `now`. Returns how many were closed.
  pub fn sweep_once(&self, now: Instant) -> usize {
    let evicted = self.handles.evict_idle(now, self.max_idle);
    let count = evicted.len();

    for (topic, handle) in evicted {
      debug!(%topic, "Idle publisher handle closed");
      handle.close();
    }
    if count > 0 {
      debug!(count, remaining = self.handles.len(), "Publisher cache swept");
    }
    count
  }
}

#[cfg(test)]
mod tests {
  use uplink_core::status::{CommandStatus, UplinkMetadata};

  use super::*;
  use crate::bus::BroadcastBus;

  fn record(topic: Option<&str>) -> StatusRecord {
    StatusRecord::new("R1", CommandStatus::Radiated).with_metadata(UplinkMetadata {
      session_id:       42,
      session_host_id:  1,
      session_fragment: 0,
      topic_name:       topic.map(str::to_owned),
      spacecraft_id:    168,
    })
  }

  fn ambient() -> SessionContext {
    SessionContext {
      venue: "TESTBED".into(),
      session_id: 999,
      ..SessionContext::default()
    }
  }

  #[tokio::test]
  async fn publish_stamps_owning_session() {
    let bus = BroadcastBus::new();
    let mut rx = bus.subscribe("uplink.a");
    let publisher = BusPublisher::new(bus.clone(), ambient());

    let key = MasterKey::new(42, 0, 1);
    publisher.publish(&record(Some("uplink.a")), key, true).await.unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.context.master_key(), key);
    assert_eq!(event.context.venue, "TESTBED");
    assert!(event.do_not_insert);
    assert_eq!(event.status.status, CommandStatus::Radiated);
  }

  #[tokio::test]
  async fn handles_are_reused_per_topic() {
    let bus = BroadcastBus::new();
    let publisher = BusPublisher::new(bus.clone(), ambient());
    let key = MasterKey::new(42, 0, 1);

    for _ in 0..3 {
      publisher.publish(&record(Some("uplink.a")), key, false).await.unwrap();
    }
    publisher.publish(&record(Some("uplink.b")), key, false).await.unwrap();

    assert_eq!(bus.open_handles(), 2);
    assert_eq!(publisher.handles().len(), 2);
  }

  #[tokio::test]
  async fn missing_topic_is_an_error() {
    let publisher = BusPublisher::new(BroadcastBus::new(), ambient());
    let r = publisher.publish(&record(None), MasterKey::new(42, 0, 1), false).await;
    assert!(matches!(r, Err(Error::NoTopic { .. })));
  }

  #[tokio::test]
  async fn failed_send_evicts_handle() {
    let bus = BroadcastBus::new();
    let publisher = BusPublisher::new(bus.clone(), ambient());
    let key = MasterKey::new(42, 0, 1);
    publisher.publish(&record(Some("uplink.a")), key, false).await.unwrap();

    bus.shutdown();
    let r = publisher.publish(&record(Some("uplink.a")), key, false).await;
    assert!(matches!(r, Err(Error::BusClosed)));
    assert!(publisher.handles().is_empty());
    assert_eq!(bus.open_handles(), 0);
  }

  #[tokio::test]
  async fn sweeper_closes_idle_handles() {
    let bus = BroadcastBus::new();
    let publisher = BusPublisher::new(bus.clone(), ambient());
    publisher
      .publish(&record(Some("uplink.a")), MasterKey::new(42, 0, 1), false)
      .await
      .unwrap();

    let sweeper = publisher.sweeper(Duration::from_secs(60), Duration::from_secs(1));
    assert_eq!(sweeper.sweep_once(Instant::now()), 0);
    assert_eq!(sweeper.sweep_once(Instant::now() + Duration::from_secs(61)), 1);
    assert_eq!(bus.open_handles(), 0);
  }

  #[tokio::test]
  async fn dropping_publisher_closes_handles() {
    let bus = BroadcastBus::new();
    let publisher = BusPublisher::new(bus.clone(), ambient());
    publisher
      .publish(&record(Some("uplink.a")), MasterKey::new(42, 0, 1), false)
      .await
      .unwrap();
    assert_eq!(bus.open_handles(), 1);

    drop(publisher);
    assert_eq!(bus.open_handles(), 0);
  }

  #[tokio::test]
  async fn sweeper_stops_on_cancel() {
    let publisher = BusPublisher::new(BroadcastBus::new(), ambient());
    let sweeper = publisher.sweeper(Duration::from_secs(60), Duration::from_millis(10));
    let shutdown = CancellationToken::new();

    let task = tokio::spawn(sweeper.run(shutdown.clone()));
    shutdown.cancel();
    task.await.unwrap();
  }
}
