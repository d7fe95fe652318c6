//! Message-bus abstraction behind the publication bridge, plus an
//! in-process implementation over tokio broadcast channels.

use std::{
  collections::HashMap,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uplink_core::publish::UplinkStatusEvent;

use crate::{Error, Result};

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Something that can hand out per-topic publisher handles.
pub trait MessageBus: Send + Sync {
  type Handle: TopicHandle;

  fn open_topic(&self, topic: &str) -> Result<Self::Handle>;
}

/// A publisher bound to one topic.
pub trait TopicHandle: Clone + Send + Sync + 'static {
  fn send(&self, event: UplinkStatusEvent) -> Result<()>;

  /// Release the handle. Called once, when it leaves the handle cache.
  fn close(self) {}
}

// ─── Broadcast bus ───────────────────────────────────────────────────────────

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug)]
struct BusInner {
  capacity:     usize,
  topics:       Mutex<HashMap<String, broadcast::Sender<UplinkStatusEvent>>>,
  /// Every event on every topic.
  firehose:     broadcast::Sender<UplinkStatusEvent>,
  open_handles: AtomicUsize,
  closed:       AtomicBool,
}

/// In-process bus. Subscribers see events published after they subscribe;
/// a topic with no subscribers drops events silently.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
  inner: Arc<BusInner>,
}

impl Default for BroadcastBus {
  fn default() -> Self { Self::with_capacity(DEFAULT_CAPACITY) }
}

impl BroadcastBus {
  pub fn new() -> Self { Self::default() }

  pub fn with_capacity(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    let (firehose, _) = broadcast::channel(capacity);
    Self {
      inner: Arc::new(BusInner {
        capacity,
        topics: Mutex::new(HashMap::new()),
        firehose,
        open_handles: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
      }),
    }
  }

  fn topic_sender(&self, topic: &str) -> broadcast::Sender<UplinkStatusEvent> {
    let mut topics = self.inner.topics.lock();
    topics
      .entry(topic.to_owned())
      .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
      .clone()
  }

  /// Subscribe to one topic.
  pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<UplinkStatusEvent> {
    self.topic_sender(topic).subscribe()
  }

  /// Subscribe to every topic.
  pub fn subscribe_all(&self) -> broadcast::Receiver<UplinkStatusEvent> {
    self.inner.firehose.subscribe()
  }

  /// Handles opened and not yet closed.
  pub fn open_handles(&self) -> usize { self.inner.open_handles.load(Ordering::Acquire) }

  /// Refuse new handles and fail sends on existing ones.
  pub fn shutdown(&self) {
    self.inner.closed.store(true, Ordering::Release);
    debug!("Message bus shut down");
  }

  pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }
}

impl MessageBus for BroadcastBus {
  type Handle = BroadcastHandle;

  fn open_topic(&self, topic: &str) -> Result<BroadcastHandle> {
    if self.is_closed() {
      return Err(Error::BusClosed);
    }

    let tx = self.topic_sender(topic);
    self.inner.open_handles.fetch_add(1, Ordering::AcqRel);
    debug!(%topic, "Publisher handle opened");

    Ok(BroadcastHandle {
      topic: Arc::from(topic),
      tx,
      bus: self.inner.clone(),
    })
  }
}

#[derive(Debug, Clone)]
pub struct BroadcastHandle {
  topic: Arc<str>,
  tx:    broadcast::Sender<UplinkStatusEvent>,
  bus:   Arc<BusInner>,
}

impl BroadcastHandle {
  pub fn topic(&self) -> &str { &self.topic }
}

impl TopicHandle for BroadcastHandle {
  fn send(&self, event: UplinkStatusEvent) -> Result<()> {
    if self.bus.closed.load(Ordering::Acquire) {
      return Err(Error::BusClosed);
    }

    // A send with no receivers is not a failure.
    let _ = self.bus.firehose.send(event.clone());
    let delivered = self.tx.send(event).unwrap_or(0);
    trace!(topic = %self.topic, delivered, "Event sent");
    Ok(())
  }

  fn close(self) {
    self.bus.open_handles.fetch_sub(1, Ordering::AcqRel);
    debug!(topic = %self.topic, "Publisher handle closed");
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use uplink_core::{
    publish::SessionContext,
    status::{CommandStatus, StatusRecord},
  };
  use uuid::Uuid;

  use super::*;

  fn event(topic: &str) -> UplinkStatusEvent {
    UplinkStatusEvent {
      event_id:      Uuid::new_v4(),
      published_at:  Utc::now(),
      topic:         topic.into(),
      context:       SessionContext::default(),
      do_not_insert: false,
      status:        StatusRecord::new("R1", CommandStatus::Submitted),
    }
  }

  #[tokio::test]
  async fn topic_and_firehose_subscribers_both_receive() {
    let bus = BroadcastBus::new();
    let mut on_topic = bus.subscribe("uplink.a");
    let mut other = bus.subscribe("uplink.b");
    let mut all = bus.subscribe_all();

    let handle = bus.open_topic("uplink.a").unwrap();
    handle.send(event("uplink.a")).unwrap();

    assert_eq!(on_topic.recv().await.unwrap().topic, "uplink.a");
    assert_eq!(all.recv().await.unwrap().topic, "uplink.a");
    assert!(other.try_recv().is_err());
  }

  #[test]
  fn shutdown_refuses_handles_and_sends() {
    let bus = BroadcastBus::new();
    let handle = bus.open_topic("uplink.a").unwrap();
    assert_eq!(bus.open_handles(), 1);

    bus.shutdown();
    assert!(matches!(handle.send(event("uplink.a")), Err(Error::BusClosed)));
    assert!(matches!(bus.open_topic("uplink.a"), Err(Error::BusClosed)));

    handle.close();
    assert_eq!(bus.open_handles(), 0);
  }
}
