//! Error type for `uplink-reconcile`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("status {request_id}/{status} has no topic to publish on")]
  NoTopic { request_id: String, status: String },

  #[error("message bus is closed")]
  BusClosed,

  #[error("intake queue is full")]
  QueueFull,

  #[error("intake queue is closed")]
  QueueClosed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
