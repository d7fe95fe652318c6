//! Error types for `uplink-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown command status: {0:?}")]
  UnknownStatus(String),

  #[error("request {0} carries an empty status list")]
  EmptyStatusList(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
