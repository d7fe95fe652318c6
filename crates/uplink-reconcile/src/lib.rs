//! The uplink command-status reconciliation engine.
//!
//! Merges the live notification feed with the historical command store into
//! one de-duplicated stream of status events:
//!
//! ```text
//! intake ──▶ queue ──▶ worker: merge ─▶ resolve ─▶ publish ─▶ evict
//!                                        │           │
//!                                  CommandArchive  StatusPublisher
//! ```
//!
//! The worker owns the request table outright; producers only enqueue.

pub mod ageout;
pub mod bus;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod intake;
pub mod item;
pub mod publisher;
pub mod service;

pub use ageout::AgeoutPolicy;
pub use config::ReconcileConfig;
pub use engine::{Ingest, PassReport, Reconciler};
pub use error::{Error, Result};
pub use service::{ReconcileService, ServiceHandle};
