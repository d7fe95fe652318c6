//! Core types and trait definitions for the uplink status reconciler.
//!
//! This crate is deliberately free of database, bus and HTTP dependencies.
//! The store, the reconciliation engine and the daemon all depend on it.

#![allow(async_fn_in_trait)]

pub mod archive;
pub mod error;
pub mod feed;
pub mod publish;
pub mod status;

pub use error::{Error, Result};
