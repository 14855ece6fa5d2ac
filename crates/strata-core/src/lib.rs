//! strata-core - Core library for Strata
//!
//! This crate contains the storage backends, hybrid routing, sync queue,
//! backup/restore and recovery services behind the `strata` CLI.

pub mod backends;
pub mod backoff;
pub mod backup;
pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod health;
pub mod locks;
pub mod metrics;
pub mod models;
pub mod recovery;
pub mod services;
pub mod state;
pub mod storage;
pub mod sync;
pub mod util;
pub mod worker;

pub use config::StorageConfig;
pub use error::{Error, Result};
pub use models::{BackendId, Record, RecordKey};
pub use services::{AdminResponse, StorageSubsystem};
