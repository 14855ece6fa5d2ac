//! Subsystem facade and the administrative envelope.

mod admin;
mod subsystem;

pub use admin::{AdminError, AdminResponse};
pub use subsystem::{ImportReport, StorageSubsystem};
