//! libSQL layer backing the embedded tier

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{LibSqlRecordRepository, RecordRepository};
