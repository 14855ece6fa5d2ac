//! Storage backends.
//!
//! Every tier implements [`StorageBackend`]; the remote tier additionally
//! implements [`RemoteStore`] for change feeds. Backends are interchangeable in
//! tests: [`MemoryBackend`] can stand in for any of them.
//!
//! Write semantics shared by all implementations: a `put` whose version is not
//! greater than the stored version is a no-op that returns the stored record,
//! which makes retries idempotent and keeps versions monotonic.

mod embedded;
mod guarded;
mod http;
mod kv;
mod map;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{BackendId, Record};
use crate::util::now_ms;

pub use embedded::EmbeddedBackend;
pub use guarded::{Guarded, LocalBackend, RemoteBackend};
pub use http::HttpRemote;
pub use kv::KeyValueBackend;
pub use memory::MemoryBackend;

/// Collection used by health probes; never visible through the public API.
pub const PROBE_COLLECTION: &str = "__health";

/// Listing options for [`StorageBackend::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    /// Only keys starting with this prefix
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// Include tombstones
    #[serde(default)]
    pub include_deleted: bool,
    /// Maximum number of records
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListFilter {
    /// Every record including tombstones (exports and backups).
    pub const fn everything() -> Self {
        Self {
            key_prefix: None,
            include_deleted: true,
            limit: None,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `record` passes the prefix/tombstone checks (limit is applied by callers).
    pub fn matches(&self, record: &Record) -> bool {
        if record.deleted && !self.include_deleted {
            return false;
        }
        self.key_prefix
            .as_deref()
            .is_none_or(|prefix| record.key.starts_with(prefix))
    }
}

/// Size summary of a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    pub count: u64,
    pub approx_size_bytes: u64,
}

/// Uniform CRUD + bulk list over named collections.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Tier this backend serves.
    fn id(&self) -> BackendId;

    /// Fetch a record (tombstones included); `None` when absent.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>>;

    /// Store `record` unless the stored version is already at or above it.
    async fn put(&self, record: Record) -> Result<Record>;

    /// Remove a record physically; `Error::NotFound` when absent.
    async fn delete(&self, collection: &str, key: &str) -> Result<()>;

    /// List records of a collection ordered by key.
    async fn list(&self, collection: &str, filter: &ListFilter) -> Result<Vec<Record>>;

    /// Names of collections holding at least one record.
    async fn collections(&self) -> Result<Vec<String>>;

    async fn stats(&self) -> Result<BackendStats>;

    /// Cheap read/write round trip used by health checks.
    async fn probe(&self) -> Result<()> {
        let now = now_ms();
        let marker = Record::new(
            PROBE_COLLECTION,
            "probe",
            serde_json::json!({ "at": now }),
            1,
            now,
            self.id(),
        );
        self.put(marker).await?;
        self.get(PROBE_COLLECTION, "probe").await?;
        self.delete(PROBE_COLLECTION, "probe").await
    }

    /// Attempt to bring a failed backend back (e.g. quarantine a corrupt file).
    /// Returns whether anything was repaired.
    async fn repair(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Remote tier: CRUD plus a change feed.
#[async_trait]
pub trait RemoteStore: StorageBackend {
    /// Records (tombstones included) with `updated_at >= since_ms`, oldest first.
    async fn changes_since(&self, since_ms: i64) -> Result<Vec<Record>>;
}
