//! In-process backend.
//!
//! Used as the remote tier in tests and drills, and as the local tiers when a
//! subsystem runs without a data directory. Latency and outages can be
//! injected to exercise timeouts and failover.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::models::{BackendId, Record};

use super::map::RecordMap;
use super::{BackendStats, ListFilter, RemoteStore, StorageBackend};

#[derive(Debug)]
pub struct MemoryBackend {
    id: BackendId,
    records: Mutex<RecordMap>,
    latency_ms: AtomicU64,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new(id: BackendId) -> Self {
        Self {
            id,
            records: Mutex::new(RecordMap::default()),
            latency_ms: AtomicU64::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Delay every call by `latency` (`None` clears it).
    pub fn set_latency(&self, latency: Option<Duration>) {
        let millis = latency.map_or(0, |latency| {
            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)
        });
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Make every call fail with `BackendUnavailable` until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every stored record, tombstones included.
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.lock().snapshot()
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::unavailable(self.id, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        self.enter().await?;
        Ok(self.records.lock().get(collection, key))
    }

    async fn put(&self, record: Record) -> Result<Record> {
        self.enter().await?;
        Ok(self.records.lock().put(record).0)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.enter().await?;
        self.records.lock().delete(collection, key).map(|_| ())
    }

    async fn list(&self, collection: &str, filter: &ListFilter) -> Result<Vec<Record>> {
        self.enter().await?;
        Ok(self.records.lock().list(collection, filter))
    }

    async fn collections(&self) -> Result<Vec<String>> {
        self.enter().await?;
        Ok(self.records.lock().collections())
    }

    async fn stats(&self) -> Result<BackendStats> {
        self.enter().await?;
        Ok(self.records.lock().stats())
    }
}

#[async_trait]
impl RemoteStore for MemoryBackend {
    async fn changes_since(&self, since_ms: i64) -> Result<Vec<Record>> {
        self.enter().await?;
        Ok(self.records.lock().changes_since(since_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn put_get_list_round_trip() {
        let backend = MemoryBackend::new(BackendId::Embedded);
        backend
            .put(Record::new("cart", "42", json!({"qty": 1}), 1, 10, BackendId::Embedded))
            .await
            .unwrap();
        backend
            .put(Record::tombstone("cart", "43", 1, 11, BackendId::Embedded))
            .await
            .unwrap();

        let stored = backend.get("cart", "42").await.unwrap().unwrap();
        assert_eq!(stored.value, json!({"qty": 1}));
        assert_eq!(backend.list("cart", &ListFilter::default()).await.unwrap().len(), 1);
        assert_eq!(backend.stats().await.unwrap().count, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_leaves_no_trace() {
        let backend = MemoryBackend::new(BackendId::Remote);
        backend.probe().await.unwrap();
        backend.probe().await.unwrap();
        assert!(backend.collections().await.unwrap().is_empty());
        assert!(backend.snapshot().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_backend_reports_unavailable() {
        let backend = MemoryBackend::new(BackendId::Remote);
        backend.set_offline(true);
        assert!(backend.probe().await.unwrap_err().is_unavailable());
        backend.set_offline(false);
        backend.probe().await.unwrap();
    }
}
