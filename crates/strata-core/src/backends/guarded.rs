//! Timeout and availability guard around a backend.
//!
//! Every call made by the hybrid layer, the sync drain and the health prober
//! goes through a [`Guarded`] handle so that:
//! - slow calls are cut off and reported as `BackendUnavailable`,
//! - raw transport errors (libSQL, I/O, HTTP) are normalized to `BackendUnavailable`,
//! - a backend can be forced offline for recovery drills.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{BackendId, Record};

use super::{BackendStats, ListFilter, RemoteStore, StorageBackend};

/// Guarded local backend.
pub type LocalBackend = Guarded<dyn StorageBackend>;
/// Guarded remote backend.
pub type RemoteBackend = Guarded<dyn RemoteStore>;

pub struct Guarded<B: ?Sized> {
    id: BackendId,
    timeout: Option<Duration>,
    forced_offline: AtomicBool,
    inner: Arc<B>,
}

impl<B: ?Sized> std::fmt::Debug for Guarded<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guarded")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("forced_offline", &self.is_forced_offline())
            .finish_non_exhaustive()
    }
}

impl<B: ?Sized> Guarded<B> {
    pub const fn id(&self) -> BackendId {
        self.id
    }

    /// Simulate (or end) an outage; calls fail fast while set.
    pub fn set_forced_offline(&self, offline: bool) {
        self.forced_offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_forced_offline(&self) -> bool {
        self.forced_offline.load(Ordering::SeqCst)
    }

    async fn guard<T>(&self, op: &str, call: impl Future<Output = Result<T>> + Send) -> Result<T> {
        if self.is_forced_offline() {
            return Err(Error::unavailable(self.id, "forced offline"));
        }

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                Error::unavailable(
                    self.id,
                    format!("{op} timed out after {}ms", limit.as_millis()),
                )
            })?,
            None => call.await,
        };

        outcome.map_err(|error| match error {
            Error::LibSql(_) | Error::Io(_) | Error::Http(_) => {
                Error::unavailable(self.id, format!("{op} failed: {error}"))
            }
            other => other,
        })
    }
}

impl<B: StorageBackend + ?Sized> Guarded<B> {
    pub fn new(inner: Arc<B>, timeout: Option<Duration>) -> Self {
        Self {
            id: inner.id(),
            timeout,
            forced_offline: AtomicBool::new(false),
            inner,
        }
    }

    pub async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        self.guard("get", self.inner.get(collection, key)).await
    }

    pub async fn put(&self, record: Record) -> Result<Record> {
        self.guard("put", self.inner.put(record)).await
    }

    pub async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.guard("delete", self.inner.delete(collection, key))
            .await
    }

    pub async fn list(&self, collection: &str, filter: &ListFilter) -> Result<Vec<Record>> {
        self.guard("list", self.inner.list(collection, filter))
            .await
    }

    pub async fn collections(&self) -> Result<Vec<String>> {
        self.guard("collections", self.inner.collections()).await
    }

    pub async fn stats(&self) -> Result<BackendStats> {
        self.guard("stats", self.inner.stats()).await
    }

    pub async fn probe(&self) -> Result<()> {
        self.guard("probe", self.inner.probe()).await
    }

    /// Repair runs even when forced offline; only the timeout applies.
    pub async fn repair(&self) -> Result<bool> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.repair())
                .await
                .map_err(|_| Error::unavailable(self.id, "repair timed out"))?,
            None => self.inner.repair().await,
        }
    }
}

impl<B: RemoteStore + ?Sized> Guarded<B> {
    pub async fn changes_since(&self, since_ms: i64) -> Result<Vec<Record>> {
        self.guard("changes_since", self.inner.changes_since(since_ms))
            .await
    }
}
