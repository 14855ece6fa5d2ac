//! Last-resort local key/value store.
//!
//! The whole table lives in memory and is flushed to a single JSON file after
//! every mutation (temp file + rename). A failed flush rolls the in-memory
//! change back so the file and the table never disagree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::models::{BackendId, Record};
use crate::util::{read_json_file, write_json_atomic};

use super::map::RecordMap;
use super::{BackendStats, ListFilter, StorageBackend};

#[derive(Debug)]
pub struct KeyValueBackend {
    path: Option<PathBuf>,
    records: Mutex<RecordMap>,
}

impl KeyValueBackend {
    /// Open (or create) the store file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = read_json_file::<Vec<Record>>(&path)?.unwrap_or_default();
        tracing::debug!(
            "Opened key/value store at {} with {} records",
            path.display(),
            records.len()
        );
        Ok(Self {
            path: Some(path),
            records: Mutex::new(RecordMap::from_records(records)),
        })
    }

    /// Non-persistent store.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(RecordMap::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply `change` to a copy of the table, flush it, then commit.
    fn mutate<T>(&self, change: impl FnOnce(&mut RecordMap) -> Result<(T, bool)>) -> Result<T> {
        let mut records = self.records.lock();
        let mut next = records.clone();
        let (output, changed) = change(&mut next)?;
        if changed {
            if let Some(path) = &self.path {
                write_json_atomic(path, &next.snapshot())?;
            }
            *records = next;
        }
        Ok(output)
    }
}

#[async_trait]
impl StorageBackend for KeyValueBackend {
    fn id(&self) -> BackendId {
        BackendId::KeyValue
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        Ok(self.records.lock().get(collection, key))
    }

    async fn put(&self, record: Record) -> Result<Record> {
        self.mutate(|records| Ok(records.put(record)))
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.mutate(|records| records.delete(collection, key).map(|_| ((), true)))
    }

    async fn list(&self, collection: &str, filter: &ListFilter) -> Result<Vec<Record>> {
        Ok(self.records.lock().list(collection, filter))
    }

    async fn collections(&self) -> Result<Vec<String>> {
        Ok(self.records.lock().collections())
    }

    async fn stats(&self) -> Result<BackendStats> {
        Ok(self.records.lock().stats())
    }

    /// Besides the round trip, check that the backing directory is still writable.
    async fn probe(&self) -> Result<()> {
        if let Some(parent) = self.path.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(Error::unavailable(
                    BackendId::KeyValue,
                    format!("{} is missing", parent.display()),
                ));
            }
        }
        let probe = Record::new(
            super::PROBE_COLLECTION,
            "probe",
            serde_json::Value::Null,
            1,
            crate::util::now_ms(),
            BackendId::KeyValue,
        );
        self.put(probe).await?;
        self.delete(super::PROBE_COLLECTION, "probe").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn records_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("kv.json");

        let store = KeyValueBackend::open(&path).unwrap();
        store
            .put(Record::new("profile", "7", json!({"name": "Ada"}), 1, 5, BackendId::KeyValue))
            .await
            .unwrap();
        store
            .put(Record::new("profile", "7", json!({"name": "Ada L."}), 2, 6, BackendId::KeyValue))
            .await
            .unwrap();
        drop(store);

        let reopened = KeyValueBackend::open(&path).unwrap();
        let record = reopened.get("profile", "7").await.unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.value, json!({"name": "Ada L."}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_put_is_a_no_op() {
        let store = KeyValueBackend::in_memory();
        store
            .put(Record::new("c", "k", json!(2), 2, 2, BackendId::KeyValue))
            .await
            .unwrap();
        let stored = store
            .put(Record::new("c", "k", json!(1), 1, 3, BackendId::KeyValue))
            .await
            .unwrap();
        assert_eq!(stored.value, json!(2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_fails_when_directory_disappears() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("data");
        std::fs::create_dir_all(&dir).unwrap();
        let store = KeyValueBackend::open(dir.join("kv.json")).unwrap();
        store.probe().await.unwrap();

        std::fs::remove_dir_all(&dir).unwrap();
        assert!(store.probe().await.is_err());
    }
}
