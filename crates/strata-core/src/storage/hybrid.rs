//! `HybridStorage`: the only entry point callers use for data.
//!
//! Routing priority is Remote > Embedded > KeyValue, driven by the shared
//! [`HealthTable`]. Every write is made durable locally first, then queued for
//! Remote; a write fails only when no local backend accepts it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::backends::{BackendStats, ListFilter, LocalBackend, RemoteBackend};
use crate::error::{Error, Result};
use crate::health::HealthTable;
use crate::locks::KeyLocks;
use crate::models::{
    validate_name, validate_record_key, BackendId, EntryId, Record, RecordKey, SyncQueueEntry,
    SyncStatus,
};
use crate::sync::SyncStore;
use crate::util::now_ms;

/// Result of a foreground write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub record: Record,
    pub entry_id: EntryId,
    /// `Done` when the fast path reached Remote, `Pending` otherwise
    pub sync_status: SyncStatus,
}

/// Result of restoring one archived record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(WriteOutcome),
    /// Local already holds the archived version and value
    Unchanged,
}

pub struct HybridStorage {
    locals: Vec<Arc<LocalBackend>>,
    remote: Option<Arc<RemoteBackend>>,
    health: Arc<HealthTable>,
    queue: Arc<SyncStore>,
    locks: Arc<KeyLocks>,
}

impl std::fmt::Debug for HybridStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridStorage")
            .field(
                "locals",
                &self.locals.iter().map(|local| local.id()).collect::<Vec<_>>(),
            )
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

impl HybridStorage {
    /// `locals` must be given in priority order (Embedded, then KeyValue).
    pub fn new(
        locals: Vec<Arc<LocalBackend>>,
        remote: Option<Arc<RemoteBackend>>,
        health: Arc<HealthTable>,
        queue: Arc<SyncStore>,
        locks: Arc<KeyLocks>,
    ) -> Self {
        Self {
            locals,
            remote,
            health,
            queue,
            locks,
        }
    }

    pub const fn health(&self) -> &Arc<HealthTable> {
        &self.health
    }

    pub const fn queue(&self) -> &Arc<SyncStore> {
        &self.queue
    }

    pub const fn locks(&self) -> &Arc<KeyLocks> {
        &self.locks
    }

    pub const fn remote(&self) -> Option<&Arc<RemoteBackend>> {
        self.remote.as_ref()
    }

    pub fn locals(&self) -> &[Arc<LocalBackend>] {
        &self.locals
    }

    pub fn local(&self, backend: BackendId) -> Option<&Arc<LocalBackend>> {
        self.locals.iter().find(|local| local.id() == backend)
    }

    /// Remote handle when it is configured and currently healthy.
    pub fn remote_usable(&self) -> Option<&Arc<RemoteBackend>> {
        self.remote
            .as_ref()
            .filter(|_| self.health.is_available(BackendId::Remote))
    }

    fn usable_locals(&self) -> impl Iterator<Item = &Arc<LocalBackend>> {
        self.locals
            .iter()
            .filter(|local| self.health.is_available(local.id()))
    }

    /// Write `value` under `(collection, key)` at the next version.
    pub async fn write(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<WriteOutcome> {
        validate_record_key(collection, key)?;
        self.write_unvalidated(collection, key, value).await
    }

    /// `write` without name checks, for reserved collections such as the drill area.
    pub(crate) async fn write_unvalidated(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<WriteOutcome> {
        let record_key = RecordKey::new(collection, key);
        let _guard = self.locks.lock(&record_key).await;

        let head = self.local_head(collection, key).await?;
        let base_version = head.as_ref().map_or(0, |head| head.version);
        let record = Record::new(
            collection,
            key,
            value,
            base_version + 1,
            now_ms(),
            BackendId::Embedded,
        );

        let stored = self.store_local(&record, true).await?;
        Ok(self.enqueue(stored, base_version).await)
    }

    /// Tombstone a live record; `NotFound` when absent or already deleted.
    pub async fn delete(&self, collection: &str, key: &str) -> Result<WriteOutcome> {
        validate_record_key(collection, key)?;
        let record_key = RecordKey::new(collection, key);
        let _guard = self.locks.lock(&record_key).await;

        let head = self
            .local_head(collection, key)
            .await?
            .filter(|head| !head.deleted)
            .ok_or_else(|| Error::NotFound(record_key.to_string()))?;

        let tombstone = Record::tombstone(
            collection,
            key,
            head.version + 1,
            now_ms(),
            BackendId::Embedded,
        );
        let stored = self.store_local(&tombstone, true).await?;
        Ok(self.enqueue(stored, head.version).await)
    }

    /// Highest version visible across Remote and the local tiers; tombstones read as absent.
    pub async fn read(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        validate_name("collection", collection)?;
        validate_name("key", key)?;
        let record_key = RecordKey::new(collection, key);

        let local = self.local_head(collection, key).await;
        let remote = match self.remote_usable() {
            Some(remote) => match remote.get(collection, key).await {
                Ok(found) => Some(found),
                Err(error) => {
                    debug!("Remote read of {record_key} failed, serving local: {error}");
                    None
                }
            },
            None => None,
        };

        let Some(remote) = remote else {
            return local.map(|head| head.filter(|record| !record.deleted));
        };

        let local_head = match local {
            Ok(head) => head,
            Err(error) => {
                warn!("Local read of {record_key} failed, serving remote: {error}");
                None
            }
        };
        let local_version = local_head.as_ref().map_or(0, |head| head.version);

        if let Some(remote_record) = &remote {
            if remote_record.version > local_version {
                self.refresh_mirror(&record_key, remote_record).await;
            }
        }

        let newest = match (local_head, remote) {
            (Some(local), Some(remote)) => Some(if remote.version > local.version {
                remote
            } else {
                local
            }),
            (local, remote) => local.or(remote),
        };
        Ok(newest.filter(|record| !record.deleted))
    }

    /// Copy a newer remote record into the local tiers unless local writes are queued.
    async fn refresh_mirror(&self, record_key: &RecordKey, remote_record: &Record) {
        if self.queue.has_unfinished(record_key) {
            return;
        }
        let _guard = self.locks.lock(record_key).await;
        if self.queue.has_unfinished(record_key) {
            return;
        }
        match self.store_local(remote_record, false).await {
            Ok(_) => debug!(
                "Refreshed local mirror of {record_key} to version {}",
                remote_record.version
            ),
            Err(error) => warn!("Failed to refresh local mirror of {record_key}: {error}"),
        }
    }

    /// Merged listing of the local tiers, keeping the highest version per key.
    pub async fn list(&self, collection: &str, filter: &ListFilter) -> Result<Vec<Record>> {
        validate_name("collection", collection)?;
        let scan = ListFilter {
            key_prefix: filter.key_prefix.clone(),
            include_deleted: true,
            limit: None,
        };

        let mut merged: BTreeMap<String, Record> = BTreeMap::new();
        let mut reached = false;
        for local in self.usable_locals() {
            match local.list(collection, &scan).await {
                Ok(records) => {
                    reached = true;
                    for record in records {
                        keep_newest(&mut merged, record.key.clone(), record);
                    }
                }
                Err(error) => warn!("Listing {collection} on {} failed: {error}", local.id()),
            }
        }
        if !reached {
            return Err(all_locals_failed("list"));
        }

        let records = merged.into_values().filter(|record| filter.matches(record));
        Ok(match filter.limit {
            Some(limit) => records.take(limit).collect(),
            None => records.collect(),
        })
    }

    /// Every record (tombstones included) across available local tiers,
    /// deduplicated by `(collection, key)` keeping the highest version.
    pub async fn export_all(&self) -> Result<Vec<Record>> {
        let mut merged: BTreeMap<RecordKey, Record> = BTreeMap::new();
        let mut reached = false;
        for local in self.usable_locals() {
            let collections = match local.collections().await {
                Ok(collections) => collections,
                Err(error) => {
                    warn!("Export skipped {}: {error}", local.id());
                    continue;
                }
            };
            reached = true;
            for collection in collections {
                match local.list(&collection, &ListFilter::everything()).await {
                    Ok(records) => {
                        for record in records {
                            keep_newest(&mut merged, record.record_key(), record);
                        }
                    }
                    Err(error) => warn!("Export of {collection} on {} failed: {error}", local.id()),
                }
            }
        }
        if !reached {
            return Err(all_locals_failed("export"));
        }
        Ok(merged.into_values().collect())
    }

    /// Write an archived record without letting the local version go backwards.
    ///
    /// The archive version is kept when local is not newer; otherwise the
    /// archived value is written at local + 1. A local head at or above the
    /// archived version that already holds the archived value is left alone.
    pub async fn restore_record(&self, archived: Record) -> Result<RestoreOutcome> {
        validate_record_key(&archived.collection, &archived.key)?;
        let record_key = archived.record_key();
        let _guard = self.locks.lock(&record_key).await;

        let head = self
            .local_head(&archived.collection, &archived.key)
            .await?;
        let (record, base_version) = match head {
            Some(head) if head.version >= archived.version && head.same_content(&archived) => {
                return Ok(RestoreOutcome::Unchanged);
            }
            Some(head) if head.version >= archived.version => (
                Record {
                    version: head.version + 1,
                    updated_at: now_ms(),
                    ..archived
                },
                head.version,
            ),
            Some(head) => (archived, head.version),
            None => (archived, 0),
        };

        let stored = self.store_local(&record, true).await?;
        Ok(RestoreOutcome::Restored(
            self.enqueue(stored, base_version).await,
        ))
    }

    /// Highest-version local copy of a key, tombstones included.
    ///
    /// Fails with `StorageUnavailable` only when no local tier answered.
    pub async fn local_head(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        let mut head: Option<Record> = None;
        let mut reached = false;
        for local in self.usable_locals() {
            match local.get(collection, key).await {
                Ok(found) => {
                    reached = true;
                    if let Some(found) = found {
                        if head.as_ref().is_none_or(|head| found.version > head.version) {
                            head = Some(found);
                        }
                    }
                }
                Err(error) => warn!("Read of {collection}/{key} on {} failed: {error}", local.id()),
            }
        }
        if reached {
            Ok(head)
        } else {
            Err(all_locals_failed("read"))
        }
    }

    /// Make `record` durable on the first local tier that accepts it and mirror it
    /// to the others. With `stamp_origin` the record is attributed to that tier.
    pub(crate) async fn store_local(&self, record: &Record, stamp_origin: bool) -> Result<Record> {
        let mut primary: Option<Record> = None;
        for local in self.usable_locals() {
            let mut candidate = record.clone();
            if stamp_origin {
                candidate.origin = primary.as_ref().map_or(local.id(), |stored| stored.origin);
            }
            match local.put(candidate).await {
                Ok(stored) if primary.is_none() => {
                    debug!(
                        "Stored {}/{} v{} on {}",
                        stored.collection,
                        stored.key,
                        stored.version,
                        local.id()
                    );
                    primary = Some(stored);
                }
                Ok(_) => {}
                Err(error) if primary.is_none() => {
                    warn!("Local write to {} failed, falling back: {error}", local.id());
                }
                Err(error) => warn!("Mirror write to {} failed: {error}", local.id()),
            }
        }
        primary.ok_or_else(|| all_locals_failed("write"))
    }

    /// Append the queue entry for a locally durable record and try the fast path.
    pub(crate) async fn enqueue(&self, record: Record, base_version: u64) -> WriteOutcome {
        let record_key = record.record_key();
        let fast_path = self
            .remote_usable()
            .filter(|_| !self.queue.has_unfinished(&record_key))
            .cloned();

        let mut entry = SyncQueueEntry::for_record(&record, base_version, now_ms());
        if fast_path.is_some() {
            entry.status = SyncStatus::InFlight;
        }
        let entry = self.queue.append(entry);

        let sync_status = match fast_path {
            Some(remote) if entry.blocked_by.is_none() => {
                self.push_direct(&remote, &record, entry.id).await
            }
            _ => {
                if entry.status != SyncStatus::Pending {
                    self.queue.set_status(entry.id, SyncStatus::Pending);
                }
                SyncStatus::Pending
            }
        };

        WriteOutcome {
            record,
            entry_id: entry.id,
            sync_status,
        }
    }

    /// Fast path: write straight to Remote. Anything but an exact acknowledgement
    /// leaves the entry pending for the drain, which owns conflict handling.
    async fn push_direct(&self, remote: &RemoteBackend, record: &Record, entry_id: EntryId) -> SyncStatus {
        let record_key = record.record_key();
        match remote.put(record.clone()).await {
            Ok(stored) if stored.version == record.version && stored.same_content(record) => {
                self.queue.remove(&[entry_id]);
                debug!("Synced {record_key} v{} directly", record.version);
                SyncStatus::Done
            }
            Ok(stored) => {
                debug!(
                    "Remote holds {record_key} v{}; leaving v{} for the drain",
                    stored.version, record.version
                );
                self.queue.set_status(entry_id, SyncStatus::Pending);
                SyncStatus::Pending
            }
            Err(error) => {
                warn!("Direct sync of {record_key} failed, queued: {error}");
                self.queue.update(entry_id, |entry| {
                    entry.status = SyncStatus::Pending;
                    entry.last_error = Some(error.to_string());
                });
                SyncStatus::Pending
            }
        }
    }

    /// Size of every available local tier.
    pub async fn local_stats(&self) -> Vec<(BackendId, BackendStats)> {
        let mut stats = Vec::new();
        for local in self.usable_locals() {
            match local.stats().await {
                Ok(backend_stats) => stats.push((local.id(), backend_stats)),
                Err(error) => debug!("Stats unavailable for {}: {error}", local.id()),
            }
        }
        stats
    }
}

fn keep_newest<K: Ord>(merged: &mut BTreeMap<K, Record>, key: K, record: Record) {
    match merged.get(&key) {
        Some(existing) if existing.version >= record.version => {}
        _ => {
            merged.insert(key, record);
        }
    }
}

fn all_locals_failed(operation: &str) -> Error {
    error!("Every local backend failed during {operation}");
    Error::StorageUnavailable(format!("no local backend could {operation}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Guarded, MemoryBackend, RemoteStore, StorageBackend};
    use crate::backoff::BackoffPolicy;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        hybrid: HybridStorage,
        remote: Arc<MemoryBackend>,
        embedded: Arc<MemoryBackend>,
        key_value: Arc<MemoryBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            let remote = Arc::new(MemoryBackend::new(BackendId::Remote));
            let embedded = Arc::new(MemoryBackend::new(BackendId::Embedded));
            let key_value = Arc::new(MemoryBackend::new(BackendId::KeyValue));
            let hybrid = HybridStorage::new(
                vec![
                    Arc::new(Guarded::new(embedded.clone() as Arc<dyn StorageBackend>, None)),
                    Arc::new(Guarded::new(key_value.clone() as Arc<dyn StorageBackend>, None)),
                ],
                Some(Arc::new(Guarded::new(remote.clone() as Arc<dyn RemoteStore>, None))),
                Arc::new(HealthTable::new(true, 1)),
                Arc::new(SyncStore::in_memory()),
                Arc::new(KeyLocks::new()),
            );
            Self {
                hybrid,
                remote,
                embedded,
                key_value,
            }
        }

        fn mark_down(&self, backend: BackendId) {
            self.hybrid
                .health()
                .record_failure(backend, now_ms(), "test outage", &BackoffPolicy::default());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn healthy_remote_write_takes_fast_path() {
        let fixture = Fixture::new();
        let outcome = fixture
            .hybrid
            .write("cart", "42", json!({"qty": 1}))
            .await
            .unwrap();

        assert_eq!(outcome.sync_status, SyncStatus::Done);
        assert_eq!(outcome.record.version, 1);
        assert_eq!(outcome.record.origin, BackendId::Embedded);
        assert_eq!(fixture.hybrid.queue().pending_count(), 0);
        assert_eq!(fixture.remote.snapshot().len(), 1);
        assert_eq!(fixture.key_value.snapshot().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_down_write_is_queued() {
        let fixture = Fixture::new();
        fixture.mark_down(BackendId::Remote);

        let outcome = fixture
            .hybrid
            .write("cart", "42", json!({"qty": 2}))
            .await
            .unwrap();
        assert_eq!(outcome.sync_status, SyncStatus::Pending);
        assert_eq!(fixture.hybrid.queue().pending_count(), 1);
        assert!(fixture.remote.snapshot().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn earlier_pending_entry_disables_fast_path() {
        let fixture = Fixture::new();
        fixture.mark_down(BackendId::Remote);
        fixture.hybrid.write("cart", "42", json!(1)).await.unwrap();

        fixture
            .hybrid
            .health()
            .record_success(BackendId::Remote, now_ms());
        let second = fixture.hybrid.write("cart", "42", json!(2)).await.unwrap();

        assert_eq!(second.sync_status, SyncStatus::Pending);
        assert_eq!(fixture.hybrid.queue().pending_count(), 2);
        assert!(fixture.remote.snapshot().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn versions_increase_per_key() {
        let fixture = Fixture::new();
        let mut last = 0;
        for qty in 0..5 {
            let outcome = fixture
                .hybrid
                .write("cart", "42", json!({"qty": qty}))
                .await
                .unwrap();
            assert!(outcome.record.version > last);
            last = outcome.record.version;
        }
        assert_eq!(last, 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn embedded_outage_falls_back_to_key_value() {
        let fixture = Fixture::new();
        fixture.embedded.set_offline(true);

        let outcome = fixture.hybrid.write("cart", "7", json!("x")).await.unwrap();
        assert_eq!(outcome.record.origin, BackendId::KeyValue);
        assert_eq!(
            fixture.hybrid.read("cart", "7").await.unwrap().unwrap().value,
            json!("x")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn all_locals_down_is_storage_unavailable() {
        let fixture = Fixture::new();
        fixture.embedded.set_offline(true);
        fixture.key_value.set_offline(true);

        let error = fixture.hybrid.write("cart", "1", json!(1)).await.unwrap_err();
        assert!(matches!(error, Error::StorageUnavailable(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_prefers_newer_remote_and_refreshes_mirror() {
        let fixture = Fixture::new();
        fixture.hybrid.write("profile", "7", json!({"name": "A"})).await.unwrap();
        fixture
            .remote
            .put(Record::new("profile", "7", json!({"name": "B"}), 4, now_ms(), BackendId::Remote))
            .await
            .unwrap();

        let record = fixture.hybrid.read("profile", "7").await.unwrap().unwrap();
        assert_eq!(record.version, 4);
        let mirrored = fixture.embedded.get("profile", "7").await.unwrap().unwrap();
        assert_eq!(mirrored.value, json!({"name": "B"}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_writes_tombstone_and_reads_absent() {
        let fixture = Fixture::new();
        fixture.hybrid.write("cart", "42", json!(1)).await.unwrap();
        let outcome = fixture.hybrid.delete("cart", "42").await.unwrap();

        assert!(outcome.record.deleted);
        assert_eq!(outcome.record.version, 2);
        assert!(fixture.hybrid.read("cart", "42").await.unwrap().is_none());
        assert!(matches!(
            fixture.hybrid.delete("cart", "42").await,
            Err(Error::NotFound(_))
        ));
        assert!(fixture.remote.snapshot()[0].deleted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_and_export_merge_local_tiers() {
        let fixture = Fixture::new();
        fixture.mark_down(BackendId::Remote);
        fixture
            .embedded
            .put(Record::new("cart", "a", json!("old"), 1, 1, BackendId::Embedded))
            .await
            .unwrap();
        fixture
            .key_value
            .put(Record::new("cart", "a", json!("new"), 2, 2, BackendId::KeyValue))
            .await
            .unwrap();
        fixture
            .key_value
            .put(Record::new("cart", "b", json!("only-kv"), 1, 1, BackendId::KeyValue))
            .await
            .unwrap();

        let listed = fixture
            .hybrid
            .list("cart", &ListFilter::default())
            .await
            .unwrap();
        assert_eq!(
            listed.iter().map(|r| r.value.clone()).collect::<Vec<_>>(),
            vec![json!("new"), json!("only-kv")]
        );

        let exported = fixture.hybrid.export_all().await.unwrap();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].version, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_record_never_lowers_versions() {
        let fixture = Fixture::new();
        fixture.mark_down(BackendId::Remote);
        for qty in 1..=3 {
            fixture.hybrid.write("cart", "42", json!({"qty": qty})).await.unwrap();
        }

        let archived = Record::new("cart", "42", json!({"qty": 1}), 1, 1, BackendId::Embedded);
        let RestoreOutcome::Restored(outcome) =
            fixture.hybrid.restore_record(archived).await.unwrap()
        else {
            panic!("expected a restore write");
        };
        assert_eq!(outcome.record.version, 4);
        assert_eq!(outcome.record.value, json!({"qty": 1}));

        let same = outcome.record.clone();
        assert_eq!(
            fixture.hybrid.restore_record(same).await.unwrap(),
            RestoreOutcome::Unchanged
        );

        let fresh = Record::new("cart", "99", json!("new"), 7, 1, BackendId::Embedded);
        let RestoreOutcome::Restored(outcome) = fixture.hybrid.restore_record(fresh).await.unwrap()
        else {
            panic!("expected a restore write");
        };
        assert_eq!(outcome.record.version, 7);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reserved_collections_are_rejected() {
        let fixture = Fixture::new();
        assert!(matches!(
            fixture.hybrid.write("__health", "probe", json!(1)).await,
            Err(Error::Validation(_))
        ));
    }
}
