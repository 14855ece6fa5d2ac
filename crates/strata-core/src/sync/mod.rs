//! Sync service: drains the durable queue against Remote and settles conflicts.
//!
//! Entry lifecycle: `Pending -> InFlight -> Done` (removed), or
//! `InFlight -> Failed { terminal: false } -> (backoff) -> InFlight`, ending in
//! `Failed { terminal: true }` once the retry budget is spent. Entries of one
//! key are applied strictly in enqueue order.

mod merge;
mod store;

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backends::RemoteBackend;
use crate::cancel::CancelFlag;
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::models::{
    BackendId, ConflictId, ConflictRecord, ConflictResolution, ManualChoice, Record, RecordKey,
    SyncQueueEntry, SyncStatus,
};
use crate::state::SyncState;
use crate::storage::{HybridStorage, WriteOutcome};
use crate::util::now_ms;
use crate::worker::PeriodicWorker;

pub use merge::{local_wins, merge_values, resolve};
pub use store::{SyncStore, DEFAULT_CONFLICT_HISTORY};

/// Counts from one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries acknowledged by Remote
    pub applied: usize,
    /// Conflicts settled automatically
    pub conflicts_resolved: usize,
    /// Conflicts parked for an operator
    pub conflicts_pending: usize,
    /// Entries rescheduled after a transport failure
    pub retried: usize,
    /// Entries that exhausted their retry budget
    pub failed: usize,
    /// Remote was unavailable; nothing was attempted
    pub remote_unavailable: bool,
}

impl DrainReport {
    fn absorb(&mut self, other: &Self) {
        self.applied += other.applied;
        self.conflicts_resolved += other.conflicts_resolved;
        self.conflicts_pending += other.conflicts_pending;
        self.retried += other.retried;
        self.failed += other.failed;
    }

    const fn hit_transport_failure(&self) -> bool {
        self.retried > 0 || self.failed > 0
    }
}

/// Result of `perform_full_sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub drain: DrainReport,
    /// Remote changes examined
    pub pulled: usize,
    /// Newer remote records copied into the local tiers
    pub mirrored: usize,
    /// Remote changes that met queued local writes
    pub reconciled: usize,
    pub cancelled: bool,
    pub cursor_ms: i64,
}

/// Marks the service busy for the lifetime of the guard.
struct Activity<'a>(&'a AtomicUsize);

impl<'a> Activity<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Activity<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct SyncService {
    hybrid: Arc<HybridStorage>,
    settings: SyncSettings,
    active: AtomicUsize,
    last_sync_at: AtomicI64,
    drain_lock: tokio::sync::Mutex<()>,
}

impl SyncService {
    pub fn new(hybrid: Arc<HybridStorage>, settings: SyncSettings) -> Self {
        Self {
            hybrid,
            settings,
            active: AtomicUsize::new(0),
            last_sync_at: AtomicI64::new(0),
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn queue(&self) -> &SyncStore {
        self.hybrid.queue()
    }

    /// One pass over every key whose oldest entry is due.
    ///
    /// Stops at the first transport failure; the remaining keys wait for the
    /// next pass.
    pub async fn drain(&self) -> DrainReport {
        let _running = self.drain_lock.lock().await;
        let mut report = DrainReport::default();
        let Some(remote) = self.hybrid.remote_usable().cloned() else {
            report.remote_unavailable = true;
            return report;
        };
        let _activity = Activity::enter(&self.active);

        let keys = self.queue().ready_keys(now_ms());
        if !keys.is_empty() {
            debug!("Draining {} keys", keys.len());
        }
        for key in keys {
            let outcome = self.sync_key(&remote, &key, false).await;
            report.absorb(&outcome);
            if outcome.hit_transport_failure() {
                break;
            }
        }

        self.last_sync_at.store(now_ms(), Ordering::SeqCst);
        if report != DrainReport::default() {
            info!(
                applied = report.applied,
                conflicts = report.conflicts_resolved + report.conflicts_pending,
                retried = report.retried,
                failed = report.failed,
                "Sync drain finished"
            );
        }
        report
    }

    /// Apply the queued entries of one key in order.
    ///
    /// With `force` the backoff schedule is ignored (pull reconciliation).
    async fn sync_key(&self, remote: &RemoteBackend, key: &RecordKey, force: bool) -> DrainReport {
        let _guard = self.hybrid.locks().lock(key).await;
        let mut report = DrainReport::default();

        loop {
            let entries = self.queue().unfinished_for(key);
            let Some(head) = entries.first().cloned() else {
                break;
            };
            let due = if force {
                head.blocked_by.is_none() && !head.is_terminal()
            } else {
                head.is_ready(now_ms())
            };
            if !due {
                break;
            }

            self.queue().set_status(head.id, SyncStatus::InFlight);
            let current = match remote.get(&key.collection, &key.key).await {
                Ok(current) => current,
                Err(error) => {
                    self.record_failure(&head, &error, &mut report);
                    break;
                }
            };

            let outgoing = head.to_record(BackendId::Embedded);
            let stale_remote = match current {
                Some(current) if current.version > head.base_version => {
                    if current.version >= head.version && current.same_content(&outgoing) {
                        self.queue().remove(&[head.id]);
                        report.applied += 1;
                        continue;
                    }
                    current
                }
                _ => match remote.put(outgoing.clone()).await {
                    Ok(stored)
                        if stored.version == outgoing.version && stored.same_content(&outgoing) =>
                    {
                        self.queue().remove(&[head.id]);
                        report.applied += 1;
                        continue;
                    }
                    Ok(stored) => stored,
                    Err(error) => {
                        self.record_failure(&head, &error, &mut report);
                        break;
                    }
                },
            };

            self.handle_conflict(remote, key, &entries, stale_remote, &mut report)
                .await;
            break;
        }

        report
    }

    /// Fold every queued entry of `key` and settle the local head against `remote_record`.
    async fn handle_conflict(
        &self,
        remote: &RemoteBackend,
        key: &RecordKey,
        entries: &[SyncQueueEntry],
        remote_record: Record,
        report: &mut DrainReport,
    ) {
        let Some(head) = entries.first() else {
            return;
        };
        let local = match self.hybrid.local_head(&key.collection, &key.key).await {
            Ok(Some(local)) => local,
            Ok(None) => match entries.last() {
                Some(last) => last.to_record(BackendId::Embedded),
                None => return,
            },
            Err(error) => {
                self.record_failure(head, &error, report);
                return;
            }
        };
        let now = now_ms();

        let Some((resolved, resolution)) = resolve(
            &local,
            &remote_record,
            self.settings.conflict_strategy,
            self.settings.merge_mode,
        ) else {
            let conflict = ConflictRecord::detect(
                &local,
                &remote_record,
                ConflictResolution::ManualPending,
                now,
            );
            warn!(
                conflict_id = %conflict.id,
                "Conflict on {key} (local v{}, remote v{}) awaits manual resolution",
                local.version,
                remote_record.version
            );
            self.queue().push_conflict(conflict);
            report.conflicts_pending += 1;
            return;
        };

        match remote.put(resolved.clone()).await {
            Ok(stored) if stored.version == resolved.version => {}
            Ok(stored) => {
                let error = Error::unavailable(
                    BackendId::Remote,
                    format!("remote moved to v{} during resolution", stored.version),
                );
                self.record_failure(head, &error, report);
                return;
            }
            Err(error) => {
                self.record_failure(head, &error, report);
                return;
            }
        }

        if let Err(error) = self.hybrid.store_local(&resolved, false).await {
            warn!("Resolved {key} reached Remote but not the local tiers: {error}");
        }

        let mut conflict = ConflictRecord::detect(&local, &remote_record, resolution, now);
        conflict.settle(resolution, resolved.version, now);
        info!(
            conflict_id = %conflict.id,
            "Resolved conflict on {key} with {resolution:?} at v{}",
            resolved.version
        );
        self.queue().push_conflict(conflict);
        let folded = entries.iter().map(|entry| entry.id).collect::<Vec<_>>();
        self.queue().remove(&folded);
        report.conflicts_resolved += 1;
    }

    /// Reschedule `entry` on the backoff policy, or fail it terminally.
    fn record_failure(&self, entry: &SyncQueueEntry, failure: &Error, report: &mut DrainReport) {
        let backoff = &self.settings.backoff;
        let attempts = entry.attempts.saturating_add(1);
        let terminal = backoff.exhausted(attempts) || !failure.is_transient();
        let next_attempt_at = now_ms().saturating_add(backoff.delay_ms(attempts));

        self.queue().update(entry.id, |queued| {
            queued.attempts = attempts;
            queued.next_attempt_at = next_attempt_at;
            queued.last_error = Some(failure.to_string());
            queued.status = SyncStatus::Failed { terminal };
        });

        if terminal {
            error!(
                entry_id = %entry.id,
                attempts,
                "Sync of {}/{} v{} failed permanently: {failure}",
                entry.collection,
                entry.key,
                entry.version
            );
            report.failed += 1;
        } else {
            warn!(
                entry_id = %entry.id,
                attempts,
                "Sync of {}/{} failed, retrying in {}ms: {failure}",
                entry.collection,
                entry.key,
                backoff.delay_ms(attempts)
            );
            report.retried += 1;
        }
    }

    /// Drain, then pull remote changes since the persisted cursor.
    pub async fn perform_full_sync(&self, cancel: &CancelFlag) -> Result<SyncReport> {
        let remote = self
            .hybrid
            .remote_usable()
            .cloned()
            .ok_or_else(|| Error::unavailable(BackendId::Remote, "remote is not available"))?;
        let _activity = Activity::enter(&self.active);

        let mut report = SyncReport {
            drain: self.drain().await,
            ..SyncReport::default()
        };
        if cancel.is_cancelled() {
            report.cancelled = true;
            report.cursor_ms = self.queue().cursor();
            return Ok(report);
        }

        let changes = remote.changes_since(self.queue().cursor()).await?;
        for change in changes {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if change.collection.starts_with("__") {
                continue;
            }

            let key = change.record_key();
            if self.queue().has_unfinished(&key) {
                let outcome = self.sync_key(&remote, &key, true).await;
                report.drain.absorb(&outcome);
                report.reconciled += 1;
            } else if self.mirror_change(&key, &change).await? {
                report.mirrored += 1;
            }

            self.queue().set_cursor(change.updated_at);
            report.pulled += 1;
        }

        report.cursor_ms = self.queue().cursor();
        self.last_sync_at.store(now_ms(), Ordering::SeqCst);
        info!(
            pulled = report.pulled,
            mirrored = report.mirrored,
            reconciled = report.reconciled,
            cancelled = report.cancelled,
            "Full sync finished"
        );
        Ok(report)
    }

    /// Copy a pulled remote record locally when it is newer than the local head.
    async fn mirror_change(&self, key: &RecordKey, change: &Record) -> Result<bool> {
        let _guard = self.hybrid.locks().lock(key).await;
        if self.queue().has_unfinished(key) {
            return Ok(false);
        }
        let head = self.hybrid.local_head(&key.collection, &key.key).await?;
        if head.is_some_and(|head| head.version >= change.version) {
            return Ok(false);
        }
        self.hybrid.store_local(change, false).await?;
        Ok(true)
    }

    /// Settle a `ManualPending` conflict with an operator choice.
    ///
    /// The chosen value is written locally at `max(local, remote) + 1` and queued
    /// for Remote; the entries the conflict was holding back are dropped.
    pub async fn resolve_conflict(&self, id: ConflictId, choice: ManualChoice) -> Result<WriteOutcome> {
        let conflict = self
            .queue()
            .conflict(id)
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;
        if !conflict.is_unresolved() {
            return Err(Error::Validation(format!("conflict {id} is already resolved")));
        }

        let key = conflict.record_key();
        let _guard = self.hybrid.locks().lock(&key).await;

        let local = self.hybrid.local_head(&key.collection, &key.key).await?;
        let remote_current = match self.hybrid.remote_usable() {
            Some(remote) => remote.get(&key.collection, &key.key).await.ok().flatten(),
            None => None,
        };

        let remote_version = remote_current
            .as_ref()
            .map_or(conflict.remote_version, |remote| remote.version)
            .max(conflict.remote_version);
        let local_version = local
            .as_ref()
            .map_or(conflict.local_version, |local| local.version)
            .max(conflict.local_version);
        let version = local_version.max(remote_version) + 1;
        let now = now_ms();

        let (value, deleted) = match choice {
            ManualChoice::KeepLocal => local.map_or_else(
                || (conflict.local_value.clone(), conflict.local_deleted),
                |local| (local.value, local.deleted),
            ),
            ManualChoice::KeepRemote => remote_current.map_or_else(
                || (conflict.remote_value.clone(), conflict.remote_deleted),
                |remote| (remote.value, remote.deleted),
            ),
            ManualChoice::Value(value) => (value, false),
        };
        let record = Record {
            collection: key.collection.clone(),
            key: key.key.clone(),
            value: if deleted { serde_json::Value::Null } else { value },
            version,
            updated_at: now,
            origin: BackendId::Embedded,
            deleted,
        };

        let stored = self.hybrid.store_local(&record, true).await?;
        self.queue().settle_conflict(id, |conflict| {
            conflict.settle(ConflictResolution::Manual, version, now);
        });
        info!(conflict_id = %id, "Manually resolved conflict on {key} at v{version}");
        Ok(self.hybrid.enqueue(stored, remote_version).await)
    }

    /// Re-arm terminally failed entries; returns how many.
    pub fn retry_failed(&self) -> usize {
        let rearmed = self.queue().retry_failed(now_ms());
        if rearmed > 0 {
            info!("Re-armed {rearmed} failed sync entries");
        }
        rearmed
    }

    pub fn pending_count(&self) -> usize {
        self.queue().pending_count()
    }

    pub fn entries(&self) -> Vec<SyncQueueEntry> {
        self.queue().entries()
    }

    pub fn conflicts(&self, limit: Option<usize>) -> Vec<ConflictRecord> {
        self.queue().conflicts(limit)
    }

    pub fn unresolved_conflict_count(&self) -> usize {
        self.queue().unresolved_count()
    }

    pub fn clear_resolved_conflicts(&self) -> usize {
        self.queue().clear_resolved_conflicts()
    }

    /// Last completed drain or full sync (Unix ms); `None` before the first.
    pub fn last_sync_at(&self) -> Option<i64> {
        let at = self.last_sync_at.load(Ordering::SeqCst);
        (at > 0).then_some(at)
    }

    pub fn state(&self) -> SyncState {
        if self.active.load(Ordering::SeqCst) > 0 {
            SyncState::Syncing
        } else if self.hybrid.remote_usable().is_none() {
            SyncState::Offline
        } else if self.queue().terminal_count() > 0 || self.queue().unresolved_count() > 0 {
            SyncState::Error
        } else if self.queue().pending_count() > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        }
    }

    /// Run `drain` every `period` until the worker is stopped.
    pub fn spawn_drain_worker(self: &Arc<Self>, period: Duration) -> PeriodicWorker {
        let service = Arc::clone(self);
        PeriodicWorker::spawn("sync-drain", period, move || {
            let service = Arc::clone(&service);
            async move {
                service.drain().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Guarded, MemoryBackend, RemoteStore, StorageBackend};
    use crate::backoff::BackoffPolicy;
    use crate::config::{ConflictStrategy, MergeMode};
    use crate::health::HealthTable;
    use crate::locks::KeyLocks;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        sync: SyncService,
        hybrid: Arc<HybridStorage>,
        remote: Arc<MemoryBackend>,
    }

    impl Fixture {
        fn new(strategy: ConflictStrategy) -> Self {
            let remote = Arc::new(MemoryBackend::new(BackendId::Remote));
            let hybrid = Arc::new(HybridStorage::new(
                vec![
                    Arc::new(Guarded::new(
                        Arc::new(MemoryBackend::new(BackendId::Embedded)) as Arc<dyn StorageBackend>,
                        None,
                    )),
                    Arc::new(Guarded::new(
                        Arc::new(MemoryBackend::new(BackendId::KeyValue)) as Arc<dyn StorageBackend>,
                        None,
                    )),
                ],
                Some(Arc::new(Guarded::new(remote.clone() as Arc<dyn RemoteStore>, None))),
                Arc::new(HealthTable::new(true, 1)),
                Arc::new(SyncStore::in_memory()),
                Arc::new(KeyLocks::new()),
            ));
            let settings = SyncSettings {
                interval_ms: None,
                conflict_strategy: strategy,
                merge_mode: MergeMode::Shallow,
                backoff: BackoffPolicy::immediate(3),
                conflict_history: DEFAULT_CONFLICT_HISTORY,
            };
            Self {
                sync: SyncService::new(hybrid.clone(), settings),
                hybrid,
                remote,
            }
        }

        fn remote_down(&self) {
            self.hybrid.health().record_failure(
                BackendId::Remote,
                now_ms(),
                "outage",
                &BackoffPolicy::default(),
            );
        }

        fn remote_up(&self) {
            self.hybrid.health().record_success(BackendId::Remote, now_ms());
        }

        async fn remote_value(&self, collection: &str, key: &str) -> Option<Record> {
            self.remote.get(collection, key).await.unwrap()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cart_write_survives_outage_and_drains() {
        let fixture = Fixture::new(ConflictStrategy::LastWriteWins);

        let first = fixture.hybrid.write("cart", "42", json!({"qty": 1})).await.unwrap();
        assert_eq!(first.sync_status, SyncStatus::Done);

        fixture.remote_down();
        let second = fixture.hybrid.write("cart", "42", json!({"qty": 2})).await.unwrap();
        assert_eq!(second.sync_status, SyncStatus::Pending);
        assert_eq!(
            fixture.hybrid.read("cart", "42").await.unwrap().unwrap().value,
            json!({"qty": 2})
        );
        assert_eq!(fixture.sync.state(), SyncState::Offline);

        fixture.remote_up();
        let report = fixture.sync.drain().await;
        assert_eq!(report.applied, 1);

        let remote = fixture.remote_value("cart", "42").await.unwrap();
        assert_eq!(remote.value, json!({"qty": 2}));
        assert_eq!(remote.version, 2);
        assert_eq!(fixture.sync.pending_count(), 0);
        assert_eq!(fixture.sync.state(), SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn profile_conflict_converges_with_last_write_wins() {
        let fixture = Fixture::new(ConflictStrategy::LastWriteWins);
        fixture
            .hybrid
            .write("profile", "7", json!({"name": "initial"}))
            .await
            .unwrap();

        fixture.remote_down();
        let local = fixture
            .hybrid
            .write("profile", "7", json!({"name": "A"}))
            .await
            .unwrap();
        assert_eq!(local.record.version, 2);

        // Another writer reached Remote with the same version five milliseconds later
        fixture
            .remote
            .put(Record::new(
                "profile",
                "7",
                json!({"name": "B"}),
                2,
                local.record.updated_at + 5,
                BackendId::Remote,
            ))
            .await
            .unwrap();

        fixture.remote_up();
        let report = fixture.sync.drain().await;
        assert_eq!(report.conflicts_resolved, 1);

        let remote = fixture.remote_value("profile", "7").await.unwrap();
        assert_eq!(remote.value, json!({"name": "B"}));
        assert_eq!(remote.version, 3);

        let local = fixture.hybrid.local_head("profile", "7").await.unwrap().unwrap();
        assert_eq!(local.value, json!({"name": "B"}));
        assert_eq!(local.version, 3);

        let conflicts = fixture.sync.conflicts(None);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].resolution, ConflictResolution::LastWriteWins);
        assert_eq!(conflicts[0].resolved_version, Some(3));
        assert_eq!(fixture.sync.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entries_of_one_key_apply_in_order() {
        let fixture = Fixture::new(ConflictStrategy::LastWriteWins);
        fixture.remote_down();
        for qty in 1..=4 {
            fixture.hybrid.write("cart", "9", json!({"qty": qty})).await.unwrap();
        }
        assert_eq!(fixture.sync.pending_count(), 4);

        fixture.remote_up();
        let report = fixture.sync.drain().await;
        assert_eq!(report.applied, 4);
        assert_eq!(report.conflicts_resolved, 0);

        let remote = fixture.remote_value("cart", "9").await.unwrap();
        assert_eq!(remote.version, 4);
        assert_eq!(remote.value, json!({"qty": 4}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transport_failures_back_off_then_fail_terminally() {
        let fixture = Fixture::new(ConflictStrategy::LastWriteWins);
        fixture.remote_down();
        fixture.hybrid.write("cart", "1", json!(1)).await.unwrap();
        fixture.remote_up();
        fixture.remote.set_offline(true);

        let first = fixture.sync.drain().await;
        assert_eq!(first.retried, 1);
        fixture.sync.drain().await;
        let last = fixture.sync.drain().await;
        assert_eq!(last.failed, 1);

        let entries = fixture.sync.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, SyncStatus::Failed { terminal: true });
        assert_eq!(entries[0].attempts, 3);
        assert_eq!(fixture.sync.state(), SyncState::Error);

        // Terminal entries are kept, never dropped, and can be re-armed
        fixture.remote.set_offline(false);
        assert_eq!(fixture.sync.retry_failed(), 1);
        assert_eq!(fixture.sync.drain().await.applied, 1);
        assert_eq!(fixture.sync.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_conflict_blocks_until_resolved() {
        let fixture = Fixture::new(ConflictStrategy::Manual);
        fixture.hybrid.write("doc", "1", json!({"title": "base"})).await.unwrap();

        fixture.remote_down();
        fixture.hybrid.write("doc", "1", json!({"title": "mine"})).await.unwrap();
        fixture
            .remote
            .put(Record::new("doc", "1", json!({"title": "theirs"}), 2, now_ms(), BackendId::Remote))
            .await
            .unwrap();
        fixture.remote_up();

        let report = fixture.sync.drain().await;
        assert_eq!(report.conflicts_pending, 1);
        assert_eq!(fixture.sync.unresolved_conflict_count(), 1);
        assert_eq!(fixture.sync.state(), SyncState::Error);

        // Later writes to the key stay queued behind the conflict
        let blocked = fixture.hybrid.write("doc", "1", json!({"title": "later"})).await.unwrap();
        assert_eq!(blocked.sync_status, SyncStatus::Pending);
        assert_eq!(fixture.sync.drain().await, DrainReport::default());

        let conflict_id = fixture.sync.conflicts(None)[0].id;
        let outcome = fixture
            .sync
            .resolve_conflict(conflict_id, ManualChoice::Value(json!({"title": "agreed"})))
            .await
            .unwrap();
        assert_eq!(outcome.record.version, 4);
        assert_eq!(outcome.sync_status, SyncStatus::Done);

        let remote = fixture.remote_value("doc", "1").await.unwrap();
        assert_eq!(remote.value, json!({"title": "agreed"}));
        assert_eq!(fixture.sync.pending_count(), 0);
        assert_eq!(fixture.sync.unresolved_conflict_count(), 0);
        assert!(matches!(
            fixture.sync.resolve_conflict(conflict_id, ManualChoice::KeepLocal).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_strategy_combines_fields() {
        let fixture = Fixture::new(ConflictStrategy::Merge);
        fixture
            .hybrid
            .write("profile", "3", json!({"name": "Ada"}))
            .await
            .unwrap();

        fixture.remote_down();
        let local = fixture
            .hybrid
            .write("profile", "3", json!({"name": "Ada", "city": "London"}))
            .await
            .unwrap();
        fixture
            .remote
            .put(Record::new(
                "profile",
                "3",
                json!({"name": "Ada", "email": "ada@example.com"}),
                2,
                local.record.updated_at - 1,
                BackendId::Remote,
            ))
            .await
            .unwrap();
        fixture.remote_up();

        fixture.sync.drain().await;
        let remote = fixture.remote_value("profile", "3").await.unwrap();
        assert_eq!(
            remote.value,
            json!({"name": "Ada", "city": "London", "email": "ada@example.com"})
        );
        assert_eq!(fixture.sync.conflicts(None)[0].resolution, ConflictResolution::Merge);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_sync_pulls_remote_changes_and_is_cancellable() {
        let fixture = Fixture::new(ConflictStrategy::LastWriteWins);
        for key in ["a", "b", "c"] {
            fixture
                .remote
                .put(Record::new("catalog", key, json!({"sku": key}), 1, now_ms(), BackendId::Remote))
                .await
                .unwrap();
        }

        let cancelled = CancelFlag::new();
        cancelled.cancel();
        let report = fixture.sync.perform_full_sync(&cancelled).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.pulled, 0);

        let report = fixture.sync.perform_full_sync(&CancelFlag::new()).await.unwrap();
        assert_eq!(report.pulled, 3);
        assert_eq!(report.mirrored, 3);
        assert!(report.cursor_ms > 0);
        assert_eq!(
            fixture
                .hybrid
                .local_head("catalog", "b")
                .await
                .unwrap()
                .unwrap()
                .value,
            json!({"sku": "b"})
        );

        fixture.remote_down();
        assert!(fixture
            .sync
            .perform_full_sync(&CancelFlag::new())
            .await
            .unwrap_err()
            .is_unavailable());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_propagates_as_tombstone() {
        let fixture = Fixture::new(ConflictStrategy::LastWriteWins);
        fixture.hybrid.write("cart", "5", json!({"qty": 1})).await.unwrap();
        fixture.remote_down();
        fixture.hybrid.delete("cart", "5").await.unwrap();
        fixture.remote_up();

        assert_eq!(fixture.sync.drain().await.applied, 1);
        let remote = fixture.remote_value("cart", "5").await.unwrap();
        assert!(remote.deleted);
        assert_eq!(remote.version, 2);
    }
}
