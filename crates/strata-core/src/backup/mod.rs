//! Backup service: checksummed snapshots of local state, retention, restore.

mod store;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::cancel::CancelFlag;
use crate::config::BackupSettings;
use crate::error::{Error, Result};
use crate::export::{parse_archive_export, render_archive_export};
use crate::models::{ArchiveId, BackendId, BackupArchive, BackupSummary, BackupTrigger};
use crate::storage::{HybridStorage, RestoreOutcome};
use crate::util::{normalize_text_option, now_ms};
use crate::worker::PeriodicWorker;

pub use store::ArchiveStore;

/// Result of restoring an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub archive_id: ArchiveId,
    /// Records written locally (and queued for Remote)
    pub restored: usize,
    /// Records already identical locally
    pub skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct BackupService {
    hybrid: Arc<HybridStorage>,
    store: ArchiveStore,
    settings: BackupSettings,
    /// Serializes manual and scheduled snapshots
    schedule_lock: tokio::sync::Mutex<()>,
}

impl BackupService {
    pub fn new(hybrid: Arc<HybridStorage>, store: ArchiveStore, settings: BackupSettings) -> Self {
        Self {
            hybrid,
            store,
            settings,
            schedule_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Snapshot local state. Emergency archives skip the scheduling lock and pruning.
    pub async fn create_backup(
        &self,
        trigger: BackupTrigger,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<BackupSummary> {
        if trigger == BackupTrigger::Emergency {
            return self
                .snapshot(trigger, name, description)
                .await
                .map(|archive| archive.summary());
        }

        let _scheduled = self.schedule_lock.lock().await;
        let archive = self.snapshot(trigger, name, description).await?;
        self.prune(now_ms());
        Ok(archive.summary())
    }

    /// Snapshot raised by recovery or an operator; never pruned automatically.
    pub async fn create_emergency_backup(&self, reason: &str) -> Result<BackupSummary> {
        warn!("Creating emergency backup: {reason}");
        self.create_backup(
            BackupTrigger::Emergency,
            Some("emergency".to_string()),
            normalize_text_option(Some(reason.to_string())),
        )
        .await
    }

    async fn snapshot(
        &self,
        trigger: BackupTrigger,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<BackupArchive> {
        let records = self.hybrid.export_all().await?;
        let archive = BackupArchive::seal(
            trigger,
            normalize_text_option(name),
            normalize_text_option(description),
            &records,
            now_ms(),
        );
        self.store.insert(archive.clone())?;
        info!(
            archive_id = %archive.id,
            trigger = trigger.as_str(),
            records = archive.record_count(),
            "Created backup"
        );
        Ok(archive)
    }

    /// Drop non-emergency archives beyond the retention count or maximum age, oldest first.
    fn prune(&self, now: i64) -> usize {
        let keep = self.settings.retention_count.max(1);
        let max_age = self
            .settings
            .max_age_ms
            .map(|age| i64::try_from(age).unwrap_or(i64::MAX));

        let expired = self
            .store
            .summaries()
            .into_iter()
            .filter(|summary| summary.trigger != BackupTrigger::Emergency)
            .enumerate()
            .filter(|(rank, summary)| {
                *rank >= keep
                    || max_age.is_some_and(|age| now.saturating_sub(summary.created_at) > age)
            })
            .map(|(_, summary)| summary.id)
            .collect::<Vec<_>>();

        let mut pruned = 0;
        for id in expired {
            match self.store.remove(id) {
                Ok(true) => pruned += 1,
                Ok(false) => {}
                Err(error) => warn!(archive_id = %id, "Failed to prune backup: {error}"),
            }
        }
        if pruned > 0 {
            info!("Pruned {pruned} expired backups");
        }
        pruned
    }

    /// Write every archived record back through hybrid storage.
    ///
    /// The checksum is verified before the first write. Stops at a record
    /// boundary when `cancel` fires.
    pub async fn restore(&self, id: ArchiveId, cancel: &CancelFlag) -> Result<RestoreReport> {
        let archive = self
            .store
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("backup {id}")))?;
        if !archive.checksum_valid() {
            error!(archive_id = %id, "Refusing to restore backup with a bad checksum");
            return Err(Error::CorruptArchive {
                archive_id: id.to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }

        let mut report = RestoreReport {
            archive_id: id,
            restored: 0,
            skipped: 0,
            cancelled: false,
        };
        'collections: for (collection, items) in archive.collections {
            for item in items {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'collections;
                }
                let record = item.into_record(&collection, BackendId::Embedded);
                match self.hybrid.restore_record(record).await? {
                    RestoreOutcome::Restored(_) => report.restored += 1,
                    RestoreOutcome::Unchanged => report.skipped += 1,
                }
            }
        }

        info!(
            archive_id = %id,
            restored = report.restored,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Restore finished"
        );
        Ok(report)
    }

    /// Store an archive from export bytes after validating it.
    pub fn import_archive(&self, bytes: &[u8]) -> Result<BackupSummary> {
        let archive = parse_archive_export(bytes)?;
        let summary = archive.summary();
        self.store.insert(archive)?;
        info!(archive_id = %summary.id, "Imported backup");
        Ok(summary)
    }

    /// Export bytes for a stored archive, or for a fresh snapshot when `id` is `None`.
    pub async fn export_archive(&self, id: Option<ArchiveId>) -> Result<Vec<u8>> {
        let archive = match id {
            Some(id) => self
                .store
                .get(id)
                .ok_or_else(|| Error::NotFound(format!("backup {id}")))?,
            None => BackupArchive::seal(
                BackupTrigger::Manual,
                Some("export".to_string()),
                None,
                &self.hybrid.export_all().await?,
                now_ms(),
            ),
        };
        Ok(render_archive_export(&archive)?)
    }

    /// Stored archives, newest first.
    pub fn list_backups(&self) -> Vec<BackupSummary> {
        self.store.summaries()
    }

    pub fn get_backup(&self, id: ArchiveId) -> Option<BackupArchive> {
        self.store.get(id)
    }

    pub fn delete_backup(&self, id: ArchiveId) -> Result<()> {
        if self.store.remove(id)? {
            info!(archive_id = %id, "Deleted backup");
            Ok(())
        } else {
            Err(Error::NotFound(format!("backup {id}")))
        }
    }

    /// Delete every emergency archive; returns how many.
    pub fn clear_emergency_backups(&self) -> Result<usize> {
        let emergency = self
            .store
            .summaries()
            .into_iter()
            .filter(|summary| summary.trigger == BackupTrigger::Emergency)
            .map(|summary| summary.id)
            .collect::<Vec<_>>();
        let mut cleared = 0;
        for id in emergency {
            if self.store.remove(id)? {
                cleared += 1;
            }
        }
        info!("Cleared {cleared} emergency backups");
        Ok(cleared)
    }

    pub fn backup_count(&self) -> usize {
        self.store.len()
    }

    /// Take a scheduled backup every `period` until the worker is stopped.
    pub fn spawn_scheduled_worker(self: &Arc<Self>, period: Duration) -> PeriodicWorker {
        let service = Arc::clone(self);
        PeriodicWorker::spawn("scheduled-backup", period, move || {
            let service = Arc::clone(&service);
            async move {
                if let Err(error) = service
                    .create_backup(BackupTrigger::Scheduled, None, None)
                    .await
                {
                    error!("Scheduled backup failed: {error}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{Guarded, MemoryBackend, StorageBackend};
    use crate::health::HealthTable;
    use crate::locks::KeyLocks;
    use crate::sync::SyncStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn service(settings: BackupSettings) -> (BackupService, Arc<HybridStorage>) {
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
            None,
            Arc::new(HealthTable::new(false, 1)),
            Arc::new(SyncStore::in_memory()),
            Arc::new(KeyLocks::new()),
        ));
        (
            BackupService::new(hybrid.clone(), ArchiveStore::in_memory(), settings),
            hybrid,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backup_then_restore_round_trip() {
        let (backups, hybrid) = service(BackupSettings::default());
        hybrid.write("cart", "42", json!({"qty": 1})).await.unwrap();
        hybrid.write("profile", "7", json!({"name": "A"})).await.unwrap();

        let summary = backups
            .create_backup(BackupTrigger::Manual, Some(" nightly ".to_string()), None)
            .await
            .unwrap();
        assert_eq!(summary.record_count, 2);
        assert_eq!(summary.name.as_deref(), Some("nightly"));

        // Unchanged state: nothing to write
        let report = backups.restore(summary.id, &CancelFlag::new()).await.unwrap();
        assert_eq!((report.restored, report.skipped), (0, 2));

        hybrid.write("cart", "42", json!({"qty": 9})).await.unwrap();
        hybrid.delete("profile", "7").await.unwrap();

        let report = backups.restore(summary.id, &CancelFlag::new()).await.unwrap();
        assert_eq!(report.restored, 2);

        let cart = hybrid.read("cart", "42").await.unwrap().unwrap();
        assert_eq!(cart.value, json!({"qty": 1}));
        // Local version never goes backwards
        assert_eq!(cart.version, 3);
        let profile = hybrid.read("profile", "7").await.unwrap().unwrap();
        assert_eq!(profile.value, json!({"name": "A"}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_restore_after_newer_write_is_a_no_op() {
        let (backups, hybrid) = service(BackupSettings::default());
        hybrid.write("cart", "42", json!({"qty": 1})).await.unwrap();
        let summary = backups
            .create_backup(BackupTrigger::Manual, None, None)
            .await
            .unwrap();
        hybrid.write("cart", "42", json!({"qty": 9})).await.unwrap();

        let first = backups.restore(summary.id, &CancelFlag::new()).await.unwrap();
        assert_eq!((first.restored, first.skipped), (1, 0));
        let restored = hybrid.read("cart", "42").await.unwrap().unwrap();
        assert_eq!(restored.value, json!({"qty": 1}));
        assert_eq!(restored.version, 3);
        let pending = hybrid.queue().pending_count();

        for _ in 0..2 {
            let again = backups.restore(summary.id, &CancelFlag::new()).await.unwrap();
            assert_eq!((again.restored, again.skipped), (0, 1));
            let head = hybrid.read("cart", "42").await.unwrap().unwrap();
            assert_eq!(head.version, 3);
            assert_eq!(hybrid.queue().pending_count(), pending);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn archived_tombstone_deletes_a_revived_record() {
        let (backups, hybrid) = service(BackupSettings::default());
        hybrid.write("profile", "7", json!({"name": "A"})).await.unwrap();
        hybrid.delete("profile", "7").await.unwrap();
        let summary = backups
            .create_backup(BackupTrigger::Manual, None, None)
            .await
            .unwrap();
        hybrid.write("profile", "7", json!({"name": "B"})).await.unwrap();

        let report = backups.restore(summary.id, &CancelFlag::new()).await.unwrap();
        assert_eq!(report.restored, 1);
        assert!(hybrid.read("profile", "7").await.unwrap().is_none());
        let head = hybrid.local_head("profile", "7").await.unwrap().unwrap();
        assert!(head.deleted);
        assert_eq!(head.version, 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn corrupt_archive_is_refused_without_writes() {
        let (backups, hybrid) = service(BackupSettings::default());
        hybrid.write("cart", "1", json!(1)).await.unwrap();
        let summary = backups
            .create_backup(BackupTrigger::Manual, None, None)
            .await
            .unwrap();

        let mut tampered = backups.get_backup(summary.id).unwrap();
        tampered.collections.get_mut("cart").unwrap()[0].value = json!(2);
        backups.store.insert(tampered).unwrap();
        hybrid.write("cart", "1", json!(5)).await.unwrap();

        let error = backups
            .restore(summary.id, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::CorruptArchive { .. }));
        assert_eq!(hybrid.read("cart", "1").await.unwrap().unwrap().value, json!(5));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_restore_stops_at_record_boundary() {
        let (backups, hybrid) = service(BackupSettings::default());
        hybrid.write("cart", "1", json!(1)).await.unwrap();
        let summary = backups
            .create_backup(BackupTrigger::Manual, None, None)
            .await
            .unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = backups.restore(summary.id, &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.restored + report.skipped, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retention_prunes_oldest_but_keeps_emergency() {
        let (backups, hybrid) = service(BackupSettings {
            retention_count: 2,
            ..BackupSettings::default()
        });
        hybrid.write("cart", "1", json!(1)).await.unwrap();

        let emergency = backups.create_emergency_backup("remote outage").await.unwrap();
        let first = backups.create_backup(BackupTrigger::Manual, None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        backups.create_backup(BackupTrigger::Scheduled, None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        backups.create_backup(BackupTrigger::Manual, None, None).await.unwrap();

        let ids = backups
            .list_backups()
            .into_iter()
            .map(|summary| summary.id)
            .collect::<Vec<_>>();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&emergency.id));
        assert!(!ids.contains(&first.id));

        assert_eq!(backups.clear_emergency_backups().unwrap(), 1);
        assert_eq!(backups.backup_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn export_import_round_trip() {
        let (source, hybrid) = service(BackupSettings::default());
        hybrid.write("cart", "1", json!({"qty": 3})).await.unwrap();
        let bytes = source.export_archive(None).await.unwrap();

        let (target, target_hybrid) = service(BackupSettings::default());
        let imported = target.import_archive(&bytes).unwrap();
        assert_eq!(imported.record_count, 1);
        target.restore(imported.id, &CancelFlag::new()).await.unwrap();
        assert_eq!(
            target_hybrid.read("cart", "1").await.unwrap().unwrap().value,
            json!({"qty": 3})
        );

        assert!(matches!(
            target.delete_backup(ArchiveId::new()),
            Err(Error::NotFound(_))
        ));
    }
}
