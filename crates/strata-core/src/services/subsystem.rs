//! Wiring of backends and services behind one handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::backends::{
    EmbeddedBackend, Guarded, HttpRemote, KeyValueBackend, LocalBackend, RemoteBackend, RemoteStore,
    StorageBackend,
};
use crate::backup::{ArchiveStore, BackupService, RestoreReport};
use crate::cancel::CancelFlag;
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::health::HealthTable;
use crate::locks::KeyLocks;
use crate::metrics::Metrics;
use crate::models::{ArchiveId, BackupSummary, BackupTrigger, ConflictId, HealthStatus, ManualChoice};
use crate::recovery::{RecoveryScenario, RecoveryService, RecoveryTestReport};
use crate::storage::{HybridStorage, WriteOutcome};
use crate::sync::{SyncReport, SyncService, SyncStore};
use crate::worker::PeriodicWorker;

use super::AdminResponse;

/// Result of `import_data`: the stored archive and the restore it triggered.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ImportReport {
    pub archive: BackupSummary,
    pub restore: RestoreReport,
}

/// Thread-safe handle over the storage tiers and their background services.
pub struct StorageSubsystem {
    config: StorageConfig,
    hybrid: Arc<HybridStorage>,
    sync: Arc<SyncService>,
    backups: Arc<BackupService>,
    recovery: Arc<RecoveryService>,
    workers: Mutex<Vec<PeriodicWorker>>,
}

impl std::fmt::Debug for StorageSubsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSubsystem")
            .field("data_dir", &self.config.data_dir)
            .field("hybrid", &self.hybrid)
            .finish_non_exhaustive()
    }
}

impl StorageSubsystem {
    /// Open every tier described by `config`. The remote is an HTTP client when
    /// `remote.url` and `remote.auth_token` are both set.
    pub async fn open(config: StorageConfig) -> Result<Self> {
        let remote = if config.remote.is_configured() {
            Some(Arc::new(HttpRemote::from_config(&config.remote)?) as Arc<dyn RemoteStore>)
        } else {
            info!("Running in local-only mode (no remote configured)");
            None
        };
        Self::open_with_remote(config, remote).await
    }

    /// Open with an explicit remote implementation (or none).
    pub async fn open_with_remote(
        mut config: StorageConfig,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Result<Self> {
        config.normalize();
        config.validate()?;

        let locals = open_locals(&config).await?;
        let remote = remote.map(|remote| {
            info!("Remote backend enabled: {}", config.remote.url.as_deref().unwrap_or("custom"));
            Arc::new(Guarded::new(remote, Some(config.remote.timeout()))) as Arc<RemoteBackend>
        });

        let health = Arc::new(HealthTable::new(
            remote.is_some(),
            config.health.failure_threshold,
        ));
        let queue = Arc::new(
            match config.sync_state_path() {
                Some(path) => SyncStore::open(path)?,
                None => SyncStore::in_memory(),
            }
            .with_conflict_history(config.sync.conflict_history),
        );
        let archives = match config.backup_dir() {
            Some(dir) => ArchiveStore::open(dir)?,
            None => ArchiveStore::in_memory(),
        };

        let hybrid = Arc::new(HybridStorage::new(
            locals,
            remote,
            health,
            queue,
            Arc::new(KeyLocks::new()),
        ));
        let sync = Arc::new(SyncService::new(hybrid.clone(), config.sync.clone()));
        let backups = Arc::new(BackupService::new(
            hybrid.clone(),
            archives,
            config.backup.clone(),
        ));
        let recovery = Arc::new(RecoveryService::new(
            hybrid.clone(),
            backups.clone(),
            config.health.clone(),
            config.sync.backoff.clone(),
        ));

        Ok(Self {
            config,
            hybrid,
            sync,
            backups,
            recovery,
            workers: Mutex::new(Vec::new()),
        })
    }

    pub const fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub const fn storage(&self) -> &Arc<HybridStorage> {
        &self.hybrid
    }

    pub const fn sync(&self) -> &Arc<SyncService> {
        &self.sync
    }

    pub const fn backups(&self) -> &Arc<BackupService> {
        &self.backups
    }

    pub const fn recovery(&self) -> &Arc<RecoveryService> {
        &self.recovery
    }

    /// Start the probe, drain and scheduled-backup workers. Idempotent.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return;
        }

        workers.push(
            self.recovery
                .spawn_probe_worker(Duration::from_millis(self.config.health.probe_interval_ms)),
        );
        if let Some(interval_ms) = self.config.sync.interval_ms {
            workers.push(self.sync.spawn_drain_worker(Duration::from_millis(interval_ms)));
        }
        if let Some(interval_ms) = self.config.backup.interval_ms {
            workers.push(
                self.backups
                    .spawn_scheduled_worker(Duration::from_millis(interval_ms)),
            );
        }
        info!("Started {} background workers", workers.len());
    }

    /// Stop every worker, waiting for in-progress ticks.
    pub async fn stop(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            worker.stop().await;
        }
    }

    pub async fn perform_full_sync(&self) -> AdminResponse<SyncReport> {
        self.perform_full_sync_with(&CancelFlag::new()).await
    }

    pub async fn perform_full_sync_with(&self, cancel: &CancelFlag) -> AdminResponse<SyncReport> {
        self.sync.perform_full_sync(cancel).await.into()
    }

    pub async fn create_manual_backup(
        &self,
        name: Option<String>,
        description: Option<String>,
    ) -> AdminResponse<BackupSummary> {
        self.backups
            .create_backup(BackupTrigger::Manual, name, description)
            .await
            .into()
    }

    pub async fn create_emergency_backup(&self, reason: &str) -> AdminResponse<BackupSummary> {
        self.backups.create_emergency_backup(reason).await.into()
    }

    /// Export bytes of a stored archive, or of the current state when `archive_id` is `None`.
    pub async fn export_data(&self, archive_id: Option<ArchiveId>) -> AdminResponse<Vec<u8>> {
        self.backups.export_archive(archive_id).await.into()
    }

    /// Store an exported archive and restore it.
    pub async fn import_data(&self, bytes: &[u8]) -> AdminResponse<ImportReport> {
        let result = async {
            let archive = self.backups.import_archive(bytes)?;
            let restore = self.backups.restore(archive.id, &CancelFlag::new()).await?;
            Ok::<_, Error>(ImportReport { archive, restore })
        }
        .await;
        result.into()
    }

    pub async fn force_health_check(&self) -> AdminResponse<Vec<HealthStatus>> {
        AdminResponse::ok(self.recovery.force_health_check().await)
    }

    pub async fn get_metrics(&self) -> AdminResponse<Metrics> {
        AdminResponse::ok(Metrics::collect(&self.hybrid, &self.sync, &self.backups).await)
    }

    pub async fn restore_backup(&self, archive_id: ArchiveId) -> AdminResponse<RestoreReport> {
        self.restore_backup_with(archive_id, &CancelFlag::new()).await
    }

    pub async fn restore_backup_with(
        &self,
        archive_id: ArchiveId,
        cancel: &CancelFlag,
    ) -> AdminResponse<RestoreReport> {
        self.backups.restore(archive_id, cancel).await.into()
    }

    pub fn list_backups(&self) -> AdminResponse<Vec<BackupSummary>> {
        AdminResponse::ok(self.backups.list_backups())
    }

    pub async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        choice: ManualChoice,
    ) -> AdminResponse<WriteOutcome> {
        self.sync.resolve_conflict(conflict_id, choice).await.into()
    }

    pub async fn test_recovery(&self, scenario: RecoveryScenario) -> AdminResponse<RecoveryTestReport> {
        self.recovery.test_recovery(scenario).await.into()
    }
}

/// Open the local tiers in priority order. A broken embedded store leaves the
/// key/value tier serving alone; only both failing is fatal.
async fn open_locals(config: &StorageConfig) -> Result<Vec<Arc<LocalBackend>>> {
    let embedded = match config.embedded_db_path() {
        Some(path) => EmbeddedBackend::open(path).await,
        None => EmbeddedBackend::open_in_memory().await,
    };
    let key_value = match config.key_value_path() {
        Some(path) => KeyValueBackend::open(path),
        None => Ok(KeyValueBackend::in_memory()),
    };

    let mut locals: Vec<Arc<LocalBackend>> = Vec::new();
    match embedded {
        Ok(backend) => locals.push(guard_local(Arc::new(backend))),
        Err(failure) => error!("Embedded store unavailable, continuing without it: {failure}"),
    }
    match key_value {
        Ok(backend) => locals.push(guard_local(Arc::new(backend))),
        Err(failure) => error!("Key/value store unavailable, continuing without it: {failure}"),
    }

    if locals.is_empty() {
        return Err(Error::StorageUnavailable(
            "no local backend could be opened".to_string(),
        ));
    }
    Ok(locals)
}

fn guard_local(backend: Arc<dyn StorageBackend>) -> Arc<LocalBackend> {
    Arc::new(Guarded::new(backend, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::models::BackendId;
    use crate::state::SyncState;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    async fn with_memory_remote(config: StorageConfig) -> (StorageSubsystem, Arc<MemoryBackend>) {
        let remote = Arc::new(MemoryBackend::new(BackendId::Remote));
        let subsystem = StorageSubsystem::open_with_remote(config, Some(remote.clone() as Arc<dyn RemoteStore>))
            .await
            .unwrap();
        (subsystem, remote)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_only_subsystem_reports_offline() {
        let subsystem = StorageSubsystem::open(StorageConfig::in_memory()).await.unwrap();
        subsystem
            .storage()
            .write("cart", "42", json!({"qty": 1}))
            .await
            .unwrap();

        let metrics = subsystem.get_metrics().await.into_result().unwrap();
        assert_eq!(metrics.sync_state, SyncState::Offline);
        assert_eq!(metrics.pending_sync_count, 1);
        assert_eq!(metrics.record_count, 1);
        assert!(metrics.total_size_bytes > 0);
        assert!(!metrics.health[BackendId::Remote.index()].configured);

        let sync = subsystem.perform_full_sync().await;
        assert!(!sync.success);
        assert_eq!(sync.error.unwrap().kind, "backend_unavailable");

        let drill = subsystem.test_recovery(RecoveryScenario::RemoteOutage).await;
        assert_eq!(drill.error.unwrap().kind, "validation");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn export_then_import_into_fresh_subsystem() {
        let (source, _) = with_memory_remote(StorageConfig::in_memory()).await;
        source
            .storage()
            .write("profile", "7", json!({"name": "A"}))
            .await
            .unwrap();
        let bytes = source.export_data(None).await.into_result().unwrap();

        let (target, target_remote) = with_memory_remote(StorageConfig::in_memory()).await;
        let imported = target.import_data(&bytes).await.into_result().unwrap();
        assert_eq!(imported.restore.restored, 1);
        assert_eq!(target.list_backups().into_result().unwrap().len(), 1);

        // Restored records propagate to Remote like any other write
        let remote = target_remote.get("profile", "7").await.unwrap().unwrap();
        assert_eq!(remote.value, json!({"name": "A"}));

        let garbage = target.import_data(b"{\"formatVersion\": 1}").await;
        assert!(!garbage.success);
        assert_eq!(garbage.error.unwrap().kind, "corrupt_archive");
    }

    type RecordTuple = (String, String, serde_json::Value, u64, bool);

    fn record_tuples(records: &[crate::models::Record]) -> Vec<RecordTuple> {
        records
            .iter()
            .map(|record| {
                (
                    record.collection.clone(),
                    record.key.clone(),
                    record.value.clone(),
                    record.version,
                    record.deleted,
                )
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backup_round_trip_reproduces_records_and_tombstones() {
        let source = StorageSubsystem::open(StorageConfig::in_memory()).await.unwrap();
        let storage = source.storage();
        storage.write("cart", "42", json!({"qty": 1})).await.unwrap();
        storage.write("cart", "42", json!({"qty": 2})).await.unwrap();
        storage.write("cart", "43", json!(["a", "b"])).await.unwrap();
        storage.write("profile", "7", json!({"name": "A"})).await.unwrap();
        storage.delete("profile", "7").await.unwrap();

        let expected = record_tuples(&storage.export_all().await.unwrap());
        assert_eq!(expected.len(), 3);
        assert!(expected.iter().any(|tuple| tuple.1 == "7" && tuple.3 == 2 && tuple.4));

        let bytes = source.export_data(None).await.into_result().unwrap();
        let target = StorageSubsystem::open(StorageConfig::in_memory()).await.unwrap();
        let imported = target.import_data(&bytes).await.into_result().unwrap();
        assert_eq!(imported.restore.restored, 3);

        let restored = record_tuples(&target.storage().export_all().await.unwrap());
        assert_eq!(restored, expected);
        assert!(target.storage().read("profile", "7").await.unwrap().is_none());

        // A second import of the same bytes changes nothing
        let again = target.import_data(&bytes).await.into_result().unwrap();
        assert_eq!((again.restore.restored, again.restore.skipped), (0, 3));
        assert_eq!(
            record_tuples(&target.storage().export_all().await.unwrap()),
            expected
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queue_and_data_survive_restart() {
        let tmp = tempdir().unwrap();
        let config = StorageConfig::with_data_dir(tmp.path());

        {
            let (subsystem, remote) = with_memory_remote(config.clone()).await;
            remote.set_offline(true);
            let outcome = subsystem
                .storage()
                .write("cart", "42", json!({"qty": 2}))
                .await
                .unwrap();
            assert_eq!(outcome.sync_status, crate::models::SyncStatus::Pending);
            subsystem
                .create_manual_backup(Some("before restart".to_string()), None)
                .await
                .into_result()
                .unwrap();
        }

        let (reopened, remote) = with_memory_remote(config).await;
        assert_eq!(reopened.sync().pending_count(), 1);
        assert_eq!(reopened.backups().backup_count(), 1);
        let record = reopened.storage().read("cart", "42").await.unwrap().unwrap();
        assert_eq!(record.value, json!({"qty": 2}));

        let report = reopened.perform_full_sync().await.into_result().unwrap();
        assert_eq!(report.drain.applied, 1);
        assert_eq!(
            remote.get("cart", "42").await.unwrap().unwrap().value,
            json!({"qty": 2})
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn workers_start_once_and_stop() {
        let mut config = StorageConfig::in_memory();
        config.sync.interval_ms = Some(10);
        config.health.probe_interval_ms = 10;
        let (subsystem, remote) = with_memory_remote(config).await;

        subsystem.start().await;
        subsystem.start().await;
        assert_eq!(subsystem.workers.lock().await.len(), 2);

        remote.set_offline(true);
        subsystem
            .storage()
            .write("cart", "1", json!(1))
            .await
            .unwrap();
        remote.set_offline(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(subsystem.sync().pending_count(), 0);

        subsystem.stop().await;
        assert!(subsystem.workers.lock().await.is_empty());
    }
}
