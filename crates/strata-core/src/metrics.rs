//! Point-in-time metrics snapshot. Collecting it never mutates state.

use serde::Serialize;

use crate::backup::BackupService;
use crate::models::HealthStatus;
use crate::state::SyncState;
use crate::storage::HybridStorage;
use crate::sync::SyncService;
use crate::util::now_ms;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub health: Vec<HealthStatus>,
    pub pending_sync_count: usize,
    pub unresolved_conflict_count: usize,
    pub backup_count: usize,
    /// Approximate payload size held by the primary local tier
    pub total_size_bytes: u64,
    pub record_count: u64,
    pub sync_state: SyncState,
    pub last_sync_at: Option<i64>,
    pub collected_at: i64,
}

impl Metrics {
    pub async fn collect(hybrid: &HybridStorage, sync: &SyncService, backups: &BackupService) -> Self {
        // Local tiers mirror each other, so the primary's size stands for the whole
        let primary = hybrid.local_stats().await.into_iter().next();
        let (record_count, total_size_bytes) =
            primary.map_or((0, 0), |(_, stats)| (stats.count, stats.approx_size_bytes));

        Self {
            health: hybrid.health().snapshot(),
            pending_sync_count: sync.pending_count(),
            unresolved_conflict_count: sync.unresolved_conflict_count(),
            backup_count: backups.backup_count(),
            total_size_bytes,
            record_count,
            sync_state: sync.state(),
            last_sync_at: sync.last_sync_at(),
            collected_at: now_ms(),
        }
    }
}
