//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::{uuid_id, Record, RecordKey};

uuid_id!(
    /// Identifier of a recorded conflict
    ConflictId
);

/// How a conflict was (or will be) settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    LastWriteWins,
    Merge,
    /// Waiting for an operator
    ManualPending,
    /// Settled by an operator
    Manual,
}

/// Operator decision for a `ManualPending` conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "choice", content = "value")]
pub enum ManualChoice {
    KeepLocal,
    KeepRemote,
    Value(serde_json::Value),
}

/// Recorded divergence between the local head and Remote for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub collection: String,
    pub key: String,
    pub local_version: u64,
    pub remote_version: u64,
    pub local_value: serde_json::Value,
    pub remote_value: serde_json::Value,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    #[serde(default)]
    pub local_deleted: bool,
    #[serde(default)]
    pub remote_deleted: bool,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
    pub resolution: ConflictResolution,
    /// Resolution timestamp (Unix ms)
    #[serde(default)]
    pub resolved_at: Option<i64>,
    /// Version written for the settled value
    #[serde(default)]
    pub resolved_version: Option<u64>,
}

impl ConflictRecord {
    /// Snapshot of a divergence between `local` and `remote`.
    #[must_use]
    pub fn detect(local: &Record, remote: &Record, resolution: ConflictResolution, now: i64) -> Self {
        Self {
            id: ConflictId::new(),
            collection: local.collection.clone(),
            key: local.key.clone(),
            local_version: local.version,
            remote_version: remote.version,
            local_value: local.value.clone(),
            remote_value: remote.value.clone(),
            local_updated_at: local.updated_at,
            remote_updated_at: remote.updated_at,
            local_deleted: local.deleted,
            remote_deleted: remote.deleted,
            detected_at: now,
            resolution,
            resolved_at: None,
            resolved_version: None,
        }
    }

    /// Mark settled with `resolution` at `version`.
    pub fn settle(&mut self, resolution: ConflictResolution, version: u64, now: i64) {
        self.resolution = resolution;
        self.resolved_at = Some(now);
        self.resolved_version = Some(version);
    }

    #[must_use]
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.collection.clone(), self.key.clone())
    }

    #[must_use]
    pub const fn is_unresolved(&self) -> bool {
        matches!(self.resolution, ConflictResolution::ManualPending)
    }
}
