//! Backup archive model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{uuid_id, BackendId, Record};

uuid_id!(
    /// Identifier of a backup archive
    ArchiveId
);

/// Why an archive was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupTrigger {
    Manual,
    Scheduled,
    /// Raised by recovery; exempt from retention pruning
    Emergency,
}

impl BackupTrigger {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Emergency => "emergency",
        }
    }
}

/// A record as stored inside an archive (collection is the map key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub version: u64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl ArchiveRecord {
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            key: record.key.clone(),
            value: record.value.clone(),
            version: record.version,
            updated_at: record.updated_at,
            deleted: record.deleted,
        }
    }

    #[must_use]
    pub fn into_record(self, collection: &str, origin: BackendId) -> Record {
        Record {
            collection: collection.to_string(),
            key: self.key,
            value: self.value,
            version: self.version,
            updated_at: self.updated_at,
            origin,
            deleted: self.deleted,
        }
    }
}

/// Immutable snapshot of local state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArchive {
    pub id: ArchiveId,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    pub trigger: BackupTrigger,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub collections: BTreeMap<String, Vec<ArchiveRecord>>,
    pub checksum: String,
}

impl BackupArchive {
    /// Build an archive from records, sorting them canonically and sealing the checksum.
    pub fn seal(
        trigger: BackupTrigger,
        name: Option<String>,
        description: Option<String>,
        records: &[Record],
        created_at: i64,
    ) -> Self {
        let mut collections: BTreeMap<String, Vec<ArchiveRecord>> = BTreeMap::new();
        for record in records {
            collections
                .entry(record.collection.clone())
                .or_default()
                .push(ArchiveRecord::from_record(record));
        }
        for items in collections.values_mut() {
            items.sort_by(|a, b| a.key.cmp(&b.key));
        }

        let checksum = compute_checksum(&collections);
        Self {
            id: ArchiveId::new(),
            created_at,
            trigger,
            name,
            description,
            collections,
            checksum,
        }
    }

    /// Whether the stored checksum matches the contents.
    #[must_use]
    pub fn checksum_valid(&self) -> bool {
        compute_checksum(&self.collections) == self.checksum
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn summary(&self) -> BackupSummary {
        let size_bytes = self
            .collections
            .values()
            .flatten()
            .map(|item| {
                serde_json::to_vec(&item.value).map_or(0, |bytes| bytes.len() as u64)
                    + item.key.len() as u64
            })
            .sum();

        BackupSummary {
            id: self.id,
            created_at: self.created_at,
            trigger: self.trigger,
            name: self.name.clone(),
            description: self.description.clone(),
            record_count: self.record_count(),
            size_bytes,
        }
    }
}

/// Listing view of an archive without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub id: ArchiveId,
    pub created_at: i64,
    pub trigger: BackupTrigger,
    pub name: Option<String>,
    pub description: Option<String>,
    pub record_count: usize,
    pub size_bytes: u64,
}

/// SHA-256 hex digest of the canonical serialization of `collections`.
pub fn compute_checksum(collections: &BTreeMap<String, Vec<ArchiveRecord>>) -> String {
    let canonical = serde_json::to_vec(collections).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}
