//! Sync queue entry model

use serde::{Deserialize, Serialize};

use super::{uuid_id, ConflictId, Record, RecordKey};

uuid_id!(
    /// Identifier of a queued mutation
    EntryId
);

/// Mutation kind carried by a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Put,
    Delete,
}

/// Lifecycle state of a queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SyncStatus {
    /// Waiting for `next_attempt_at`
    Pending,
    /// Being applied to Remote
    InFlight,
    /// Last attempt failed; `terminal` entries are no longer retried
    Failed { terminal: bool },
    /// Acknowledged by Remote
    Done,
}

/// A locally durable write waiting for remote propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    pub id: EntryId,
    pub collection: String,
    pub key: String,
    pub operation: SyncOperation,
    /// Written value (`null` for deletes)
    pub payload: serde_json::Value,
    /// Version the local writer built on
    pub base_version: u64,
    /// Version produced by the local write
    pub version: u64,
    /// Timestamp of the local write (Unix ms)
    pub updated_at: i64,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Monotonic enqueue sequence, tie-breaker for FIFO ordering
    pub sequence: u64,
    pub attempts: u32,
    /// Earliest next drain attempt (Unix ms)
    pub next_attempt_at: i64,
    pub status: SyncStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Manual conflict holding this entry back
    #[serde(default)]
    pub blocked_by: Option<ConflictId>,
}

impl SyncQueueEntry {
    /// Entry propagating `record`, written on top of `base_version`.
    ///
    /// `sequence` is assigned when the entry is appended to the queue.
    #[must_use]
    pub fn for_record(record: &Record, base_version: u64, now: i64) -> Self {
        let operation = if record.deleted {
            SyncOperation::Delete
        } else {
            SyncOperation::Put
        };
        Self {
            id: EntryId::new(),
            collection: record.collection.clone(),
            key: record.key.clone(),
            operation,
            payload: record.value.clone(),
            base_version,
            version: record.version,
            updated_at: record.updated_at,
            enqueued_at: now,
            sequence: 0,
            attempts: 0,
            next_attempt_at: now,
            status: SyncStatus::Pending,
            last_error: None,
            blocked_by: None,
        }
    }

    /// The record this entry writes to Remote (a tombstone for deletes).
    #[must_use]
    pub fn to_record(&self, origin: super::BackendId) -> Record {
        match self.operation {
            SyncOperation::Put => Record::new(
                self.collection.clone(),
                self.key.clone(),
                self.payload.clone(),
                self.version,
                self.updated_at,
                origin,
            ),
            SyncOperation::Delete => Record::tombstone(
                self.collection.clone(),
                self.key.clone(),
                self.version,
                self.updated_at,
                origin,
            ),
        }
    }

    #[must_use]
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.collection.clone(), self.key.clone())
    }

    /// Entry still needs to reach Remote.
    #[must_use]
    pub const fn is_unfinished(&self) -> bool {
        !matches!(self.status, SyncStatus::Done)
    }

    /// Entry can be picked by a drain at `now`.
    #[must_use]
    pub fn is_ready(&self, now: i64) -> bool {
        matches!(self.status, SyncStatus::Pending | SyncStatus::Failed { terminal: false })
            && self.blocked_by.is_none()
            && self.next_attempt_at <= now
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.status, SyncStatus::Failed { terminal: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendId;
    use serde_json::json;

    #[test]
    fn tombstone_becomes_delete_entry() {
        let record = Record::tombstone("cart", "42", 3, 50, BackendId::Embedded);
        let entry = SyncQueueEntry::for_record(&record, 2, 60);
        assert_eq!(entry.operation, SyncOperation::Delete);
        assert_eq!(entry.base_version, 2);
        assert!(entry.is_ready(60));
        assert!(!entry.is_ready(59));
        assert_eq!(entry.to_record(BackendId::Embedded), record);
    }

    #[test]
    fn blocked_and_terminal_entries_are_not_ready() {
        let record = Record::new("cart", "42", json!({"qty": 1}), 1, 1, BackendId::Embedded);
        let mut entry = SyncQueueEntry::for_record(&record, 0, 1);
        entry.blocked_by = Some(ConflictId::new());
        assert!(!entry.is_ready(10));

        entry.blocked_by = None;
        entry.status = SyncStatus::Failed { terminal: true };
        assert!(!entry.is_ready(10));
        assert!(entry.is_terminal());
        assert!(entry.is_unfinished());
    }

    #[test]
    fn status_serializes_with_state_tag() {
        let json = serde_json::to_value(SyncStatus::Failed { terminal: true }).unwrap();
        assert_eq!(json, json!({"state": "failed", "terminal": true}));
    }
}
