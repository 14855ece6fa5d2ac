//! Durable sync ledger: queue entries, conflicts and the pull cursor.
//!
//! The whole ledger is one JSON document replaced atomically after every
//! mutation. Persistence failures are logged and the in-memory state stays
//! authoritative, so a foreground write never fails because of the ledger.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ConflictId, ConflictRecord, EntryId, RecordKey, SyncQueueEntry, SyncStatus};
use crate::util::{read_json_file, write_json_atomic};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Ledger {
    #[serde(default)]
    entries: Vec<SyncQueueEntry>,
    #[serde(default)]
    conflicts: Vec<ConflictRecord>,
    /// `updated_at` of the last pulled remote change (Unix ms)
    #[serde(default)]
    cursor_ms: i64,
    #[serde(default)]
    next_sequence: u64,
}

/// Settled conflicts kept when no explicit history size is given.
pub const DEFAULT_CONFLICT_HISTORY: usize = 200;

#[derive(Debug)]
pub struct SyncStore {
    path: Option<PathBuf>,
    ledger: Mutex<Ledger>,
    conflict_history: usize,
}

impl SyncStore {
    /// Load the ledger at `path`. Entries left in flight by a crash go back to pending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut ledger = read_json_file::<Ledger>(&path)?.unwrap_or_default();
        let mut requeued = 0;
        for entry in &mut ledger.entries {
            if entry.status == SyncStatus::InFlight {
                entry.status = SyncStatus::Pending;
                requeued += 1;
            }
        }
        tracing::info!(
            "Loaded sync ledger from {} ({} entries, {} conflicts, {requeued} requeued)",
            path.display(),
            ledger.entries.len(),
            ledger.conflicts.len()
        );
        Ok(Self {
            path: Some(path),
            ledger: Mutex::new(ledger),
            conflict_history: DEFAULT_CONFLICT_HISTORY,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            ledger: Mutex::new(Ledger::default()),
            conflict_history: DEFAULT_CONFLICT_HISTORY,
        }
    }

    /// Keep at most `limit` settled conflicts; older ones are dropped as new ones settle.
    #[must_use]
    pub fn with_conflict_history(mut self, limit: usize) -> Self {
        self.conflict_history = limit;
        self
    }

    fn mutate<T>(&self, change: impl FnOnce(&mut Ledger) -> T) -> T {
        let mut ledger = self.ledger.lock();
        let output = change(&mut ledger);
        if let Some(path) = &self.path {
            if let Err(error) = write_json_atomic(path, &*ledger) {
                tracing::warn!("Failed to persist sync ledger to {}: {error}", path.display());
            }
        }
        output
    }

    /// Append `entry`, assigning its FIFO sequence. Entries of a key held by an
    /// unresolved manual conflict are blocked on arrival.
    pub fn append(&self, mut entry: SyncQueueEntry) -> SyncQueueEntry {
        self.mutate(|ledger| {
            ledger.next_sequence += 1;
            entry.sequence = ledger.next_sequence;
            entry.blocked_by = ledger
                .conflicts
                .iter()
                .find(|conflict| {
                    conflict.is_unresolved()
                        && conflict.collection == entry.collection
                        && conflict.key == entry.key
                })
                .map(|conflict| conflict.id);
            ledger.entries.push(entry.clone());
            entry
        })
    }

    pub fn has_unfinished(&self, key: &RecordKey) -> bool {
        self.ledger.lock().entries.iter().any(|entry| {
            entry.is_unfinished() && entry.collection == key.collection && entry.key == key.key
        })
    }

    /// Unfinished entries of `key` in FIFO order.
    pub fn unfinished_for(&self, key: &RecordKey) -> Vec<SyncQueueEntry> {
        let mut entries = self
            .ledger
            .lock()
            .entries
            .iter()
            .filter(|entry| {
                entry.is_unfinished() && entry.collection == key.collection && entry.key == key.key
            })
            .cloned()
            .collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.sequence);
        entries
    }

    /// Keys whose earliest unfinished entry is ready at `now`, oldest first.
    pub fn ready_keys(&self, now: i64) -> Vec<RecordKey> {
        let ledger = self.ledger.lock();
        let mut heads: BTreeMap<RecordKey, &SyncQueueEntry> = BTreeMap::new();
        for entry in ledger.entries.iter().filter(|entry| entry.is_unfinished()) {
            heads
                .entry(entry.record_key())
                .and_modify(|head| {
                    if entry.sequence < head.sequence {
                        *head = entry;
                    }
                })
                .or_insert(entry);
        }

        let mut ready = heads
            .into_iter()
            .filter(|(_, head)| head.is_ready(now))
            .map(|(key, head)| (head.sequence, key))
            .collect::<Vec<_>>();
        ready.sort();
        ready.into_iter().map(|(_, key)| key).collect()
    }

    pub fn update(&self, id: EntryId, change: impl FnOnce(&mut SyncQueueEntry)) -> bool {
        self.mutate(|ledger| {
            ledger
                .entries
                .iter_mut()
                .find(|entry| entry.id == id)
                .map(change)
                .is_some()
        })
    }

    pub fn set_status(&self, id: EntryId, status: SyncStatus) -> bool {
        self.update(id, |entry| entry.status = status)
    }

    /// Drop acknowledged entries.
    pub fn remove(&self, ids: &[EntryId]) {
        if ids.is_empty() {
            return;
        }
        self.mutate(|ledger| ledger.entries.retain(|entry| !ids.contains(&entry.id)));
    }

    pub fn entries(&self) -> Vec<SyncQueueEntry> {
        let mut entries = self.ledger.lock().entries.clone();
        entries.sort_by_key(|entry| entry.sequence);
        entries
    }

    pub fn pending_count(&self) -> usize {
        self.ledger
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.is_unfinished())
            .count()
    }

    pub fn terminal_count(&self) -> usize {
        self.ledger
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.is_terminal())
            .count()
    }

    /// Re-arm terminally failed entries for an immediate retry.
    pub fn retry_failed(&self, now: i64) -> usize {
        self.mutate(|ledger| {
            let mut rearmed = 0;
            for entry in ledger.entries.iter_mut().filter(|entry| entry.is_terminal()) {
                entry.status = SyncStatus::Pending;
                entry.attempts = 0;
                entry.next_attempt_at = now;
                rearmed += 1;
            }
            rearmed
        })
    }

    /// Record `conflict`; when it is pending, block every unfinished entry of its key.
    pub fn push_conflict(&self, conflict: ConflictRecord) {
        self.mutate(|ledger| {
            if conflict.is_unresolved() {
                for entry in ledger.entries.iter_mut().filter(|entry| {
                    entry.is_unfinished()
                        && entry.collection == conflict.collection
                        && entry.key == conflict.key
                }) {
                    entry.blocked_by = Some(conflict.id);
                    entry.status = SyncStatus::Pending;
                }
            }
            ledger.conflicts.push(conflict);
            prune_settled(&mut ledger.conflicts, self.conflict_history);
        });
    }

    pub fn conflict(&self, id: ConflictId) -> Option<ConflictRecord> {
        self.ledger
            .lock()
            .conflicts
            .iter()
            .find(|conflict| conflict.id == id)
            .cloned()
    }

    /// Settle a conflict and drop the entries it was holding back.
    pub fn settle_conflict(&self, id: ConflictId, change: impl FnOnce(&mut ConflictRecord)) -> bool {
        self.mutate(|ledger| {
            let Some(conflict) = ledger.conflicts.iter_mut().find(|conflict| conflict.id == id)
            else {
                return false;
            };
            change(conflict);
            ledger.entries.retain(|entry| entry.blocked_by != Some(id));
            prune_settled(&mut ledger.conflicts, self.conflict_history);
            true
        })
    }

    /// Most recent conflicts first.
    pub fn conflicts(&self, limit: Option<usize>) -> Vec<ConflictRecord> {
        let ledger = self.ledger.lock();
        let newest_first = ledger.conflicts.iter().rev().cloned();
        match limit {
            Some(limit) => newest_first.take(limit).collect(),
            None => newest_first.collect(),
        }
    }

    pub fn unresolved_count(&self) -> usize {
        self.ledger
            .lock()
            .conflicts
            .iter()
            .filter(|conflict| conflict.is_unresolved())
            .count()
    }

    /// Drop settled conflicts from the history.
    pub fn clear_resolved_conflicts(&self) -> usize {
        self.mutate(|ledger| {
            let before = ledger.conflicts.len();
            ledger.conflicts.retain(ConflictRecord::is_unresolved);
            before - ledger.conflicts.len()
        })
    }

    pub fn cursor(&self) -> i64 {
        self.ledger.lock().cursor_ms
    }

    pub fn set_cursor(&self, cursor_ms: i64) {
        self.mutate(|ledger| ledger.cursor_ms = ledger.cursor_ms.max(cursor_ms));
    }
}

/// Drop the oldest settled conflicts beyond `keep`. Unresolved ones stay.
fn prune_settled(conflicts: &mut Vec<ConflictRecord>, keep: usize) {
    let settled = conflicts
        .iter()
        .filter(|conflict| !conflict.is_unresolved())
        .count();
    let mut excess = settled.saturating_sub(keep);
    if excess == 0 {
        return;
    }
    let dropped = excess;
    conflicts.retain(|conflict| {
        if excess > 0 && !conflict.is_unresolved() {
            excess -= 1;
            false
        } else {
            true
        }
    });
    tracing::debug!("Pruned {dropped} settled conflicts from the sync ledger");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendId, ConflictResolution, Record};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn entry(key: &str, version: u64, now: i64) -> SyncQueueEntry {
        let record = Record::new("cart", key, json!({"v": version}), version, now, BackendId::Embedded);
        SyncQueueEntry::for_record(&record, version - 1, now)
    }

    #[test]
    fn ready_keys_respects_fifo_head() {
        let store = SyncStore::in_memory();
        let first = store.append(entry("a", 1, 10));
        store.append(entry("a", 2, 10));
        store.append(entry("b", 1, 10));

        assert_eq!(
            store.ready_keys(10),
            vec![RecordKey::new("cart", "a"), RecordKey::new("cart", "b")]
        );

        store.update(first.id, |entry| entry.next_attempt_at = 100);
        assert_eq!(store.ready_keys(10), vec![RecordKey::new("cart", "b")]);

        store.update(first.id, |entry| entry.status = SyncStatus::Failed { terminal: true });
        assert_eq!(store.ready_keys(1_000), vec![RecordKey::new("cart", "b")]);
        assert_eq!(store.terminal_count(), 1);
        assert_eq!(store.retry_failed(1_000), 1);
        assert_eq!(store.ready_keys(1_000).len(), 2);
    }

    #[test]
    fn manual_conflict_blocks_current_and_future_entries() {
        let store = SyncStore::in_memory();
        store.append(entry("a", 2, 10));

        let local = Record::new("cart", "a", json!(1), 2, 10, BackendId::Embedded);
        let remote = Record::new("cart", "a", json!(2), 2, 11, BackendId::Remote);
        let conflict = ConflictRecord::detect(&local, &remote, ConflictResolution::ManualPending, 12);
        let conflict_id = conflict.id;
        store.push_conflict(conflict);

        let late = store.append(entry("a", 3, 20));
        assert_eq!(late.blocked_by, Some(conflict_id));
        assert!(store.ready_keys(100).is_empty());
        assert_eq!(store.unresolved_count(), 1);

        assert!(store.settle_conflict(conflict_id, |conflict| {
            conflict.settle(ConflictResolution::Manual, 4, 30);
        }));
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.unresolved_count(), 0);
        assert_eq!(store.clear_resolved_conflicts(), 1);
    }

    #[test]
    fn settled_conflict_history_is_capped() {
        let store = SyncStore::in_memory().with_conflict_history(3);
        let local = Record::new("cart", "a", json!(1), 2, 10, BackendId::Embedded);
        let remote = Record::new("cart", "a", json!(2), 2, 11, BackendId::Remote);

        let pending =
            ConflictRecord::detect(&local, &remote, ConflictResolution::ManualPending, 1);
        let pending_id = pending.id;
        store.push_conflict(pending);

        let mut settled = Vec::new();
        for now in 2..10 {
            let conflict =
                ConflictRecord::detect(&local, &remote, ConflictResolution::LastWriteWins, now);
            settled.push(conflict.id);
            store.push_conflict(conflict);
        }

        let kept = store.conflicts(None);
        assert_eq!(kept.len(), 4);
        assert_eq!(
            kept.iter().map(|conflict| conflict.id).collect::<Vec<_>>(),
            vec![settled[7], settled[6], settled[5], pending_id]
        );
        assert_eq!(store.unresolved_count(), 1);

        // Pruning follows detection order, so the oldest conflict goes once settled
        assert!(store.settle_conflict(pending_id, |conflict| {
            conflict.settle(ConflictResolution::Manual, 3, 20);
        }));
        let kept = store
            .conflicts(None)
            .into_iter()
            .map(|conflict| conflict.id)
            .collect::<Vec<_>>();
        assert_eq!(kept, vec![settled[7], settled[6], settled[5]]);
    }

    #[test]
    fn ledger_survives_reopen_and_requeues_in_flight() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("sync-state.json");

        let store = SyncStore::open(&path).unwrap();
        let appended = store.append(entry("a", 1, 10));
        store.set_status(appended.id, SyncStatus::InFlight);
        store.set_cursor(500);
        drop(store);

        let reopened = SyncStore::open(&path).unwrap();
        let entries = reopened.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, SyncStatus::Pending);
        assert_eq!(reopened.cursor(), 500);

        // Sequence numbering continues after reopen
        let next = reopened.append(entry("b", 1, 10));
        assert_eq!(next.sequence, 2);
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let store = SyncStore::in_memory();
        store.set_cursor(100);
        store.set_cursor(50);
        assert_eq!(store.cursor(), 100);
    }
}
