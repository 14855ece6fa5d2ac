//! Per-key async locks.
//!
//! Writes, conflict resolution and restores for the same `(collection, key)`
//! are serialized; different keys proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::models::RecordKey;

/// Prune idle entries once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1_024;

#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<RecordKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &RecordKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > PRUNE_THRESHOLD {
                // Only this table holds a reference to idle locks
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
