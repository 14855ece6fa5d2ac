//! Ordered in-memory record table shared by the memory and key/value backends.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::models::{Record, RecordKey};

use super::{BackendStats, ListFilter, PROBE_COLLECTION};

#[derive(Debug, Clone, Default)]
pub(super) struct RecordMap {
    records: BTreeMap<RecordKey, Record>,
}

impl RecordMap {
    pub(super) fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut map = Self::default();
        for record in records {
            map.put(record);
        }
        map
    }

    pub(super) fn get(&self, collection: &str, key: &str) -> Option<Record> {
        self.records.get(&RecordKey::new(collection, key)).cloned()
    }

    /// Store unless the existing version is at or above the incoming one.
    /// Returns the record that is stored afterwards and whether it changed.
    pub(super) fn put(&mut self, record: Record) -> (Record, bool) {
        let record_key = record.record_key();
        match self.records.get(&record_key) {
            Some(existing) if existing.version >= record.version => (existing.clone(), false),
            _ => {
                self.records.insert(record_key, record.clone());
                (record, true)
            }
        }
    }

    pub(super) fn delete(&mut self, collection: &str, key: &str) -> Result<Record> {
        self.records
            .remove(&RecordKey::new(collection, key))
            .ok_or_else(|| Error::NotFound(format!("{collection}/{key}")))
    }

    pub(super) fn list(&self, collection: &str, filter: &ListFilter) -> Vec<Record> {
        let start = RecordKey::new(collection, String::new());
        let records = self
            .records
            .range(start..)
            .take_while(|(record_key, _)| record_key.collection == collection)
            .map(|(_, record)| record)
            .filter(|record| filter.matches(record))
            .cloned();

        match filter.limit {
            Some(limit) => records.take(limit).collect(),
            None => records.collect(),
        }
    }

    pub(super) fn collections(&self) -> Vec<String> {
        self.records
            .keys()
            .filter(|record_key| record_key.collection != PROBE_COLLECTION)
            .map(|record_key| record_key.collection.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub(super) fn stats(&self) -> BackendStats {
        let mut stats = BackendStats::default();
        for record in self.records.values() {
            if record.collection == PROBE_COLLECTION {
                continue;
            }
            stats.count += 1;
            stats.approx_size_bytes += record.approx_size();
        }
        stats
    }

    pub(super) fn changes_since(&self, since_ms: i64) -> Vec<Record> {
        let mut changes = self
            .records
            .values()
            .filter(|record| record.collection != PROBE_COLLECTION)
            .filter(|record| record.updated_at >= since_ms)
            .cloned()
            .collect::<Vec<_>>();
        changes.sort_by_key(|record| (record.updated_at, record.record_key()));
        changes
    }

    pub(super) fn snapshot(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }
}
