//! Record model

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Maximum length accepted for collection names and keys.
const MAX_NAME_LEN: usize = 256;

/// One of the three storage tiers, in routing priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    /// Managed network data service, authoritative when reachable
    Remote,
    /// Structured on-device database
    Embedded,
    /// Last-resort local key/value store
    KeyValue,
}

impl BackendId {
    /// Every backend, highest priority first.
    pub const ALL: [Self; 3] = [Self::Remote, Self::Embedded, Self::KeyValue];

    /// Local backends, highest priority first.
    pub const LOCAL: [Self; 2] = [Self::Embedded, Self::KeyValue];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Embedded => "embedded",
            Self::KeyValue => "key_value",
        }
    }

    #[must_use]
    pub const fn is_local(self) -> bool {
        !matches!(self, Self::Remote)
    }

    /// Index into fixed-size per-backend tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Remote => 0,
            Self::Embedded => 1,
            Self::KeyValue => 2,
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a record: `(collection, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub collection: String,
    pub key: String,
}

impl RecordKey {
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

/// A versioned value stored under `(collection, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Collection name
    pub collection: String,
    /// Key, unique within the collection
    pub key: String,
    /// JSON payload
    pub value: serde_json::Value,
    /// Monotonic per-key version
    pub version: u64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Backend that produced this version
    pub origin: BackendId,
    /// Tombstone flag
    pub deleted: bool,
}

impl Record {
    /// Create a live record.
    pub fn new(
        collection: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
        version: u64,
        updated_at: i64,
        origin: BackendId,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            value,
            version,
            updated_at,
            origin,
            deleted: false,
        }
    }

    /// Create a tombstone for `(collection, key)`.
    pub fn tombstone(
        collection: impl Into<String>,
        key: impl Into<String>,
        version: u64,
        updated_at: i64,
        origin: BackendId,
    ) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
            value: serde_json::Value::Null,
            version,
            updated_at,
            origin,
            deleted: true,
        }
    }

    #[must_use]
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.collection.clone(), self.key.clone())
    }

    /// Approximate on-disk footprint used for stats.
    #[must_use]
    pub fn approx_size(&self) -> u64 {
        let value_len = serde_json::to_vec(&self.value).map_or(0, |bytes| bytes.len());
        (self.collection.len() + self.key.len() + value_len + 32) as u64
    }

    /// Whether two records carry the same payload state.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.deleted == other.deleted && (self.deleted || self.value == other.value)
    }
}

/// Reject collection/key names that cannot be stored or routed.
pub fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{kind} must not be empty")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "{kind} exceeds {MAX_NAME_LEN} bytes"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(Error::Validation(format!(
            "{kind} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate a caller-supplied `(collection, key)` pair.
///
/// Collections starting with `__` are reserved for health probes.
pub fn validate_record_key(collection: &str, key: &str) -> Result<()> {
    validate_name("collection", collection)?;
    validate_name("key", key)?;
    if collection.starts_with("__") {
        return Err(Error::Validation(format!(
            "collection '{collection}' is reserved"
        )));
    }
    Ok(())
}
