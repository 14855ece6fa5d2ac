//! Record repository implementation

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite stores versions and sizes as i64

use crate::backends::{BackendStats, ListFilter, PROBE_COLLECTION};
use crate::error::{Error, Result};
use crate::models::{BackendId, Record};
use libsql::{params, Connection, Row};

/// Trait for record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Get a record (tombstones included)
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>>;

    /// Insert or update a record unless the stored version is at or above it
    async fn upsert(&self, record: &Record) -> Result<Record>;

    /// Remove a record; returns whether a row existed
    async fn delete(&self, collection: &str, key: &str) -> Result<bool>;

    /// List records of a collection ordered by key
    async fn list(&self, collection: &str, filter: &ListFilter) -> Result<Vec<Record>>;

    /// Distinct collection names
    async fn collections(&self) -> Result<Vec<String>>;

    /// Row count and approximate size
    async fn stats(&self) -> Result<BackendStats>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &Row) -> Result<Record> {
        let value: String = row.get(2)?;
        let origin: String = row.get(5)?;
        Ok(Record {
            collection: row.get(0)?,
            key: row.get(1)?,
            value: serde_json::from_str(&value)?,
            version: row.get::<i64>(3)? as u64,
            updated_at: row.get(4)?,
            origin: parse_origin(&origin),
            deleted: row.get::<i32>(6)? != 0,
        })
    }
}

fn parse_origin(value: &str) -> BackendId {
    match value {
        "remote" => BackendId::Remote,
        "key_value" => BackendId::KeyValue,
        _ => BackendId::Embedded,
    }
}

fn sql_version(version: u64) -> Result<i64> {
    i64::try_from(version)
        .map_err(|_| Error::Validation(format!("version {version} exceeds storage range")))
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        let mut rows = self
            .conn
            .query(
                "SELECT collection, key, value, version, updated_at, origin, is_deleted
                 FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: &Record) -> Result<Record> {
        let value = serde_json::to_string(&record.value)?;
        // records_version_guard turns stale updates into no-ops
        self.conn
            .execute(
                "INSERT INTO records (collection, key, value, version, updated_at, origin, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(collection, key) DO UPDATE SET
                     value = excluded.value,
                     version = excluded.version,
                     updated_at = excluded.updated_at,
                     origin = excluded.origin,
                     is_deleted = excluded.is_deleted",
                params![
                    record.collection.as_str(),
                    record.key.as_str(),
                    value,
                    sql_version(record.version)?,
                    record.updated_at,
                    record.origin.as_str(),
                    i32::from(record.deleted)
                ],
            )
            .await?;

        self.get(&record.collection, &record.key)
            .await?
            .ok_or_else(|| Error::NotFound(record.record_key().to_string()))
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM records WHERE collection = ?1 AND key = ?2",
                params![collection, key],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn list(&self, collection: &str, filter: &ListFilter) -> Result<Vec<Record>> {
        let limit = filter.limit.map_or(-1, |limit| limit as i64);
        let prefix = filter.key_prefix.clone().unwrap_or_default();
        let mut rows = self
            .conn
            .query(
                "SELECT collection, key, value, version, updated_at, origin, is_deleted
                 FROM records
                 WHERE collection = ?1
                   AND substr(key, 1, length(?2)) = ?2
                   AND (?3 = 1 OR is_deleted = 0)
                 ORDER BY key
                 LIMIT ?4",
                params![
                    collection,
                    prefix,
                    i32::from(filter.include_deleted),
                    limit
                ],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT collection FROM records WHERE collection != ?1 ORDER BY collection",
                params![PROBE_COLLECTION],
            )
            .await?;

        let mut collections = Vec::new();
        while let Some(row) = rows.next().await? {
            collections.push(row.get::<String>(0)?);
        }
        Ok(collections)
    }

    async fn stats(&self) -> Result<BackendStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*),
                        COALESCE(SUM(length(collection) + length(key) + length(value) + 32), 0)
                 FROM records WHERE collection != ?1",
                params![PROBE_COLLECTION],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(BackendStats::default());
        };
        Ok(BackendStats {
            count: row.get::<i64>(0)? as u64,
            approx_size_bytes: row.get::<i64>(1)? as u64,
        })
    }
}
