//! Embedded database tier (libSQL file on the local device).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::{Database, LibSqlRecordRepository, RecordRepository};
use crate::error::{Error, Result};
use crate::models::{BackendId, Record};

use super::{BackendStats, ListFilter, StorageBackend};

pub struct EmbeddedBackend {
    db: Mutex<Database>,
    db_path: Option<PathBuf>,
}

impl std::fmt::Debug for EmbeddedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedBackend")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl EmbeddedBackend {
    /// Open the database file at `db_path`, creating parent directories.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Embedded store at {} is unreadable ({error}); starting from an empty file",
                    db_path.display()
                );
                quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Mutex::new(db),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory database (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(Database::open_in_memory().await?),
            db_path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

#[async_trait]
impl StorageBackend for EmbeddedBackend {
    fn id(&self) -> BackendId {
        BackendId::Embedded
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .get(collection, key)
            .await
    }

    async fn put(&self, record: Record) -> Result<Record> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .upsert(&record)
            .await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        let removed = LibSqlRecordRepository::new(db.connection())
            .delete(collection, key)
            .await?;
        if removed {
            Ok(())
        } else {
            Err(Error::NotFound(format!("{collection}/{key}")))
        }
    }

    async fn list(&self, collection: &str, filter: &ListFilter) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .list(collection, filter)
            .await
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .collections()
            .await
    }

    async fn stats(&self) -> Result<BackendStats> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection()).stats().await
    }

    /// Move an unreadable database file aside and reopen a fresh one.
    async fn repair(&self) -> Result<bool> {
        let Some(db_path) = self.db_path.clone() else {
            return Ok(false);
        };

        {
            let db = self.db.lock().await;
            let healthy = db.connection().query("SELECT 1", ()).await.is_ok()
                && db_path.exists();
            if healthy {
                return Ok(false);
            }
        }

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::warn!(
            "Embedded store at {} failed its health query; reopening",
            db_path.display()
        );

        let mut db = self.db.lock().await;
        let placeholder = Database::open_in_memory().await?;
        let _old = std::mem::replace(&mut *db, placeholder);

        quarantine_corrupted_db_files(&db_path)?;
        *db = Database::open(&db_path).await?;
        Ok(true)
    }
}

fn is_corrupted_db_error(error: &Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("file is not a database") || message.contains("malformed")
}

/// Rename the database file aside and remove its WAL/SHM sidecars.
fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
    if db_path.exists() {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let base_name = db_path
            .file_name()
            .map_or_else(|| "strata.db".into(), |name| name.to_string_lossy());
        let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

        std::fs::rename(db_path, &backup_path)?;
        tracing::warn!(
            "Moved corrupted embedded store from {} to {}",
            db_path.display(),
            backup_path.display()
        );
    }

    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
        return Ok(());
    };
    let sidecar_prefix = format!("{base_name}-");

    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with(&sidecar_prefix) {
            let path = entry.path();
            std::fs::remove_file(&path)?;
            tracing::warn!("Removed stale embedded store file {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn put_get_delete() {
        let backend = EmbeddedBackend::open_in_memory().await.unwrap();
        backend
            .put(Record::new("cart", "42", json!({"qty": 2}), 1, 1, BackendId::Embedded))
            .await
            .unwrap();

        assert_eq!(
            backend.get("cart", "42").await.unwrap().unwrap().value,
            json!({"qty": 2})
        );
        backend.delete("cart", "42").await.unwrap();
        assert!(matches!(
            backend.delete("cart", "42").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_round_trip_leaves_no_rows() {
        let backend = EmbeddedBackend::open_in_memory().await.unwrap();
        backend.probe().await.unwrap();
        assert_eq!(backend.stats().await.unwrap().count, 0);
        assert!(!backend.repair().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_quarantines_garbage_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("strata.db");
        std::fs::write(&path, b"this is definitely not sqlite, just some bytes padding it out to a full header length.....").unwrap();

        let backend = EmbeddedBackend::open(&path).await.unwrap();
        backend
            .put(Record::new("cart", "1", json!(1), 1, 1, BackendId::Embedded))
            .await
            .unwrap();

        let quarantined = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .any(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
    }
}
