//! Archive persistence: one export-format JSON file per archive.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::export::ExportFile;
use crate::models::{ArchiveId, BackupArchive, BackupSummary};
use crate::util::{read_json_file, write_json_atomic};

#[derive(Debug)]
pub struct ArchiveStore {
    dir: Option<PathBuf>,
    archives: Mutex<BTreeMap<ArchiveId, BackupArchive>>,
}

impl ArchiveStore {
    /// Load every archive under `dir`. Unreadable files are skipped, not fatal;
    /// archives with a bad checksum are kept so restore can report them.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut archives = BTreeMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_json_file::<ExportFile>(&path) {
                Ok(Some(file)) => {
                    let archive = BackupArchive::from(file);
                    archives.insert(archive.id, archive);
                }
                Ok(None) => {}
                Err(error) => warn!("Skipping unreadable archive {}: {error}", path.display()),
            }
        }

        info!("Loaded {} backup archives from {}", archives.len(), dir.display());
        Ok(Self {
            dir: Some(dir),
            archives: Mutex::new(archives),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            dir: None,
            archives: Mutex::new(BTreeMap::new()),
        }
    }

    fn archive_path(&self, id: ArchiveId) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{id}.json")))
    }

    /// Persist `archive`; it is visible only once it is on disk.
    pub fn insert(&self, archive: BackupArchive) -> Result<()> {
        if let Some(path) = self.archive_path(archive.id) {
            write_json_atomic(&path, &ExportFile::from(&archive))?;
        }
        self.archives.lock().insert(archive.id, archive);
        Ok(())
    }

    pub fn get(&self, id: ArchiveId) -> Option<BackupArchive> {
        self.archives.lock().get(&id).cloned()
    }

    /// Remove an archive; `false` when it does not exist.
    pub fn remove(&self, id: ArchiveId) -> Result<bool> {
        if self.archives.lock().remove(&id).is_none() {
            return Ok(false);
        }
        if let Some(path) = self.archive_path(id) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(true)
    }

    /// Archive summaries, newest first.
    pub fn summaries(&self) -> Vec<BackupSummary> {
        let mut summaries = self
            .archives
            .lock()
            .values()
            .map(BackupArchive::summary)
            .collect::<Vec<_>>();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        summaries
    }

    pub fn len(&self) -> usize {
        self.archives.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendId, BackupTrigger, Record};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn archive(created_at: i64) -> BackupArchive {
        BackupArchive::seal(
            BackupTrigger::Manual,
            None,
            None,
            &[Record::new("cart", "1", json!(created_at), 1, created_at, BackendId::Embedded)],
            created_at,
        )
    }

    #[test]
    fn archives_survive_reopen() {
        let tmp = tempdir().unwrap();
        let store = ArchiveStore::open(tmp.path()).unwrap();
        let first = archive(10);
        let second = archive(20);
        store.insert(first.clone()).unwrap();
        store.insert(second.clone()).unwrap();
        std::fs::write(tmp.path().join("stray.json"), b"{").unwrap();

        let reopened = ArchiveStore::open(tmp.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get(first.id), Some(first));

        let newest = reopened.summaries();
        assert_eq!(newest[0].id, second.id);
    }

    #[test]
    fn remove_deletes_the_file() {
        let tmp = tempdir().unwrap();
        let store = ArchiveStore::open(tmp.path()).unwrap();
        let item = archive(10);
        store.insert(item.clone()).unwrap();

        assert!(store.remove(item.id).unwrap());
        assert!(!store.remove(item.id).unwrap());
        assert!(!tmp.path().join(format!("{}.json", item.id)).exists());
        assert!(store.is_empty());
    }
}
