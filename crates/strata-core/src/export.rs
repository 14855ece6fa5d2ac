//! Portable archive export format shared by the CLI and the admin surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ArchiveId, ArchiveRecord, BackupArchive, BackupTrigger};

/// Current export file format version.
pub const FORMAT_VERSION: u32 = 1;

/// Self-describing export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub format_version: u32,
    pub id: ArchiveId,
    pub created_at: i64,
    pub trigger: BackupTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub checksum: String,
    pub collections: BTreeMap<String, Vec<ArchiveRecord>>,
}

impl From<&BackupArchive> for ExportFile {
    fn from(archive: &BackupArchive) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            id: archive.id,
            created_at: archive.created_at,
            trigger: archive.trigger,
            name: archive.name.clone(),
            description: archive.description.clone(),
            checksum: archive.checksum.clone(),
            collections: archive.collections.clone(),
        }
    }
}

impl From<ExportFile> for BackupArchive {
    fn from(file: ExportFile) -> Self {
        Self {
            id: file.id,
            created_at: file.created_at,
            trigger: file.trigger,
            name: file.name,
            description: file.description,
            collections: file.collections,
            checksum: file.checksum,
        }
    }
}

/// Render an archive as pretty-printed export JSON.
pub fn render_archive_export(archive: &BackupArchive) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(&ExportFile::from(archive))
}

/// Parse export bytes into an archive, refusing unknown versions and bad checksums.
pub fn parse_archive_export(bytes: &[u8]) -> Result<BackupArchive> {
    let file: ExportFile = serde_json::from_slice(bytes).map_err(|error| Error::CorruptArchive {
        archive_id: "unknown".to_string(),
        reason: format!("unreadable export: {error}"),
    })?;

    if file.format_version == 0 || file.format_version > FORMAT_VERSION {
        return Err(Error::Validation(format!(
            "unsupported export format version {} (expected {FORMAT_VERSION})",
            file.format_version
        )));
    }

    let archive = BackupArchive::from(file);
    if !archive.checksum_valid() {
        return Err(Error::CorruptArchive {
            archive_id: archive.id.to_string(),
            reason: "checksum mismatch".to_string(),
        });
    }
    Ok(archive)
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(timestamp_ms: i64) -> String {
    format!("strata-export-{timestamp_ms}.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackendId, Record};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn archive() -> BackupArchive {
        BackupArchive::seal(
            BackupTrigger::Manual,
            Some("nightly".to_string()),
            None,
            &[
                Record::new("cart", "42", json!({"qty": 2}), 2, 100, BackendId::Embedded),
                Record::tombstone("cart", "43", 5, 120, BackendId::Embedded),
            ],
            1_700,
        )
    }

    #[test]
    fn export_uses_camel_case_wire_names() {
        let bytes = render_archive_export(&archive()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["formatVersion"], json!(FORMAT_VERSION));
        assert_eq!(value["createdAt"], json!(1_700));
        assert_eq!(value["trigger"], json!("manual"));
        assert_eq!(value["name"], json!("nightly"));
        assert!(value.get("description").is_none());
        assert_eq!(value["collections"]["cart"][0]["updatedAt"], json!(100));
        assert_eq!(value["collections"]["cart"][1]["deleted"], json!(true));
        assert!(value["collections"]["cart"][0].get("deleted").is_none());
    }

    #[test]
    fn parse_accepts_own_output() {
        let original = archive();
        let parsed = parse_archive_export(&render_archive_export(&original).unwrap()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn parse_rejects_tampered_payload() {
        let bytes = render_archive_export(&archive()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["collections"]["cart"][0]["value"] = json!({"qty": 99});

        let error = parse_archive_export(&serde_json::to_vec(&value).unwrap()).unwrap_err();
        assert!(matches!(error, Error::CorruptArchive { .. }));
    }

    #[test]
    fn parse_rejects_future_versions_and_garbage() {
        let bytes = render_archive_export(&archive()).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["formatVersion"] = json!(FORMAT_VERSION + 1);
        assert!(matches!(
            parse_archive_export(&serde_json::to_vec(&value).unwrap()),
            Err(Error::Validation(_))
        ));

        assert!(matches!(
            parse_archive_export(b"not json"),
            Err(Error::CorruptArchive { .. })
        ));
    }

    #[test]
    fn suggested_export_file_name_is_stable() {
        assert_eq!(suggested_export_file_name(123), "strata-export-123.json");
    }
}
