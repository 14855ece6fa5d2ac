//! Data models for Strata

/// Declare a UUID v7 newtype identifier (time-sortable).
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            #[must_use]
            pub fn as_str(&self) -> String {
                self.0.to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(uuid::Uuid::parse_str(s.trim())?))
            }
        }
    };
}

pub(crate) use uuid_id;

mod archive;
mod health;
mod record;
mod sync_conflict;
mod sync_entry;

pub use archive::{ArchiveId, ArchiveRecord, BackupArchive, BackupSummary, BackupTrigger};
pub use health::HealthStatus;
pub use record::{validate_name, validate_record_key, BackendId, Record, RecordKey};
pub use sync_conflict::{ConflictId, ConflictRecord, ConflictResolution, ManualChoice};
pub use sync_entry::{EntryId, SyncOperation, SyncQueueEntry, SyncStatus};
