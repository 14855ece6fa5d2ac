//! Error types for strata-core

use thiserror::Error;

use crate::models::BackendId;

/// Result type alias using strata-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in strata-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// A backend could not be reached (transient, retryable)
    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: BackendId, reason: String },

    /// Record or object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input supplied by the caller
    #[error("Validation error: {0}")]
    Validation(String),

    /// A conflict is waiting for operator resolution
    #[error("Conflict unresolved: {0}")]
    ConflictUnresolved(String),

    /// Backup archive failed integrity checks; restore refused
    #[error("Corrupt archive {archive_id}: {reason}")]
    CorruptArchive { archive_id: String, reason: String },

    /// Every local backend is down
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Operation stopped at a record boundary by its cancel flag
    #[error("Operation cancelled")]
    Cancelled,

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Build a `BackendUnavailable` error.
    pub fn unavailable(backend: BackendId, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Whether the failure may succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::Http(_) | Self::Io(_)
        )
    }

    /// Whether the failure means the backend itself is unreachable.
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}
