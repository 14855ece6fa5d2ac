use std::io;

use strata_core::services::AdminError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] strata_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{kind}: {message}")]
    Admin { kind: &'static str, message: String },
    #[error("No value provided")]
    EmptyValue,
    #[error("{0} cannot be empty")]
    EmptyArgument(&'static str),
    #[error("Invalid {kind} id: {value}")]
    InvalidId { kind: &'static str, value: String },
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Choose one of --keep-local, --keep-remote or --value")]
    MissingChoice,
    #[error("Recovery drill {0} failed")]
    DrillFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<AdminError> for CliError {
    fn from(error: AdminError) -> Self {
        Self::Admin {
            kind: error.kind,
            message: error.message,
        }
    }
}
