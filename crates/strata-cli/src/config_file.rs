//! CLI config file location and environment overrides.
//!
//! Precedence, lowest first: config file, environment, command-line flags.

use std::path::{Path, PathBuf};

use strata_core::config::StorageConfig;
use strata_core::util::{normalize_text_option, write_json_atomic};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR: &str = "strata";

pub const CONFIG_ENV: &str = "STRATA_CONFIG";
pub const DATA_DIR_ENV: &str = "STRATA_DATA_DIR";
pub const REMOTE_URL_ENV: &str = "STRATA_REMOTE_URL";
pub const REMOTE_TOKEN_ENV: &str = "STRATA_REMOTE_TOKEN";

const REDACTED: &str = "********";

/// Data directory and storage mode requested on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOverrides {
    pub data_dir: Option<PathBuf>,
    pub in_memory: bool,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE_NAME))
}

pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR))
}

/// `--config`, then `$STRATA_CONFIG`, then the user config directory.
pub fn resolve_config_path(
    explicit: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    explicit
        .or_else(|| normalize_text_option(env(CONFIG_ENV)).map(PathBuf::from))
        .or_else(default_config_path)
}

/// Load the config file (defaults when absent) and apply overrides.
pub fn load_effective_config(
    config_path: Option<&Path>,
    overrides: &StorageOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> Result<StorageConfig, CliError> {
    let mut config = match config_path {
        Some(path) => StorageConfig::load_from_path(path).map_err(|error| {
            CliError::Config(format!("Failed to load {}: {error}", path.display()))
        })?,
        None => StorageConfig::default(),
    };
    apply_env_overrides(&mut config, env);

    if overrides.in_memory {
        config.data_dir = None;
    } else if let Some(data_dir) = &overrides.data_dir {
        config.data_dir = Some(data_dir.clone());
    } else if config.data_dir.is_none() {
        config.data_dir = Some(default_data_dir().ok_or_else(|| {
            CliError::Config("Unable to resolve a data directory; pass --data-dir".to_string())
        })?);
    }

    config.normalize();
    config.validate()?;
    Ok(config)
}

pub fn apply_env_overrides(config: &mut StorageConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(data_dir) = normalize_text_option(env(DATA_DIR_ENV)) {
        config.data_dir = Some(PathBuf::from(data_dir));
    }
    if let Some(url) = normalize_text_option(env(REMOTE_URL_ENV)) {
        config.remote.url = Some(url);
    }
    if let Some(token) = normalize_text_option(env(REMOTE_TOKEN_ENV)) {
        config.remote.auth_token = Some(token);
    }
}

pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

pub fn save_config(path: &Path, config: &StorageConfig) -> Result<(), CliError> {
    let mut normalized = config.clone();
    normalized.normalize();
    normalized.validate()?;
    write_json_atomic(path, &normalized)?;
    Ok(())
}

/// Copy of `config` safe to print.
pub fn redacted(config: &StorageConfig) -> StorageConfig {
    let mut redacted = config.clone();
    if redacted.remote.auth_token.is_some() {
        redacted.remote.auth_token = Some(REDACTED.to_string());
    }
    redacted
}
