//! Storage subsystem configuration.
//!
//! Every field has a default so an empty JSON object is a valid config. Files
//! are parsed with `deny_unknown_fields` to surface typos early.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const EMBEDDED_DB_FILE: &str = "strata.db";
const KEY_VALUE_FILE: &str = "fallback-kv.json";
const SYNC_STATE_FILE: &str = "sync-state.json";
const BACKUP_DIR: &str = "backups";

/// How SyncService settles a conflicting remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    #[default]
    LastWriteWins,
    Merge,
    Manual,
}

/// Field merge depth used by `ConflictStrategy::Merge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Top-level fields only; nested objects are compared as whole values
    #[default]
    Shallow,
    /// Recurse into nested objects
    Deep,
}

/// Remote backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// Base URL of the remote CRUD service (e.g. `https://data.example.com`)
    #[serde(default)]
    pub url: Option<String>,
    /// Bearer token for the remote service
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Per-call timeout (ms)
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            auth_token: None,
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

impl RemoteConfig {
    /// Create a new remote configuration
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            auth_token: Some(auth_token.into()),
            timeout_ms: default_remote_timeout_ms(),
        }
    }

    /// Check if the remote is configured
    pub const fn is_configured(&self) -> bool {
        self.url.is_some() && self.auth_token.is_some()
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn normalize(&mut self) {
        self.url = normalize_text_option(self.url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.auth_token = normalize_text_option(self.auth_token.take());
    }
}

/// Health probing and failover thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Consecutive failures before a backend is marked unavailable
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Remote outage length that raises an emergency backup (ms)
    #[serde(default = "default_outage_threshold_ms")]
    pub outage_threshold_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            failure_threshold: default_failure_threshold(),
            probe_timeout_ms: default_probe_timeout_ms(),
            outage_threshold_ms: default_outage_threshold_ms(),
        }
    }
}

/// Sync drain settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    /// Drain interval (ms); `None` disables the background drain
    #[serde(default = "default_sync_interval_ms")]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default)]
    pub merge_mode: MergeMode,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Settled conflicts kept in the ledger; unresolved ones are always kept
    #[serde(default = "default_conflict_history")]
    pub conflict_history: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_sync_interval_ms(),
            conflict_strategy: ConflictStrategy::default(),
            merge_mode: MergeMode::default(),
            backoff: BackoffPolicy::default(),
            conflict_history: default_conflict_history(),
        }
    }
}

/// Backup scheduling and retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackupSettings {
    /// Scheduled backup interval (ms); `None` disables scheduled backups
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Non-emergency archives kept
    #[serde(default = "default_retention_count")]
    pub retention_count: usize,
    /// Non-emergency archives older than this are pruned (ms)
    #[serde(default)]
    pub max_age_ms: Option<u64>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            interval_ms: None,
            retention_count: default_retention_count(),
            max_age_ms: None,
        }
    }
}

/// Top-level configuration for the storage subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory holding local stores, sync state and archives.
    /// `None` keeps everything in memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub backup: BackupSettings,
}

impl StorageConfig {
    /// In-memory configuration rooted nowhere (tests, ephemeral tools).
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration persisting under `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    /// Load a config file, returning defaults when it does not exist.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = crate::util::read_json_file::<Self>(path)?.unwrap_or_default();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn normalize(&mut self) {
        self.remote.normalize();
        if self.health.failure_threshold == 0 {
            self.health.failure_threshold = 1;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.remote.url {
            if !is_http_url(url) {
                return Err(Error::Validation(
                    "remote.url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.health.probe_interval_ms == 0 {
            return Err(Error::Validation(
                "health.probe_interval_ms must be positive".to_string(),
            ));
        }
        if self.sync.interval_ms == Some(0) || self.backup.interval_ms == Some(0) {
            return Err(Error::Validation(
                "worker intervals must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn embedded_db_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(EMBEDDED_DB_FILE))
    }

    pub fn key_value_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(KEY_VALUE_FILE))
    }

    pub fn sync_state_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(SYNC_STATE_FILE))
    }

    pub fn backup_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(BACKUP_DIR))
    }
}

const fn default_remote_timeout_ms() -> u64 {
    5_000
}

const fn default_probe_interval_ms() -> u64 {
    15_000
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_probe_timeout_ms() -> u64 {
    3_000
}

const fn default_outage_threshold_ms() -> u64 {
    5 * 60 * 1_000
}

#[allow(clippy::unnecessary_wraps)]
const fn default_sync_interval_ms() -> Option<u64> {
    Some(30_000)
}

const fn default_retention_count() -> usize {
    10
}

const fn default_conflict_history() -> usize {
    crate::sync::DEFAULT_CONFLICT_HISTORY
}
