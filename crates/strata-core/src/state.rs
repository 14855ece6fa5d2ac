//! Aggregate sync state reported to dashboards and the CLI.

use serde::{Deserialize, Serialize};

/// Unified sync state derived from the queue, conflicts and remote health.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Remote unreachable or not configured
    Offline,
    /// A drain or full sync is running
    Syncing,
    /// Local writes waiting for the next drain
    Pending,
    Synced,
    /// Terminal failures or unresolved manual conflicts need attention
    Error,
}

impl SyncState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}
