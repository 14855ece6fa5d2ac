//! Backend health model

use serde::{Deserialize, Serialize};

use super::BackendId;

/// Point-in-time health of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub backend: BackendId,
    pub available: bool,
    /// Last probe timestamp (Unix ms); `None` before the first probe
    pub last_checked_at: Option<i64>,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Backend is wired into this subsystem
    pub configured: bool,
    /// Outages seen since startup; identifies the current one while down
    #[serde(default)]
    pub outage_episode: u64,
}
