//! Shared per-backend health table.
//!
//! Routing decisions read availability on every call, so the hot fields are
//! atomics. A backend turns unavailable after `failure_threshold` consecutive
//! failures and available again after a single success.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::backoff::BackoffPolicy;
use crate::models::{BackendId, HealthStatus};

const UNSET: i64 = i64::MIN;

/// Availability change produced by a probe or call outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    /// Crossed the failure threshold
    WentDown,
    /// First success after an outage
    Recovered,
}

#[derive(Debug)]
struct BackendHealth {
    configured: AtomicBool,
    available: AtomicBool,
    consecutive_failures: AtomicU32,
    last_checked_at: AtomicI64,
    down_since: AtomicI64,
    next_probe_at: AtomicI64,
    /// Outages seen so far; the current one while down
    outage_episode: AtomicU64,
    /// Last episode that got its emergency backup
    emergency_episode: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl BackendHealth {
    fn new(configured: bool) -> Self {
        Self {
            configured: AtomicBool::new(configured),
            available: AtomicBool::new(configured),
            consecutive_failures: AtomicU32::new(0),
            last_checked_at: AtomicI64::new(UNSET),
            down_since: AtomicI64::new(UNSET),
            next_probe_at: AtomicI64::new(UNSET),
            outage_episode: AtomicU64::new(0),
            emergency_episode: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }
}

#[derive(Debug)]
pub struct HealthTable {
    backends: [BackendHealth; 3],
    failure_threshold: u32,
}

impl HealthTable {
    /// All backends start available; `remote_configured = false` pins Remote down.
    pub fn new(remote_configured: bool, failure_threshold: u32) -> Self {
        Self {
            backends: [
                BackendHealth::new(remote_configured),
                BackendHealth::new(true),
                BackendHealth::new(true),
            ],
            failure_threshold: failure_threshold.max(1),
        }
    }

    fn slot(&self, backend: BackendId) -> &BackendHealth {
        &self.backends[backend.index()]
    }

    pub fn is_configured(&self, backend: BackendId) -> bool {
        self.slot(backend).configured.load(Ordering::SeqCst)
    }

    pub fn is_available(&self, backend: BackendId) -> bool {
        self.slot(backend).available.load(Ordering::SeqCst)
    }

    /// Local backends currently usable, in routing priority order.
    pub fn available_locals(&self) -> Vec<BackendId> {
        BackendId::LOCAL
            .into_iter()
            .filter(|backend| self.is_available(*backend))
            .collect()
    }

    pub fn record_success(&self, backend: BackendId, now: i64) -> HealthTransition {
        let slot = self.slot(backend);
        if !slot.configured.load(Ordering::SeqCst) {
            return HealthTransition::Unchanged;
        }
        slot.last_checked_at.store(now, Ordering::SeqCst);
        slot.consecutive_failures.store(0, Ordering::SeqCst);
        slot.next_probe_at.store(UNSET, Ordering::SeqCst);
        *slot.last_error.lock() = None;

        if slot.available.swap(true, Ordering::SeqCst) {
            HealthTransition::Unchanged
        } else {
            slot.down_since.store(UNSET, Ordering::SeqCst);
            HealthTransition::Recovered
        }
    }

    /// Count a failure; schedules the next probe of a down backend via `backoff`.
    pub fn record_failure(
        &self,
        backend: BackendId,
        now: i64,
        error: &str,
        backoff: &BackoffPolicy,
    ) -> HealthTransition {
        let slot = self.slot(backend);
        if !slot.configured.load(Ordering::SeqCst) {
            return HealthTransition::Unchanged;
        }
        slot.last_checked_at.store(now, Ordering::SeqCst);
        *slot.last_error.lock() = Some(error.to_string());
        let failures = slot
            .consecutive_failures
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1);

        if failures < self.failure_threshold {
            return HealthTransition::Unchanged;
        }

        let retries = failures - self.failure_threshold + 1;
        slot.next_probe_at
            .store(now.saturating_add(backoff.delay_ms(retries)), Ordering::SeqCst);

        if slot.available.swap(false, Ordering::SeqCst) {
            slot.down_since.store(now, Ordering::SeqCst);
            slot.outage_episode.fetch_add(1, Ordering::SeqCst);
            HealthTransition::WentDown
        } else {
            HealthTransition::Unchanged
        }
    }

    /// Whether the prober should contact `backend` at `now`.
    pub fn probe_due(&self, backend: BackendId, now: i64) -> bool {
        let slot = self.slot(backend);
        if !slot.configured.load(Ordering::SeqCst) {
            return false;
        }
        let next = slot.next_probe_at.load(Ordering::SeqCst);
        next == UNSET || now >= next
    }

    /// Milliseconds the backend has been down, `None` while available.
    pub fn outage_ms(&self, backend: BackendId, now: i64) -> Option<i64> {
        let since = self.slot(backend).down_since.load(Ordering::SeqCst);
        (since != UNSET && !self.is_available(backend)).then(|| now.saturating_sub(since))
    }

    pub fn outage_episode(&self, backend: BackendId) -> u64 {
        self.slot(backend).outage_episode.load(Ordering::SeqCst)
    }

    /// Claim the single emergency backup of the current outage episode.
    /// Returns the episode, or `None` when already claimed or the backend is up.
    pub fn claim_emergency(&self, backend: BackendId) -> Option<u64> {
        if self.is_available(backend) {
            return None;
        }
        let slot = self.slot(backend);
        let episode = slot.outage_episode.load(Ordering::SeqCst);
        let claimed = slot.emergency_episode.fetch_max(episode, Ordering::SeqCst);
        (claimed < episode).then_some(episode)
    }

    pub fn status(&self, backend: BackendId) -> HealthStatus {
        let slot = self.slot(backend);
        let last_checked_at = slot.last_checked_at.load(Ordering::SeqCst);
        HealthStatus {
            backend,
            available: slot.available.load(Ordering::SeqCst),
            last_checked_at: (last_checked_at != UNSET).then_some(last_checked_at),
            consecutive_failures: slot.consecutive_failures.load(Ordering::SeqCst),
            last_error: slot.last_error.lock().clone(),
            configured: slot.configured.load(Ordering::SeqCst),
            outage_episode: slot.outage_episode.load(Ordering::SeqCst),
        }
    }

    pub fn snapshot(&self) -> Vec<HealthStatus> {
        BackendId::ALL
            .into_iter()
            .map(|backend| self.status(backend))
            .collect()
    }
}
