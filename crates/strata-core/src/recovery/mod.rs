//! Recovery service: the only writer of the health table.
//!
//! Probes every configured backend, flips availability with hysteresis,
//! repairs local tiers and raises at most one emergency backup per outage.

mod scenario;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::backup::BackupService;
use crate::config::HealthConfig;
use crate::error::{Error, Result};
use crate::health::{HealthTable, HealthTransition};
use crate::models::{BackendId, HealthStatus};
use crate::storage::HybridStorage;
use crate::util::now_ms;
use crate::worker::PeriodicWorker;

pub use scenario::{RecoveryScenario, RecoveryStep, RecoveryTestReport};

#[derive(Debug)]
pub struct RecoveryService {
    hybrid: Arc<HybridStorage>,
    backups: Arc<BackupService>,
    config: HealthConfig,
    backoff: BackoffPolicy,
    /// Serializes probe rounds and recovery drills
    probing: tokio::sync::Mutex<()>,
}

impl RecoveryService {
    pub fn new(
        hybrid: Arc<HybridStorage>,
        backups: Arc<BackupService>,
        config: HealthConfig,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            hybrid,
            backups,
            config,
            backoff,
            probing: tokio::sync::Mutex::new(()),
        }
    }

    fn health(&self) -> &HealthTable {
        self.hybrid.health()
    }

    /// Probe every backend whose backoff window has elapsed.
    pub async fn run_probe_cycle(&self) -> Vec<HealthStatus> {
        let _round = self.probing.lock().await;
        self.probe_round(false, true).await
    }

    /// Probe every configured backend now, ignoring backoff.
    pub async fn force_health_check(&self) -> Vec<HealthStatus> {
        let _round = self.probing.lock().await;
        info!("Running forced health check");
        self.probe_round(true, true).await
    }

    async fn probe_round(&self, force: bool, react: bool) -> Vec<HealthStatus> {
        let now = now_ms();
        for backend in BackendId::ALL {
            if force || self.health().probe_due(backend, now) {
                self.probe_backend(backend, react).await;
            }
        }
        if react {
            self.check_remote_outage().await;
        }
        if self.health().available_locals().is_empty() {
            error!("Every local backend is unavailable; foreground writes will fail");
        }
        self.health().snapshot()
    }

    /// Probe one backend and record the outcome. With `react`, a local backend
    /// that just went down gets an emergency backup and a repair attempt.
    async fn probe_backend(&self, backend: BackendId, react: bool) -> HealthTransition {
        let limit = Duration::from_millis(self.config.probe_timeout_ms);
        let probe = match backend {
            BackendId::Remote => match self.hybrid.remote() {
                Some(remote) => tokio::time::timeout(limit, remote.probe()).await,
                None => return HealthTransition::Unchanged,
            },
            local => match self.hybrid.local(local) {
                Some(handle) => tokio::time::timeout(limit, handle.probe()).await,
                None => return HealthTransition::Unchanged,
            },
        };
        let outcome =
            probe.unwrap_or_else(|_| Err(Error::unavailable(backend, "probe timed out")));

        let now = now_ms();
        let transition = match outcome {
            Ok(()) => self.health().record_success(backend, now),
            Err(failure) => {
                debug!("Probe of {backend} failed: {failure}");
                self.health()
                    .record_failure(backend, now, &failure.to_string(), &self.backoff)
            }
        };

        match transition {
            HealthTransition::Recovered => info!("{backend} is available again"),
            HealthTransition::WentDown => {
                warn!("{backend} marked unavailable");
                if react && backend != BackendId::Remote {
                    return self.react_to_local_outage(backend).await;
                }
            }
            HealthTransition::Unchanged => {}
        }
        transition
    }

    async fn react_to_local_outage(&self, backend: BackendId) -> HealthTransition {
        if let Some(episode) = self.health().claim_emergency(backend) {
            self.raise_emergency(backend, episode, "became unavailable")
                .await;
        }

        let Some(handle) = self.hybrid.local(backend) else {
            return HealthTransition::WentDown;
        };
        match handle.repair().await {
            Ok(true) => {
                info!("Repaired {backend}; re-probing");
                match handle.probe().await {
                    Ok(()) => self.health().record_success(backend, now_ms()),
                    Err(failure) => {
                        warn!("{backend} still failing after repair: {failure}");
                        HealthTransition::WentDown
                    }
                }
            }
            Ok(false) => HealthTransition::WentDown,
            Err(failure) => {
                error!("Repair of {backend} failed: {failure}");
                HealthTransition::WentDown
            }
        }
    }

    async fn check_remote_outage(&self) {
        let threshold = i64::try_from(self.config.outage_threshold_ms).unwrap_or(i64::MAX);
        let Some(outage) = self.health().outage_ms(BackendId::Remote, now_ms()) else {
            return;
        };
        if outage < threshold {
            return;
        }
        if let Some(episode) = self.health().claim_emergency(BackendId::Remote) {
            self.raise_emergency(
                BackendId::Remote,
                episode,
                &format!("unavailable for {outage}ms"),
            )
            .await;
        }
    }

    async fn raise_emergency(&self, backend: BackendId, episode: u64, cause: &str) {
        warn!(%backend, outage_episode = episode, "Raising emergency backup: {cause}");
        let reason = format!("{backend} {cause} (outage episode {episode})");
        if let Err(failure) = self.backups.create_emergency_backup(&reason).await {
            error!(%backend, outage_episode = episode, "Emergency backup failed: {failure}");
        }
    }

    /// Run one deterministic recovery drill against the live backends.
    pub async fn test_recovery(&self, scenario: RecoveryScenario) -> Result<RecoveryTestReport> {
        let _round = self.probing.lock().await;
        scenario::run(self, scenario).await
    }

    /// Run probe cycles every `period` until the worker is stopped.
    pub fn spawn_probe_worker(self: &Arc<Self>, period: Duration) -> PeriodicWorker {
        let service = Arc::clone(self);
        PeriodicWorker::spawn("health-probe", period, move || {
            let service = Arc::clone(&service);
            async move {
                service.run_probe_cycle().await;
            }
        })
    }
}
