//! Deterministic recovery drills.
//!
//! A drill forces real backends offline through their guards, drives the
//! health table with probes, and checks where writes land. Every backend is
//! released again before the report is returned.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::RecoveryService;
use crate::error::{Error, Result};
use crate::models::{BackendId, RecordKey, SyncQueueEntry, SyncStatus};
use crate::util::now_ms;

/// Drill records live here and are deleted before the drill ends.
const DRILL_COLLECTION: &str = "__recovery";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryScenario {
    /// Remote goes away; writes must stay durable locally
    RemoteOutage,
    /// Embedded goes away; writes must land on the key/value tier
    EmbeddedOutage,
    /// Embedded goes away and comes back; routing must return to it
    FailoverFailback,
}

impl RecoveryScenario {
    pub const ALL: [Self; 3] = [Self::RemoteOutage, Self::EmbeddedOutage, Self::FailoverFailback];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RemoteOutage => "remote_outage",
            Self::EmbeddedOutage => "embedded_outage",
            Self::FailoverFailback => "failover_failback",
        }
    }
}

impl fmt::Display for RecoveryScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryScenario {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == normalized)
            .ok_or_else(|| Error::Validation(format!("unknown recovery scenario: {value}")))
    }
}

/// One verified step of a drill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStep {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryTestReport {
    pub scenario: RecoveryScenario,
    pub passed: bool,
    pub steps: Vec<RecoveryStep>,
    pub duration_ms: i64,
}

struct Drill<'a> {
    service: &'a RecoveryService,
    steps: Vec<RecoveryStep>,
}

impl<'a> Drill<'a> {
    const fn new(service: &'a RecoveryService) -> Self {
        Self {
            service,
            steps: Vec::new(),
        }
    }

    /// Record a step outcome; returns whether the drill may continue.
    fn check(&mut self, name: &str, passed: bool, detail: String) -> bool {
        if passed {
            info!("Recovery drill step passed: {name} ({detail})");
        } else {
            warn!("Recovery drill step failed: {name} ({detail})");
        }
        self.steps.push(RecoveryStep {
            name: name.to_string(),
            passed,
            detail,
        });
        passed
    }

    fn set_forced_offline(&self, backend: BackendId, offline: bool) -> bool {
        let hybrid = &self.service.hybrid;
        match backend {
            BackendId::Remote => hybrid
                .remote()
                .map(|remote| remote.set_forced_offline(offline))
                .is_some(),
            local => hybrid
                .local(local)
                .map(|handle| handle.set_forced_offline(offline))
                .is_some(),
        }
    }

    /// Force `backend` offline and probe until the health table agrees.
    async fn take_down(&mut self, backend: BackendId) -> bool {
        if !self.set_forced_offline(backend, true) {
            return self.check(
                &format!("{backend} marked unavailable"),
                false,
                format!("{backend} is not configured"),
            );
        }
        let threshold = self.service.config.failure_threshold.max(1);
        for _ in 0..threshold {
            self.service.probe_backend(backend, false).await;
        }
        let down = !self.service.health().is_available(backend);
        self.check(
            &format!("{backend} marked unavailable"),
            down,
            format!("after {threshold} failed probes"),
        )
    }

    /// Release `backend` and confirm a single successful probe restores it.
    async fn bring_up(&mut self, backend: BackendId) -> bool {
        self.set_forced_offline(backend, false);
        self.service.probe_backend(backend, false).await;
        let up = self.service.health().is_available(backend);
        self.check(
            &format!("{backend} recovered"),
            up,
            "after one successful probe".to_string(),
        )
    }

    /// Write a throwaway record through the normal write path and report where
    /// it landed. With `expect_queued` the write must also wait in the sync queue.
    async fn write_lands_on(
        &mut self,
        name: &str,
        expected: BackendId,
        expect_queued: bool,
    ) -> bool {
        let hybrid = &self.service.hybrid;
        let key = format!("drill-{}", uuid::Uuid::now_v7());
        let record_key = RecordKey::new(DRILL_COLLECTION, key.clone());

        let outcome = hybrid
            .write_unvalidated(DRILL_COLLECTION, &key, serde_json::json!({"drill": true}))
            .await;
        let queued = hybrid.queue().unfinished_for(&record_key);
        self.discard(&record_key, &queued).await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(failure) => return self.check(name, false, failure.to_string()),
        };
        let landed = self.check(
            name,
            outcome.record.origin == expected,
            format!("write landed on {}", outcome.record.origin),
        );
        if !landed || !expect_queued {
            return landed;
        }
        let pending = outcome.sync_status == SyncStatus::Pending
            && queued.iter().any(|entry| entry.id == outcome.entry_id);
        self.check(
            "write queued for remote",
            pending,
            format!("sync status {:?}, {} queue entries", outcome.sync_status, queued.len()),
        )
    }

    /// Drop a drill record from every tier and its queue entries.
    async fn discard(&self, record_key: &RecordKey, queued: &[SyncQueueEntry]) {
        let hybrid = &self.service.hybrid;
        let ids = queued.iter().map(|entry| entry.id).collect::<Vec<_>>();
        hybrid.queue().remove(&ids);
        for local in hybrid.locals() {
            let _ = local.delete(&record_key.collection, &record_key.key).await;
        }
        if let Some(remote) = hybrid.remote_usable() {
            let _ = remote.delete(&record_key.collection, &record_key.key).await;
        }
    }

    /// Clear every forced-offline switch and re-probe anything left down.
    async fn release_all(&self) {
        for backend in BackendId::ALL {
            self.set_forced_offline(backend, false);
            if self.service.health().is_configured(backend)
                && !self.service.health().is_available(backend)
            {
                self.service.probe_backend(backend, false).await;
            }
        }
    }
}

pub(super) async fn run(
    service: &RecoveryService,
    scenario: RecoveryScenario,
) -> Result<RecoveryTestReport> {
    if scenario == RecoveryScenario::RemoteOutage && service.hybrid.remote().is_none() {
        return Err(Error::Validation(
            "remote_outage drill needs a configured remote".to_string(),
        ));
    }
    if scenario != RecoveryScenario::RemoteOutage
        && (service.hybrid.local(BackendId::Embedded).is_none()
            || service.hybrid.local(BackendId::KeyValue).is_none())
    {
        return Err(Error::Validation(format!(
            "{scenario} drill needs both local backends"
        )));
    }

    info!("Starting recovery drill {scenario}");
    let started = now_ms();
    let mut drill = Drill::new(service);

    match scenario {
        RecoveryScenario::RemoteOutage => {
            let _ = drill.take_down(BackendId::Remote).await
                && drill.check(
                    "sync routing paused",
                    service.hybrid.remote_usable().is_none(),
                    "remote excluded from routing".to_string(),
                )
                && drill
                    .write_lands_on("writes stay durable locally", BackendId::Embedded, true)
                    .await
                && drill.bring_up(BackendId::Remote).await;
        }
        RecoveryScenario::EmbeddedOutage => {
            let _ = drill.take_down(BackendId::Embedded).await
                && drill
                    .write_lands_on("writes fall back to key_value", BackendId::KeyValue, false)
                    .await
                && drill.bring_up(BackendId::Embedded).await;
        }
        RecoveryScenario::FailoverFailback => {
            let _ = drill.take_down(BackendId::Embedded).await
                && drill
                    .write_lands_on("failover to key_value", BackendId::KeyValue, false)
                    .await
                && drill.bring_up(BackendId::Embedded).await
                && drill
                    .write_lands_on("failback to embedded", BackendId::Embedded, false)
                    .await;
        }
    }

    drill.release_all().await;
    let passed = drill.steps.iter().all(|step| step.passed);
    info!(passed, "Recovery drill {scenario} finished");
    Ok(RecoveryTestReport {
        scenario,
        passed,
        steps: drill.steps,
        duration_ms: now_ms().saturating_sub(started),
    })
}
