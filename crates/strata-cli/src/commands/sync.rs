use serde::Serialize;
use strata_core::config::StorageConfig;
use strata_core::models::{ConflictRecord, ManualChoice};
use strata_core::state::SyncState;
use strata_core::sync::{DrainReport, SyncReport};

use crate::cli::SyncCommands;
use crate::commands::common::{
    admin_data, format_conflict_lines, format_timestamp, open_subsystem, parse_conflict_id,
    parse_value, print_json,
};
use crate::commands::put::format_write_outcome;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SyncStatusView {
    pub state: SyncState,
    pub remote_configured: bool,
    pub pending: usize,
    pub failed: usize,
    pub unresolved_conflicts: usize,
    pub last_sync_at: Option<i64>,
}

pub async fn run_sync(
    command: Option<SyncCommands>,
    json: bool,
    config: &StorageConfig,
) -> Result<(), CliError> {
    match command {
        None => run_full_sync(json, config).await,
        Some(SyncCommands::Status) => run_sync_status(json, config).await,
        Some(SyncCommands::Drain) => run_sync_drain(json, config).await,
        Some(SyncCommands::Retry) => run_sync_retry(config).await,
        Some(SyncCommands::Conflicts {
            limit,
            clear_resolved,
        }) => run_sync_conflicts(limit, clear_resolved, json, config).await,
        Some(SyncCommands::Resolve {
            id,
            keep_local,
            keep_remote,
            value,
        }) => {
            let choice = manual_choice(keep_local, keep_remote, value.as_deref())?;
            run_sync_resolve(&id, choice, config).await
        }
    }
}

pub async fn run_full_sync(json: bool, config: &StorageConfig) -> Result<(), CliError> {
    let subsystem = open_subsystem(config).await?;
    let report = admin_data(subsystem.perform_full_sync().await)?;

    if json {
        return print_json(&report);
    }
    println!("{}", format_sync_report(&report));
    Ok(())
}

pub async fn run_sync_status(json: bool, config: &StorageConfig) -> Result<(), CliError> {
    let subsystem = open_subsystem(config).await?;
    let view = sync_status(&subsystem);

    if json {
        return print_json(&view);
    }

    println!("State:      {}", view.state.as_str());
    println!(
        "Remote:     {}",
        if view.remote_configured {
            "configured"
        } else {
            "not configured (local-only)"
        }
    );
    println!("Pending:    {}", view.pending);
    println!("Failed:     {}", view.failed);
    println!("Conflicts:  {} unresolved", view.unresolved_conflicts);
    println!(
        "Last sync:  {}",
        view.last_sync_at
            .map_or_else(|| "never".to_string(), format_timestamp)
    );
    Ok(())
}

pub fn sync_status(subsystem: &strata_core::StorageSubsystem) -> SyncStatusView {
    let sync = subsystem.sync();
    let failed = sync
        .entries()
        .iter()
        .filter(|entry| entry.is_terminal())
        .count();
    SyncStatusView {
        state: sync.state(),
        remote_configured: subsystem.storage().remote().is_some(),
        pending: sync.pending_count(),
        failed,
        unresolved_conflicts: sync.unresolved_conflict_count(),
        last_sync_at: sync.last_sync_at(),
    }
}

pub async fn run_sync_drain(json: bool, config: &StorageConfig) -> Result<(), CliError> {
    let subsystem = open_subsystem(config).await?;
    let report = subsystem.sync().drain().await;

    if json {
        return print_json(&report);
    }
    println!("{}", format_drain_report(&report));
    Ok(())
}

pub async fn run_sync_retry(config: &StorageConfig) -> Result<(), CliError> {
    let subsystem = open_subsystem(config).await?;
    let rearmed = subsystem.sync().retry_failed();
    println!("Re-queued {rearmed} failed writes");
    Ok(())
}

pub async fn run_sync_conflicts(
    limit: usize,
    clear_resolved: bool,
    json: bool,
    config: &StorageConfig,
) -> Result<(), CliError> {
    let subsystem = open_subsystem(config).await?;
    if clear_resolved {
        let cleared = subsystem.sync().clear_resolved_conflicts();
        if !json {
            println!("Cleared {cleared} resolved conflicts");
        }
    }
    let conflicts: Vec<ConflictRecord> = subsystem.sync().conflicts(Some(limit));

    if json {
        return print_json(&conflicts);
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_resolve(
    id: &str,
    choice: ManualChoice,
    config: &StorageConfig,
) -> Result<(), CliError> {
    let conflict_id = parse_conflict_id(id)?;
    let subsystem = open_subsystem(config).await?;
    let outcome = admin_data(subsystem.resolve_conflict(conflict_id, choice).await)?;
    println!("{}", format_write_outcome(&outcome));
    Ok(())
}

pub fn manual_choice(
    keep_local: bool,
    keep_remote: bool,
    value: Option<&str>,
) -> Result<ManualChoice, CliError> {
    match (keep_local, keep_remote, value) {
        (true, false, None) => Ok(ManualChoice::KeepLocal),
        (false, true, None) => Ok(ManualChoice::KeepRemote),
        (false, false, Some(value)) => Ok(ManualChoice::Value(parse_value(value.trim()))),
        _ => Err(CliError::MissingChoice),
    }
}

pub fn format_drain_report(report: &DrainReport) -> String {
    if report.remote_unavailable {
        return "Remote unavailable; queued writes kept for the next drain".to_string();
    }
    let mut line = format!("Pushed {} writes", report.applied);
    if report.conflicts_resolved > 0 {
        line.push_str(&format!(", settled {} conflicts", report.conflicts_resolved));
    }
    if report.conflicts_pending > 0 {
        line.push_str(&format!(
            ", {} conflicts need manual resolution",
            report.conflicts_pending
        ));
    }
    if report.retried > 0 {
        line.push_str(&format!(", {} will retry", report.retried));
    }
    if report.failed > 0 {
        line.push_str(&format!(", {} failed", report.failed));
    }
    line
}

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut summary = format!(
        "{}; pulled {} remote changes ({} mirrored, {} reconciled)",
        format_drain_report(&report.drain),
        report.pulled,
        report.mirrored,
        report.reconciled
    );
    if report.cancelled {
        summary.push_str("; cancelled");
    }
    summary
}
