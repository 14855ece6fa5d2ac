use strata_core::config::StorageConfig;
use strata_core::metrics::Metrics;

use crate::commands::common::{
    admin_data, format_health_lines, format_size, format_timestamp, now_ms, open_subsystem,
    print_json,
};
use crate::error::CliError;

pub async fn run_health(json: bool, config: &StorageConfig) -> Result<(), CliError> {
    let subsystem = open_subsystem(config).await?;
    let statuses = admin_data(subsystem.force_health_check().await)?;

    if json {
        return print_json(&statuses);
    }
    for line in format_health_lines(&statuses, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_metrics(json: bool, config: &StorageConfig) -> Result<(), CliError> {
    let subsystem = open_subsystem(config).await?;
    let metrics = admin_data(subsystem.get_metrics().await)?;

    if json {
        return print_json(&metrics);
    }
    for line in format_metrics_lines(&metrics) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_metrics_lines(metrics: &Metrics) -> Vec<String> {
    let mut lines = vec![
        format!("Sync state:          {}", metrics.sync_state.as_str()),
        format!(
            "Last sync:           {}",
            metrics
                .last_sync_at
                .map_or_else(|| "never".to_string(), format_timestamp)
        ),
        format!("Pending writes:      {}", metrics.pending_sync_count),
        format!("Unresolved conflicts: {}", metrics.unresolved_conflict_count),
        format!("Backups:             {}", metrics.backup_count),
        format!("Records:             {}", metrics.record_count),
        format!("Stored size:         {}", format_size(metrics.total_size_bytes)),
        "Backends:".to_string(),
    ];
    lines.extend(
        format_health_lines(&metrics.health, metrics.collected_at)
            .into_iter()
            .map(|line| format!("  {line}")),
    );
    lines
}
