use strata_core::backup::RestoreReport;
use strata_core::config::StorageConfig;
use strata_core::models::BackupSummary;

use crate::cli::BackupCommands;
use crate::commands::common::{
    admin_data, format_backup_lines, format_size, now_ms, open_subsystem, parse_archive_id,
    print_json,
};
use crate::error::CliError;

pub async fn run_backup(
    command: BackupCommands,
    json: bool,
    config: &StorageConfig,
) -> Result<(), CliError> {
    let subsystem = open_subsystem(config).await?;

    match command {
        BackupCommands::Create { name, description } => {
            let summary = admin_data(subsystem.create_manual_backup(name, description).await)?;
            print_summary(&summary, json)
        }
        BackupCommands::Emergency { reason } => {
            let summary = admin_data(subsystem.create_emergency_backup(&reason).await)?;
            print_summary(&summary, json)
        }
        BackupCommands::List => {
            let backups = admin_data(subsystem.list_backups())?;
            if json {
                return print_json(&backups);
            }
            if backups.is_empty() {
                println!("No backups found.");
                return Ok(());
            }
            for line in format_backup_lines(&backups, now_ms()) {
                println!("{line}");
            }
            Ok(())
        }
        BackupCommands::Restore { id } => {
            let archive_id = parse_archive_id(&id)?;
            let report = admin_data(subsystem.restore_backup(archive_id).await)?;
            if json {
                return print_json(&report);
            }
            println!("{}", format_restore_report(&report));
            Ok(())
        }
        BackupCommands::Delete { id } => {
            let archive_id = parse_archive_id(&id)?;
            subsystem.backups().delete_backup(archive_id)?;
            println!("{archive_id}");
            Ok(())
        }
        BackupCommands::ClearEmergency => {
            let removed = subsystem.backups().clear_emergency_backups()?;
            println!("Deleted {removed} emergency backups");
            Ok(())
        }
    }
}

fn print_summary(summary: &BackupSummary, json: bool) -> Result<(), CliError> {
    if json {
        return print_json(summary);
    }
    println!(
        "{} ({} backup, {} records, {})",
        summary.id,
        summary.trigger.as_str(),
        summary.record_count,
        format_size(summary.size_bytes)
    );
    Ok(())
}

pub fn format_restore_report(report: &RestoreReport) -> String {
    let mut line = format!(
        "Restored {} records from {} ({} already current)",
        report.restored, report.archive_id, report.skipped
    );
    if report.cancelled {
        line.push_str("; cancelled before completion");
    }
    line
}
