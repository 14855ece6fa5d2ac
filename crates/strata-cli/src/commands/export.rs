use std::io::{self, Write};
use std::path::{Path, PathBuf};

use strata_core::config::StorageConfig;
use strata_core::export::suggested_export_file_name;
use strata_core::services::ImportReport;

use crate::commands::backup::format_restore_report;
use crate::commands::common::{admin_data, now_ms, open_subsystem, parse_archive_id, print_json};
use crate::error::CliError;

pub async fn run_export(
    archive: Option<&str>,
    output_path: Option<&Path>,
    config: &StorageConfig,
) -> Result<(), CliError> {
    let archive_id = archive.map(parse_archive_id).transpose()?;
    let subsystem = open_subsystem(config).await?;
    let rendered = admin_data(subsystem.export_data(archive_id).await)?;

    if let Some(path) = output_path {
        let target = export_target(path, now_ms());
        std::fs::write(&target, &rendered)?;
        println!("{}", target.display());
    } else {
        let mut stdout = io::stdout();
        stdout.write_all(&rendered)?;
        writeln!(stdout)?;
    }

    Ok(())
}

/// A directory gets a timestamped export file inside it.
pub fn export_target(path: &Path, now_ms: i64) -> PathBuf {
    if path.is_dir() {
        path.join(suggested_export_file_name(now_ms))
    } else {
        path.to_path_buf()
    }
}

pub async fn run_import(path: &Path, json: bool, config: &StorageConfig) -> Result<(), CliError> {
    let bytes = std::fs::read(path)?;
    let subsystem = open_subsystem(config).await?;
    let report = admin_data(subsystem.import_data(&bytes).await)?;

    if json {
        return print_json(&report);
    }
    println!("{}", format_import_report(&report));
    Ok(())
}

pub fn format_import_report(report: &ImportReport) -> String {
    format!(
        "Imported archive {} ({} records). {}",
        report.archive.id,
        report.archive.record_count,
        format_restore_report(&report.restore)
    )
}
