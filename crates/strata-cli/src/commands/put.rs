use strata_core::config::StorageConfig;
use strata_core::models::SyncStatus;
use strata_core::storage::WriteOutcome;

use crate::commands::common::{open_subsystem, require_argument, resolve_value};
use crate::error::CliError;

pub async fn run_put(
    collection: &str,
    key: &str,
    value_parts: &[String],
    config: &StorageConfig,
) -> Result<(), CliError> {
    let collection = require_argument("Collection", collection)?;
    let key = require_argument("Key", key)?;
    let value = resolve_value(value_parts)?;

    let subsystem = open_subsystem(config).await?;
    let outcome = subsystem.storage().write(&collection, &key, value).await?;
    println!("{}", format_write_outcome(&outcome));
    Ok(())
}

pub fn format_write_outcome(outcome: &WriteOutcome) -> String {
    let record = &outcome.record;
    format!(
        "{}/{} v{} on {} ({})",
        record.collection,
        record.key,
        record.version,
        record.origin,
        sync_status_label(&outcome.sync_status)
    )
}

pub const fn sync_status_label(status: &SyncStatus) -> &'static str {
    match status {
        SyncStatus::Pending => "queued for remote",
        SyncStatus::InFlight => "syncing",
        SyncStatus::Failed { terminal: false } => "retrying",
        SyncStatus::Failed { terminal: true } => "sync failed",
        SyncStatus::Done => "synced",
    }
}
