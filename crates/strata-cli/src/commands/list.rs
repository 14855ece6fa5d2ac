use strata_core::backends::ListFilter;
use strata_core::config::StorageConfig;
use strata_core::Record;

use crate::commands::common::{
    format_record_lines, now_ms, open_subsystem, print_json, require_argument,
};
use crate::error::CliError;

pub async fn run_list(
    collection: &str,
    filter: &ListFilter,
    json: bool,
    config: &StorageConfig,
) -> Result<(), CliError> {
    let records = list_records(collection, filter, config).await?;

    if json {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("No records found.");
        return Ok(());
    }

    for line in format_record_lines(&records, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn list_records(
    collection: &str,
    filter: &ListFilter,
    config: &StorageConfig,
) -> Result<Vec<Record>, CliError> {
    let collection = require_argument("Collection", collection)?;
    let subsystem = open_subsystem(config).await?;
    Ok(subsystem.storage().list(&collection, filter).await?)
}
