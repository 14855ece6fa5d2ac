use strata_core::config::StorageConfig;
use strata_core::Record;

use crate::commands::common::{open_subsystem, print_json, require_argument};
use crate::error::CliError;

pub async fn run_get(
    collection: &str,
    key: &str,
    json: bool,
    config: &StorageConfig,
) -> Result<(), CliError> {
    let record = get_record(collection, key, config).await?;
    if json {
        print_json(&record)?;
    } else {
        print_json(&record.value)?;
    }
    Ok(())
}

pub async fn get_record(
    collection: &str,
    key: &str,
    config: &StorageConfig,
) -> Result<Record, CliError> {
    let collection = require_argument("Collection", collection)?;
    let key = require_argument("Key", key)?;

    let subsystem = open_subsystem(config).await?;
    subsystem
        .storage()
        .read(&collection, &key)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(format!("{collection}/{key}")))
}
