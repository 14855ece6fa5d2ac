use strata_core::config::StorageConfig;

use crate::commands::common::{open_subsystem, require_argument};
use crate::commands::put::format_write_outcome;
use crate::error::CliError;

pub async fn run_delete(collection: &str, key: &str, config: &StorageConfig) -> Result<(), CliError> {
    let collection = require_argument("Collection", collection)?;
    let key = require_argument("Key", key)?;

    let subsystem = open_subsystem(config).await?;
    if subsystem.storage().read(&collection, &key).await?.is_none() {
        return Err(CliError::RecordNotFound(format!("{collection}/{key}")));
    }

    let outcome = subsystem.storage().delete(&collection, &key).await?;
    println!("{}", format_write_outcome(&outcome));
    Ok(())
}
