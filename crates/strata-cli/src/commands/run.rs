use strata_core::config::StorageConfig;
use tracing::info;

use crate::commands::common::open_subsystem;
use crate::error::CliError;

/// Keep the background workers running until Ctrl-C.
pub async fn run_service(config: &StorageConfig) -> Result<(), CliError> {
    let subsystem = open_subsystem(config).await?;
    subsystem.start().await;
    info!(
        "Strata running on {}; press Ctrl-C to stop",
        config
            .data_dir
            .as_ref()
            .map_or_else(|| "memory".to_string(), |dir| dir.display().to_string())
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down background workers");
    subsystem.stop().await;
    Ok(())
}
