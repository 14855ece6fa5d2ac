//! Strata CLI - administer resilient multi-backend storage
//!
//! Reads and writes records, drives sync, backups and recovery drills, and
//! can keep the background workers running as a foreground service.

mod cli;
mod commands;
mod config_file;
mod error;


use clap::Parser;
use strata_core::backends::ListFilter;

use crate::cli::{Cli, Commands};
use crate::commands::backup::run_backup;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::export::{run_export, run_import};
use crate::commands::get::run_get;
use crate::commands::health::{run_health, run_metrics};
use crate::commands::list::run_list;
use crate::commands::put::run_put;
use crate::commands::recovery::run_recovery_test;
use crate::commands::run::run_service;
use crate::commands::sync::run_sync;
use crate::config_file::{load_effective_config, process_env, resolve_config_path, StorageOverrides};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "strata=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Completions need no storage at all
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let config_path = resolve_config_path(cli.config, process_env);
    let overrides = StorageOverrides {
        data_dir: cli.data_dir,
        in_memory: cli.in_memory,
    };
    let config = load_effective_config(config_path.as_deref(), &overrides, process_env)?;

    match cli.command {
        Commands::Put {
            collection,
            key,
            value,
        } => run_put(&collection, &key, &value, &config).await?,
        Commands::Get {
            collection,
            key,
            json,
        } => run_get(&collection, &key, json, &config).await?,
        Commands::Delete { collection, key } => run_delete(&collection, &key, &config).await?,
        Commands::List {
            collection,
            prefix,
            limit,
            include_deleted,
            json,
        } => {
            let filter = ListFilter {
                key_prefix: prefix,
                include_deleted,
                limit: Some(limit),
            };
            run_list(&collection, &filter, json, &config).await?;
        }
        Commands::Sync { command, json } => run_sync(command, json, &config).await?,
        Commands::Backup { command, json } => run_backup(command, json, &config).await?,
        Commands::Export { archive, output } => {
            run_export(archive.as_deref(), output.as_deref(), &config).await?;
        }
        Commands::Import { path, json } => run_import(&path, json, &config).await?,
        Commands::Health { json } => run_health(json, &config).await?,
        Commands::Metrics { json } => run_metrics(json, &config).await?,
        Commands::RecoveryTest { scenario, json } => {
            run_recovery_test(scenario, json, &config).await?;
        }
        Commands::Run => run_service(&config).await?,
        Commands::Config { command } => run_config(command, config_path.as_deref(), &config)?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
