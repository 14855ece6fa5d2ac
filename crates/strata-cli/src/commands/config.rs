use std::path::Path;

use strata_core::config::{ConflictStrategy, MergeMode, StorageConfig};
use strata_core::util::normalize_text_option;

use crate::cli::{ConfigCommands, StrategyArg};
use crate::commands::common::print_json;
use crate::config_file::{redacted, save_config};
use crate::error::CliError;

/// Values accepted by `config init`.
#[derive(Debug, Clone, Default)]
pub struct ConfigInitArgs {
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub conflict_strategy: Option<StrategyArg>,
    pub retention: Option<usize>,
}

pub fn run_config(
    command: ConfigCommands,
    config_path: Option<&Path>,
    effective: &StorageConfig,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            match config_path {
                Some(path) => eprintln!("# config file: {}", path.display()),
                None => eprintln!("# no config file location available"),
            }
            print_json(&redacted(effective))
        }
        ConfigCommands::Init {
            remote_url,
            remote_token,
            conflict_strategy,
            retention,
        } => {
            let path = config_path.ok_or_else(|| {
                CliError::Config("Unable to resolve a config path; pass --config".to_string())
            })?;
            let args = ConfigInitArgs {
                remote_url,
                remote_token,
                conflict_strategy,
                retention,
            };
            run_config_init(path, args)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// Merge `args` into the config file at `path`, creating it when absent.
pub fn run_config_init(path: &Path, args: ConfigInitArgs) -> Result<StorageConfig, CliError> {
    let mut config = StorageConfig::load_from_path(path)
        .map_err(|error| CliError::Config(format!("Failed to load {}: {error}", path.display())))?;

    if let Some(url) = normalize_text_option(args.remote_url) {
        config.remote.url = Some(url);
    }
    if let Some(token) = normalize_text_option(args.remote_token) {
        config.remote.auth_token = Some(token);
    }
    if let Some(strategy) = args.conflict_strategy {
        let (strategy, merge_mode) = conflict_settings(strategy);
        config.sync.conflict_strategy = strategy;
        config.sync.merge_mode = merge_mode;
    }
    if let Some(retention) = args.retention {
        config.backup.retention_count = retention.max(1);
    }

    save_config(path, &config)?;
    Ok(config)
}

pub const fn conflict_settings(strategy: StrategyArg) -> (ConflictStrategy, MergeMode) {
    match strategy {
        StrategyArg::LastWriteWins => (ConflictStrategy::LastWriteWins, MergeMode::Shallow),
        StrategyArg::Merge => (ConflictStrategy::Merge, MergeMode::Shallow),
        StrategyArg::DeepMerge => (ConflictStrategy::Merge, MergeMode::Deep),
        StrategyArg::Manual => (ConflictStrategy::Manual, MergeMode::Shallow),
    }
}
