use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use strata_core::recovery::RecoveryScenario;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Administer resilient multi-backend storage from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to $STRATA_CONFIG, then the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding local stores, sync state and backups
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Keep everything in memory for this invocation
    #[arg(long, global = true, conflicts_with = "data_dir")]
    pub in_memory: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a JSON value (reads piped stdin when VALUE is omitted)
    Put {
        collection: String,
        key: String,
        /// JSON value; bare text is stored as a JSON string
        value: Vec<String>,
    },
    /// Read the newest visible version of a record
    Get {
        collection: String,
        key: String,
        /// Output the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a record (a tombstone is synced to the remote)
    #[command(alias = "rm")]
    Delete { collection: String, key: String },
    /// List records of a collection
    List {
        collection: String,
        /// Only keys starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Include deleted records
        #[arg(long)]
        include_deleted: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync with the remote (full sync when no subcommand is given)
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
        /// Output as JSON
        #[arg(long, global = true)]
        json: bool,
    },
    /// Manage backup archives
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
        /// Output as JSON
        #[arg(long, global = true)]
        json: bool,
    },
    /// Export an archive (or the current state) to a portable JSON file
    Export {
        /// Archive to export; a fresh snapshot when omitted
        #[arg(long, value_name = "ID")]
        archive: Option<String>,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Import an exported archive and restore it
    Import {
        path: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Probe every backend now
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show subsystem metrics
    Metrics {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a recovery drill against the configured backends
    RecoveryTest {
        #[arg(value_enum)]
        scenario: ScenarioArg,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run background probing, sync and scheduled backups until interrupted
    Run,
    /// Inspect or write the CLI config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ScenarioArg {
    RemoteOutage,
    EmbeddedOutage,
    FailoverFailback,
}

impl From<ScenarioArg> for RecoveryScenario {
    fn from(value: ScenarioArg) -> Self {
        match value {
            ScenarioArg::RemoteOutage => Self::RemoteOutage,
            ScenarioArg::EmbeddedOutage => Self::EmbeddedOutage,
            ScenarioArg::FailoverFailback => Self::FailoverFailback,
        }
    }
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show sync state, queue depth and conflicts
    Status,
    /// Push queued writes without pulling remote changes
    Drain,
    /// Re-arm writes that exhausted their retries
    Retry,
    /// List recorded sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Drop resolved conflicts from the history
        #[arg(long)]
        clear_resolved: bool,
    },
    /// Resolve a conflict waiting for manual resolution
    Resolve {
        /// Conflict ID
        id: String,
        /// Keep the local value
        #[arg(long, conflicts_with_all = ["keep_remote", "value"])]
        keep_local: bool,
        /// Keep the remote value
        #[arg(long, conflicts_with = "value")]
        keep_remote: bool,
        /// Replace both sides with this JSON value
        #[arg(long, value_name = "JSON")]
        value: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a manual backup
    Create {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// List stored backups, newest first
    List,
    /// Restore a backup into local storage
    Restore {
        /// Backup ID
        id: String,
    },
    /// Delete a backup
    Delete {
        /// Backup ID
        id: String,
    },
    /// Create an emergency backup (never pruned automatically)
    Emergency {
        #[arg(long, default_value = "operator request")]
        reason: String,
    },
    /// Delete every emergency backup
    ClearEmergency,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration (tokens redacted)
    Show,
    /// Write a config file
    Init {
        /// Remote service base URL
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// Remote service bearer token
        #[arg(long, value_name = "TOKEN")]
        remote_token: Option<String>,
        /// Conflict strategy for sync
        #[arg(long, value_enum)]
        conflict_strategy: Option<StrategyArg>,
        /// Non-emergency backups to keep
        #[arg(long, value_name = "COUNT")]
        retention: Option<usize>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    LastWriteWins,
    Merge,
    DeepMerge,
    Manual,
}
