use std::io::{self, IsTerminal, Read};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use strata_core::config::StorageConfig;
use strata_core::models::{ArchiveId, BackupSummary, ConflictId, ConflictRecord, HealthStatus};
use strata_core::{AdminResponse, Record, StorageSubsystem};

use crate::error::CliError;

pub async fn open_subsystem(config: &StorageConfig) -> Result<StorageSubsystem, CliError> {
    Ok(StorageSubsystem::open(config.clone()).await?)
}

/// Unwrap an admin envelope, turning a failure into a CLI error.
pub fn admin_data<T>(response: AdminResponse<T>) -> Result<T, CliError> {
    Ok(response.into_result()?)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Value from the joined arguments, else from piped stdin.
pub fn resolve_value(value_parts: &[String]) -> Result<Value, CliError> {
    if let Some(text) = normalize_content(&value_parts.join(" ")) {
        return Ok(parse_value(&text));
    }

    if let Some(text) = read_piped_stdin()? {
        return Ok(parse_value(&text));
    }

    Err(CliError::EmptyValue)
}

/// Parse JSON; anything that is not JSON is kept as a string.
pub fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn require_argument(kind: &'static str, value: &str) -> Result<String, CliError> {
    normalize_content(value).ok_or(CliError::EmptyArgument(kind))
}

pub fn parse_archive_id(value: &str) -> Result<ArchiveId, CliError> {
    require_argument("Backup ID", value)?
        .parse()
        .map_err(|_| CliError::InvalidId {
            kind: "backup",
            value: value.trim().to_string(),
        })
}

pub fn parse_conflict_id(value: &str) -> Result<ConflictId, CliError> {
    require_argument("Conflict ID", value)?
        .parse()
        .map_err(|_| CliError::InvalidId {
            kind: "conflict",
            value: value.trim().to_string(),
        })
}

pub fn value_preview(value: &Value, max_chars: usize) -> String {
    let rendered = match value {
        Value::String(text) => text.split_whitespace().collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    };

    if rendered.chars().count() <= max_chars {
        rendered
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = rendered.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_record_lines(records: &[Record], now_ms: i64) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let preview = if record.deleted {
                "(deleted)".to_string()
            } else {
                value_preview(&record.value, 40)
            };
            let version = format!("v{}", record.version);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            format!(
                "{:<24}  {version:<5}  {preview:<40}  {relative_time}",
                record.key
            )
        })
        .collect()
}

pub fn format_backup_lines(backups: &[BackupSummary], now_ms: i64) -> Vec<String> {
    backups
        .iter()
        .map(|backup| {
            let label = backup.name.as_deref().unwrap_or("-");
            format!(
                "{}  {:<9}  {:>6} records  {:>9}  {:<10}  {label}",
                backup.id,
                backup.trigger.as_str(),
                backup.record_count,
                format_size(backup.size_bytes),
                format_relative_time(backup.created_at, now_ms),
            )
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let status = if conflict.is_unresolved() {
                "open"
            } else {
                "resolved"
            };
            format!(
                "{}  {:<8}  {}/{}  local=v{} remote=v{}  {}",
                format_timestamp(conflict.detected_at),
                status,
                conflict.collection,
                conflict.key,
                conflict.local_version,
                conflict.remote_version,
                conflict.id
            )
        })
        .collect()
}

pub fn format_health_lines(statuses: &[HealthStatus], now_ms: i64) -> Vec<String> {
    statuses
        .iter()
        .map(|status| {
            let state = if !status.configured {
                "not configured"
            } else if status.available {
                "available"
            } else {
                "unavailable"
            };
            let checked = status
                .last_checked_at
                .map_or_else(|| "never".to_string(), |at| format_relative_time(at, now_ms));
            let mut line = format!(
                "{:<9}  {state:<14}  failures={:<3}  checked {checked}",
                status.backend.as_str(),
                status.consecutive_failures
            );
            if status.configured && !status.available && status.outage_episode > 0 {
                line.push_str(&format!("  outage #{}", status.outage_episode));
            }
            if let Some(error) = status.last_error.as_deref().filter(|_| !status.available) {
                line.push_str("  ");
                line.push_str(error);
            }
            line
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;

    if bytes < KIB {
        format!("{bytes} B")
    } else if bytes < MIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
