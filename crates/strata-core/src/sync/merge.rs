//! Conflict resolution rules.

use serde_json::{Map, Value};

use crate::config::{ConflictStrategy, MergeMode};
use crate::models::{BackendId, ConflictResolution, Record};

/// Which side wins under last-write-wins: higher `updated_at`, then higher
/// version, then Remote.
pub fn local_wins(local: &Record, remote: &Record) -> bool {
    (local.updated_at, local.version) > (remote.updated_at, remote.version)
}

/// Settled record for a conflicting pair plus the resolution that produced it.
///
/// The result is written at `max(local, remote) + 1` with the later of the two
/// timestamps. Returns `None` for `ConflictStrategy::Manual`.
pub fn resolve(
    local: &Record,
    remote: &Record,
    strategy: ConflictStrategy,
    mode: MergeMode,
) -> Option<(Record, ConflictResolution)> {
    let version = local.version.max(remote.version) + 1;
    let updated_at = local.updated_at.max(remote.updated_at);
    let lww = || {
        let winner = if local_wins(local, remote) { local } else { remote };
        Record {
            version,
            updated_at,
            ..winner.clone()
        }
    };

    match strategy {
        ConflictStrategy::Manual => None,
        ConflictStrategy::LastWriteWins => Some((lww(), ConflictResolution::LastWriteWins)),
        ConflictStrategy::Merge => {
            if local.deleted || remote.deleted {
                return Some((lww(), ConflictResolution::LastWriteWins));
            }
            match merge_values(&local.value, &remote.value, local_wins(local, remote), mode) {
                Some(value) => Some((
                    Record {
                        value,
                        version,
                        updated_at,
                        origin: BackendId::Remote,
                        ..remote.clone()
                    },
                    ConflictResolution::Merge,
                )),
                None => Some((lww(), ConflictResolution::LastWriteWins)),
            }
        }
    }
}

/// Field-level merge of two JSON objects.
///
/// Fields present on one side only are kept; fields present on both sides
/// take the newer side's value (`local_newer`). In `Deep` mode nested objects
/// are merged recursively. Returns `None` unless both values are objects.
pub fn merge_values(local: &Value, remote: &Value, local_newer: bool, mode: MergeMode) -> Option<Value> {
    let (Value::Object(local), Value::Object(remote)) = (local, remote) else {
        return None;
    };
    Some(Value::Object(merge_objects(local, remote, local_newer, mode)))
}

fn merge_objects(
    local: &Map<String, Value>,
    remote: &Map<String, Value>,
    local_newer: bool,
    mode: MergeMode,
) -> Map<String, Value> {
    let mut merged = remote.clone();
    for (field, local_value) in local {
        let value = match remote.get(field) {
            None => local_value.clone(),
            Some(remote_value) if remote_value == local_value => continue,
            Some(remote_value) => match (mode, local_value, remote_value) {
                (MergeMode::Deep, Value::Object(l), Value::Object(r)) => {
                    Value::Object(merge_objects(l, r, local_newer, mode))
                }
                _ if local_newer => local_value.clone(),
                _ => continue,
            },
        };
        merged.insert(field.clone(), value);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value, version: u64, updated_at: i64, origin: BackendId) -> Record {
        Record::new("profile", "7", value, version, updated_at, origin)
    }

    #[test]
    fn lww_prefers_later_timestamp() {
        let local = record(json!({"name": "A"}), 2, 100, BackendId::Embedded);
        let remote = record(json!({"name": "B"}), 2, 105, BackendId::Remote);

        let (winner, resolution) =
            resolve(&local, &remote, ConflictStrategy::LastWriteWins, MergeMode::Shallow).unwrap();
        assert_eq!(resolution, ConflictResolution::LastWriteWins);
        assert_eq!(winner.value, json!({"name": "B"}));
        assert_eq!(winner.version, 3);
        assert_eq!(winner.updated_at, 105);
    }

    #[test]
    fn lww_ties_break_on_version_then_remote() {
        let local = record(json!("local"), 5, 100, BackendId::Embedded);
        let remote = record(json!("remote"), 4, 100, BackendId::Remote);
        assert!(local_wins(&local, &remote));

        let remote = record(json!("remote"), 5, 100, BackendId::Remote);
        assert!(!local_wins(&local, &remote));
        let (winner, _) =
            resolve(&local, &remote, ConflictStrategy::LastWriteWins, MergeMode::Shallow).unwrap();
        assert_eq!(winner.value, json!("remote"));
        assert_eq!(winner.version, 6);
    }

    #[test]
    fn lww_is_deterministic() {
        let a = record(json!("a"), 3, 200, BackendId::Embedded);
        let b = record(json!("b"), 3, 150, BackendId::Remote);
        let (first, _) = resolve(&a, &b, ConflictStrategy::LastWriteWins, MergeMode::Shallow).unwrap();
        let (second, _) = resolve(&a, &b, ConflictStrategy::LastWriteWins, MergeMode::Shallow).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.value, json!("a"));
    }

    #[test]
    fn shallow_merge_takes_newer_side_per_field() {
        let local = record(json!({"name": "A", "city": "Oslo", "prefs": {"theme": "dark"}}), 2, 110, BackendId::Embedded);
        let remote = record(json!({"name": "B", "email": "b@example.com", "prefs": {"lang": "en"}}), 2, 105, BackendId::Remote);

        let (merged, resolution) =
            resolve(&local, &remote, ConflictStrategy::Merge, MergeMode::Shallow).unwrap();
        assert_eq!(resolution, ConflictResolution::Merge);
        assert_eq!(
            merged.value,
            json!({"name": "A", "city": "Oslo", "email": "b@example.com", "prefs": {"theme": "dark"}})
        );
        assert_eq!(merged.version, 3);
    }

    #[test]
    fn deep_merge_recurses_into_objects() {
        let local = json!({"prefs": {"theme": "dark", "lang": "nb"}});
        let remote = json!({"prefs": {"lang": "en", "font": 12}});
        let merged = merge_values(&local, &remote, false, MergeMode::Deep).unwrap();
        assert_eq!(merged, json!({"prefs": {"theme": "dark", "lang": "en", "font": 12}}));
    }

    #[test]
    fn merge_falls_back_to_lww_for_scalars_and_tombstones() {
        let local = record(json!(1), 2, 100, BackendId::Embedded);
        let remote = record(json!(2), 2, 90, BackendId::Remote);
        let (winner, resolution) =
            resolve(&local, &remote, ConflictStrategy::Merge, MergeMode::Shallow).unwrap();
        assert_eq!(resolution, ConflictResolution::LastWriteWins);
        assert_eq!(winner.value, json!(1));

        let tombstone = Record::tombstone("profile", "7", 2, 120, BackendId::Remote);
        let (winner, _) =
            resolve(&local, &tombstone, ConflictStrategy::Merge, MergeMode::Shallow).unwrap();
        assert!(winner.deleted);
    }

    #[test]
    fn manual_strategy_defers() {
        let local = record(json!(1), 1, 1, BackendId::Embedded);
        let remote = record(json!(2), 1, 2, BackendId::Remote);
        assert!(resolve(&local, &remote, ConflictStrategy::Manual, MergeMode::Shallow).is_none());
    }
}
