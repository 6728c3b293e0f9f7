//! Session file loading and saving.
//!
//! One JSON document per session lives at `<session_dir>/<session_id>.json`.
//! Saving rewrites the whole document in place. Loading goes through
//! [`migrate`], which upgrades older documents once so that nothing downstream
//! needs to know about earlier shapes.
//!
//! # Schema versions
//!
//! - **1** (no `schema_version` field): naive local timestamps, and coverage
//!   that may only carry the nested `per_node_card_coverage` breakdown instead of
//!   the flat `node_card_mapping` / `visited_cards_per_node` maps.
//! - **2**: RFC 3339 timestamps, flat maps always present.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::SessionRecord;
use crate::error::{AppResult, PersistenceError, PersistenceResult};

/// Schema version written by this crate.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

const LEGACY_SCHEMA_VERSION: u64 = 1;

/// Location of a session's document inside `session_dir`.
pub fn session_path(session_dir: &Path, session_id: &str) -> PathBuf {
    session_dir.join(format!("{}.json", session_id))
}

/// Load a session document. Returns `Ok(None)` when the file does not exist.
pub fn load(path: &Path, session_id: &str) -> PersistenceResult<Option<SessionRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text)?;
    migrate(value, session_id).map(Some)
}

/// Strict read of a session document under `session_dir`.
///
/// Unlike opening a tracker, an unreadable document is an error here rather
/// than a reason to start over.
pub fn read_session(session_dir: &Path, session_id: &str) -> AppResult<Option<SessionRecord>> {
    Ok(load(&session_path(session_dir, session_id), session_id)?)
}

/// Write the whole document, replacing any previous content.
pub fn save(path: &Path, record: &SessionRecord, pretty: bool) -> PersistenceResult<()> {
    let body = if pretty {
        serde_json::to_string_pretty(record)?
    } else {
        serde_json::to_string(record)?
    };
    fs::write(path, body).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), session_id = %record.session_id, "Session saved");
    Ok(())
}

/// Upgrade a raw session document to the current schema and decode it.
pub fn migrate(mut value: Value, session_id: &str) -> PersistenceResult<SessionRecord> {
    let root = value.as_object_mut().ok_or_else(|| PersistenceError::Schema {
        message: "session document is not an object".to_string(),
    })?;

    let version = root
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(LEGACY_SCHEMA_VERSION);
    if version > u64::from(CURRENT_SCHEMA_VERSION) {
        return Err(PersistenceError::Schema {
            message: format!(
                "version {} is newer than supported version {}",
                version, CURRENT_SCHEMA_VERSION
            ),
        });
    }
    if version == LEGACY_SCHEMA_VERSION {
        debug!(session_id, "Migrating legacy session document");
        migrate_legacy(root);
    }

    if !root.get("session_id").is_some_and(Value::is_string) {
        root.insert("session_id".to_string(), Value::from(session_id));
    }
    root.insert(
        "schema_version".to_string(),
        Value::from(CURRENT_SCHEMA_VERSION),
    );

    Ok(serde_json::from_value(value)?)
}

fn migrate_legacy(root: &mut Map<String, Value>) {
    let start_time = root
        .get("start_time")
        .and_then(Value::as_str)
        .map(parse_timestamp)
        .unwrap_or_else(Utc::now);
    root.insert("start_time".to_string(), Value::from(start_time.to_rfc3339()));

    match root.get("end_time").and_then(Value::as_str).map(parse_timestamp) {
        Some(end_time) => {
            root.insert("end_time".to_string(), Value::from(end_time.to_rfc3339()));
        }
        None => {
            root.remove("end_time");
        }
    }

    if !root.get("status").is_some_and(Value::is_string) {
        root.insert("status".to_string(), Value::from("active"));
    }

    let models: Map<String, Value> = root
        .get("models")
        .and_then(Value::as_object)
        .map(|models| {
            models
                .iter()
                .filter_map(|(role, model)| model.as_str().map(|m| (role.clone(), Value::from(m))))
                .collect()
        })
        .unwrap_or_default();
    root.insert("models".to_string(), Value::Object(models));

    for key in ["investigations", "planning_history"] {
        let entries = match root.remove(key) {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        };
        let migrated: Vec<Value> = entries
            .into_iter()
            .filter_map(|entry| match entry {
                Value::Object(mut entry) => {
                    let timestamp = entry
                        .get("timestamp")
                        .and_then(Value::as_str)
                        .map(parse_timestamp)
                        .unwrap_or_else(Utc::now);
                    entry.insert("timestamp".to_string(), Value::from(timestamp.to_rfc3339()));
                    Some(Value::Object(entry))
                }
                other => {
                    warn!(entry = %other, "Dropping non-object history entry");
                    None
                }
            })
            .collect();
        root.insert(key.to_string(), Value::Array(migrated));
    }

    match root.get_mut("coverage") {
        Some(Value::Object(coverage)) => migrate_legacy_coverage(coverage),
        _ => {
            root.insert("coverage".to_string(), Value::Object(Map::new()));
        }
    }
}

/// Rebuild the flat node → card maps from the nested per-node breakdown when
/// the flat map is absent.
fn migrate_legacy_coverage(coverage: &mut Map<String, Value>) {
    let has_flat_mapping = coverage
        .get("node_card_mapping")
        .and_then(Value::as_object)
        .is_some_and(|mapping| !mapping.is_empty());
    if has_flat_mapping {
        return;
    }
    let Some(per_node) = coverage
        .get("per_node_card_coverage")
        .and_then(Value::as_object)
    else {
        return;
    };

    let mut mapping = Map::new();
    let mut visited = coverage
        .get("visited_cards_per_node")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (node_id, info) in per_node {
        let card_ids = info
            .get("card_ids")
            .cloned()
            .filter(Value::is_array)
            .unwrap_or_else(|| Value::Array(Vec::new()));
        mapping.insert(node_id.clone(), card_ids);
        if !visited.contains_key(node_id) {
            let visited_ids = info
                .get("visited_card_ids")
                .cloned()
                .filter(Value::is_array)
                .unwrap_or_else(|| Value::Array(Vec::new()));
            visited.insert(node_id.clone(), visited_ids);
        }
    }

    debug!(nodes = mapping.len(), "Rebuilt flat node-card mapping");
    coverage.insert("node_card_mapping".to_string(), Value::Object(mapping));
    coverage.insert("visited_cards_per_node".to_string(), Value::Object(visited));
}

/// Parse an RFC 3339 timestamp, or a naive ISO timestamp taken as UTC.
pub(crate) fn try_parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    try_parse_timestamp(s).unwrap_or_else(|| {
        warn!(timestamp = s, "Failed to parse timestamp, using current time");
        Utc::now()
    })
}
