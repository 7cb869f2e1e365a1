//! Dead-letter log for schema-invalid payloads.
//!
//! The DLQ is an append-only NDJSON file (`memory/state-dlq.jsonl`). Creation
//! records and retry updates are both appended as whole JSON lines; the
//! authoritative per-entry state is obtained by folding all lines keyed by
//! `dlq_id`, last write wins per field. Malformed lines are counted but never
//! abort a read.
//!
//! # Lifecycle
//!
//! `pending_retry` → (retry by [`crate::retry`]) → `resolved` or
//! `failed_permanent`. Backoff schedule: 60 s, 5 min, 30 min, 2 h; retries
//! beyond the table reuse the last interval.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StoreError;
use crate::events;
use crate::models::format_ts;

/// Retry backoff schedule in seconds. Retries beyond the table reuse the
/// last interval.
pub const BACKOFF_SECS: [i64; 4] = [60, 300, 1_800, 7_200];

/// Default retry budget before an entry is failed permanently.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Seconds to wait before retry number `retry_count + 1`.
pub fn backoff_secs(retry_count: u32) -> i64 {
    let idx = (retry_count as usize).min(BACKOFF_SECS.len() - 1);
    BACKOFF_SECS[idx]
}

// ---------------------------------------------------------------------------
// DlqRecord
// ---------------------------------------------------------------------------

/// One folded DLQ entry (also the shape of every appended line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqRecord {
    pub dlq_id: String,
    pub schema_name: String,
    pub payload: Value,
    #[serde(default)]
    pub validation_errors: Vec<String>,
    pub first_seen_ts: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_ts: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result_status: Option<String>,
}

/// Result of folding the DLQ log.
#[derive(Debug, Default)]
pub struct DlqFold {
    /// Authoritative entry state keyed by `dlq_id`.
    pub entries: BTreeMap<String, DlqRecord>,
    /// Lines that failed to parse (counted, skipped).
    pub malformed_lines: usize,
}

// ---------------------------------------------------------------------------
// DlqLog
// ---------------------------------------------------------------------------

/// Handle on the append-only DLQ file.
#[derive(Debug, Clone)]
pub struct DlqLog {
    path: PathBuf,
}

impl DlqLog {
    /// Wrap a DLQ file path (created lazily on first append).
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The underlying file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Quarantine a payload that failed validation. Appends a creation line
    /// with `retry_count = 0` and the first backoff window, and returns the
    /// record.
    pub fn quarantine(
        &self,
        schema_name: &str,
        payload: Value,
        validation_errors: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<DlqRecord, StoreError> {
        let record = DlqRecord {
            dlq_id: uuid::Uuid::new_v4().to_string(),
            schema_name: schema_name.to_string(),
            payload,
            validation_errors,
            first_seen_ts: format_ts(now),
            retry_count: 0,
            next_retry_ts: Some(format_ts(now + Duration::seconds(backoff_secs(0)))),
            status: events::DLQ_PENDING_RETRY.to_string(),
            last_retry_ts: None,
            last_result_status: None,
        };
        self.append(&record)?;
        Ok(record)
    }

    /// Append one record line (creation or update).
    pub fn append(&self, record: &DlqRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let line = serde_json::to_string(record).map_err(|e| StoreError::Io {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        writeln!(file, "{line}").map_err(|e| StoreError::io(&self.path, e))
    }

    /// Fold the full log into authoritative per-entry state, last write wins
    /// per field. A missing file folds to an empty state.
    pub fn fold(&self) -> Result<DlqFold, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DlqFold::default()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let mut merged: BTreeMap<String, Value> = BTreeMap::new();
        let mut malformed = 0usize;
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(line) {
                Ok(Value::Object(map)) => Value::Object(map),
                _ => {
                    malformed += 1;
                    continue;
                }
            };
            let dlq_id = match value.get("dlq_id").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => {
                    malformed += 1;
                    continue;
                }
            };
            match merged.get_mut(&dlq_id) {
                Some(existing) => merge_fields(existing, &value),
                None => {
                    merged.insert(dlq_id, value);
                }
            }
        }

        let mut entries = BTreeMap::new();
        for (dlq_id, value) in merged {
            match serde_json::from_value::<DlqRecord>(value) {
                Ok(record) => {
                    entries.insert(dlq_id, record);
                }
                Err(_) => malformed += 1,
            }
        }
        Ok(DlqFold {
            entries,
            malformed_lines: malformed,
        })
    }
}

/// Overlay `update`'s top-level fields onto `base`, last write wins.
fn merge_fields(base: &mut Value, update: &Value) {
    if let (Value::Object(base_map), Value::Object(update_map)) = (base, update) {
        for (k, v) in update_map {
            base_map.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        crate::models::parse_ts("2026-02-20T08:00:00Z").unwrap()
    }

    fn temp_log() -> (tempfile::TempDir, DlqLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = DlqLog::new(dir.path().join("memory").join("state-dlq.jsonl"));
        (dir, log)
    }

    #[test]
    fn backoff_schedule_reuses_last_interval() {
        assert_eq!(backoff_secs(0), 60);
        assert_eq!(backoff_secs(1), 300);
        assert_eq!(backoff_secs(2), 1_800);
        assert_eq!(backoff_secs(3), 7_200);
        assert_eq!(backoff_secs(4), 7_200);
        assert_eq!(backoff_secs(40), 7_200);
    }

    #[test]
    fn quarantine_writes_pending_retry_entry() {
        let (_dir, log) = temp_log();
        let record = log
            .quarantine(
                "observation",
                json!({"bad": true}),
                vec!["domain: not in enum".into()],
                now(),
            )
            .unwrap();
        assert_eq!(record.status, events::DLQ_PENDING_RETRY);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.next_retry_ts.as_deref(), Some("2026-02-20T08:01:00Z"));

        let fold = log.fold().unwrap();
        assert_eq!(fold.entries.len(), 1);
        assert_eq!(fold.malformed_lines, 0);
        assert_eq!(fold.entries[&record.dlq_id], record);
    }

    #[test]
    fn fold_of_missing_file_is_empty() {
        let (_dir, log) = temp_log();
        let fold = log.fold().unwrap();
        assert!(fold.entries.is_empty());
        assert_eq!(fold.malformed_lines, 0);
    }

    #[test]
    fn fold_applies_last_write_wins_per_field() {
        let (_dir, log) = temp_log();
        let record = log
            .quarantine("observation", json!({}), vec![], now())
            .unwrap();

        let mut update = record.clone();
        update.status = events::DLQ_RESOLVED.to_string();
        update.retry_count = 1;
        update.last_result_status = Some("committed".into());
        log.append(&update).unwrap();

        let fold = log.fold().unwrap();
        let folded = &fold.entries[&record.dlq_id];
        assert_eq!(folded.status, events::DLQ_RESOLVED);
        assert_eq!(folded.retry_count, 1);
        assert_eq!(folded.last_result_status.as_deref(), Some("committed"));
        // Fields untouched by the update survive from the creation line.
        assert_eq!(folded.first_seen_ts, record.first_seen_ts);
    }

    #[test]
    fn fold_counts_malformed_lines_without_aborting() {
        let (_dir, log) = temp_log();
        log.quarantine("observation", json!({}), vec![], now())
            .unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap();
        writeln!(file, "this is not json").unwrap();
        writeln!(file, "{{\"no_dlq_id\": true}}").unwrap();

        let fold = log.fold().unwrap();
        assert_eq!(fold.entries.len(), 1);
        assert_eq!(fold.malformed_lines, 2);
    }

    #[test]
    fn distinct_ids_fold_to_distinct_entries() {
        let (_dir, log) = temp_log();
        let a = log.quarantine("observation", json!({}), vec![], now()).unwrap();
        let b = log.quarantine("signal", json!({}), vec![], now()).unwrap();
        let fold = log.fold().unwrap();
        assert_eq!(fold.entries.len(), 2);
        assert_eq!(fold.entries[&a.dlq_id].schema_name, "observation");
        assert_eq!(fold.entries[&b.dlq_id].schema_name, "signal");
    }
}
