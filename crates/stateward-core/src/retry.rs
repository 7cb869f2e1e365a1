//! DLQ retry scheduler: replay quarantined payloads with backoff.
//!
//! One run folds the DLQ, selects due `pending_retry` entries oldest-first,
//! re-validates and dispatches each by schema name (`observation` →
//! ingest, `confirmation` → apply_confirmation, `signal` → ingest_signal),
//! and appends an update line classifying the attempt:
//!
//! - **resolved** — the dispatch reached a terminal success status for its
//!   schema (`committed`/`pending_confirmation`/`tentative`/`duplicate` for
//!   observations, `committed`/`rejected` for confirmations, `ok` for
//!   signals);
//! - **failed_permanent** — `unsupported_schema`, `not_found`, `mismatch`,
//!   or the retry budget is exhausted;
//! - **pending_retry** — anything else, with the next backoff window.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::dlq::{backoff_secs, DlqRecord, DEFAULT_MAX_RETRIES};
use crate::errors::StatewardError;
use crate::events;
use crate::ingest::StateEngine;
use crate::models::{format_ts, parse_ts};
use crate::schema::SchemaName;

// ---------------------------------------------------------------------------
// Options & summary
// ---------------------------------------------------------------------------

/// Options for one retry run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOptions {
    /// Maximum entries attempted this run.
    pub limit: usize,
    /// Retry budget; entries at or beyond it fail permanently.
    pub max_retries: u32,
    /// Attempt entries whose backoff window has not elapsed yet.
    pub include_not_due: bool,
    /// Forwarded to observation/signal dispatch.
    pub force_commit: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            max_retries: DEFAULT_MAX_RETRIES,
            include_not_due: false,
            force_commit: false,
        }
    }
}

/// One attempted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryResult {
    pub dlq_id: String,
    pub schema_name: String,
    /// Terminal status string the dispatch produced.
    pub result_status: String,
    /// New DLQ status after classification.
    pub status: String,
}

/// Summary of one retry run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySummary {
    pub attempted: usize,
    pub resolved: usize,
    pub pending_retry: usize,
    pub failed_permanent: usize,
    pub results: Vec<RetryResult>,
}

// ---------------------------------------------------------------------------
// retry
// ---------------------------------------------------------------------------

impl StateEngine {
    /// Run the retry scheduler once.
    pub fn retry(&self, options: &RetryOptions) -> Result<RetrySummary, StatewardError> {
        let now = Utc::now();
        let fold = self.store().dlq().fold()?;

        let mut due: Vec<DlqRecord> = fold
            .entries
            .into_values()
            .filter(|entry| entry.status == events::DLQ_PENDING_RETRY)
            .filter(|entry| {
                options.include_not_due
                    || entry
                        .next_retry_ts
                        .as_deref()
                        .and_then(parse_ts)
                        .is_none_or(|ts| ts <= now)
            })
            .collect();
        due.sort_by(|a, b| a.first_seen_ts.cmp(&b.first_seen_ts));
        due.truncate(options.limit);

        let mut summary = RetrySummary::default();
        for entry in due {
            let result_status = self.dispatch(&entry, options)?;
            let retry_count = entry.retry_count + 1;

            let resolved = is_resolved(&entry.schema_name, &result_status);
            let permanent = !resolved
                && (is_permanent_status(&result_status) || retry_count >= options.max_retries);

            let status = if resolved {
                summary.resolved += 1;
                events::DLQ_RESOLVED
            } else if permanent {
                summary.failed_permanent += 1;
                events::DLQ_FAILED_PERMANENT
            } else {
                summary.pending_retry += 1;
                events::DLQ_PENDING_RETRY
            };

            let mut update = entry.clone();
            update.status = status.to_string();
            update.retry_count = retry_count;
            update.last_retry_ts = Some(format_ts(now));
            update.last_result_status = Some(result_status.clone());
            update.next_retry_ts = if status == events::DLQ_PENDING_RETRY {
                Some(format_ts(now + Duration::seconds(backoff_secs(retry_count))))
            } else {
                None
            };
            self.store().dlq().append(&update)?;

            summary.attempted += 1;
            summary.results.push(RetryResult {
                dlq_id: entry.dlq_id,
                schema_name: entry.schema_name,
                result_status,
                status: status.to_string(),
            });
        }
        Ok(summary)
    }

    /// Re-validate and dispatch one quarantined payload, returning the
    /// terminal status string of the attempt.
    fn dispatch(&self, entry: &DlqRecord, options: &RetryOptions) -> Result<String, StatewardError> {
        let Some(schema) = SchemaName::parse(&entry.schema_name) else {
            return Ok(events::DLQ_UNSUPPORTED_SCHEMA.to_string());
        };
        // Re-validate the raw payload first: deserializing into the typed
        // shape would silently drop unknown properties the schema rejects.
        if self.validator().validate(schema, &entry.payload).is_err() {
            return Ok(events::STATUS_VALIDATION_FAILED.to_string());
        }
        match schema {
            SchemaName::Observation => {
                match serde_json::from_value(entry.payload.clone()) {
                    Ok(observation) => {
                        let outcome = self.ingest(&observation, options.force_commit)?;
                        Ok(outcome.status().to_string())
                    }
                    Err(_) => Ok(events::STATUS_VALIDATION_FAILED.to_string()),
                }
            }
            SchemaName::Confirmation => match serde_json::from_value(entry.payload.clone()) {
                Ok(confirmation) => {
                    let outcome = self.apply_confirmation(&confirmation)?;
                    Ok(outcome.status().to_string())
                }
                Err(_) => Ok(events::STATUS_VALIDATION_FAILED.to_string()),
            },
            SchemaName::Signal => match serde_json::from_value(entry.payload.clone()) {
                Ok(signal) => {
                    let outcome = self.ingest_signal(&signal, options.force_commit)?;
                    match outcome {
                        crate::models::SignalOutcome::Ok { .. } => {
                            Ok(events::STATUS_OK.to_string())
                        }
                        crate::models::SignalOutcome::ValidationFailed { .. } => {
                            Ok(events::STATUS_VALIDATION_FAILED.to_string())
                        }
                    }
                }
                Err(_) => Ok(events::STATUS_VALIDATION_FAILED.to_string()),
            },
            SchemaName::Intent => Ok(events::DLQ_UNSUPPORTED_SCHEMA.to_string()),
        }
    }
}

/// Whether `status` is a terminal success for `schema_name`.
fn is_resolved(schema_name: &str, status: &str) -> bool {
    match schema_name {
        "observation" => matches!(
            status,
            "committed" | "pending_confirmation" | "tentative" | "duplicate"
        ),
        "confirmation" => matches!(status, "committed" | "rejected"),
        "signal" => status == "ok",
        _ => false,
    }
}

/// Result statuses that can never succeed on a later retry.
fn is_permanent_status(status: &str) -> bool {
    matches!(status, "unsupported_schema" | "not_found" | "mismatch")
}
