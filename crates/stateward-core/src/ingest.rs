//! The ingestion pipeline: one observation in, one terminal outcome out.
//!
//! [`StateEngine`] is the kernel's entry point. It owns the store handle, the
//! compiled schema validator, the configuration tables, and the intent
//! classifier, and drives every observation through:
//!
//! 1. schema validation (failures quarantine to the DLQ),
//! 2. the idempotency check against `processed_event_ids`,
//! 3. the confidence resolver,
//! 4. the decision application (commit / pending prompt / tentative),
//! 5. one atomic save plus one audit line.
//!
//! The engine is stateless between calls: every mutation path loads the
//! document, mutates in memory, and saves — the single-writer assumption
//! makes that safe without locks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, IntentMode};
use crate::document::{Document, LearningStats};
use crate::errors::StatewardError;
use crate::events;
use crate::intent::{CommandClassifier, RuleClassifier};
use crate::models::{
    format_ts, value_display, Decision, Domain, IngestOutcome, Intent, PendingPrompt, SourceRef,
    SourceType, StateObservation, StateRecord, TentativeObservation,
};
use crate::resolver::resolve;
use crate::schema::{SchemaName, SchemaValidator};
use crate::store::StateStore;
use crate::traits::IntentClassifier;

// ---------------------------------------------------------------------------
// StateEngine
// ---------------------------------------------------------------------------

/// The state-consistency engine.
pub struct StateEngine {
    store: StateStore,
    config: EngineConfig,
    validator: Arc<SchemaValidator>,
    classifier: Arc<dyn IntentClassifier>,
}

impl StateEngine {
    /// Build an engine from config: compile schemas (fatal on failure),
    /// choose the classifier mode, and bootstrap the store.
    pub fn new(config: EngineConfig) -> Result<Self, StatewardError> {
        let validator = Arc::new(SchemaValidator::new()?);
        let classifier: Arc<dyn IntentClassifier> = match (&config.intent.mode, &config.intent.command)
        {
            (IntentMode::Command, Some(command)) => Arc::new(CommandClassifier::new(
                command,
                Duration::from_secs(config.intent.timeout_secs),
                config.few_shot_examples.clone(),
                validator.clone(),
            )),
            _ => Arc::new(RuleClassifier::new()),
        };
        Self::with_classifier(config, validator, classifier)
    }

    /// Build an engine with an explicit classifier (used by tests and hosts
    /// that bring their own model adapter).
    pub fn with_classifier(
        config: EngineConfig,
        validator: Arc<SchemaValidator>,
        classifier: Arc<dyn IntentClassifier>,
    ) -> Result<Self, StatewardError> {
        let store = StateStore::new(config.root_dir.clone());
        store.ensure_bootstrap(&config)?;
        Ok(Self {
            store,
            config,
            validator,
            classifier,
        })
    }

    /// The store handle.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The compiled schema validator.
    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// The active intent classifier.
    pub fn classifier(&self) -> Arc<dyn IntentClassifier> {
        self.classifier.clone()
    }

    // -----------------------------------------------------------------------
    // ingest
    // -----------------------------------------------------------------------

    /// Drive one observation through validate → dedupe → resolve → apply.
    ///
    /// Replaying an `event_id` already in the processed window returns
    /// [`IngestOutcome::Duplicate`] without further work, so re-polls and
    /// at-least-once delivery never double-commit or double-prompt.
    pub fn ingest(
        &self,
        observation: &StateObservation,
        force_commit: bool,
    ) -> Result<IngestOutcome, StatewardError> {
        let payload = serde_json::to_value(observation).unwrap_or_default();
        if let Err(errors) = self.validator.validate(SchemaName::Observation, &payload) {
            let record =
                self.store
                    .dlq()
                    .quarantine(SchemaName::Observation.as_str(), payload, errors.clone(), Utc::now())?;
            return Ok(IngestOutcome::ValidationFailed {
                dlq_id: record.dlq_id,
                errors,
            });
        }

        let mut doc = self.store.load()?;
        if doc.is_processed(&observation.event_id) {
            return Ok(IngestOutcome::Duplicate {
                event_id: observation.event_id.clone(),
            });
        }
        doc.mark_processed(&observation.event_id);

        let now = Utc::now();
        let resolution = resolve(&doc, observation, now, force_commit);
        let entity = &observation.entity_id;
        let domain = observation.domain.as_str();
        let field = observation.stored_field().to_string();
        let source = observation.source.source_type.as_str();

        let outcome = match resolution.decision {
            Decision::AutoCommit => {
                apply_commit(&mut doc, observation, resolution.confidence, &format_ts(now));
                doc.learning_stats.auto_commits += 1;
                self.store.save(&mut doc)?;
                self.store.append_audit(&format!(
                    "{} | decision=auto_commit | {entity}/{domain}.{field} | value={} | confidence={:.3} | source={source}",
                    observation.event_id,
                    value_display(&observation.candidate_value),
                    resolution.confidence,
                ))?;
                IngestOutcome::Committed {
                    event_id: observation.event_id.clone(),
                    confidence: resolution.confidence,
                    margin: resolution.margin,
                    reasons: resolution.reasons,
                }
            }
            Decision::AskUser => {
                let prompt = build_prompt(observation, &resolution.reasons, resolution.confidence, now);
                let prompt_id = prompt.prompt_id.clone();
                doc.pending_confirmations.insert(prompt_id.clone(), prompt);
                doc.learning_stats.ask_user_prompts += 1;
                self.store.save(&mut doc)?;
                self.store.append_audit(&format!(
                    "{} | decision=ask_user | prompt_id={prompt_id} | {entity}/{domain}.{field} | value={} | confidence={:.3} | source={source}",
                    observation.event_id,
                    value_display(&observation.candidate_value),
                    resolution.confidence,
                ))?;
                IngestOutcome::PendingConfirmation {
                    event_id: observation.event_id.clone(),
                    prompt_id,
                    confidence: resolution.confidence,
                    margin: resolution.margin,
                    reasons: resolution.reasons,
                }
            }
            Decision::TentativeReject => {
                doc.push_tentative(TentativeObservation {
                    observation: observation.clone(),
                    observed_at: format_ts(now),
                    confidence: resolution.confidence,
                    reasons: resolution.reasons.clone(),
                    promoted_at: None,
                    prompt_id: None,
                });
                doc.learning_stats.tentative_rejects += 1;
                self.store.save(&mut doc)?;
                self.store.append_audit(&format!(
                    "{} | decision=tentative_reject | {entity}/{domain}.{field} | confidence={:.3} | source={source}",
                    observation.event_id, resolution.confidence,
                ))?;
                IngestOutcome::Tentative {
                    event_id: observation.event_id.clone(),
                    confidence: resolution.confidence,
                    margin: resolution.margin,
                    reasons: resolution.reasons,
                }
            }
        };
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Free-text extraction
    // -----------------------------------------------------------------------

    /// Turn a free-form utterance into an observation: domain from the fixed
    /// keyword matcher, `field = <domain>.note` unless overridden, intent
    /// from the classifier (assertive when the classifier errors out).
    pub async fn extract_observation(
        &self,
        text: &str,
        field_override: Option<&str>,
    ) -> StateObservation {
        let domain = infer_domain(text);
        let intent = match self.classifier.classify(domain, text).await {
            Ok(classification) => classification.intent,
            Err(err) => {
                log::warn!("intent classification failed, assuming assertive: {err}");
                Intent::Assertive
            }
        };
        let now = Utc::now();
        StateObservation {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_ts: format_ts(now),
            domain,
            entity_id: self.config.entity_id.clone(),
            field: field_override
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}.note", domain.as_str())),
            candidate_value: serde_json::Value::String(text.to_string()),
            intent,
            source: SourceRef {
                source_type: SourceType::ConversationAssertive,
                reference: "cli:free_text".into(),
            },
            corroborators: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Status & doctor
    // -----------------------------------------------------------------------

    /// Counts and timestamps for the CLI's status surface.
    pub fn status(&self) -> Result<StatusSummary, StatewardError> {
        let doc = self.store.load()?;
        let fold = self.store.dlq().fold()?;
        let mut dlq_pending = 0usize;
        let mut dlq_resolved = 0usize;
        let mut dlq_failed = 0usize;
        for entry in fold.entries.values() {
            match entry.status.as_str() {
                s if s == events::DLQ_PENDING_RETRY => dlq_pending += 1,
                s if s == events::DLQ_RESOLVED => dlq_resolved += 1,
                _ => dlq_failed += 1,
            }
        }
        Ok(StatusSummary {
            records: doc.record_count(),
            pending_confirmations: doc.pending_confirmations.len(),
            tentatives: doc.tentative_observations.len(),
            dlq_pending,
            dlq_resolved,
            dlq_failed_permanent: dlq_failed,
            dlq_malformed_lines: fold.malformed_lines,
            learning_stats: doc.learning_stats,
            last_poll_at: doc.runtime.last_poll_at.clone(),
            last_review_queue_at: doc.runtime.last_review_queue_at.clone(),
            last_consistency_check: doc.last_consistency_check.clone(),
        })
    }

    /// Non-fatal configuration diagnostics with actionable hints.
    pub fn doctor(&self) -> Vec<DoctorCheck> {
        let mut checks = Vec::new();

        let memory_dir = self.store.memory_dir();
        checks.push(match std::fs::metadata(&memory_dir) {
            Ok(meta) if meta.is_dir() => DoctorCheck::ok("memory_dir"),
            _ => DoctorCheck::fail(
                "memory_dir",
                format!("{} missing; run any ingest to bootstrap it", memory_dir.display()),
            ),
        });

        checks.push(match self.store.load() {
            Ok(_) => DoctorCheck::ok("document"),
            Err(err) => DoctorCheck::fail("document", err.to_string()),
        });

        // Schemas compiled at construction; reaching here means they loaded.
        checks.push(DoctorCheck::ok("schemas"));

        checks.push(match self.config.resolve_chat_target() {
            Some(_) => DoctorCheck::ok("chat_target"),
            None => DoctorCheck::fail(
                "chat_target",
                "set STATE_TELEGRAM_TARGET or state-telegram.toml to enable the review loop",
            ),
        });

        checks.push(
            match (&self.config.intent.mode, &self.config.intent.command) {
                (IntentMode::Command, None) => DoctorCheck::fail(
                    "intent_classifier",
                    "mode=command but STATE_INTENT_EXTRACTOR_CMD is unset; falling back to rules",
                ),
                _ => DoctorCheck::ok("intent_classifier"),
            },
        );

        checks
    }
}

// ---------------------------------------------------------------------------
// Commit helper (shared with the confirmation lifecycle)
// ---------------------------------------------------------------------------

/// Write (or, for a retract, delete) the state record for an observation.
/// The caller is responsible for counters, save, and the audit line.
pub(crate) fn apply_commit(
    doc: &mut Document,
    observation: &StateObservation,
    confidence: f64,
    now_iso: &str,
) {
    let field = observation.stored_field().to_string();
    if observation.is_retract() {
        doc.delete_record(&observation.entity_id, observation.domain, &field);
    } else {
        doc.upsert_record(
            &observation.entity_id,
            observation.domain,
            &field,
            StateRecord {
                value: observation.candidate_value.clone(),
                last_update: now_iso.to_string(),
                source: observation.source.source_type.as_str().to_string(),
                confidence,
                event_id: observation.event_id.clone(),
            },
        );
    }
}

/// Build the pending prompt for an ask-user resolution.
pub(crate) fn build_prompt(
    observation: &StateObservation,
    reasons: &[String],
    confidence: f64,
    now: chrono::DateTime<Utc>,
) -> PendingPrompt {
    PendingPrompt {
        prompt_id: uuid::Uuid::new_v4().to_string(),
        entity_id: observation.entity_id.clone(),
        domain: observation.domain,
        proposed_change: format!(
            "{} -> {}",
            observation.stored_field(),
            value_display(&observation.candidate_value)
        ),
        confidence,
        reason_summary: reasons.iter().take(5).cloned().collect(),
        action: "confirm".into(),
        observation_event: observation.clone(),
        source: observation.source.source_type.as_str().to_string(),
        created_at: format_ts(now),
    }
}

// ---------------------------------------------------------------------------
// Domain inference
// ---------------------------------------------------------------------------

const TRAVEL_KEYWORDS: &[&str] = &[
    "trip", "flight", "travel", "hotel", "airport", "itinerary", "vacation", "drive to",
    "leave for",
];
const FAMILY_KEYWORDS: &[&str] = &[
    "family", "kids", "kid ", "son", "daughter", "wife", "husband", "partner", "grandma",
    "grandpa", "birthday",
];
const FINANCIAL_KEYWORDS: &[&str] = &[
    "pay", "invoice", "budget", "bank", "mortgage", "rent", "salary", "tax", "subscription",
    "bill",
];
const PROJECT_KEYWORDS: &[&str] = &[
    "project", "deadline", "milestone", "launch", "sprint", "release", "ship ",
];
const PROFILE_KEYWORDS: &[&str] = &[
    "my name", "i prefer", "preference", "allergic", "phone number", "email address",
    "address is",
];
const SCHOOL_KEYWORDS: &[&str] = &[
    "school", "class", "teacher", "homework", "lesson", "semester", "exam", "tuition",
];

/// Fixed keyword matcher: first matching domain in canonical order wins;
/// no match means `general`.
pub fn infer_domain(text: &str) -> Domain {
    let lowered = text.to_lowercase();
    let tables: [(Domain, &[&str]); 6] = [
        (Domain::Travel, TRAVEL_KEYWORDS),
        (Domain::Family, FAMILY_KEYWORDS),
        (Domain::Financial, FINANCIAL_KEYWORDS),
        (Domain::Project, PROJECT_KEYWORDS),
        (Domain::Profile, PROFILE_KEYWORDS),
        (Domain::School, SCHOOL_KEYWORDS),
    ];
    for (domain, keywords) in tables {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return domain;
        }
    }
    Domain::General
}

// ---------------------------------------------------------------------------
// Status & doctor shapes
// ---------------------------------------------------------------------------

/// Counts and timestamps for the status surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub records: usize,
    pub pending_confirmations: usize,
    pub tentatives: usize,
    pub dlq_pending: usize,
    pub dlq_resolved: usize,
    pub dlq_failed_permanent: usize,
    pub dlq_malformed_lines: usize,
    pub learning_stats: LearningStats,
    pub last_poll_at: Option<String>,
    pub last_review_queue_at: Option<String>,
    pub last_consistency_check: String,
}

/// One doctor diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorCheck {
    pub check: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl DoctorCheck {
    fn ok(check: &str) -> Self {
        Self {
            check: check.into(),
            ok: true,
            hint: None,
        }
    }

    fn fail(check: &str, hint: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            ok: false,
            hint: Some(hint.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine_in, observation, TestEngine};
    use serde_json::json;

    // -- ingest: decision routing --

    #[test]
    fn high_confidence_observation_commits() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let obs = observation("travel.location", json!("Tahoe"));
        let outcome = engine.ingest(&obs, false).unwrap();
        assert!(matches!(outcome, IngestOutcome::Committed { .. }));

        let doc = engine.store().load().unwrap();
        let record = doc
            .record("user:primary", Domain::Travel, "location")
            .unwrap();
        assert_eq!(record.value, json!("Tahoe"));
        assert_eq!(record.source, "conversation_assertive");
        assert!(doc.is_processed(&obs.event_id));
        assert_eq!(doc.learning_stats.auto_commits, 1);
    }

    #[test]
    fn committed_event_id_lands_in_processed_set() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let obs = observation("travel.location", json!("Tahoe"));
        engine.ingest(&obs, false).unwrap();
        let doc = engine.store().load().unwrap();
        assert!(doc.is_processed(&obs.event_id));
        let record = doc
            .record("user:primary", Domain::Travel, "location")
            .unwrap();
        assert_eq!(record.event_id, obs.event_id);
    }

    #[test]
    fn replay_returns_duplicate_without_mutation() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let obs = observation("travel.location", json!("Tahoe"));
        engine.ingest(&obs, false).unwrap();
        let before = engine.store().load().unwrap();

        let outcome = engine.ingest(&obs, false).unwrap();
        assert!(matches!(outcome, IngestOutcome::Duplicate { .. }));

        let after = engine.store().load().unwrap();
        assert_eq!(after.entities, before.entities);
        assert_eq!(after.learning_stats, before.learning_stats);
        assert_eq!(after.pending_confirmations.len(), 0);
    }

    #[test]
    fn review_band_observation_creates_pending_prompt() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let mut obs = observation("travel.alert", json!("Leave for Tahoe Friday"));
        obs.source.source_type = SourceType::StaticMarkdown;
        obs.corroborators = vec![
            crate::models::Corroborator {
                kind: "email_thread".into(),
                reference: "thread:9".into(),
            },
            crate::models::Corroborator {
                kind: "calendar_event".into(),
                reference: "event:3".into(),
            },
        ];

        let outcome = engine.ingest(&obs, false).unwrap();
        let prompt_id = match outcome {
            IngestOutcome::PendingConfirmation { prompt_id, confidence, .. } => {
                assert_eq!(confidence, 0.66);
                prompt_id
            }
            other => panic!("expected pending, got {other:?}"),
        };

        let doc = engine.store().load().unwrap();
        let prompt = &doc.pending_confirmations[&prompt_id];
        assert_eq!(prompt.proposed_change, "alert -> Leave for Tahoe Friday");
        assert_eq!(prompt.source, "static_markdown");
        assert!(prompt.reason_summary.len() <= 5);
        // The prompting observation stays uncommitted.
        assert!(doc.record("user:primary", Domain::Travel, "alert").is_none());
    }

    #[test]
    fn low_confidence_observation_is_stashed_tentatively() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let mut obs = observation("travel.idea", json!("Cabin someday"));
        obs.source.source_type = SourceType::StaticMarkdown;
        obs.intent = Intent::Hypothetical;

        let outcome = engine.ingest(&obs, false).unwrap();
        assert!(matches!(outcome, IngestOutcome::Tentative { .. }));

        let doc = engine.store().load().unwrap();
        assert_eq!(doc.tentative_observations.len(), 1);
        assert!(doc.pending_confirmations.is_empty());
        assert_eq!(doc.learning_stats.tentative_rejects, 1);
    }

    #[test]
    fn force_commit_bypasses_thresholds() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let mut obs = observation("travel.idea", json!("Cabin someday"));
        obs.source.source_type = SourceType::StaticMarkdown;
        obs.intent = Intent::Hypothetical;

        let outcome = engine.ingest(&obs, true).unwrap();
        match outcome {
            IngestOutcome::Committed { reasons, .. } => {
                assert_eq!(reasons, vec!["force_commit=true".to_string()]);
            }
            other => panic!("expected committed, got {other:?}"),
        }
    }

    #[test]
    fn invalid_observation_is_quarantined() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let mut obs = observation("travel.location", json!("Tahoe"));
        obs.entity_id = "robot:primary".into();

        let outcome = engine.ingest(&obs, false).unwrap();
        let dlq_id = match outcome {
            IngestOutcome::ValidationFailed { dlq_id, errors } => {
                assert!(!errors.is_empty());
                dlq_id
            }
            other => panic!("expected validation_failed, got {other:?}"),
        };

        let fold = engine.store().dlq().fold().unwrap();
        assert_eq!(fold.entries[&dlq_id].schema_name, "observation");
        // Nothing reached the document.
        let doc = engine.store().load().unwrap();
        assert_eq!(doc.record_count(), 0);
        assert!(!doc.is_processed(&obs.event_id));
    }

    #[test]
    fn retract_deletes_the_field() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let obs = observation("travel.location", json!("Tahoe"));
        engine.ingest(&obs, false).unwrap();

        let mut retract = observation("travel.location", serde_json::Value::Null);
        retract.intent = Intent::Retract;
        let outcome = engine.ingest(&retract, true).unwrap();
        assert!(matches!(outcome, IngestOutcome::Committed { .. }));

        let doc = engine.store().load().unwrap();
        assert!(doc.record("user:primary", Domain::Travel, "location").is_none());
    }

    #[test]
    fn retract_of_contested_fact_asks_first() {
        let TestEngine { engine, dir: _dir } = engine_in();
        engine
            .ingest(&observation("travel.location", json!("Tahoe")), false)
            .unwrap();

        // Against a 0.95-confidence record the retract cannot clear the
        // margin, so it lands in the review band instead of silently
        // deleting.
        let mut retract = observation("travel.location", serde_json::Value::Null);
        retract.intent = Intent::Retract;
        let outcome = engine.ingest(&retract, false).unwrap();
        assert!(matches!(outcome, IngestOutcome::PendingConfirmation { .. }));
        let doc = engine.store().load().unwrap();
        assert!(doc.record("user:primary", Domain::Travel, "location").is_some());
    }

    #[test]
    fn audit_lines_written_per_decision() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let obs = observation("travel.location", json!("Tahoe"));
        engine.ingest(&obs, false).unwrap();

        let tail = engine.store().audit_tail(5).unwrap();
        assert_eq!(tail.len(), 1);
        assert!(tail[0].contains("decision=auto_commit"));
        assert!(tail[0].contains("user:primary/travel.location"));
        assert!(tail[0].contains("value=Tahoe"));
        assert!(tail[0].contains("source=conversation_assertive"));
    }

    #[test]
    fn duplicate_replay_writes_no_audit_line() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let obs = observation("travel.location", json!("Tahoe"));
        engine.ingest(&obs, false).unwrap();
        engine.ingest(&obs, false).unwrap();
        assert_eq!(engine.store().audit_tail(10).unwrap().len(), 1);
    }

    // -- domain inference --

    #[test]
    fn domain_inference_matches_in_canonical_order() {
        assert_eq!(infer_domain("Booked the flight to Tahoe"), Domain::Travel);
        assert_eq!(infer_domain("The kids have a birthday party"), Domain::Family);
        assert_eq!(infer_domain("Rent is due on the 1st"), Domain::Financial);
        assert_eq!(infer_domain("The launch deadline moved"), Domain::Project);
        assert_eq!(infer_domain("I prefer aisle seats"), Domain::Profile);
        assert_eq!(infer_domain("Semester starts Monday"), Domain::School);
        assert_eq!(infer_domain("It is raining"), Domain::General);
    }

    #[test]
    fn travel_wins_over_later_domains_on_ties() {
        // Both travel and school keywords present; travel is checked first.
        assert_eq!(
            infer_domain("Field trip with the class to the airport"),
            Domain::Travel
        );
    }

    // -- extraction --

    #[tokio::test]
    async fn extraction_builds_note_field_and_classifies() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let obs = engine
            .extract_observation("Thinking about maybe a trip next month", None)
            .await;
        assert_eq!(obs.domain, Domain::Travel);
        assert_eq!(obs.field, "travel.note");
        assert_eq!(obs.intent, Intent::Planning);
        assert_eq!(obs.entity_id, "user:primary");
        assert!(uuid::Uuid::parse_str(&obs.event_id).is_ok());
    }

    #[tokio::test]
    async fn extraction_honours_field_override() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let obs = engine
            .extract_observation("We are going to Tahoe", Some("travel.location"))
            .await;
        assert_eq!(obs.field, "travel.location");
        assert_eq!(obs.intent, Intent::Assertive);
    }

    // -- status & doctor --

    #[test]
    fn status_counts_store_shape() {
        let TestEngine { engine, dir: _dir } = engine_in();
        engine
            .ingest(&observation("travel.location", json!("Tahoe")), false)
            .unwrap();
        let mut pending = observation("travel.alert", json!("Leave Friday"));
        pending.source.source_type = SourceType::StaticMarkdown;
        pending.corroborators = vec![crate::models::Corroborator {
            kind: "email_thread".into(),
            reference: "t".into(),
        }];
        engine.ingest(&pending, false).unwrap();

        let status = engine.status().unwrap();
        assert_eq!(status.records, 1);
        assert_eq!(status.pending_confirmations, 1);
        assert_eq!(status.learning_stats.auto_commits, 1);
        assert_eq!(status.dlq_pending, 0);
    }

    #[test]
    fn doctor_reports_missing_chat_target() {
        let TestEngine { engine, dir: _dir } = engine_in();
        let checks = engine.doctor();
        let target = checks.iter().find(|c| c.check == "chat_target").unwrap();
        assert!(!target.ok);
        assert!(target.hint.as_deref().unwrap().contains("STATE_TELEGRAM_TARGET"));
        assert!(checks.iter().find(|c| c.check == "document").unwrap().ok);
        assert!(checks.iter().find(|c| c.check == "schemas").unwrap().ok);
    }
}
