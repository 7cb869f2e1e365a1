//! Pending-prompt lifecycle: applying user decisions and promoting
//! tentatives into the review queue.
//!
//! A confirm/edit decision does not commit the prompting observation as-is:
//! a fresh observation is synthesized with a **new** event id (the original
//! id is already in the processed window), `intent = assertive`, and
//! `source.type = user_confirmation`, then committed directly — a human
//! decision is not re-scored against the thresholds. Rejects resolve the
//! prompt with no state mutation. Every resolution appends a learning event
//! for the adaptive threshold learner.
//!
//! Review-queue promotion turns stashed tentatives into prompts under a
//! pending cap. The cap is compared against the *filtered* pending count
//! (per entity/domain when filters are given); with no filter it degrades to
//! a global cap.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::StatewardError;
use crate::events;
use crate::ingest::{apply_commit, build_prompt, StateEngine};
use crate::learner::{append_learning_event, LearningEvent};
use crate::models::{
    format_ts, value_display, ConfirmOutcome, ConfirmationAction, Domain, Intent, SourceRef,
    SourceType, StateObservation, UserConfirmation,
};
use crate::resolver::confidence;
use crate::schema::SchemaName;

// ---------------------------------------------------------------------------
// apply_confirmation
// ---------------------------------------------------------------------------

impl StateEngine {
    /// Apply a user decision to its pending prompt.
    ///
    /// `not_found` and `mismatch` are terminal lookup outcomes (never
    /// retried); validation failures quarantine to the DLQ like any other
    /// inbound payload.
    pub fn apply_confirmation(
        &self,
        confirmation: &UserConfirmation,
    ) -> Result<ConfirmOutcome, StatewardError> {
        let payload = serde_json::to_value(confirmation).unwrap_or_default();
        if let Err(errors) = self.validator().validate(SchemaName::Confirmation, &payload) {
            let record = self.store().dlq().quarantine(
                SchemaName::Confirmation.as_str(),
                payload,
                errors.clone(),
                Utc::now(),
            )?;
            return Ok(ConfirmOutcome::ValidationFailed {
                dlq_id: record.dlq_id,
                errors,
            });
        }

        let mut doc = self.store().load()?;
        let prompt = match doc.pending_confirmations.get(&confirmation.prompt_id) {
            Some(prompt) => prompt.clone(),
            None => {
                return Ok(ConfirmOutcome::NotFound {
                    prompt_id: confirmation.prompt_id.clone(),
                })
            }
        };
        if prompt.entity_id != confirmation.entity_id || prompt.domain != confirmation.domain {
            return Ok(ConfirmOutcome::Mismatch {
                prompt_id: confirmation.prompt_id.clone(),
                reason: format!(
                    "prompt is {}/{}, confirmation says {}/{}",
                    prompt.entity_id,
                    prompt.domain.as_str(),
                    confirmation.entity_id,
                    confirmation.domain.as_str()
                ),
            });
        }

        doc.pending_confirmations.remove(&confirmation.prompt_id);
        doc.learning_stats.ask_user_confirmations += 1;

        if confirmation.action == ConfirmationAction::Reject {
            doc.learning_stats.user_rejects += 1;
            self.store().save(&mut doc)?;
            self.store().append_audit(&format!(
                "prompt={} | action=reject | no state mutation",
                confirmation.prompt_id
            ))?;
            self.append_outcome_event(&prompt.observation_event, confirmation, prompt.confidence)?;
            return Ok(ConfirmOutcome::Rejected {
                prompt_id: confirmation.prompt_id.clone(),
            });
        }

        // Confirm/edit: synthesize the committing observation under a fresh
        // event id so the idempotency window does not swallow it.
        let original = &prompt.observation_event;
        let candidate_value = match (&confirmation.action, &confirmation.edited_value) {
            (ConfirmationAction::Edit, Some(edited)) => edited.clone(),
            _ => original.candidate_value.clone(),
        };
        let synthesized = StateObservation {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_ts: confirmation.ts.clone(),
            domain: original.domain,
            entity_id: original.entity_id.clone(),
            field: original.field.clone(),
            candidate_value,
            intent: Intent::Assertive,
            source: SourceRef {
                source_type: SourceType::UserConfirmation,
                reference: format!("prompt:{}", confirmation.prompt_id),
            },
            corroborators: original.corroborators.clone(),
        };

        let synthesized_payload = serde_json::to_value(&synthesized).unwrap_or_default();
        if let Err(errors) = self
            .validator()
            .validate(SchemaName::Observation, &synthesized_payload)
        {
            let record = self.store().dlq().quarantine(
                SchemaName::Observation.as_str(),
                synthesized_payload,
                errors.clone(),
                Utc::now(),
            )?;
            return Ok(ConfirmOutcome::ValidationFailed {
                dlq_id: record.dlq_id,
                errors,
            });
        }

        let now = Utc::now();
        let conf = confidence(&doc.source_reliability, &synthesized, now);
        apply_commit(&mut doc, &synthesized, conf, &format_ts(now));
        doc.mark_processed(&synthesized.event_id);
        match confirmation.action {
            ConfirmationAction::Edit => doc.learning_stats.user_edits += 1,
            _ => doc.learning_stats.user_confirms += 1,
        }
        self.store().save(&mut doc)?;
        self.store().append_audit(&format!(
            "{} | decision=user_confirmation | prompt={} | action={} | {}/{}.{} | value={} | confidence={conf:.3}",
            synthesized.event_id,
            confirmation.prompt_id,
            confirmation.action.as_str(),
            synthesized.entity_id,
            synthesized.domain.as_str(),
            synthesized.stored_field(),
            value_display(&synthesized.candidate_value),
        ))?;
        self.append_outcome_event(original, confirmation, prompt.confidence)?;

        Ok(ConfirmOutcome::Committed {
            prompt_id: confirmation.prompt_id.clone(),
            event_id: synthesized.event_id,
            confidence: conf,
        })
    }

    /// Append the ask-user outcome to the learning-events log.
    fn append_outcome_event(
        &self,
        original: &StateObservation,
        confirmation: &UserConfirmation,
        prompt_confidence: f64,
    ) -> Result<(), StatewardError> {
        let outcome = match confirmation.action {
            ConfirmationAction::Confirm => events::OUTCOME_ACCEPTED,
            ConfirmationAction::Reject | ConfirmationAction::Edit => events::OUTCOME_CORRECTED,
        };
        let event = LearningEvent {
            learning_event_id: uuid::Uuid::new_v4().to_string(),
            ts: format_ts(Utc::now()),
            entity_id: original.entity_id.clone(),
            domain: original.domain,
            field: original.stored_field().to_string(),
            decision: events::DECISION_ASK_USER.to_string(),
            action: confirmation.action.as_str().to_string(),
            outcome: outcome.to_string(),
            confidence: prompt_confidence,
            intent: original.intent.as_str().to_string(),
            source_type: original.source.source_type.as_str().to_string(),
            source_ref: original.source.reference.clone(),
            prompt_id: confirmation.prompt_id.clone(),
        };
        append_learning_event(self.store(), &event)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// promote_review_queue
// ---------------------------------------------------------------------------

/// Options for one promotion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoteOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    pub min_confidence: f64,
    pub limit: usize,
    pub max_pending: usize,
}

impl PromoteOptions {
    /// Options from the engine's review config, no filters.
    pub fn from_config(config: &crate::config::ReviewConfig) -> Self {
        Self {
            entity_id: None,
            domain: None,
            min_confidence: config.min_confidence,
            limit: config.limit,
            max_pending: config.max_pending,
        }
    }
}

/// Result of one promotion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoteSummary {
    pub promoted_count: usize,
    pub prompt_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StateEngine {
    /// Promote eligible tentatives into pending prompts, bounded by the
    /// pending cap.
    ///
    /// Eligible: not already promoted, matching the filters, confidence at
    /// or above `min_confidence`, and not already represented by a pending
    /// prompt with the same observation event id. Ordered by confidence
    /// descending, then observation age (oldest first). The whole run is a
    /// single save.
    pub fn promote_review_queue(
        &self,
        options: &PromoteOptions,
    ) -> Result<PromoteSummary, StatewardError> {
        let mut doc = self.store().load()?;
        let current_pending =
            doc.pending_count(options.entity_id.as_deref(), options.domain);
        let remaining = options.max_pending.saturating_sub(current_pending);
        if remaining == 0 {
            return Ok(PromoteSummary {
                promoted_count: 0,
                prompt_ids: Vec::new(),
                reason: Some("pending_limit_reached".into()),
            });
        }

        let already_prompted: std::collections::HashSet<String> = doc
            .pending_confirmations
            .values()
            .map(|p| p.observation_event.event_id.clone())
            .collect();

        let mut eligible: Vec<usize> = doc
            .tentative_observations
            .iter()
            .enumerate()
            .filter(|(_, t)| t.promoted_at.is_none())
            .filter(|(_, t)| {
                options
                    .entity_id
                    .as_deref()
                    .is_none_or(|e| t.observation.entity_id == e)
            })
            .filter(|(_, t)| options.domain.is_none_or(|d| t.observation.domain == d))
            .filter(|(_, t)| t.confidence >= options.min_confidence)
            .filter(|(_, t)| !already_prompted.contains(&t.observation.event_id))
            .map(|(i, _)| i)
            .collect();

        eligible.sort_by(|&a, &b| {
            let ta = &doc.tentative_observations[a];
            let tb = &doc.tentative_observations[b];
            tb.confidence
                .partial_cmp(&ta.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ta.observed_at.cmp(&tb.observed_at))
        });
        eligible.truncate(options.limit.min(remaining));

        let now = Utc::now();
        let mut prompt_ids = Vec::new();
        let mut audit_lines = Vec::new();
        for index in eligible {
            let tentative = doc.tentative_observations[index].clone();
            let prompt = build_prompt(
                &tentative.observation,
                &tentative.reasons,
                tentative.confidence,
                now,
            );
            audit_lines.push(format!(
                "{} | decision=ask_user | prompt_id={} | {}/{}.{} | value={} | confidence={:.3} | source={} | promoted_from=tentative",
                tentative.observation.event_id,
                prompt.prompt_id,
                tentative.observation.entity_id,
                tentative.observation.domain.as_str(),
                tentative.observation.stored_field(),
                value_display(&tentative.observation.candidate_value),
                tentative.confidence,
                tentative.observation.source.source_type.as_str(),
            ));
            prompt_ids.push(prompt.prompt_id.clone());
            let slot = &mut doc.tentative_observations[index];
            slot.promoted_at = Some(format_ts(now));
            slot.prompt_id = Some(prompt.prompt_id.clone());
            doc.learning_stats.ask_user_prompts += 1;
            doc.pending_confirmations
                .insert(prompt.prompt_id.clone(), prompt);
        }

        doc.runtime.last_review_queue_at = Some(format_ts(now));
        self.store().save(&mut doc)?;
        for line in audit_lines {
            self.store().append_audit(&line)?;
        }

        Ok(PromoteSummary {
            promoted_count: prompt_ids.len(),
            prompt_ids,
            reason: None,
        })
    }
}
