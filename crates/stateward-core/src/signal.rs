//! Signal adapter: calendar/mail batches → deterministic observation batches.
//!
//! Each [`SignalEvent`] item explodes into one [`StateObservation`] whose
//! event id is a uuid v5 over the identifying tuple
//! `(kind, mode, entity_id, item.ref, canonical value)`. Re-polling the same
//! calendar event or mail thread therefore reproduces the same event ids and
//! the pipeline reports only duplicates, while a *content change* produces a
//! fresh event that competes against the prior record through the resolver.
//!
//! The keyword helpers ([`infer_calendar_domain`], [`infer_email_domain`])
//! are exported for the fetcher glue that builds signal items from raw
//! calendar/mail objects; `family` is refined to `school` when class/lesson
//! cues appear.

use chrono::Utc;
use uuid::Uuid;

use crate::errors::StatewardError;
use crate::ingest::{infer_domain, StateEngine};
use crate::models::{
    format_ts, Domain, SignalCounters, SignalEvent, SignalKind, SignalMode, SignalOutcome,
    SourceRef, SourceType, StateObservation,
};
use crate::schema::SchemaName;

/// Cues that refine an inferred `family` domain to `school`.
const SCHOOL_REFINEMENT_CUES: &[&str] = &["school", "class", "lesson"];

// ---------------------------------------------------------------------------
// Deterministic identity
// ---------------------------------------------------------------------------

/// Content-derived event id for one signal item.
///
/// Same tuple → same uuid, across processes and restarts. The value payload
/// participates via its canonical JSON encoding (object keys sorted), so a
/// changed start time or subject yields a new id.
pub fn signal_event_id(
    kind: SignalKind,
    mode: SignalMode,
    entity_id: &str,
    item_ref: &str,
    value: &serde_json::Value,
) -> String {
    let canonical = value.to_string();
    let name = format!(
        "{}:{}:{entity_id}:{item_ref}:{canonical}",
        kind_str(kind),
        mode_str(mode),
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Source type for a signal origin: calendar → `calendar_poll` /
/// `calendar_webhook`, email → `email_poll` / `email_webhook`.
pub fn derive_source_type(kind: SignalKind, mode: SignalMode) -> SourceType {
    match (kind, mode) {
        (SignalKind::Calendar, SignalMode::Poll) => SourceType::CalendarPoll,
        (SignalKind::Calendar, SignalMode::Webhook) => SourceType::CalendarWebhook,
        (SignalKind::Email, SignalMode::Webhook) => SourceType::EmailWebhook,
        (SignalKind::Email, SignalMode::Poll) => SourceType::EmailPoll,
    }
}

fn kind_str(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Calendar => "calendar",
        SignalKind::Email => "email",
    }
}

fn mode_str(mode: SignalMode) -> &'static str {
    match mode {
        SignalMode::Poll => "poll",
        SignalMode::Webhook => "webhook",
    }
}

// ---------------------------------------------------------------------------
// Domain inference for fetcher glue
// ---------------------------------------------------------------------------

/// Infer the domain of a calendar event from its display texts.
pub fn infer_calendar_domain(summary: &str, description: &str, location: &str) -> Domain {
    let text = format!("{summary} {description} {location}");
    refine_school_text(infer_domain(&text), &text)
}

/// Infer the domain of a mail thread from subject, sender, and labels.
pub fn infer_email_domain(subject: &str, from: &str, labels: &[String]) -> Domain {
    let text = format!("{subject} {from} {}", labels.join(" "));
    refine_school_text(infer_domain(&text), &text)
}

/// The keyword matcher checks family before school, so a "kids class" event
/// lands in family; the refinement promotes it.
fn refine_school_text(domain: Domain, text: &str) -> Domain {
    let lowered = text.to_lowercase();
    if domain == Domain::Family
        && SCHOOL_REFINEMENT_CUES
            .iter()
            .any(|cue| lowered.contains(cue))
    {
        Domain::School
    } else {
        domain
    }
}

// ---------------------------------------------------------------------------
// ingest_signal
// ---------------------------------------------------------------------------

impl StateEngine {
    /// Validate a signal batch and drive every item through the pipeline.
    ///
    /// Items are processed in array order; the returned counters aggregate
    /// the per-item outcomes. A poll-mode batch also stamps
    /// `runtime.last_poll_at`.
    pub fn ingest_signal(
        &self,
        signal: &SignalEvent,
        force_commit: bool,
    ) -> Result<SignalOutcome, StatewardError> {
        let payload = serde_json::to_value(signal).unwrap_or_default();
        if let Err(errors) = self.validator().validate(SchemaName::Signal, &payload) {
            let record = self.store().dlq().quarantine(
                SchemaName::Signal.as_str(),
                payload,
                errors.clone(),
                Utc::now(),
            )?;
            return Ok(SignalOutcome::ValidationFailed {
                dlq_id: record.dlq_id,
                errors,
            });
        }

        let source_type = derive_source_type(signal.source.kind, signal.source.mode);
        let mut counters = SignalCounters::default();
        for (index, item) in signal.items.iter().enumerate() {
            let observation = StateObservation {
                event_id: signal_event_id(
                    signal.source.kind,
                    signal.source.mode,
                    &signal.entity_id,
                    &item.reference,
                    &item.value,
                ),
                event_ts: signal.event_ts.clone(),
                domain: item.domain,
                entity_id: signal.entity_id.clone(),
                field: item.field.clone(),
                candidate_value: item.value.clone(),
                intent: item.intent,
                source: SourceRef {
                    source_type,
                    reference: format!("{}#item-{}", signal.source.reference, index + 1),
                },
                corroborators: item.corroborators.clone(),
            };
            let outcome = self.ingest(&observation, force_commit)?;
            counters.absorb(&outcome);
        }

        if signal.source.mode == SignalMode::Poll {
            let mut doc = self.store().load()?;
            doc.runtime.last_poll_at = Some(format_ts(Utc::now()));
            self.store().save(&mut doc)?;
        }

        Ok(SignalOutcome::Ok { counters })
    }
}
