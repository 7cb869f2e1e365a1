//! Core data models for the Stateward kernel.
//!
//! Inputs ([`StateObservation`], [`SignalEvent`], [`UserConfirmation`]),
//! stored shapes ([`StateRecord`], [`PendingPrompt`],
//! [`TentativeObservation`]), and the tagged outcome enums returned by engine
//! operations. All structs use `serde` for JSON serialization; closed
//! vocabularies are enums serialized as snake_case strings.
//!
//! Timestamps are ISO-8601 UTC strings throughout; [`parse_ts`] is the one
//! place they are turned back into [`chrono`] values. Confidence floats are
//! clamped to `[0, 1]` and rounded to three decimals via [`round3`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Closed vocabularies
// ---------------------------------------------------------------------------

/// Fact domain. Every record is keyed by `(entity_id, domain, field)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Travel,
    Family,
    Project,
    Financial,
    Profile,
    School,
    General,
}

impl Domain {
    /// All domains, in canonical order.
    pub const ALL: [Domain; 7] = [
        Domain::Travel,
        Domain::Family,
        Domain::Project,
        Domain::Financial,
        Domain::Profile,
        Domain::School,
        Domain::General,
    ];

    /// The snake_case wire string for this domain.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Travel => "travel",
            Domain::Family => "family",
            Domain::Project => "project",
            Domain::Financial => "financial",
            Domain::Profile => "profile",
            Domain::School => "school",
            Domain::General => "general",
        }
    }

    /// Parse a wire string. Returns `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Domain> {
        Domain::ALL.iter().copied().find(|d| d.as_str() == s)
    }
}

/// Speaker intent attached to an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Assertive,
    Planning,
    Hypothetical,
    Historical,
    Retract,
}

impl Intent {
    /// The snake_case wire string for this intent.
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Assertive => "assertive",
            Intent::Planning => "planning",
            Intent::Hypothetical => "hypothetical",
            Intent::Historical => "historical",
            Intent::Retract => "retract",
        }
    }

    /// Parse a wire string. Returns `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Intent> {
        [
            Intent::Assertive,
            Intent::Planning,
            Intent::Hypothetical,
            Intent::Historical,
            Intent::Retract,
        ]
        .into_iter()
        .find(|i| i.as_str() == s)
    }
}

/// Closed set of observation source types. Reliability lookups key on the
/// wire string so deployments can override weights per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    UserConfirmation,
    ConversationAssertive,
    ConversationPlanning,
    CalendarWebhook,
    CalendarPoll,
    EmailWebhook,
    EmailPoll,
    StaticMarkdown,
}

impl SourceType {
    /// All source types, in reliability order (most trusted first).
    pub const ALL: [SourceType; 8] = [
        SourceType::UserConfirmation,
        SourceType::ConversationAssertive,
        SourceType::CalendarWebhook,
        SourceType::CalendarPoll,
        SourceType::EmailWebhook,
        SourceType::EmailPoll,
        SourceType::ConversationPlanning,
        SourceType::StaticMarkdown,
    ];

    /// The snake_case wire string for this source type.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::UserConfirmation => "user_confirmation",
            SourceType::ConversationAssertive => "conversation_assertive",
            SourceType::ConversationPlanning => "conversation_planning",
            SourceType::CalendarWebhook => "calendar_webhook",
            SourceType::CalendarPoll => "calendar_poll",
            SourceType::EmailWebhook => "email_webhook",
            SourceType::EmailPoll => "email_poll",
            SourceType::StaticMarkdown => "static_markdown",
        }
    }

    /// Parse a wire string. Returns `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<SourceType> {
        SourceType::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

/// User decision on a pending prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationAction {
    Confirm,
    Reject,
    Edit,
}

impl ConfirmationAction {
    /// The snake_case wire string for this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationAction::Confirm => "confirm",
            ConfirmationAction::Reject => "reject",
            ConfirmationAction::Edit => "edit",
        }
    }
}

/// Signal batch origin kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Calendar,
    Email,
}

/// Signal acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    Poll,
    Webhook,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// The origin of an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Source type from the closed set.
    #[serde(rename = "type")]
    pub source_type: SourceType,

    /// Opaque locator inside that source (thread id, event id, file path).
    #[serde(rename = "ref")]
    pub reference: String,
}

/// An independent witness backing an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corroborator {
    /// Free-form witness kind (not restricted to [`SourceType`]).
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque locator for the witness.
    #[serde(rename = "ref")]
    pub reference: String,
}

/// An input claim that some field has a candidate value.
///
/// `candidate_value = null` with `intent = retract` means "remove the field".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateObservation {
    /// Unique event id. Content-derived (uuid v5) for external signals so
    /// replays are idempotent; random (uuid v4) for conversational input.
    pub event_id: String,

    /// When the underlying fact was observed (ISO-8601 UTC).
    pub event_ts: String,

    /// Fact domain.
    pub domain: Domain,

    /// Entity the fact is about (`user:…`, `family:…`, `team:…`).
    pub entity_id: String,

    /// Dotted field name. Carries the `<domain>.` prefix on the wire; the
    /// prefix is stripped when stored.
    pub field: String,

    /// Proposed value: any JSON scalar/object/array, or null for a retract.
    pub candidate_value: Value,

    /// Speaker intent.
    pub intent: Intent,

    /// Where the claim came from.
    pub source: SourceRef,

    /// Independent witnesses. Each raises confidence slightly.
    #[serde(default)]
    pub corroborators: Vec<Corroborator>,
}

impl StateObservation {
    /// The stored field name: `field` with a leading `<domain>.` prefix
    /// stripped when present.
    pub fn stored_field(&self) -> &str {
        let prefix_len = self.domain.as_str().len() + 1;
        if self.field.len() > prefix_len
            && self.field.starts_with(self.domain.as_str())
            && self.field.as_bytes()[prefix_len - 1] == b'.'
        {
            &self.field[prefix_len..]
        } else {
            &self.field
        }
    }

    /// Whether this observation deletes its field.
    pub fn is_retract(&self) -> bool {
        self.intent == Intent::Retract && self.candidate_value.is_null()
    }
}

/// One item inside a signal batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalItem {
    pub domain: Domain,
    pub field: String,
    /// Stable per-item locator (calendar event id, thread id).
    #[serde(rename = "ref")]
    pub reference: String,
    pub value: Value,
    pub intent: Intent,
    #[serde(default)]
    pub corroborators: Vec<Corroborator>,
}

/// The origin of a signal batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSource {
    pub kind: SignalKind,
    pub mode: SignalMode,
    #[serde(rename = "ref")]
    pub reference: String,
}

/// A batched external input (calendar/mail) mapped into observations by the
/// signal adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub signal_id: String,
    pub event_ts: String,
    pub source: SignalSource,
    pub entity_id: String,
    pub items: Vec<SignalItem>,
}

/// A user's decision on a pending prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfirmation {
    pub prompt_id: String,
    pub entity_id: String,
    pub domain: Domain,
    pub proposed_change: String,
    pub confidence: f64,
    #[serde(default)]
    pub reason_summary: Vec<String>,
    pub action: ConfirmationAction,
    /// Present iff `action = edit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_value: Option<Value>,
    pub ts: String,
}

// ---------------------------------------------------------------------------
// Stored shapes
// ---------------------------------------------------------------------------

/// A committed fact: one per `(entity_id, domain, field)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub value: Value,
    /// When this record was last written (ISO-8601 UTC).
    pub last_update: String,
    /// Source type string of the originating observation.
    pub source: String,
    pub confidence: f64,
    /// Event id of the committing observation.
    pub event_id: String,
}

/// An ask-user decision awaiting a human action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPrompt {
    pub prompt_id: String,
    pub entity_id: String,
    pub domain: Domain,
    /// Display string: `"<field> -> <value>"`.
    pub proposed_change: String,
    pub confidence: f64,
    pub reason_summary: Vec<String>,
    /// Placeholder for the expected default action.
    pub action: String,
    /// Full copy of the observation that raised the prompt. Its event id is
    /// already in the processed set; resolution commits under a fresh id.
    pub observation_event: StateObservation,
    /// Source type string of the originating observation.
    pub source: String,
    pub created_at: String,
}

/// A low-confidence observation stashed without mutating state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TentativeObservation {
    pub observation: StateObservation,
    pub observed_at: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
    /// Set when promoted into the review queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<String>,
    /// The prompt created by promotion, when promoted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolver output
// ---------------------------------------------------------------------------

/// Resolver verdict for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AutoCommit,
    AskUser,
    TentativeReject,
}

impl Decision {
    /// The snake_case wire string for this decision.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::AutoCommit => "auto_commit",
            Decision::AskUser => "ask_user",
            Decision::TentativeReject => "tentative_reject",
        }
    }
}

/// Full resolver output: the decision plus the numbers that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub decision: Decision,
    pub confidence: f64,
    /// Confidence of the committed record this observation competes with
    /// (0 when the field has never been committed).
    pub current_confidence: f64,
    pub margin: f64,
    pub reasons: Vec<String>,
}

// ---------------------------------------------------------------------------
// Operation outcomes
// ---------------------------------------------------------------------------

/// Terminal result of one `ingest` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// A state record was written (or deleted, for a retract).
    Committed {
        event_id: String,
        confidence: f64,
        margin: f64,
        reasons: Vec<String>,
    },
    /// A pending prompt was created.
    PendingConfirmation {
        event_id: String,
        prompt_id: String,
        confidence: f64,
        margin: f64,
        reasons: Vec<String>,
    },
    /// The observation was stashed as a tentative.
    Tentative {
        event_id: String,
        confidence: f64,
        margin: f64,
        reasons: Vec<String>,
    },
    /// The event id was already processed.
    Duplicate { event_id: String },
    /// The payload was quarantined in the DLQ.
    ValidationFailed {
        dlq_id: String,
        errors: Vec<String>,
    },
}

impl IngestOutcome {
    /// The wire status string for this outcome.
    pub fn status(&self) -> &'static str {
        match self {
            IngestOutcome::Committed { .. } => crate::events::STATUS_COMMITTED,
            IngestOutcome::PendingConfirmation { .. } => {
                crate::events::STATUS_PENDING_CONFIRMATION
            }
            IngestOutcome::Tentative { .. } => crate::events::STATUS_TENTATIVE,
            IngestOutcome::Duplicate { .. } => crate::events::STATUS_DUPLICATE,
            IngestOutcome::ValidationFailed { .. } => crate::events::STATUS_VALIDATION_FAILED,
        }
    }
}

/// Terminal result of one `apply_confirmation` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    /// The prompt resolved into a committed record.
    Committed {
        prompt_id: String,
        event_id: String,
        confidence: f64,
    },
    /// The prompt was resolved with no state mutation.
    Rejected { prompt_id: String },
    /// No pending prompt exists for the referenced id.
    NotFound { prompt_id: String },
    /// The confirmation's entity/domain disagree with the stored prompt.
    Mismatch { prompt_id: String, reason: String },
    /// The payload was quarantined in the DLQ.
    ValidationFailed {
        dlq_id: String,
        errors: Vec<String>,
    },
}

impl ConfirmOutcome {
    /// The wire status string for this outcome.
    pub fn status(&self) -> &'static str {
        match self {
            ConfirmOutcome::Committed { .. } => crate::events::STATUS_COMMITTED,
            ConfirmOutcome::Rejected { .. } => crate::events::CONFIRM_REJECTED,
            ConfirmOutcome::NotFound { .. } => crate::events::CONFIRM_NOT_FOUND,
            ConfirmOutcome::Mismatch { .. } => crate::events::CONFIRM_MISMATCH,
            ConfirmOutcome::ValidationFailed { .. } => crate::events::STATUS_VALIDATION_FAILED,
        }
    }
}

/// Per-status counters aggregated over one signal batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalCounters {
    #[serde(default)]
    pub committed: usize,
    #[serde(default)]
    pub pending_confirmation: usize,
    #[serde(default)]
    pub tentative: usize,
    #[serde(default)]
    pub duplicate: usize,
    #[serde(default)]
    pub validation_failed: usize,
}

impl SignalCounters {
    /// Record one per-item outcome.
    pub fn absorb(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Committed { .. } => self.committed += 1,
            IngestOutcome::PendingConfirmation { .. } => self.pending_confirmation += 1,
            IngestOutcome::Tentative { .. } => self.tentative += 1,
            IngestOutcome::Duplicate { .. } => self.duplicate += 1,
            IngestOutcome::ValidationFailed { .. } => self.validation_failed += 1,
        }
    }
}

/// Terminal result of one `ingest_signal` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignalOutcome {
    /// The batch was processed; counters cover every item.
    Ok { counters: SignalCounters },
    /// The batch envelope was quarantined in the DLQ.
    ValidationFailed {
        dlq_id: String,
        errors: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Clamp a float into `[0, 1]`.
pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Round to three decimals (the precision every persisted float carries).
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Validate an entity id against `^(user|family|team):[a-z0-9._-]+$`.
pub fn is_valid_entity_id(entity_id: &str) -> bool {
    let rest = ["user:", "family:", "team:"]
        .iter()
        .find_map(|p| entity_id.strip_prefix(p));
    match rest {
        Some(rest) if !rest.is_empty() => rest
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-')),
        _ => false,
    }
}

/// Parse an ISO-8601 / RFC-3339 timestamp into UTC.
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Render `now` as the ISO-8601 UTC string every persisted timestamp uses.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Display a JSON value the way audit lines and prompts do: strings as-is,
/// everything else JSON-encoded.
pub fn value_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
