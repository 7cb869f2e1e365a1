//! Runtime bridge to the host chat: two hook callbacks and the control
//! command handler.
//!
//! - **Pre-response context injection** ([`StateBridge::context_snapshot`]):
//!   a short text block of committed facts plus the pending-confirmation
//!   headline, returned as the `prependContext` side-effect of the hook; how
//!   the host merges it into the model prompt is the host's concern.
//! - **Inbound ingestion** ([`StateBridge::handle_inbound`]): every non-self
//!   user message on an enabled channel either answers the active prompt or
//!   becomes a review-band observation with a content-derived identity, so a
//!   redelivered message is a duplicate, not a second fact.
//! - **`/state-confirm`** ([`StateBridge::handle_command`]): show, confirm,
//!   reject, or edit pending prompts by full id or ≥ 8-char prefix, with
//!   inline Yes/No buttons wired to the next prompt.
//!
//! Hook failures are caught, logged, and swallowed by the host adapter —
//! a projection or classification failure must never block a reply.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StatewardError;
use crate::ingest::{infer_domain, StateEngine};
use crate::models::{
    format_ts, value_display, ConfirmOutcome, ConfirmationAction, Intent, PendingPrompt,
    SourceRef, StateObservation, UserConfirmation,
};
use crate::worker::{load_worker_state, parse_reply, ref_matches, ReplyDecision};
use crate::traits::InlineButton;

/// Character cap for value summaries inside snapshots and replies.
const SUMMARY_MAX_CHARS: usize = 80;

/// Shorten a value for display.
fn summarize(value: &serde_json::Value) -> String {
    let text = value_display(value);
    if text.chars().count() <= SUMMARY_MAX_CHARS {
        text
    } else {
        let head: String = text.chars().take(SUMMARY_MAX_CHARS - 1).collect();
        format!("{head}\u{2026}")
    }
}

fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

// ---------------------------------------------------------------------------
// StateBridge
// ---------------------------------------------------------------------------

/// The host-chat adapter around a shared engine.
pub struct StateBridge {
    engine: Arc<StateEngine>,
}

/// One inbound chat message as the host presents it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub conversation: String,
    pub message_id: String,
    pub from: String,
    /// Seconds or milliseconds since the epoch; auto-detected.
    pub timestamp: i64,
    pub text: String,
    #[serde(default)]
    pub is_self: bool,
}

/// Outcome of the inbound-message hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundOutcome {
    /// The message was filtered out before touching the engine.
    Skipped { reason: String },
    /// The message answered the active prompt.
    Resolved { prompt_id: String, status: String },
    /// The message became an observation.
    Ingested {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt_id: Option<String>,
    },
}

/// Structured reply from the command handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub text: String,
    #[serde(default)]
    pub buttons: Vec<InlineButton>,
    #[serde(default)]
    pub error: bool,
}

impl CommandReply {
    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
            error: true,
        }
    }

    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
            error: false,
        }
    }
}

impl StateBridge {
    pub fn new(engine: Arc<StateEngine>) -> Self {
        Self { engine }
    }

    // -----------------------------------------------------------------------
    // Hook A: pre-response context injection
    // -----------------------------------------------------------------------

    /// Build the snapshot block injected ahead of model generation.
    pub fn context_snapshot(&self) -> Result<String, StatewardError> {
        let doc = self.engine.store().load()?;
        let cap = self.engine.config().inject_max_fields;

        let mut lines = vec!["Canonical state snapshot:".to_string()];
        let mut total = 0usize;
        let mut shown = 0usize;
        for (entity_id, entity) in &doc.entities {
            for (domain, fields) in &entity.state {
                for (field, record) in fields {
                    total += 1;
                    if shown < cap {
                        shown += 1;
                        lines.push(format!(
                            "- [{entity_id}] {domain}.{field} = {} (confidence={}, source={})",
                            summarize(&record.value),
                            record.confidence,
                            record.source,
                        ));
                    }
                }
            }
        }
        if total == 0 {
            lines.push("- No committed state yet.".to_string());
        } else if total > shown {
            lines.push(format!("- {} more omitted", total - shown));
        }

        lines.push(String::new());
        lines.push(format!(
            "Pending confirmations: {}",
            doc.pending_confirmations.len()
        ));
        if let Some(active) = self.active_prompt(&doc) {
            lines.push(format!(
                "Active pending check: {} {} = {}",
                short_id(&active.prompt_id),
                active.observation_event.stored_field(),
                summarize(&active.observation_event.candidate_value),
            ));
        }
        lines.push("If chat context conflicts with this snapshot, prefer this snapshot.".to_string());
        Ok(lines.join("\n"))
    }

    /// The prompt named by the worker's runtime state, falling back to the
    /// first pending prompt by creation time.
    fn active_prompt(&self, doc: &crate::document::Document) -> Option<PendingPrompt> {
        let state = load_worker_state(self.engine.store(), &self.engine.config().entity_id);
        if let Some(active_id) = state.active_prompt_id {
            if let Some(prompt) = doc.pending_confirmations.get(&active_id) {
                return Some(prompt.clone());
            }
        }
        doc.pending_by_created().first().map(|p| (*p).clone())
    }

    // -----------------------------------------------------------------------
    // Hook B: inbound-message ingestion
    // -----------------------------------------------------------------------

    /// Process one inbound user message.
    pub async fn handle_inbound(
        &self,
        message: &InboundMessage,
    ) -> Result<InboundOutcome, StatewardError> {
        let config = self.engine.config().ingest.clone();

        if message.is_self {
            return Ok(skip("self_message"));
        }
        if !config.channels.iter().any(|c| c == &message.channel) {
            return Ok(skip("channel_not_enabled"));
        }
        if !config.allowed_senders.is_empty()
            && !config.allowed_senders.iter().any(|s| s == &message.from)
        {
            return Ok(skip("sender_not_allowed"));
        }

        let text = message.text.trim();
        if text.is_empty() {
            return Ok(skip("empty"));
        }
        if text.starts_with('/') {
            return Ok(skip("command"));
        }
        if text.chars().count() < config.min_chars {
            return Ok(skip("too_short"));
        }
        if !text.chars().any(|c| c.is_alphabetic()) {
            return Ok(skip("no_alphabetic"));
        }
        if text.ends_with('?') {
            return Ok(skip("question"));
        }

        // A natural yes/no may be answering the active prompt.
        if let Some(outcome) = self.try_resolve_reply(text)? {
            return Ok(outcome);
        }

        let doc = self.engine.store().load()?;
        if doc.pending_confirmations.len() >= config.max_pending {
            return Ok(skip("pending_backlog"));
        }

        let domain = infer_domain(text);
        let intent = match self
            .engine
            .classifier()
            .classify(domain, text)
            .await
        {
            Ok(classification) => classification.intent,
            Err(err) => {
                log::warn!("inbound intent classification failed, assuming assertive: {err}");
                Intent::Assertive
            }
        };

        let identity = format!(
            "{}|{}|{}|{}|{}|{}",
            message.channel,
            message.conversation,
            message.message_id,
            message.from,
            message.timestamp,
            text
        );
        let observation = StateObservation {
            event_id: Uuid::new_v5(&Uuid::NAMESPACE_URL, identity.as_bytes()).to_string(),
            event_ts: event_ts_from(message.timestamp),
            domain,
            entity_id: self.engine.config().entity_id.clone(),
            field: format!("{}.current_assertion", domain.as_str()),
            candidate_value: serde_json::Value::String(text.to_string()),
            intent,
            source: SourceRef {
                source_type: config.source_type,
                reference: format!(
                    "message:{}:{}:{}",
                    message.channel, message.conversation, message.message_id
                ),
            },
            corroborators: Vec::new(),
        };

        let outcome = self.engine.ingest(&observation, false)?;
        let prompt_id = match &outcome {
            crate::models::IngestOutcome::PendingConfirmation { prompt_id, .. } => {
                // Mark it active opportunistically: the user just said it, so
                // a bare "yes" in the next message should land here.
                let store = self.engine.store();
                let mut state = load_worker_state(store, &self.engine.config().entity_id);
                if state.active_prompt_id.is_none() {
                    state.active_prompt_id = Some(prompt_id.clone());
                    crate::worker::save_worker_state(store, &state)?;
                }
                Some(prompt_id.clone())
            }
            _ => None,
        };
        Ok(InboundOutcome::Ingested {
            status: outcome.status().to_string(),
            prompt_id,
        })
    }

    /// Try to interpret `text` as an answer to the active prompt.
    fn try_resolve_reply(&self, text: &str) -> Result<Option<InboundOutcome>, StatewardError> {
        let decision = parse_reply(text);
        let (action, prompt_ref, edited_value) = match decision {
            ReplyDecision::Confirm { prompt_ref } => (ConfirmationAction::Confirm, prompt_ref, None),
            ReplyDecision::Reject { prompt_ref } => (ConfirmationAction::Reject, prompt_ref, None),
            ReplyDecision::Edit { prompt_ref, value } => (
                ConfirmationAction::Edit,
                prompt_ref,
                Some(serde_json::Value::String(value)),
            ),
            ReplyDecision::EditHelp | ReplyDecision::None => return Ok(None),
        };

        let doc = self.engine.store().load()?;
        let Some(active) = self.active_prompt(&doc) else {
            return Ok(None);
        };
        if let Some(reference) = &prompt_ref {
            if !ref_matches(reference, &active.prompt_id) {
                return Ok(None);
            }
        }

        let outcome = self.apply_action(&active, action, edited_value)?;
        Ok(Some(InboundOutcome::Resolved {
            prompt_id: active.prompt_id,
            status: outcome.status().to_string(),
        }))
    }

    // -----------------------------------------------------------------------
    // Command: /state-confirm
    // -----------------------------------------------------------------------

    /// Handle the `/state-confirm` control command's argument string.
    pub fn handle_command(&self, args: &str) -> Result<CommandReply, StatewardError> {
        let doc = self.engine.store().load()?;
        let tokens: Vec<&str> = args.split_whitespace().collect();

        match tokens.as_slice() {
            [] => match self.active_prompt(&doc) {
                Some(prompt) => Ok(self.show_prompt(&prompt)),
                None => Ok(CommandReply::ok("No pending confirmations.")),
            },
            [word] if decision_word(word).is_some() => {
                let Some(prompt) = self.active_prompt(&doc) else {
                    return Ok(CommandReply::error("No pending confirmations."));
                };
                self.decide(&prompt, decision_word(word).unwrap_or(ConfirmationAction::Confirm), None)
            }
            [word] if word.eq_ignore_ascii_case("edit") => Ok(CommandReply::error(
                "Usage: /state-confirm <prompt> edit <new value>",
            )),
            [reference] => match self.resolve_ref(&doc, reference) {
                Ok(prompt) => Ok(self.show_prompt(&prompt)),
                Err(reply) => Ok(reply),
            },
            [reference, word] if decision_word(word).is_some() => {
                match self.resolve_ref(&doc, reference) {
                    Ok(prompt) => {
                        self.decide(&prompt, decision_word(word).unwrap_or(ConfirmationAction::Confirm), None)
                    }
                    Err(reply) => Ok(reply),
                }
            }
            [word, reference] if decision_word(word).is_some() => {
                match self.resolve_ref(&doc, reference) {
                    Ok(prompt) => {
                        self.decide(&prompt, decision_word(word).unwrap_or(ConfirmationAction::Confirm), None)
                    }
                    Err(reply) => Ok(reply),
                }
            }
            [reference, word, rest @ ..] if word.eq_ignore_ascii_case("edit") && !rest.is_empty() => {
                match self.resolve_ref(&doc, reference) {
                    Ok(prompt) => {
                        self.decide(&prompt, ConfirmationAction::Edit, Some(parse_value(&rest.join(" "))))
                    }
                    Err(reply) => Ok(reply),
                }
            }
            [word, reference, rest @ ..] if word.eq_ignore_ascii_case("edit") && !rest.is_empty() => {
                match self.resolve_ref(&doc, reference) {
                    Ok(prompt) => {
                        self.decide(&prompt, ConfirmationAction::Edit, Some(parse_value(&rest.join(" "))))
                    }
                    Err(reply) => Ok(reply),
                }
            }
            _ => Ok(CommandReply::error(
                "Usage: /state-confirm [<prompt>] [yes|no|confirm|reject|edit <value>]",
            )),
        }
    }

    /// Resolve a prompt by full id or ≥ 8-char prefix.
    fn resolve_ref(
        &self,
        doc: &crate::document::Document,
        reference: &str,
    ) -> Result<PendingPrompt, CommandReply> {
        if reference.len() < 8 {
            return Err(CommandReply::error(format!(
                "Prompt reference '{reference}' is too short (need at least 8 characters)."
            )));
        }
        let matches: Vec<&PendingPrompt> = doc
            .pending_confirmations
            .values()
            .filter(|p| p.prompt_id.starts_with(reference))
            .collect();
        match matches.as_slice() {
            [] => Err(CommandReply::error(format!(
                "No pending prompt matches '{reference}'."
            ))),
            [prompt] => Ok((*prompt).clone()),
            many => Err(CommandReply::error(format!(
                "Ambiguous prompt reference '{reference}': {}",
                many.iter()
                    .map(|p| short_id(&p.prompt_id))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Build the show-prompt reply with Yes/No buttons.
    fn show_prompt(&self, prompt: &PendingPrompt) -> CommandReply {
        CommandReply {
            text: format!(
                "[{}] {} ({}, confidence {}): {}",
                short_id(&prompt.prompt_id),
                prompt.entity_id,
                prompt.domain.as_str(),
                prompt.confidence,
                prompt.proposed_change,
            ),
            buttons: InlineButton::yes_no(&prompt.prompt_id),
            error: false,
        }
    }

    /// Apply a decision and build the reply, wiring buttons to the next
    /// pending prompt for the same entity.
    fn decide(
        &self,
        prompt: &PendingPrompt,
        action: ConfirmationAction,
        edited_value: Option<serde_json::Value>,
    ) -> Result<CommandReply, StatewardError> {
        let outcome = self.apply_action(prompt, action, edited_value)?;
        let mut text = match &outcome {
            ConfirmOutcome::Committed { .. } => match action {
                ConfirmationAction::Edit => format!("Updated {}.", prompt.proposed_change),
                _ => format!("Confirmed {}.", prompt.proposed_change),
            },
            ConfirmOutcome::Rejected { .. } => format!("Discarded {}.", prompt.proposed_change),
            other => {
                return Ok(CommandReply::error(format!(
                    "Could not apply confirmation ({}).",
                    other.status()
                )))
            }
        };

        let doc = self.engine.store().load()?;
        let next = doc
            .pending_by_created()
            .into_iter()
            .find(|p| p.entity_id == prompt.entity_id)
            .cloned();
        let buttons = match next {
            Some(next_prompt) => {
                text.push_str(&format!(
                    " Next: [{}] {}",
                    short_id(&next_prompt.prompt_id),
                    next_prompt.proposed_change
                ));
                InlineButton::yes_no(&next_prompt.prompt_id)
            }
            None => Vec::new(),
        };
        Ok(CommandReply {
            text,
            buttons,
            error: false,
        })
    }

    /// Apply one action to one prompt through the lifecycle.
    fn apply_action(
        &self,
        prompt: &PendingPrompt,
        action: ConfirmationAction,
        edited_value: Option<serde_json::Value>,
    ) -> Result<ConfirmOutcome, StatewardError> {
        let confirmation = UserConfirmation {
            prompt_id: prompt.prompt_id.clone(),
            entity_id: prompt.entity_id.clone(),
            domain: prompt.domain,
            proposed_change: prompt.proposed_change.clone(),
            confidence: prompt.confidence,
            reason_summary: prompt.reason_summary.clone(),
            action,
            edited_value,
            ts: format_ts(Utc::now()),
        };
        self.engine.apply_confirmation(&confirmation)
    }
}

fn skip(reason: &str) -> InboundOutcome {
    InboundOutcome::Skipped {
        reason: reason.to_string(),
    }
}

fn decision_word(token: &str) -> Option<ConfirmationAction> {
    match token.to_lowercase().as_str() {
        "yes" | "confirm" => Some(ConfirmationAction::Confirm),
        "no" | "reject" => Some(ConfirmationAction::Reject),
        _ => None,
    }
}

/// Parse an edit value: JSON when it parses, raw string otherwise.
fn parse_value(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// Event timestamp from a seconds-or-milliseconds epoch value.
fn event_ts_from(timestamp: i64) -> String {
    let seconds = if timestamp > 1_000_000_000_000 {
        timestamp / 1000
    } else {
        timestamp
    };
    match chrono::DateTime::from_timestamp(seconds, 0) {
        Some(ts) => format_ts(ts),
        None => format_ts(Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Domain, IngestOutcome};
    use crate::testing::{engine_with, observation, review_band_observation};
    use serde_json::json;

    struct Harness {
        _dir: tempfile::TempDir,
        engine: Arc<StateEngine>,
        bridge: StateBridge,
    }

    fn harness() -> Harness {
        let test = engine_with(|config| {
            config.ingest.channels = vec!["family-chat".into()];
        });
        let crate::testing::TestEngine { engine, dir } = test;
        let engine = Arc::new(engine);
        let bridge = StateBridge::new(engine.clone());
        Harness {
            _dir: dir,
            engine,
            bridge,
        }
    }

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage {
            channel: "family-chat".into(),
            conversation: "c1".into(),
            message_id: "m1".into(),
            from: "alex".into(),
            timestamp: 1_771_545_600, // seconds
            text: text.into(),
            is_self: false,
        }
    }

    fn queue_prompt(engine: &StateEngine, field: &str, value: serde_json::Value) -> String {
        match engine.ingest(&review_band_observation(field, value), false).unwrap() {
            IngestOutcome::PendingConfirmation { prompt_id, .. } => prompt_id,
            other => panic!("expected pending, got {other:?}"),
        }
    }

    // -- context snapshot --

    #[test]
    fn snapshot_lists_records_and_pending() {
        let h = harness();
        h.engine
            .ingest(&observation("travel.location", json!("Tahoe")), false)
            .unwrap();
        let prompt_id = queue_prompt(&h.engine, "travel.alert", json!("Leave Friday"));

        let snapshot = h.bridge.context_snapshot().unwrap();
        assert!(snapshot.starts_with("Canonical state snapshot:"));
        assert!(snapshot.contains("- [user:primary] travel.location = Tahoe"));
        assert!(snapshot.contains("Pending confirmations: 1"));
        assert!(snapshot.contains(&format!("Active pending check: {}", short_id(&prompt_id))));
        assert!(snapshot.ends_with("prefer this snapshot."));
    }

    #[test]
    fn snapshot_caps_fields_with_footer() {
        let test = engine_with(|config| {
            config.inject_max_fields = 3;
        });
        let engine = Arc::new(test.engine);
        let bridge = StateBridge::new(engine.clone());
        for i in 0..5 {
            engine
                .ingest(&observation(&format!("general.fact_{i}"), json!(i)), true)
                .unwrap();
        }
        let snapshot = bridge.context_snapshot().unwrap();
        assert!(snapshot.contains("- 2 more omitted"));
        assert_eq!(snapshot.matches("general.fact_").count(), 3);
        drop(test.dir);
    }

    #[test]
    fn snapshot_on_empty_store() {
        let h = harness();
        let snapshot = h.bridge.context_snapshot().unwrap();
        assert!(snapshot.contains("- No committed state yet."));
        assert!(snapshot.contains("Pending confirmations: 0"));
        assert!(!snapshot.contains("Active pending check"));
    }

    #[test]
    fn snapshot_truncates_long_values() {
        let h = harness();
        let long = "x".repeat(200);
        h.engine
            .ingest(&observation("general.blob", json!(long)), true)
            .unwrap();
        let snapshot = h.bridge.context_snapshot().unwrap();
        assert!(snapshot.contains('\u{2026}'));
        assert!(!snapshot.contains(&"x".repeat(120)));
    }

    // -- inbound hook --

    #[tokio::test]
    async fn inbound_assertion_becomes_review_band_prompt() {
        let h = harness();
        let outcome = h
            .bridge
            .handle_inbound(&inbound("We are moving the trip to Saturday"))
            .await
            .unwrap();
        let prompt_id = match outcome {
            InboundOutcome::Ingested { status, prompt_id } => {
                assert_eq!(status, "pending_confirmation");
                prompt_id.expect("review band yields a prompt")
            }
            other => panic!("expected ingested, got {other:?}"),
        };

        let doc = h.engine.store().load().unwrap();
        let prompt = &doc.pending_confirmations[&prompt_id];
        assert_eq!(prompt.source, "conversation_planning");
        assert_eq!(prompt.observation_event.field, "travel.current_assertion");
        // Opportunistically marked active for natural follow-ups.
        let state = load_worker_state(h.engine.store(), "user:primary");
        assert_eq!(state.active_prompt_id.as_deref(), Some(prompt_id.as_str()));
    }

    #[tokio::test]
    async fn inbound_identity_is_content_derived() {
        let h = harness();
        let message = inbound("We are moving the trip to Saturday");
        h.bridge.handle_inbound(&message).await.unwrap();
        let outcome = h.bridge.handle_inbound(&message).await.unwrap();
        match outcome {
            InboundOutcome::Ingested { status, .. } => assert_eq!(status, "duplicate"),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn inbound_filters() {
        let h = harness();
        let cases = [
            (inbound("/state-confirm yes"), "command"),
            (inbound("short note"), "too_short"),
            (inbound("Are we still going to Tahoe on Friday?"), "question"),
            (inbound("12345 67890 55555"), "no_alphabetic"),
            (inbound(""), "empty"),
        ];
        for (message, expected) in cases {
            match h.bridge.handle_inbound(&message).await.unwrap() {
                InboundOutcome::Skipped { reason } => assert_eq!(reason, expected),
                other => panic!("expected skip {expected}, got {other:?}"),
            }
        }

        let mut wrong_channel = inbound("We are moving the trip to Saturday");
        wrong_channel.channel = "random".into();
        match h.bridge.handle_inbound(&wrong_channel).await.unwrap() {
            InboundOutcome::Skipped { reason } => assert_eq!(reason, "channel_not_enabled"),
            other => panic!("unexpected {other:?}"),
        }

        let mut own = inbound("We are moving the trip to Saturday");
        own.is_self = true;
        match h.bridge.handle_inbound(&own).await.unwrap() {
            InboundOutcome::Skipped { reason } => assert_eq!(reason, "self_message"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn sender_allowlist_enforced() {
        let test = engine_with(|config| {
            config.ingest.channels = vec!["family-chat".into()];
            config.ingest.allowed_senders = vec!["jordan".into()];
        });
        let bridge = StateBridge::new(Arc::new(test.engine));
        match bridge
            .handle_inbound(&inbound("We are moving the trip to Saturday"))
            .await
            .unwrap()
        {
            InboundOutcome::Skipped { reason } => assert_eq!(reason, "sender_not_allowed"),
            other => panic!("unexpected {other:?}"),
        }
        drop(test.dir);
    }

    #[tokio::test]
    async fn natural_yes_resolves_active_prompt() {
        let h = harness();
        let prompt_id = queue_prompt(&h.engine, "travel.alert", json!("Leave Friday"));

        // Bare "yes" falls under the min-chars gate (the worker loop owns
        // short replies); a confirm naming the prompt passes it.
        let message = inbound(&format!("confirm {}", &prompt_id[..8]));
        let outcome = h.bridge.handle_inbound(&message).await.unwrap();
        match outcome {
            InboundOutcome::Resolved { prompt_id: resolved, status } => {
                assert_eq!(resolved, prompt_id);
                assert_eq!(status, "committed");
            }
            other => panic!("expected resolved, got {other:?}"),
        }
        let doc = h.engine.store().load().unwrap();
        assert!(doc.record("user:primary", Domain::Travel, "alert").is_some());
    }

    #[tokio::test]
    async fn pending_backlog_skips_ingestion() {
        let test = engine_with(|config| {
            config.ingest.channels = vec!["family-chat".into()];
            config.ingest.max_pending = 1;
        });
        let engine = Arc::new(test.engine);
        let bridge = StateBridge::new(engine.clone());
        queue_prompt(&engine, "travel.alert", json!("Leave Friday"));

        match bridge
            .handle_inbound(&inbound("Also the hotel changed to the Ridge"))
            .await
            .unwrap()
        {
            InboundOutcome::Skipped { reason } => assert_eq!(reason, "pending_backlog"),
            other => panic!("unexpected {other:?}"),
        }
        drop(test.dir);
    }

    #[test]
    fn event_ts_auto_detects_milliseconds() {
        assert_eq!(event_ts_from(1_771_545_600), event_ts_from(1_771_545_600_000));
    }

    // -- command handler --

    #[test]
    fn empty_args_show_first_prompt() {
        let h = harness();
        let prompt_id = queue_prompt(&h.engine, "travel.alert", json!("Leave Friday"));
        let reply = h.bridge.handle_command("").unwrap();
        assert!(!reply.error);
        assert!(reply.text.contains(short_id(&prompt_id)));
        assert!(reply.text.contains("alert -> Leave Friday"));
        assert_eq!(reply.buttons.len(), 2);
        assert!(reply.buttons[0]
            .callback_data
            .contains(&prompt_id));
    }

    #[test]
    fn empty_args_with_no_prompts() {
        let h = harness();
        let reply = h.bridge.handle_command("").unwrap();
        assert!(!reply.error);
        assert_eq!(reply.text, "No pending confirmations.");
    }

    #[test]
    fn prefix_decision_applies() {
        let h = harness();
        let prompt_id = queue_prompt(&h.engine, "travel.alert", json!("Leave Friday"));
        let reply = h
            .bridge
            .handle_command(&format!("{} yes", &prompt_id[..8]))
            .unwrap();
        assert!(!reply.error);
        assert!(reply.text.starts_with("Confirmed"));
        let doc = h.engine.store().load().unwrap();
        assert!(doc.record("user:primary", Domain::Travel, "alert").is_some());
        assert!(doc.pending_confirmations.is_empty());
    }

    #[test]
    fn reversed_order_decision_applies() {
        let h = harness();
        let prompt_id = queue_prompt(&h.engine, "travel.alert", json!("Leave Friday"));
        let reply = h
            .bridge
            .handle_command(&format!("no {}", &prompt_id[..8]))
            .unwrap();
        assert!(!reply.error);
        assert!(reply.text.starts_with("Discarded"));
    }

    #[test]
    fn bare_decision_acts_on_first_pending() {
        let h = harness();
        queue_prompt(&h.engine, "travel.alert", json!("Leave Friday"));
        let reply = h.bridge.handle_command("yes").unwrap();
        assert!(!reply.error);
        let doc = h.engine.store().load().unwrap();
        assert!(doc.pending_confirmations.is_empty());
    }

    #[test]
    fn edit_command_parses_value() {
        let h = harness();
        let prompt_id = queue_prompt(&h.engine, "travel.alert", json!("Leave Friday"));
        let reply = h
            .bridge
            .handle_command(&format!("{} edit Leave Saturday", &prompt_id[..8]))
            .unwrap();
        assert!(!reply.error);
        let doc = h.engine.store().load().unwrap();
        let record = doc.record("user:primary", Domain::Travel, "alert").unwrap();
        assert_eq!(record.value, json!("Leave Saturday"));
    }

    #[test]
    fn edit_alone_is_usage_hint() {
        let h = harness();
        let reply = h.bridge.handle_command("edit").unwrap();
        assert!(reply.error);
        assert!(reply.text.contains("Usage"));
    }

    #[test]
    fn unknown_ref_is_an_error() {
        let h = harness();
        queue_prompt(&h.engine, "travel.alert", json!("Leave Friday"));
        let reply = h.bridge.handle_command("deadbeef-0000").unwrap();
        assert!(reply.error);
        assert!(reply.text.contains("No pending prompt matches"));
    }

    #[test]
    fn ambiguous_prefix_lists_candidates() {
        let h = harness();
        // Two prompts whose ids share no prefix: craft the ambiguity by
        // asking with a ref that is a prefix of both (statistically
        // impossible with random uuids, so write the prompts directly).
        let mut doc = h.engine.store().load().unwrap();
        for suffix in ["aaaa", "bbbb"] {
            let obs = review_band_observation("travel.alert", json!(suffix));
            let mut prompt = crate::ingest::build_prompt(&obs, &[], 0.66, Utc::now());
            prompt.prompt_id = format!("3e0c8f62-1fb3-4a55-9f37-0c2d6d2b{suffix}");
            doc.pending_confirmations
                .insert(prompt.prompt_id.clone(), prompt);
        }
        h.engine.store().save(&mut doc).unwrap();

        let reply = h.bridge.handle_command("3e0c8f62").unwrap();
        assert!(reply.error);
        assert!(reply.text.contains("Ambiguous"));
        assert!(reply.text.contains("3e0c8f62"));
    }

    #[test]
    fn decision_reply_offers_next_prompt() {
        let h = harness();
        let first = queue_prompt(&h.engine, "travel.alert", json!("Leave Friday"));
        let second = queue_prompt(&h.engine, "travel.hotel", json!("The Ridge"));

        let reply = h
            .bridge
            .handle_command(&format!("{} yes", &first[..8]))
            .unwrap();
        assert!(reply.text.contains("Next:"));
        assert_eq!(reply.buttons.len(), 2);
        assert!(reply.buttons[0].callback_data.contains(&second));
    }

    #[test]
    fn garbage_args_get_usage_error() {
        let h = harness();
        let reply = h.bridge.handle_command("frobnicate the widget now").unwrap();
        assert!(reply.error);
        assert!(reply.text.contains("Usage"));
    }
}
