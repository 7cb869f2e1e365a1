//! Confirmation-loop worker: one prompt out, one reply in, next prompt out.
//!
//! Each tick is a bounded synchronous pass (async only across the transport
//! seam): read new user replies from the host-chat session file, resolve the
//! active prompt if a decision arrived, then dispatch the next pending
//! prompt with inline Yes/No buttons. At most one prompt per
//! `(target, entity)` is ever in flight.
//!
//! Runtime state (active prompt, session cursor, dispatch timestamps) lives
//! in its own atomically-replaced file, separate from the canonical
//! document, so the loop survives restarts and a killed tick leaves both
//! files fully formed. On dispatch the session cursor is reset to EOF so
//! replies typed *before* the prompt went out are never misattributed to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::{StatewardError, WorkerError};
use crate::ingest::StateEngine;
use crate::models::{
    format_ts, ConfirmOutcome, ConfirmationAction, PendingPrompt, UserConfirmation,
};
use crate::store::{write_json_atomic, StateStore};
use crate::traits::{ChatTransport, InlineButton};

/// Usage hint dispatched when a user asks to edit without a value.
const EDIT_HELP: &str =
    "To edit, reply with: edit: <new value> (or /state-confirm <prompt> edit <new value>)";

// ---------------------------------------------------------------------------
// WorkerState
// ---------------------------------------------------------------------------

/// Persistent runtime state of the confirmation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_file: Option<String>,
    /// Byte offset into the session file; replies before it are consumed.
    #[serde(default)]
    pub session_cursor: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dispatched_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_decision_at: Option<String>,
}

impl WorkerState {
    fn new(entity_id: &str) -> Self {
        Self {
            version: 1,
            target: None,
            entity_id: entity_id.to_string(),
            session_id: None,
            session_file: None,
            session_cursor: 0,
            active_prompt_id: None,
            active_message_id: None,
            last_dispatched_at: None,
            last_decision_at: None,
        }
    }
}

/// Load the worker state, defaulting to a fresh state for `entity_id`.
pub fn load_worker_state(store: &StateStore, entity_id: &str) -> WorkerState {
    let path = store.worker_state_path();
    match std::fs::read_to_string(&path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|_| WorkerState::new(entity_id)),
        Err(_) => WorkerState::new(entity_id),
    }
}

/// Persist the worker state atomically.
pub fn save_worker_state(store: &StateStore, state: &WorkerState) -> Result<(), StatewardError> {
    write_json_atomic(&store.worker_state_path(), state)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// A decoded user reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyDecision {
    Confirm { prompt_ref: Option<String> },
    Reject { prompt_ref: Option<String> },
    Edit { prompt_ref: Option<String>, value: String },
    /// The user asked to edit without supplying a value.
    EditHelp,
    /// Not a decision at all.
    None,
}

const CONFIRM_TOKENS: &[&str] = &["confirm", "approved", "yes", "y", "ok", "okay"];
const REJECT_TOKENS: &[&str] = &["reject", "decline", "no", "n"];

/// Whether a token plausibly references a prompt id (≥ 8 uuid chars).
fn looks_like_prompt_ref(token: &str) -> bool {
    token.len() >= 8
        && token
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '-')
}

/// Decode a user reply into a decision.
///
/// Accepted forms, in order: callback-data strings
/// (`state_confirm:<id>` / `state_reject:<id>` / `state_edit:<id>`),
/// `edit: <value>` / `edit - <value>`, natural
/// `(confirm|reject|edit) <prompt_ref>[: value]` lines in either token
/// order, and bare confirm/reject tokens. Everything else is no decision.
pub fn parse_reply(text: &str) -> ReplyDecision {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ReplyDecision::None;
    }

    // Callback data.
    if let Some(id) = trimmed.strip_prefix("state_confirm:") {
        return ReplyDecision::Confirm {
            prompt_ref: Some(id.trim().to_string()),
        };
    }
    if let Some(id) = trimmed.strip_prefix("state_reject:") {
        return ReplyDecision::Reject {
            prompt_ref: Some(id.trim().to_string()),
        };
    }
    if trimmed.strip_prefix("state_edit:").is_some() {
        return ReplyDecision::EditHelp;
    }

    let lowered = trimmed.to_lowercase();

    // Bare edit forms.
    if lowered == "edit" {
        return ReplyDecision::EditHelp;
    }
    for prefix in ["edit:", "edit -"] {
        if let Some(rest) = strip_prefix_ci(trimmed, prefix) {
            let value = rest.trim();
            if value.is_empty() {
                return ReplyDecision::EditHelp;
            }
            return ReplyDecision::Edit {
                prompt_ref: None,
                value: value.to_string(),
            };
        }
    }

    // Natural lines: action + prompt ref in either order.
    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() >= 2 {
        let first = tokens[0].to_lowercase();
        let second_raw = tokens[1].trim_end_matches(':');
        if is_action_word(&first) && looks_like_prompt_ref(second_raw) {
            let rest = tokens[2..].join(" ");
            return action_with_ref(&first, second_raw, &rest);
        }
        let second = tokens[1].to_lowercase();
        if looks_like_prompt_ref(tokens[0]) && is_action_word(&second) {
            let rest = tokens[2..].join(" ");
            return action_with_ref(&second, tokens[0], &rest);
        }
    }

    // Bare tokens.
    if CONFIRM_TOKENS.contains(&lowered.as_str()) {
        return ReplyDecision::Confirm { prompt_ref: None };
    }
    if REJECT_TOKENS.contains(&lowered.as_str()) {
        return ReplyDecision::Reject { prompt_ref: None };
    }

    ReplyDecision::None
}

fn is_action_word(token: &str) -> bool {
    matches!(token, "confirm" | "reject" | "edit")
}

fn action_with_ref(action: &str, prompt_ref: &str, rest: &str) -> ReplyDecision {
    let prompt_ref = Some(prompt_ref.to_string());
    match action {
        "confirm" => ReplyDecision::Confirm { prompt_ref },
        "reject" => ReplyDecision::Reject { prompt_ref },
        _ => {
            let value = rest.trim_start_matches(':').trim();
            if value.is_empty() {
                ReplyDecision::EditHelp
            } else {
                ReplyDecision::Edit {
                    prompt_ref,
                    value: value.to_string(),
                }
            }
        }
    }
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// Whether a parsed reference addresses the given prompt id (full id or a
/// prefix of at least 8 characters).
pub fn ref_matches(prompt_ref: &str, prompt_id: &str) -> bool {
    prompt_ref.len() >= 8 && prompt_id.starts_with(prompt_ref)
}

// ---------------------------------------------------------------------------
// Session file reading
// ---------------------------------------------------------------------------

/// One user-role message extracted from a host-chat session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    pub text: String,
}

/// Parse a newline-delimited record stream, retaining user-role messages
/// and stripping host-chat metadata envelopes. Malformed lines are skipped.
pub fn parse_session_records(chunk: &str) -> Vec<SessionMessage> {
    let mut messages = Vec::new();
    for line in chunk.lines() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        // Some hosts wrap the message in an envelope.
        let record = value.get("message").cloned().unwrap_or(value);
        if record.get("role").and_then(|r| r.as_str()) != Some("user") {
            continue;
        }
        let text = match record.get("text").or_else(|| record.get("content")) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Array(parts)) => parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => continue,
        };
        let id = record
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let ts = record
            .get("ts")
            .or_else(|| record.get("timestamp"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        messages.push(SessionMessage { id, ts, text });
    }
    messages
}

/// Read bytes `[cursor, EOF)` of the session file. Returns the parsed chunk
/// and the new cursor. A cursor past EOF (rotated file) restarts at zero.
fn read_session_tail(path: &Path, cursor: u64) -> Result<(String, u64), WorkerError> {
    let bytes = std::fs::read(path).map_err(|e| WorkerError::SessionRead {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let len = bytes.len() as u64;
    let start = if cursor > len { 0 } else { cursor };
    let chunk = String::from_utf8_lossy(&bytes[start as usize..]).into_owned();
    Ok((chunk, len))
}

// ---------------------------------------------------------------------------
// ReviewWorker
// ---------------------------------------------------------------------------

/// Result of one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub replies_seen: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

/// The periodic confirmation-loop worker.
pub struct ReviewWorker {
    engine: Arc<StateEngine>,
    transport: Arc<dyn ChatTransport>,
    /// Directory scanned for host-chat session files when the state names
    /// none (discovery picks the most recently modified `.jsonl`).
    sessions_dir: Option<PathBuf>,
}

impl ReviewWorker {
    pub fn new(
        engine: Arc<StateEngine>,
        transport: Arc<dyn ChatTransport>,
        sessions_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            engine,
            transport,
            sessions_dir,
        }
    }

    /// Run one tick. See the module docs for the algorithm.
    pub async fn tick(&self) -> Result<TickReport, StatewardError> {
        let store = self.engine.store().clone();
        let entity_id = self.engine.config().entity_id.clone();
        let mut state = load_worker_state(&store, &entity_id);
        let mut report = TickReport::default();

        let Some(target) = self.engine.config().resolve_chat_target() else {
            report.skipped_reason = Some("no_target".into());
            return Ok(report);
        };
        state.target = Some(target.clone());

        // Locate the session file and drain new user replies.
        let session_path = self.locate_session_file(&state);
        let mut replies = Vec::new();
        if let Some(path) = &session_path {
            match read_session_tail(path, state.session_cursor) {
                Ok((chunk, eof)) => {
                    replies = parse_session_records(&chunk);
                    state.session_cursor = eof;
                    state.session_file = Some(path.display().to_string());
                }
                Err(err) => {
                    log::warn!("session read failed, skipping replies this tick: {err}");
                }
            }
        }
        report.replies_seen = replies.len();

        // Resolve the active prompt if a decision arrived.
        if let Some(active_id) = state.active_prompt_id.clone() {
            let doc = store.load()?;
            match doc.pending_confirmations.get(&active_id) {
                None => {
                    // The prompt was resolved elsewhere; a stale active id is
                    // harmless and simply cleared.
                    state.active_prompt_id = None;
                    state.active_message_id = None;
                }
                Some(prompt) => {
                    let prompt = prompt.clone();
                    if let Some(decision) = latest_decision_for(&replies, &active_id) {
                        self.resolve_active(&target, &prompt, decision, &mut state, &mut report)
                            .await?;
                    }
                }
            }
        }

        // Dispatch the next pending prompt, oldest first.
        if state.active_prompt_id.is_none() {
            let doc = store.load()?;
            let next = doc
                .pending_by_created()
                .into_iter()
                .find(|p| p.entity_id == entity_id)
                .cloned();
            if let Some(prompt) = next {
                let text = format!(
                    "State check: {} for {} ({}, confidence {}). Reply yes/no, or edit: <value>.",
                    prompt.proposed_change,
                    prompt.entity_id,
                    prompt.domain.as_str(),
                    prompt.confidence,
                );
                match self
                    .transport
                    .send_message(&target, &text, &InlineButton::yes_no(&prompt.prompt_id))
                    .await
                {
                    Ok(sent) => {
                        state.active_prompt_id = Some(prompt.prompt_id.clone());
                        state.active_message_id = Some(sent.message_id);
                        state.last_dispatched_at = Some(format_ts(Utc::now()));
                        // Replies typed before this dispatch answer nothing.
                        if let Some(path) = &session_path {
                            if let Ok(meta) = std::fs::metadata(path) {
                                state.session_cursor = meta.len();
                            }
                        }
                        report.dispatched_prompt_id = Some(prompt.prompt_id.clone());
                    }
                    Err(err) => {
                        log::warn!("prompt dispatch failed, leaving prompt queued: {err}");
                    }
                }
            }
        }

        save_worker_state(&store, &state)?;
        Ok(report)
    }

    /// Apply one decoded decision to the active prompt and acknowledge.
    async fn resolve_active(
        &self,
        target: &str,
        prompt: &PendingPrompt,
        decision: ReplyDecision,
        state: &mut WorkerState,
        report: &mut TickReport,
    ) -> Result<(), StatewardError> {
        let (action, edited_value) = match decision {
            ReplyDecision::EditHelp => {
                if let Err(err) = self.transport.send_message(target, EDIT_HELP, &[]).await {
                    log::warn!("edit hint dispatch failed: {err}");
                }
                return Ok(());
            }
            ReplyDecision::Confirm { .. } => (ConfirmationAction::Confirm, None),
            ReplyDecision::Reject { .. } => (ConfirmationAction::Reject, None),
            ReplyDecision::Edit { value, .. } => (
                ConfirmationAction::Edit,
                Some(serde_json::Value::String(value)),
            ),
            ReplyDecision::None => return Ok(()),
        };

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
        let outcome = self.engine.apply_confirmation(&confirmation)?;

        let ack = match &outcome {
            ConfirmOutcome::Committed { .. } => match action {
                ConfirmationAction::Edit => {
                    format!("Updated with your edit: {}.", prompt.proposed_change)
                }
                _ => format!("Confirmed: {}.", prompt.proposed_change),
            },
            ConfirmOutcome::Rejected { .. } => {
                format!("Discarded: {}.", prompt.proposed_change)
            }
            other => format!("Could not apply confirmation ({}).", other.status()),
        };
        if let Err(err) = self.transport.send_message(target, &ack, &[]).await {
            log::warn!("acknowledgement dispatch failed: {err}");
        }

        report.resolved_prompt_id = Some(prompt.prompt_id.clone());
        report.decision = Some(action.as_str().to_string());
        state.active_prompt_id = None;
        state.active_message_id = None;
        state.last_decision_at = Some(format_ts(Utc::now()));
        Ok(())
    }

    /// The session file named by the state, else the newest `.jsonl` under
    /// the discovery directory.
    fn locate_session_file(&self, state: &WorkerState) -> Option<PathBuf> {
        if let Some(named) = &state.session_file {
            let path = PathBuf::from(named);
            if path.exists() {
                return Some(path);
            }
        }
        let dir = self.sessions_dir.as_ref()?;
        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in std::fs::read_dir(dir).ok()?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if newest.as_ref().is_none_or(|(when, _)| modified > *when) {
                newest = Some((modified, path));
            }
        }
        newest.map(|(_, path)| path)
    }
}

/// The most recent reply that addresses `active_id` (by prefix) or names no
/// prompt at all. Replies addressing a different prompt are ignored.
fn latest_decision_for(replies: &[SessionMessage], active_id: &str) -> Option<ReplyDecision> {
    for message in replies.iter().rev() {
        let decision = parse_reply(&message.text);
        let prompt_ref = match &decision {
            ReplyDecision::None => continue,
            ReplyDecision::EditHelp => None,
            ReplyDecision::Confirm { prompt_ref }
            | ReplyDecision::Reject { prompt_ref }
            | ReplyDecision::Edit { prompt_ref, .. } => prompt_ref.clone(),
        };
        match prompt_ref {
            None => return Some(decision),
            Some(reference) if ref_matches(&reference, active_id) => return Some(decision),
            Some(_) => continue,
        }
    }
    None
}
