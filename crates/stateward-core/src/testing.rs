//! Test fakes and builders for the Stateward kernel.
//!
//! Concrete, predictable implementations of the seam traits plus builders
//! for the input shapes, used by kernel-internal tests and downstream crate
//! tests via this module.
//!
//! # Design Decisions
//!
//! - **Concrete fakes, not mock frameworks** — fakes record calls and return
//!   pre-configured values; tests read them directly.
//! - **`Mutex` interior mutability** — fakes are stored as `Arc<dyn Trait>`
//!   and must be `Send + Sync`.
//! - **Temp-dir engines** — every test engine gets its own store under a
//!   `tempfile::TempDir` held alive by [`TestEngine`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::errors::{ClassifierError, TransportError};
use crate::ingest::StateEngine;
use crate::models::{
    format_ts, ConfirmationAction, Corroborator, Domain, Intent, SignalEvent, SignalItem,
    SignalKind, SignalMode, SignalSource, SourceRef, SourceType, StateObservation,
    UserConfirmation,
};
use crate::traits::{
    ChatTransport, InlineButton, IntentClassification, IntentClassifier, SentMessage,
};

// ---------------------------------------------------------------------------
// Engine builder
// ---------------------------------------------------------------------------

/// An engine rooted in its own temp dir. Keep the struct alive for the
/// duration of the test — dropping it deletes the store.
pub struct TestEngine {
    pub engine: StateEngine,
    pub dir: tempfile::TempDir,
}

/// Build an engine with default config in a fresh temp dir.
pub fn engine_in() -> TestEngine {
    engine_with(|_| {})
}

/// Build an engine after letting the caller adjust the config.
pub fn engine_with(mutate: impl FnOnce(&mut EngineConfig)) -> TestEngine {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = EngineConfig {
        root_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    mutate(&mut config);
    let engine = StateEngine::new(config).expect("engine bootstrap");
    TestEngine { engine, dir }
}

// ---------------------------------------------------------------------------
// Input builders
// ---------------------------------------------------------------------------

/// Build an assertive conversational observation for `user:primary`.
///
/// The domain is read from the field's dotted prefix (`travel.location` →
/// travel); unprefixed fields land in `general`.
pub fn observation(field: &str, value: Value) -> StateObservation {
    let domain = field
        .split_once('.')
        .and_then(|(prefix, _)| Domain::parse(prefix))
        .unwrap_or(Domain::General);
    StateObservation {
        event_id: uuid::Uuid::new_v4().to_string(),
        event_ts: format_ts(Utc::now()),
        domain,
        entity_id: "user:primary".into(),
        field: field.to_string(),
        candidate_value: value,
        intent: Intent::Assertive,
        source: SourceRef {
            source_type: SourceType::ConversationAssertive,
            reference: "thread:1:msg:1".into(),
        },
        corroborators: Vec::new(),
    }
}

/// Build a review-band observation (static markdown with two witnesses).
pub fn review_band_observation(field: &str, value: Value) -> StateObservation {
    let mut obs = observation(field, value);
    obs.source.source_type = SourceType::StaticMarkdown;
    obs.corroborators = vec![
        Corroborator {
            kind: "email_thread".into(),
            reference: "thread:9".into(),
        },
        Corroborator {
            kind: "calendar_event".into(),
            reference: "event:3".into(),
        },
    ];
    obs
}

/// Build a single-item calendar poll signal for `user:primary`.
pub fn calendar_signal(item_ref: &str, field: &str, value: Value) -> SignalEvent {
    let domain = field
        .split_once('.')
        .and_then(|(prefix, _)| Domain::parse(prefix))
        .unwrap_or(Domain::Travel);
    SignalEvent {
        signal_id: uuid::Uuid::new_v4().to_string(),
        event_ts: format_ts(Utc::now()),
        source: SignalSource {
            kind: SignalKind::Calendar,
            mode: SignalMode::Poll,
            reference: "gcal:primary".into(),
        },
        entity_id: "user:primary".into(),
        items: vec![SignalItem {
            domain,
            field: field.to_string(),
            reference: item_ref.to_string(),
            value,
            intent: Intent::Assertive,
            corroborators: Vec::new(),
        }],
    }
}

/// Build a confirmation for a stored prompt.
pub fn confirmation(
    prompt: &crate::models::PendingPrompt,
    action: ConfirmationAction,
    edited_value: Option<Value>,
) -> UserConfirmation {
    UserConfirmation {
        prompt_id: prompt.prompt_id.clone(),
        entity_id: prompt.entity_id.clone(),
        domain: prompt.domain,
        proposed_change: prompt.proposed_change.clone(),
        confidence: prompt.confidence,
        reason_summary: prompt.reason_summary.clone(),
        action,
        edited_value,
        ts: format_ts(Utc::now()),
    }
}

// ---------------------------------------------------------------------------
// FakeChatTransport
// ---------------------------------------------------------------------------

/// One recorded dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSend {
    pub target: String,
    pub text: String,
    pub buttons: Vec<InlineButton>,
}

/// A transport that records sends and returns sequential message ids.
pub struct FakeChatTransport {
    sends: Mutex<Vec<RecordedSend>>,
    counter: AtomicUsize,
    failing: AtomicBool,
}

impl FakeChatTransport {
    /// A transport that accepts every send.
    pub fn new() -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// A transport that fails every send.
    pub fn failing() -> Self {
        let transport = Self::new();
        transport.failing.store(true, Ordering::SeqCst);
        transport
    }

    /// All recorded sends, in dispatch order.
    pub fn recorded_sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().unwrap().clone()
    }
}

impl Default for FakeChatTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatTransport for FakeChatTransport {
    fn send_message(
        &self,
        target: &str,
        text: &str,
        buttons: &[InlineButton],
    ) -> Pin<Box<dyn Future<Output = Result<SentMessage, TransportError>> + Send + '_>> {
        if self.failing.load(Ordering::SeqCst) {
            let target = target.to_string();
            return Box::pin(async move {
                Err(TransportError::SendFailed {
                    message: "fake transport configured to fail".into(),
                    target: Some(target),
                })
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.sends.lock().unwrap().push(RecordedSend {
            target: target.to_string(),
            text: text.to_string(),
            buttons: buttons.to_vec(),
        });
        Box::pin(async move {
            Ok(SentMessage {
                message_id: format!("msg-{n}"),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// FixedClassifier
// ---------------------------------------------------------------------------

/// A classifier that always returns the configured intent.
pub struct FixedClassifier {
    intent: Intent,
    confidence: f64,
}

impl FixedClassifier {
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            confidence: 0.9,
        }
    }
}

impl IntentClassifier for FixedClassifier {
    fn classify(
        &self,
        _domain: Domain,
        _text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<IntentClassification, ClassifierError>> + Send + '_>>
    {
        let result = IntentClassification {
            intent: self.intent,
            confidence: self.confidence,
            reason: None,
            domain: None,
        };
        Box::pin(async move { Ok(result) })
    }
}
