//! Seam traits for the Stateward kernel.
//!
//! Two contracts connect the kernel to its external collaborators: the chat
//! surface ([`ChatTransport`]) and the intent-classification model
//! ([`IntentClassifier`]). The kernel stores implementations as
//! `Arc<dyn Trait>` and dispatches dynamically.
//!
//! # Design Decisions
//!
//! - **Explicit `Pin<Box<dyn Future>>`** instead of `#[async_trait]` — no
//!   macro magic, the actual type signature is visible.
//! - **`Send + Sync` on the trait definition** — errors appear at the impl
//!   site, not scattered across usage sites.
//! - **`Arc<dyn Trait>`** over generics — the worker and bridge hold their
//!   collaborators behind runtime-configurable seams.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::errors::{ClassifierError, TransportError};
use crate::models::{Domain, Intent};

// ---------------------------------------------------------------------------
// Chat transport
// ---------------------------------------------------------------------------

/// One inline button attached to a dispatched prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    /// Callback payload, e.g. `/state-confirm <prompt_id> yes`.
    pub callback_data: String,
}

impl InlineButton {
    /// The Yes/No pair wired to the control command for a prompt.
    pub fn yes_no(prompt_id: &str) -> Vec<InlineButton> {
        vec![
            InlineButton {
                text: "Yes".into(),
                callback_data: format!("/state-confirm {prompt_id} yes"),
            },
            InlineButton {
                text: "No".into(),
                callback_data: format!("/state-confirm {prompt_id} no"),
            },
        ]
    }
}

/// Receipt for a dispatched chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
}

/// Interface to the host chat surface.
///
/// The kernel only ever *sends*; replies arrive through the host-chat session
/// files the worker tails. Sends are time-bounded by the implementation — the
/// kernel holds no locks across them.
///
/// # Object safety
///
/// This trait is object-safe: `Arc<dyn ChatTransport>` is the standard
/// storage type.
pub trait ChatTransport: Send + Sync {
    /// Send a message (optionally with inline buttons) to a target.
    fn send_message(
        &self,
        target: &str,
        text: &str,
        buttons: &[InlineButton],
    ) -> Pin<Box<dyn Future<Output = Result<SentMessage, TransportError>> + Send + '_>>;
}

// ---------------------------------------------------------------------------
// Intent classifier
// ---------------------------------------------------------------------------

/// Schema-validated classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Classifiers may refine the caller's domain guess.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
}

/// Interface for intent classification of free-form text.
///
/// Two implementations ship with the kernel (see [`crate::intent`]): the
/// rule-based keyword scorer and the child-process adapter that shells out to
/// an external model. Classifier failure must never block ingestion — the
/// command adapter falls back to rules internally, and callers treat an
/// `Err` as "assume assertive".
///
/// # Object safety
///
/// This trait is object-safe: `Arc<dyn IntentClassifier>` is the standard
/// storage type.
pub trait IntentClassifier: Send + Sync {
    /// Classify the intent of `text`, observed in `domain`.
    fn classify(
        &self,
        domain: Domain,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<IntentClassification, ClassifierError>> + Send + '_>>;
}
