//! Intent classification: rule-based scoring plus the external-command mode.
//!
//! Two [`IntentClassifier`](crate::traits::IntentClassifier) implementations:
//!
//! - [`RuleClassifier`] — built-in keyword scoring over the five intents.
//!   Deterministic and dependency-free; always available as the fallback.
//! - [`CommandClassifier`] — spawns a configured child process with a JSON
//!   stdin/stdout contract, validates stdout against the shipped `intent`
//!   schema, and falls back to the rules on *any* failure (spawn, timeout,
//!   exit status, parse, or schema rejection). Free-form classifier output is
//!   never accepted.
//!
//! # Child process contract
//!
//! stdin:  `{task, domain, text, allowed_intents, output_schema, few_shot_prompt}`
//! stdout: `{intent, confidence, reason?, domain?}` (validated against the
//! `intent` schema)

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::config::FewShotExample;
use crate::errors::ClassifierError;
use crate::models::{round3, Domain, Intent};
use crate::schema::{SchemaName, SchemaValidator};
use crate::traits::{IntentClassification, IntentClassifier};

// ---------------------------------------------------------------------------
// RuleClassifier
// ---------------------------------------------------------------------------

/// Keyword cues per intent, checked against the lowercased text. Ties break
/// in listing order; no hit at all means assertive.
const RETRACT_CUES: &[&str] = &[
    "forget what i said",
    "forget that",
    "scratch that",
    "never mind",
    "nevermind",
    "disregard",
    "cancel that",
    "no longer",
    "not happening anymore",
];

const HYPOTHETICAL_CUES: &[&str] = &[
    "hypothetically",
    "imagine if",
    "if we ever",
    "if i ever",
    "suppose we",
    "in theory",
    "would be nice",
    "someday",
    "one day maybe",
];

const HISTORICAL_CUES: &[&str] = &[
    "last year",
    "last month",
    "last summer",
    "back then",
    "used to",
    "previously",
    "years ago",
    "months ago",
    "when we were",
];

const PLANNING_CUES: &[&str] = &[
    "planning to",
    "thinking about",
    "maybe we",
    "might go",
    "might visit",
    "considering",
    "next week",
    "next month",
    "looking into",
    "we should",
    "want to go",
];

/// Built-in rule-based classifier.
#[derive(Debug, Default, Clone)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous scoring core shared with the async trait impl.
    pub fn classify_text(&self, text: &str) -> IntentClassification {
        let lowered = text.to_lowercase();
        let scored: [(Intent, usize); 4] = [
            (Intent::Retract, count_hits(&lowered, RETRACT_CUES)),
            (Intent::Hypothetical, count_hits(&lowered, HYPOTHETICAL_CUES)),
            (Intent::Historical, count_hits(&lowered, HISTORICAL_CUES)),
            (Intent::Planning, count_hits(&lowered, PLANNING_CUES)),
        ];

        let best = scored
            .iter()
            .filter(|(_, hits)| *hits > 0)
            .max_by_key(|(_, hits)| *hits)
            .map(|(intent, hits)| (*intent, *hits));

        match best {
            Some((intent, hits)) => IntentClassification {
                intent,
                confidence: round3((0.55 + 0.15 * hits as f64).min(0.95)),
                reason: Some(format!("{hits} keyword cue(s) for {}", intent.as_str())),
                domain: None,
            },
            None => IntentClassification {
                intent: Intent::Assertive,
                confidence: 0.6,
                reason: Some("no non-assertive cues".into()),
                domain: None,
            },
        }
    }
}

fn count_hits(lowered: &str, cues: &[&str]) -> usize {
    cues.iter().filter(|cue| lowered.contains(*cue)).count()
}

impl IntentClassifier for RuleClassifier {
    fn classify(
        &self,
        _domain: Domain,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<IntentClassification, ClassifierError>> + Send + '_>>
    {
        let result = self.classify_text(text);
        Box::pin(async move { Ok(result) })
    }
}

// ---------------------------------------------------------------------------
// CommandClassifier
// ---------------------------------------------------------------------------

/// Child-process classifier with schema-validated output and rule fallback.
pub struct CommandClassifier {
    /// Whitespace-split command line; first token is the program.
    command: Vec<String>,
    timeout: Duration,
    few_shot: Vec<FewShotExample>,
    validator: Arc<SchemaValidator>,
    fallback: RuleClassifier,
}

impl CommandClassifier {
    /// Build a command-mode classifier.
    ///
    /// `command` is split on whitespace; an empty command makes every call
    /// fall straight through to the rules.
    pub fn new(
        command: &str,
        timeout: Duration,
        few_shot: Vec<FewShotExample>,
        validator: Arc<SchemaValidator>,
    ) -> Self {
        Self {
            command: command.split_whitespace().map(str::to_string).collect(),
            timeout,
            few_shot,
            validator,
            fallback: RuleClassifier::new(),
        }
    }

    async fn run_command(
        &self,
        domain: Domain,
        text: &str,
    ) -> Result<IntentClassification, ClassifierError> {
        let program = self
            .command
            .first()
            .ok_or_else(|| ClassifierError::SpawnFailed {
                message: "empty classifier command".into(),
            })?;

        let input = json!({
            "task": "intent_classification",
            "domain": domain.as_str(),
            "text": text,
            "allowed_intents": ["assertive", "planning", "hypothetical", "historical", "retract"],
            "output_schema": "intent",
            "few_shot_prompt": self.few_shot,
        });

        let mut child = tokio::process::Command::new(program)
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ClassifierError::SpawnFailed {
                message: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = input.to_string();
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| ClassifierError::Failed {
                    message: format!("stdin write failed: {e}"),
                })?;
            // Drop closes the pipe so the child sees EOF.
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ClassifierError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| ClassifierError::Failed {
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ClassifierError::Failed {
                message: format!(
                    "exit={:?} stderr={}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            ClassifierError::InvalidOutput {
                message: format!("stdout is not JSON: {e}"),
            }
        })?;
        self.validator
            .validate(SchemaName::Intent, &value)
            .map_err(|errors| ClassifierError::InvalidOutput {
                message: errors.join("; "),
            })?;
        serde_json::from_value(value).map_err(|e| ClassifierError::InvalidOutput {
            message: e.to_string(),
        })
    }
}

impl IntentClassifier for CommandClassifier {
    fn classify(
        &self,
        domain: Domain,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<IntentClassification, ClassifierError>> + Send + '_>>
    {
        let text = text.to_string();
        Box::pin(async move {
            match self.run_command(domain, &text).await {
                Ok(classification) => Ok(classification),
                Err(err) => {
                    log::warn!("intent classifier command failed, using rules: {err}");
                    Ok(self.fallback.classify_text(&text))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> RuleClassifier {
        RuleClassifier::new()
    }

    // -- rules --

    #[test]
    fn plain_statement_is_assertive() {
        let c = rule().classify_text("We are going to Tahoe on Friday.");
        assert_eq!(c.intent, Intent::Assertive);
    }

    #[test]
    fn planning_cues_detected() {
        let c = rule().classify_text("Thinking about maybe visiting Tahoe next month.");
        assert_eq!(c.intent, Intent::Planning);
        assert!(c.confidence > 0.55);
    }

    #[test]
    fn hypothetical_cues_detected() {
        let c = rule().classify_text("If we ever won the lottery we'd buy a cabin.");
        assert_eq!(c.intent, Intent::Hypothetical);
    }

    #[test]
    fn historical_cues_detected() {
        let c = rule().classify_text("Last year we spent the holidays in Tahoe.");
        assert_eq!(c.intent, Intent::Historical);
    }

    #[test]
    fn retract_cues_detected() {
        let c = rule().classify_text("Forget what I said about the Tahoe trip.");
        assert_eq!(c.intent, Intent::Retract);
    }

    #[test]
    fn more_hits_raise_confidence() {
        let one = rule().classify_text("maybe we go");
        let two = rule().classify_text("thinking about it, maybe we go next month");
        assert!(two.confidence > one.confidence);
    }

    #[tokio::test]
    async fn rule_classifier_trait_dispatch() {
        let classifier: Arc<dyn IntentClassifier> = Arc::new(rule());
        let c = classifier
            .classify(Domain::Travel, "planning to drive up Friday")
            .await
            .unwrap();
        assert_eq!(c.intent, Intent::Planning);
    }

    // -- command mode --

    fn validator() -> Arc<SchemaValidator> {
        Arc::new(SchemaValidator::new().unwrap())
    }

    #[cfg(unix)]
    fn write_script(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("classifier.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_mode_accepts_schema_valid_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            r#"cat > /dev/null; echo '{"intent": "planning", "confidence": 0.82, "reason": "future tense"}'"#,
        );
        let classifier =
            CommandClassifier::new(&script, Duration::from_secs(5), Vec::new(), validator());
        let c = classifier
            .classify(Domain::Travel, "we will see")
            .await
            .unwrap();
        assert_eq!(c.intent, Intent::Planning);
        assert_eq!(c.confidence, 0.82);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_mode_rejects_freeform_output_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), r#"cat > /dev/null; echo '"planning"'"#);
        let classifier =
            CommandClassifier::new(&script, Duration::from_secs(5), Vec::new(), validator());
        // Free-form output is refused; the rules decide instead.
        let c = classifier
            .classify(Domain::Travel, "thinking about maybe going")
            .await
            .unwrap();
        assert_eq!(c.intent, Intent::Planning);
        assert!(c.reason.as_deref().unwrap_or("").contains("cue"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_mode_falls_back_on_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "cat > /dev/null; exit 3");
        let classifier =
            CommandClassifier::new(&script, Duration::from_secs(5), Vec::new(), validator());
        let c = classifier
            .classify(Domain::Travel, "we are going to Tahoe")
            .await
            .unwrap();
        assert_eq!(c.intent, Intent::Assertive);
    }

    #[tokio::test]
    async fn command_mode_falls_back_on_missing_binary() {
        let classifier = CommandClassifier::new(
            "/nonexistent/classifier-binary",
            Duration::from_secs(1),
            Vec::new(),
            validator(),
        );
        let c = classifier
            .classify(Domain::Travel, "last year we went to Tahoe")
            .await
            .unwrap();
        assert_eq!(c.intent, Intent::Historical);
    }

    #[tokio::test]
    async fn empty_command_falls_back() {
        let classifier =
            CommandClassifier::new("", Duration::from_secs(1), Vec::new(), validator());
        let c = classifier
            .classify(Domain::Travel, "we are going to Tahoe")
            .await
            .unwrap();
        assert_eq!(c.intent, Intent::Assertive);
    }
}
