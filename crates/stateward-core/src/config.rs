//! Engine configuration: threshold tables, reliability weights, and the
//! `STATE_*` environment contract.
//!
//! The decision tables the resolver and learner consume are configuration,
//! not code: they live on an [`EngineConfig`] built once at startup and
//! injected into the engine. Defaults come from [`EngineConfig::default`];
//! deployments override them through environment variables
//! ([`EngineConfig::from_env`]) or by mutating the struct before handing it
//! to the engine.
//!
//! # Connections
//!
//! - [`DomainThresholds`] defaults seed the canonical document on bootstrap
//!   (see [`crate::document`]); after that the *persisted* thresholds win so
//!   the adaptive learner can move them.
//! - [`crate::resolver`] reads the intent factors and reliability table.
//! - [`crate::worker`] resolves its chat target from explicit config, the
//!   `STATE_TELEGRAM_TARGET` variable, or the TOML side-car, first non-empty
//!   wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::{Domain, Intent, SourceType};

// ---------------------------------------------------------------------------
// DomainThresholds
// ---------------------------------------------------------------------------

/// Per-domain scalars dividing the confidence range into reject/ask/auto
/// zones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainThresholds {
    /// Below this: tentative reject.
    pub ask_threshold: f64,
    /// At or above this (and clearing the margin): auto commit.
    pub auto_threshold: f64,
    /// Minimum confidence gain over the committed record required to
    /// auto-commit a replacement.
    pub margin_threshold: f64,
}

impl DomainThresholds {
    /// Baseline thresholds for a domain.
    ///
    /// Financial facts demand the widest margins; `general` is the loosest.
    pub fn default_for(domain: Domain) -> Self {
        match domain {
            Domain::Financial => Self {
                ask_threshold: 0.70,
                auto_threshold: 0.95,
                margin_threshold: 0.20,
            },
            Domain::Project => Self {
                ask_threshold: 0.60,
                auto_threshold: 0.88,
                margin_threshold: 0.12,
            },
            Domain::General => Self {
                ask_threshold: 0.55,
                auto_threshold: 0.85,
                margin_threshold: 0.10,
            },
            Domain::Travel | Domain::Family | Domain::Profile | Domain::School => Self {
                ask_threshold: 0.60,
                auto_threshold: 0.90,
                margin_threshold: 0.15,
            },
        }
    }

    /// The full default table, keyed by domain wire string.
    pub fn default_table() -> HashMap<String, DomainThresholds> {
        Domain::ALL
            .iter()
            .map(|d| (d.as_str().to_string(), Self::default_for(*d)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Source reliability & intent factors
// ---------------------------------------------------------------------------

/// Baseline reliability per source type. Unknown types fall back to
/// [`UNKNOWN_SOURCE_RELIABILITY`].
pub fn source_reliability_defaults() -> HashMap<String, f64> {
    [
        (SourceType::UserConfirmation, 1.00),
        (SourceType::ConversationAssertive, 0.95),
        (SourceType::CalendarWebhook, 0.90),
        (SourceType::CalendarPoll, 0.85),
        (SourceType::EmailWebhook, 0.85),
        (SourceType::EmailPoll, 0.75),
        (SourceType::ConversationPlanning, 0.70),
        (SourceType::StaticMarkdown, 0.60),
    ]
    .into_iter()
    .map(|(t, w)| (t.as_str().to_string(), w))
    .collect()
}

/// Reliability assumed for source types absent from the table.
pub const UNKNOWN_SOURCE_RELIABILITY: f64 = 0.5;

/// Multiplier applied per intent.
pub fn intent_factor(intent: Intent) -> f64 {
    match intent {
        Intent::Assertive => 1.00,
        Intent::Retract => 0.95,
        Intent::Planning => 0.72,
        Intent::Historical => 0.68,
        Intent::Hypothetical => 0.45,
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Review-queue promotion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Cap on pending prompts (after filtering) — promotion stops here.
    pub max_pending: usize,
    /// Maximum tentatives promoted per run.
    pub limit: usize,
    /// Minimum tentative confidence eligible for promotion.
    pub min_confidence: f64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_pending: 5,
            limit: 3,
            min_confidence: 0.5,
        }
    }
}

/// Confirmation-loop worker settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Explicit chat target. When empty, the env var and then the side-car
    /// config are consulted.
    pub target: Option<String>,
    /// Optional thread id appended to dispatches.
    pub thread_id: Option<String>,
    /// Tick interval in seconds (informational; the host schedules ticks).
    pub review_interval_secs: Option<u64>,
}

/// Intent-classifier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentConfig {
    /// `rule` or `command`.
    pub mode: IntentMode,
    /// Command line for `command` mode (split on whitespace).
    pub command: Option<String>,
    /// Child-process time budget.
    pub timeout_secs: u64,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            mode: IntentMode::Rule,
            command: None,
            timeout_secs: 8,
        }
    }
}

/// Intent-classifier mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentMode {
    Rule,
    Command,
}

/// Inbound-message ingestion hook settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestHookConfig {
    /// Channel ids the hook listens on. Empty means disabled.
    pub channels: Vec<String>,
    /// Optional sender allowlist. Empty means any sender.
    pub allowed_senders: Vec<String>,
    /// Messages shorter than this are ignored.
    pub min_chars: usize,
    /// Skip ingestion once this many prompts are pending.
    pub max_pending: usize,
    /// Source type stamped on synthesized observations. The default lands in
    /// the review band so a human sees the fact before it commits.
    pub source_type: SourceType,
}

impl Default for IngestHookConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            allowed_senders: Vec::new(),
            min_chars: 12,
            max_pending: 10,
            source_type: SourceType::ConversationPlanning,
        }
    }
}

/// A labelled example handed to the external classifier as few-shot context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub text: String,
    pub intent: Intent,
}

fn few_shot_defaults() -> Vec<FewShotExample> {
    [
        ("We are going to Tahoe on Friday.", Intent::Assertive),
        ("Thinking about maybe visiting Tahoe next month.", Intent::Planning),
        ("If we ever won the lottery we'd buy a cabin.", Intent::Hypothetical),
        ("Last year we spent the holidays in Tahoe.", Intent::Historical),
        ("Forget what I said about the Tahoe trip.", Intent::Retract),
    ]
    .into_iter()
    .map(|(text, intent)| FewShotExample {
        text: text.to_string(),
        intent,
    })
    .collect()
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// All configuration the engine consumes, built once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory containing the `memory/` store (default: current dir).
    pub root_dir: PathBuf,
    /// Default entity facts are attributed to.
    pub entity_id: String,
    /// Account handle passed through to the external calendar/mail fetcher.
    pub gog_account: Option<String>,
    /// Cron expression the installer gives the poller (informational).
    pub poller_cron_expr: Option<String>,
    /// Review-queue promotion settings.
    pub review: ReviewConfig,
    /// Confirmation-loop worker settings.
    pub worker: WorkerConfig,
    /// Intent-classifier settings.
    pub intent: IntentConfig,
    /// Adaptive-learner mode override applied on bootstrap (`off` default).
    pub adaptive_mode: Option<String>,
    /// Inbound-message ingestion hook settings.
    pub ingest: IngestHookConfig,
    /// Field cap for the pre-response context snapshot.
    pub inject_max_fields: usize,
    /// Few-shot examples handed to the command-mode classifier.
    pub few_shot_examples: Vec<FewShotExample>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            entity_id: "user:primary".into(),
            gog_account: None,
            poller_cron_expr: None,
            review: ReviewConfig::default(),
            worker: WorkerConfig::default(),
            intent: IntentConfig::default(),
            adaptive_mode: None,
            ingest: IngestHookConfig::default(),
            inject_max_fields: 32,
            few_shot_examples: few_shot_defaults(),
        }
    }
}

impl EngineConfig {
    /// Build a config from the process environment.
    ///
    /// Recognised variables (all optional): `STATE_ROOT_DIR`,
    /// `STATE_ENTITY_ID`, `STATE_GOG_ACCOUNT`, `STATE_POLLER_CRON_EXPR`,
    /// `STATE_REVIEW_MAX_PENDING`, `STATE_REVIEW_LIMIT`,
    /// `STATE_REVIEW_MIN_CONFIDENCE`, `STATE_TELEGRAM_TARGET`,
    /// `STATE_TELEGRAM_THREAD_ID`, `STATE_TELEGRAM_REVIEW_INTERVAL`,
    /// `STATE_INTENT_EXTRACTOR_MODE`, `STATE_INTENT_EXTRACTOR_CMD`,
    /// `STATE_ADAPTIVE_MODE`, `STATE_INGEST_CHANNELS`,
    /// `STATE_INGEST_ALLOWED_SENDERS`, `STATE_INGEST_MIN_CHARS`,
    /// `STATE_INGEST_MAX_PENDING`, `STATE_INGEST_SOURCE_TYPE`.
    ///
    /// Unparsable values keep the default rather than failing startup; the
    /// doctor report surfaces them.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_string("STATE_ROOT_DIR") {
            config.root_dir = PathBuf::from(dir);
        }
        if let Some(entity) = env_string("STATE_ENTITY_ID") {
            config.entity_id = entity;
        }
        config.gog_account = env_string("STATE_GOG_ACCOUNT");
        config.poller_cron_expr = env_string("STATE_POLLER_CRON_EXPR");

        if let Some(n) = env_parse::<usize>("STATE_REVIEW_MAX_PENDING") {
            config.review.max_pending = n;
        }
        if let Some(n) = env_parse::<usize>("STATE_REVIEW_LIMIT") {
            config.review.limit = n;
        }
        if let Some(x) = env_parse::<f64>("STATE_REVIEW_MIN_CONFIDENCE") {
            config.review.min_confidence = x;
        }

        config.worker.target = env_string("STATE_TELEGRAM_TARGET");
        config.worker.thread_id = env_string("STATE_TELEGRAM_THREAD_ID");
        config.worker.review_interval_secs = env_parse::<u64>("STATE_TELEGRAM_REVIEW_INTERVAL");

        if let Some(mode) = env_string("STATE_INTENT_EXTRACTOR_MODE") {
            config.intent.mode = match mode.as_str() {
                "command" => IntentMode::Command,
                _ => IntentMode::Rule,
            };
        }
        config.intent.command = env_string("STATE_INTENT_EXTRACTOR_CMD");

        config.adaptive_mode = env_string("STATE_ADAPTIVE_MODE");

        if let Some(channels) = env_string("STATE_INGEST_CHANNELS") {
            config.ingest.channels = split_csv(&channels);
        }
        if let Some(senders) = env_string("STATE_INGEST_ALLOWED_SENDERS") {
            config.ingest.allowed_senders = split_csv(&senders);
        }
        if let Some(n) = env_parse::<usize>("STATE_INGEST_MIN_CHARS") {
            config.ingest.min_chars = n;
        }
        if let Some(n) = env_parse::<usize>("STATE_INGEST_MAX_PENDING") {
            config.ingest.max_pending = n;
        }
        if let Some(source) = env_string("STATE_INGEST_SOURCE_TYPE") {
            if let Some(parsed) = SourceType::parse(&source) {
                config.ingest.source_type = parsed;
            }
        }

        config
    }

    /// Resolve the worker's chat target: explicit config → environment →
    /// TOML side-car, first non-empty wins.
    pub fn resolve_chat_target(&self) -> Option<String> {
        if let Some(target) = non_empty(self.worker.target.clone()) {
            return Some(target);
        }
        if let Some(target) = env_string("STATE_TELEGRAM_TARGET") {
            return Some(target);
        }
        load_sidecar_target(&self.root_dir)
    }
}

/// Side-car config file consulted for the chat target when neither the
/// explicit config nor the environment provides one.
#[derive(Debug, Deserialize)]
struct SidecarConfig {
    target: Option<String>,
    #[allow(dead_code)]
    thread_id: Option<String>,
}

/// Read `state-telegram.toml` under the root dir, if present.
pub fn load_sidecar_target(root_dir: &Path) -> Option<String> {
    let path = root_dir.join("state-telegram.toml");
    let text = std::fs::read_to_string(path).ok()?;
    let sidecar: SidecarConfig = toml::from_str(&text).ok()?;
    non_empty(sidecar.target)
}

fn env_string(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name)?.parse().ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn split_csv(text: &str) -> Vec<String> {
    text.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_cover_every_domain() {
        let table = DomainThresholds::default_table();
        assert_eq!(table.len(), 7);
        for domain in Domain::ALL {
            let t = &table[domain.as_str()];
            assert!(t.ask_threshold < t.auto_threshold);
            // The learner's invariant must already hold for the defaults.
            assert!(t.ask_threshold <= t.auto_threshold - 0.08);
        }
    }

    #[test]
    fn travel_defaults_match_contract() {
        let t = DomainThresholds::default_for(Domain::Travel);
        assert_eq!(t.ask_threshold, 0.60);
        assert_eq!(t.auto_threshold, 0.90);
        assert_eq!(t.margin_threshold, 0.15);
    }

    #[test]
    fn reliability_table_covers_all_source_types() {
        let table = source_reliability_defaults();
        for source in SourceType::ALL {
            assert!(table.contains_key(source.as_str()), "{source:?}");
        }
        assert_eq!(table["static_markdown"], 0.60);
        assert_eq!(table["user_confirmation"], 1.00);
    }

    #[test]
    fn intent_factors_match_contract() {
        assert_eq!(intent_factor(Intent::Assertive), 1.00);
        assert_eq!(intent_factor(Intent::Retract), 0.95);
        assert_eq!(intent_factor(Intent::Planning), 0.72);
        assert_eq!(intent_factor(Intent::Historical), 0.68);
        assert_eq!(intent_factor(Intent::Hypothetical), 0.45);
    }

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.entity_id, "user:primary");
        assert_eq!(config.ingest.min_chars, 12);
        assert_eq!(config.ingest.max_pending, 10);
        assert_eq!(config.ingest.source_type, SourceType::ConversationPlanning);
        assert_eq!(config.inject_max_fields, 32);
        assert_eq!(config.intent.mode, IntentMode::Rule);
        assert!(!config.few_shot_examples.is_empty());
    }

    #[test]
    fn sidecar_target_parsed_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("state-telegram.toml"),
            "target = \"@family_channel\"\nthread_id = \"77\"\n",
        )
        .unwrap();
        assert_eq!(
            load_sidecar_target(dir.path()),
            Some("@family_channel".into())
        );
    }

    #[test]
    fn sidecar_missing_or_empty_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_sidecar_target(dir.path()), None);
        std::fs::write(dir.path().join("state-telegram.toml"), "target = \"\"\n").unwrap();
        assert_eq!(load_sidecar_target(dir.path()), None);
    }

    #[test]
    fn csv_splitting_trims_and_drops_empties() {
        assert_eq!(split_csv("a, b ,,c"), vec!["a", "b", "c"]);
        assert!(split_csv("").is_empty());
    }
}
