//! The canonical document: the single machine-owned view of committed facts.
//!
//! One [`Document`] holds everything the engine persists in
//! `memory/state-tracker.json`: per-entity state records, pending prompts,
//! tentative observations, the processed-event-id window, runtime config,
//! per-domain thresholds, the source-reliability table, and learning
//! counters.
//!
//! # Invariants
//!
//! - At most one [`StateRecord`] per `(entity_id, domain, field)` — enforced
//!   structurally by the nested maps.
//! - `processed_event_ids` is capped at [`PROCESSED_EVENT_CAP`] (oldest
//!   evicted); `tentative_observations` at [`TENTATIVE_CAP`].
//! - Maps are `BTreeMap` so the pretty-printed document and every iteration
//!   order are deterministic.
//! - Every persisted mutation stamps `last_consistency_check` (the store does
//!   this on save).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{source_reliability_defaults, DomainThresholds, EngineConfig};
use crate::models::{Domain, PendingPrompt, StateRecord, TentativeObservation};

/// Maximum retained processed event ids (oldest evicted beyond this).
pub const PROCESSED_EVENT_CAP: usize = 5_000;

/// Maximum retained tentative observations (oldest evicted beyond this).
pub const TENTATIVE_CAP: usize = 1_000;

/// Current document schema version.
pub const DOCUMENT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Runtime config
// ---------------------------------------------------------------------------

/// How the projection engine rewrites the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMode {
    /// Heading-anchored rewrite with a pre-write backup and a warning audit
    /// line. Kept for artifacts written before zone markers existed.
    LegacyString,
    /// Marker-delimited zone rewrite (the strict target mode).
    Zones,
}

/// Adaptive-learner activation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveMode {
    Off,
    Shadow,
    Apply,
}

impl AdaptiveMode {
    /// Parse a wire string; anything unrecognised is `Off`.
    pub fn parse(s: &str) -> AdaptiveMode {
        match s {
            "shadow" => AdaptiveMode::Shadow,
            "apply" => AdaptiveMode::Apply,
            _ => AdaptiveMode::Off,
        }
    }
}

/// Adaptive-learner knobs, persisted so operators can tune per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveLearningConfig {
    pub mode: AdaptiveMode,
    pub min_samples: usize,
    pub lookback_days: i64,
    pub max_daily_step: f64,
    pub target_correction_rate: f64,
    pub low_confirmation_rate: f64,
    pub high_confirmation_rate: f64,
    pub min_interval_hours: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,
}

impl Default for AdaptiveLearningConfig {
    fn default() -> Self {
        Self {
            mode: AdaptiveMode::Off,
            min_samples: 12,
            lookback_days: 14,
            max_daily_step: 0.02,
            target_correction_rate: 0.08,
            low_confirmation_rate: 0.55,
            high_confirmation_rate: 0.85,
            min_interval_hours: 20,
            last_run_at: None,
        }
    }
}

/// Runtime section of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub projection_mode: ProjectionMode,
    pub adaptive_learning_enabled: bool,
    pub adaptive_learning: AdaptiveLearningConfig,
    /// Last persisted zone-body hash per section heading.
    #[serde(default)]
    pub projection_hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_poll_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_queue_at: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            projection_mode: ProjectionMode::LegacyString,
            adaptive_learning_enabled: false,
            adaptive_learning: AdaptiveLearningConfig::default(),
            projection_hashes: BTreeMap::new(),
            last_poll_at: None,
            last_review_queue_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Counters & entity state
// ---------------------------------------------------------------------------

/// Decision counters, fed to the adaptive learner and the status summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningStats {
    #[serde(default)]
    pub auto_commits: u64,
    #[serde(default)]
    pub ask_user_prompts: u64,
    #[serde(default)]
    pub ask_user_confirmations: u64,
    #[serde(default)]
    pub user_confirms: u64,
    #[serde(default)]
    pub user_rejects: u64,
    #[serde(default)]
    pub user_edits: u64,
    #[serde(default)]
    pub tentative_rejects: u64,
}

/// Per-entity committed state: `domain → field → record`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    #[serde(default)]
    pub state: BTreeMap<String, BTreeMap<String, StateRecord>>,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// The canonical, single-writer document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub version: u32,
    pub last_consistency_check: String,
    pub runtime: RuntimeConfig,
    /// Per-domain thresholds, keyed by domain wire string.
    pub domains: BTreeMap<String, DomainThresholds>,
    /// Reliability weight per source type string.
    pub source_reliability: BTreeMap<String, f64>,
    /// Committed facts, keyed by entity id.
    #[serde(default)]
    pub entities: BTreeMap<String, EntityState>,
    /// Low-confidence observations awaiting promotion, oldest first.
    #[serde(default)]
    pub tentative_observations: Vec<TentativeObservation>,
    /// Reserved for future multi-observation conflict records.
    #[serde(default)]
    pub active_conflicts: Vec<Value>,
    /// Ask-user prompts awaiting a human, keyed by prompt id.
    #[serde(default)]
    pub pending_confirmations: BTreeMap<String, PendingPrompt>,
    /// Recently processed event ids, oldest first.
    #[serde(default)]
    pub processed_event_ids: Vec<String>,
    #[serde(default)]
    pub learning_stats: LearningStats,
}

impl Document {
    /// Build the bootstrap document: all seven domain configs, the baseline
    /// reliability table, empty state, counters at zero, runtime defaults.
    pub fn bootstrap(config: &EngineConfig, now_iso: &str) -> Self {
        let mut runtime = RuntimeConfig::default();
        if let Some(mode) = &config.adaptive_mode {
            runtime.adaptive_learning.mode = AdaptiveMode::parse(mode);
            runtime.adaptive_learning_enabled = runtime.adaptive_learning.mode != AdaptiveMode::Off;
        }
        Self {
            version: DOCUMENT_VERSION,
            last_consistency_check: now_iso.to_string(),
            runtime,
            domains: DomainThresholds::default_table().into_iter().collect(),
            source_reliability: source_reliability_defaults().into_iter().collect(),
            entities: BTreeMap::new(),
            tentative_observations: Vec::new(),
            active_conflicts: Vec::new(),
            pending_confirmations: BTreeMap::new(),
            processed_event_ids: Vec::new(),
            learning_stats: LearningStats::default(),
        }
    }

    /// Thresholds for a domain, falling back to the compiled defaults if a
    /// domain key was removed from the persisted table.
    pub fn thresholds(&self, domain: Domain) -> DomainThresholds {
        self.domains
            .get(domain.as_str())
            .copied()
            .unwrap_or_else(|| DomainThresholds::default_for(domain))
    }

    /// The committed record for `(entity_id, domain, field)`, if any.
    pub fn record(&self, entity_id: &str, domain: Domain, field: &str) -> Option<&StateRecord> {
        self.entities
            .get(entity_id)?
            .state
            .get(domain.as_str())?
            .get(field)
    }

    /// Write (replace) the record for `(entity_id, domain, field)`.
    pub fn upsert_record(
        &mut self,
        entity_id: &str,
        domain: Domain,
        field: &str,
        record: StateRecord,
    ) {
        self.entities
            .entry(entity_id.to_string())
            .or_default()
            .state
            .entry(domain.as_str().to_string())
            .or_default()
            .insert(field.to_string(), record);
    }

    /// Delete the record for `(entity_id, domain, field)`, pruning emptied
    /// maps. Returns the removed record, if any.
    pub fn delete_record(
        &mut self,
        entity_id: &str,
        domain: Domain,
        field: &str,
    ) -> Option<StateRecord> {
        let entity = self.entities.get_mut(entity_id)?;
        let fields = entity.state.get_mut(domain.as_str())?;
        let removed = fields.remove(field);
        if fields.is_empty() {
            entity.state.remove(domain.as_str());
        }
        if entity.state.is_empty() {
            self.entities.remove(entity_id);
        }
        removed
    }

    /// Whether an event id has already been processed.
    pub fn is_processed(&self, event_id: &str) -> bool {
        self.processed_event_ids.iter().any(|id| id == event_id)
    }

    /// Append an event id to the processed window, evicting the oldest
    /// beyond [`PROCESSED_EVENT_CAP`].
    pub fn mark_processed(&mut self, event_id: &str) {
        self.processed_event_ids.push(event_id.to_string());
        if self.processed_event_ids.len() > PROCESSED_EVENT_CAP {
            let excess = self.processed_event_ids.len() - PROCESSED_EVENT_CAP;
            self.processed_event_ids.drain(0..excess);
        }
    }

    /// Stash a tentative observation, evicting the oldest beyond
    /// [`TENTATIVE_CAP`].
    pub fn push_tentative(&mut self, tentative: TentativeObservation) {
        self.tentative_observations.push(tentative);
        if self.tentative_observations.len() > TENTATIVE_CAP {
            let excess = self.tentative_observations.len() - TENTATIVE_CAP;
            self.tentative_observations.drain(0..excess);
        }
    }

    /// Pending prompts sorted by `created_at` ascending (ties break on
    /// prompt id, which the BTreeMap ordering already provides).
    pub fn pending_by_created(&self) -> Vec<&PendingPrompt> {
        let mut prompts: Vec<&PendingPrompt> = self.pending_confirmations.values().collect();
        prompts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        prompts
    }

    /// Count pending prompts matching optional entity/domain filters.
    pub fn pending_count(&self, entity_id: Option<&str>, domain: Option<Domain>) -> usize {
        self.pending_confirmations
            .values()
            .filter(|p| entity_id.is_none_or(|e| p.entity_id == e))
            .filter(|p| domain.is_none_or(|d| p.domain == d))
            .count()
    }

    /// Total committed records across all entities.
    pub fn record_count(&self) -> usize {
        self.entities
            .values()
            .flat_map(|e| e.state.values())
            .map(|fields| fields.len())
            .sum()
    }
}
