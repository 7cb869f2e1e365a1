//! Adaptive threshold learner over recorded ask-user outcomes.
//!
//! Every resolved prompt appends one [`LearningEvent`] to the NDJSON log.
//! A learner run aggregates the events per domain inside the lookback
//! window and proposes new ask/auto thresholds:
//!
//! - high correction rates push `auto` up (and a 75th-percentile floor over
//!   correction confidences keeps it above the band users keep fixing);
//! - high confirmation rates with few corrections ease `auto` down and
//!   `ask` down; low confirmation rates push `ask` up;
//! - every move is limited per run by `max_daily_step`, `auto` clamps to
//!   `[0.80, 0.99]`, `ask` to `[0.55, 0.80]`, and `ask ≤ auto − 0.08`
//!   always holds afterwards.
//!
//! Modes: `off` (default, no-op), `shadow` (propose only), `apply` (mutate
//! the document's threshold table, audited per domain). Runs are throttled
//! to one per `min_interval_hours` unless forced.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DomainThresholds;
use crate::document::AdaptiveMode;
use crate::errors::{StatewardError, StoreError};
use crate::ingest::StateEngine;
use crate::models::{format_ts, parse_ts, round3, Domain};
use crate::store::StateStore;

// ---------------------------------------------------------------------------
// LearningEvent
// ---------------------------------------------------------------------------

/// One recorded ask-user outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    pub learning_event_id: String,
    pub ts: String,
    pub entity_id: String,
    pub domain: Domain,
    pub field: String,
    /// Always `"ask_user"`; kept explicit for forward compatibility.
    pub decision: String,
    /// `confirm`, `reject`, or `edit`.
    pub action: String,
    /// `accepted` or `corrected`.
    pub outcome: String,
    /// Confidence the prompt carried when it was raised.
    pub confidence: f64,
    pub intent: String,
    pub source_type: String,
    pub source_ref: String,
    pub prompt_id: String,
}

/// Append one event line to the learning-events log.
pub fn append_learning_event(store: &StateStore, event: &LearningEvent) -> Result<(), StoreError> {
    let path = store.learning_events_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let line = serde_json::to_string(event).map_err(|e| StoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| StoreError::io(&path, e))?;
    writeln!(file, "{line}").map_err(|e| StoreError::io(&path, e))
}

/// Read the full log, skipping (and counting) malformed lines.
pub fn read_learning_events(store: &StateStore) -> Result<(Vec<LearningEvent>, usize), StoreError> {
    let path = store.learning_events_path();
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(StoreError::io(&path, e)),
    };
    let mut events = Vec::new();
    let mut malformed = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LearningEvent>(line) {
            Ok(event) => events.push(event),
            Err(_) => malformed += 1,
        }
    }
    Ok((events, malformed))
}

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

/// One per-domain proposal computed from the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProposal {
    pub domain: String,
    pub sample_count: usize,
    pub confirmation_rate: f64,
    pub correction_rate: f64,
    pub current: DomainThresholds,
    pub proposed: DomainThresholds,
    /// Whether the rounded thresholds actually moved.
    pub changed: bool,
}

/// Result of one learner run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerSummary {
    pub mode: AdaptiveMode,
    pub ran: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    pub proposals: Vec<ThresholdProposal>,
    /// Domains whose thresholds were written (apply mode only).
    pub applied: Vec<String>,
}

/// Nearest-rank percentile over an unsorted sample.
fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

/// Compute the per-domain proposal. Pure math, exposed for tests.
pub fn propose(
    current: DomainThresholds,
    config: &crate::document::AdaptiveLearningConfig,
    confirms: usize,
    rejects: usize,
    edits: usize,
    correction_confidences: &[f64],
) -> DomainThresholds {
    let samples = (confirms + rejects + edits) as f64;
    let confirmation_rate = confirms as f64 / samples;
    let correction_rate = (rejects + edits) as f64 / samples;
    let step = config.max_daily_step;

    // Candidate auto.
    let mut auto = current.auto_threshold;
    if correction_rate > config.target_correction_rate {
        auto += step;
    } else if correction_rate < config.target_correction_rate / 2.0
        && confirmation_rate >= config.high_confirmation_rate
    {
        auto -= step * 0.5;
    }
    if correction_confidences.len() >= 3 {
        let floor = percentile(correction_confidences, 0.75) + 0.01;
        auto = auto.max(floor);
    }
    auto = auto.clamp(0.80, 0.99);

    // Candidate ask.
    let mut ask = current.ask_threshold;
    if confirmation_rate < config.low_confirmation_rate {
        ask += step;
    } else if confirmation_rate > config.high_confirmation_rate {
        ask -= step;
    }
    ask = ask.min(auto - 0.08).clamp(0.55, 0.80);

    // Move toward the candidates, each limited per run by max_daily_step.
    let new_auto = current.auto_threshold + (auto - current.auto_threshold).clamp(-step, step);
    let mut new_ask = current.ask_threshold + (ask - current.ask_threshold).clamp(-step, step);
    let new_auto = round3(new_auto.clamp(0.80, 0.99));
    new_ask = new_ask.clamp(0.55, 0.80).min(new_auto - 0.08);

    DomainThresholds {
        ask_threshold: round3(new_ask),
        auto_threshold: new_auto,
        margin_threshold: current.margin_threshold,
    }
}

// ---------------------------------------------------------------------------
// run_learner
// ---------------------------------------------------------------------------

impl StateEngine {
    /// Run the adaptive learner once. `force` bypasses the interval throttle
    /// (never the mode gate).
    pub fn run_learner(&self, force: bool) -> Result<LearnerSummary, StatewardError> {
        let mut doc = self.store().load()?;
        let config = doc.runtime.adaptive_learning.clone();

        if config.mode == AdaptiveMode::Off {
            return Ok(LearnerSummary {
                mode: config.mode,
                ran: false,
                skipped_reason: Some("mode_off".into()),
                proposals: Vec::new(),
                applied: Vec::new(),
            });
        }

        let now = Utc::now();
        if !force {
            if let Some(last_run) = config.last_run_at.as_deref().and_then(parse_ts) {
                if now - last_run < Duration::hours(config.min_interval_hours) {
                    return Ok(LearnerSummary {
                        mode: config.mode,
                        ran: false,
                        skipped_reason: Some("throttled".into()),
                        proposals: Vec::new(),
                        applied: Vec::new(),
                    });
                }
            }
        }

        let (events, _malformed) = read_learning_events(self.store())?;
        let cutoff = now - Duration::days(config.lookback_days);
        let mut per_domain: BTreeMap<Domain, (usize, usize, usize, Vec<f64>)> = BTreeMap::new();
        for event in events {
            let Some(ts) = parse_ts(&event.ts) else {
                continue;
            };
            if ts < cutoff {
                continue;
            }
            let slot = per_domain.entry(event.domain).or_default();
            match event.action.as_str() {
                "confirm" => slot.0 += 1,
                "reject" => {
                    slot.1 += 1;
                    slot.3.push(event.confidence);
                }
                "edit" => {
                    slot.2 += 1;
                    slot.3.push(event.confidence);
                }
                _ => {}
            }
        }

        let mut proposals = Vec::new();
        let mut applied = Vec::new();
        for (domain, (confirms, rejects, edits, correction_confidences)) in per_domain {
            let samples = confirms + rejects + edits;
            if samples < config.min_samples {
                continue;
            }
            let current = doc.thresholds(domain);
            let proposed = propose(
                current,
                &config,
                confirms,
                rejects,
                edits,
                &correction_confidences,
            );
            let changed = proposed.ask_threshold != current.ask_threshold
                || proposed.auto_threshold != current.auto_threshold;

            if config.mode == AdaptiveMode::Apply && changed {
                doc.domains.insert(domain.as_str().to_string(), proposed);
                applied.push(domain.as_str().to_string());
                self.store().append_audit(&format!(
                    "adaptive_thresholds | domain={} | ask {:.3} -> {:.3} | auto {:.3} -> {:.3} | samples={samples}",
                    domain.as_str(),
                    current.ask_threshold,
                    proposed.ask_threshold,
                    current.auto_threshold,
                    proposed.auto_threshold,
                ))?;
            }

            proposals.push(ThresholdProposal {
                domain: domain.as_str().to_string(),
                sample_count: samples,
                confirmation_rate: round3(confirms as f64 / samples as f64),
                correction_rate: round3((rejects + edits) as f64 / samples as f64),
                current,
                proposed,
                changed,
            });
        }

        doc.runtime.adaptive_learning.last_run_at = Some(format_ts(now));
        self.store().save(&mut doc)?;

        Ok(LearnerSummary {
            mode: config.mode,
            ran: true,
            skipped_reason: None,
            proposals,
            applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::AdaptiveLearningConfig;
    use crate::testing::{engine_in, TestEngine};

    fn config() -> AdaptiveLearningConfig {
        AdaptiveLearningConfig::default()
    }

    fn thresholds() -> DomainThresholds {
        DomainThresholds {
            ask_threshold: 0.60,
            auto_threshold: 0.90,
            margin_threshold: 0.15,
        }
    }

    fn seed_events(
        engine: &StateEngine,
        domain: Domain,
        confirms: usize,
        rejects: usize,
        edits: usize,
    ) {
        let actions = std::iter::repeat("confirm")
            .take(confirms)
            .chain(std::iter::repeat("reject").take(rejects))
            .chain(std::iter::repeat("edit").take(edits));
        for (i, action) in actions.enumerate() {
            let outcome = if action == "confirm" { "accepted" } else { "corrected" };
            append_learning_event(
                engine.store(),
                &LearningEvent {
                    learning_event_id: uuid::Uuid::new_v4().to_string(),
                    ts: format_ts(Utc::now()),
                    entity_id: "user:primary".into(),
                    domain,
                    field: format!("field_{i}"),
                    decision: "ask_user".into(),
                    action: action.into(),
                    outcome: outcome.into(),
                    confidence: 0.88,
                    intent: "assertive".into(),
                    source_type: "static_markdown".into(),
                    source_ref: "plan.md".into(),
                    prompt_id: uuid::Uuid::new_v4().to_string(),
                },
            )
            .unwrap();
        }
    }

    fn enable_mode(engine: &StateEngine, mode: AdaptiveMode) {
        let mut doc = engine.store().load().unwrap();
        doc.runtime.adaptive_learning.mode = mode;
        doc.runtime.adaptive_learning_enabled = mode != AdaptiveMode::Off;
        engine.store().save(&mut doc).unwrap();
    }

    // -- percentile --

    #[test]
    fn percentile_nearest_rank() {
        assert_eq!(percentile(&[0.7, 0.8, 0.9], 0.75), 0.9);
        assert_eq!(percentile(&[0.9, 0.7, 0.8, 0.6], 0.75), 0.8);
        assert_eq!(percentile(&[0.5], 0.75), 0.5);
    }

    // -- propose --

    #[test]
    fn high_correction_rate_raises_auto() {
        // 10 confirms, 2 corrections: correction_rate ≈ 0.167 > 0.08.
        let proposed = propose(thresholds(), &config(), 10, 2, 0, &[0.85, 0.88]);
        assert_eq!(proposed.auto_threshold, 0.92);
    }

    #[test]
    fn clean_confirmations_ease_thresholds_down() {
        // 30 confirms, 1 correction: rate 0.032 < 0.04, confirmation 0.968.
        let proposed = propose(thresholds(), &config(), 30, 1, 0, &[0.85]);
        assert_eq!(proposed.auto_threshold, 0.89);
        assert_eq!(proposed.ask_threshold, 0.58);
    }

    #[test]
    fn low_confirmation_rate_raises_ask() {
        // Half rejected: confirmation 0.5 < 0.55.
        let proposed = propose(thresholds(), &config(), 6, 6, 0, &[0.7, 0.7, 0.7, 0.7, 0.7, 0.7]);
        assert_eq!(proposed.ask_threshold, 0.62);
    }

    #[test]
    fn moves_are_step_limited_per_run() {
        // Even with a percentile floor far above, one run moves at most one step.
        let proposed = propose(
            thresholds(),
            &config(),
            2,
            10,
            0,
            &[0.98, 0.98, 0.98, 0.98],
        );
        assert_eq!(proposed.auto_threshold, 0.92);
    }

    #[test]
    fn auto_clamps_at_099() {
        let high = DomainThresholds {
            ask_threshold: 0.80,
            auto_threshold: 0.99,
            margin_threshold: 0.15,
        };
        let proposed = propose(high, &config(), 2, 10, 0, &[0.9, 0.9, 0.9]);
        assert_eq!(proposed.auto_threshold, 0.99);
        // Gap invariant holds at the ceiling.
        assert!(proposed.ask_threshold <= proposed.auto_threshold - 0.08);
    }

    #[test]
    fn ask_auto_gap_always_enforced() {
        for (confirms, rejects) in [(12usize, 0usize), (0, 12), (6, 6), (11, 1)] {
            let confidences: Vec<f64> = (0..rejects).map(|_| 0.88).collect();
            let proposed = propose(thresholds(), &config(), confirms, rejects, 0, &confidences);
            assert!(
                proposed.ask_threshold <= proposed.auto_threshold - 0.08,
                "gap violated for {confirms}/{rejects}: {proposed:?}"
            );
            assert!(proposed.ask_threshold >= 0.55 && proposed.ask_threshold <= 0.80);
            assert!(proposed.auto_threshold >= 0.80 && proposed.auto_threshold <= 0.99);
        }
    }

    #[test]
    fn margin_threshold_is_untouched() {
        let proposed = propose(thresholds(), &config(), 10, 2, 0, &[0.85, 0.88]);
        assert_eq!(proposed.margin_threshold, 0.15);
    }

    // -- run_learner --

    #[test]
    fn off_mode_is_a_no_op() {
        let TestEngine { engine, dir: _dir } = engine_in();
        seed_events(&engine, Domain::Travel, 10, 4, 0);
        let summary = engine.run_learner(true).unwrap();
        assert!(!summary.ran);
        assert_eq!(summary.skipped_reason.as_deref(), Some("mode_off"));
    }

    #[test]
    fn shadow_mode_proposes_without_mutating() {
        let TestEngine { engine, dir: _dir } = engine_in();
        enable_mode(&engine, AdaptiveMode::Shadow);
        seed_events(&engine, Domain::Travel, 10, 4, 0);

        let summary = engine.run_learner(true).unwrap();
        assert!(summary.ran);
        assert_eq!(summary.proposals.len(), 1);
        assert!(summary.proposals[0].changed);
        assert!(summary.applied.is_empty());

        let doc = engine.store().load().unwrap();
        assert_eq!(doc.thresholds(Domain::Travel).auto_threshold, 0.90);
        assert!(doc.runtime.adaptive_learning.last_run_at.is_some());
    }

    #[test]
    fn apply_mode_writes_changed_domains_and_audits() {
        let TestEngine { engine, dir: _dir } = engine_in();
        enable_mode(&engine, AdaptiveMode::Apply);
        seed_events(&engine, Domain::Travel, 10, 4, 0);

        let summary = engine.run_learner(true).unwrap();
        assert_eq!(summary.applied, vec!["travel".to_string()]);

        let doc = engine.store().load().unwrap();
        let updated = doc.thresholds(Domain::Travel);
        assert_eq!(updated.auto_threshold, 0.92);
        assert!(updated.ask_threshold <= updated.auto_threshold - 0.08);

        let tail = engine.store().audit_tail(5).unwrap();
        assert!(tail.last().unwrap().contains("adaptive_thresholds | domain=travel"));
    }

    #[test]
    fn below_min_samples_produces_no_proposal() {
        let TestEngine { engine, dir: _dir } = engine_in();
        enable_mode(&engine, AdaptiveMode::Shadow);
        seed_events(&engine, Domain::Travel, 5, 2, 0); // 7 < 12
        let summary = engine.run_learner(true).unwrap();
        assert!(summary.ran);
        assert!(summary.proposals.is_empty());
    }

    #[test]
    fn runs_are_throttled_within_interval() {
        let TestEngine { engine, dir: _dir } = engine_in();
        enable_mode(&engine, AdaptiveMode::Shadow);
        seed_events(&engine, Domain::Travel, 10, 4, 0);

        engine.run_learner(true).unwrap();
        let second = engine.run_learner(false).unwrap();
        assert!(!second.ran);
        assert_eq!(second.skipped_reason.as_deref(), Some("throttled"));

        // Force bypasses the throttle.
        let forced = engine.run_learner(true).unwrap();
        assert!(forced.ran);
    }

    #[test]
    fn old_events_fall_outside_lookback() {
        let TestEngine { engine, dir: _dir } = engine_in();
        enable_mode(&engine, AdaptiveMode::Shadow);
        for i in 0..12 {
            append_learning_event(
                engine.store(),
                &LearningEvent {
                    learning_event_id: uuid::Uuid::new_v4().to_string(),
                    ts: "2020-01-01T00:00:00Z".into(),
                    entity_id: "user:primary".into(),
                    domain: Domain::Travel,
                    field: format!("f{i}"),
                    decision: "ask_user".into(),
                    action: "reject".into(),
                    outcome: "corrected".into(),
                    confidence: 0.7,
                    intent: "assertive".into(),
                    source_type: "static_markdown".into(),
                    source_ref: "plan.md".into(),
                    prompt_id: uuid::Uuid::new_v4().to_string(),
                },
            )
            .unwrap();
        }
        let summary = engine.run_learner(true).unwrap();
        assert!(summary.proposals.is_empty());
    }

    #[test]
    fn malformed_learning_lines_are_counted_not_fatal() {
        let TestEngine { engine, dir: _dir } = engine_in();
        seed_events(&engine, Domain::Travel, 1, 0, 0);
        let path = engine.store().learning_events_path();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not json at all").unwrap();

        let (events, malformed) = read_learning_events(engine.store()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(malformed, 1);
    }
}
