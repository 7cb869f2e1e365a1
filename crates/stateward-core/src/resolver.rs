//! Confidence scoring and decision resolution.
//!
//! A pure function from `(current document, observation, now)` to a
//! [`Resolution`]: auto-commit, ask-user, or tentative-reject, with the
//! numbers and reasons that produced it. No I/O, no clock reads — callers
//! pass `now` so one ingest sees one clock and tests are deterministic.
//!
//! # Formula
//!
//! ```text
//! confidence = clamp( reliability[source.type]
//!                   · intent_factor[intent]
//!                   · recency_factor(event_ts)
//!                   · corroboration_factor(|corroborators|) , 0, 1 )
//! ```
//!
//! Recency decays linearly from 1.0 to 0.4 over 168 h and is floored there.
//! Corroboration adds 5% per witness, capped at 1.2. All outputs are rounded
//! to three decimals.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::{intent_factor, UNKNOWN_SOURCE_RELIABILITY};
use crate::document::Document;
use crate::models::{clamp01, parse_ts, round3, Decision, Resolution, StateObservation};

/// Hours after which recency bottoms out.
const RECENCY_HORIZON_HOURS: f64 = 168.0;

/// Total decay applied at the horizon (1.0 → 0.4).
const RECENCY_MAX_DECAY: f64 = 0.6;

/// Recency multiplier for an observation timestamp.
///
/// `age_h = max(0, (now − event_ts)/1h)`, then linear decay from 1.0 to 0.4
/// over [`RECENCY_HORIZON_HOURS`], floored at 0.4. Future timestamps and
/// unparsable timestamps count as age zero.
pub fn recency_factor(event_ts: &str, now: DateTime<Utc>) -> f64 {
    let age_h = match parse_ts(event_ts) {
        Some(ts) => ((now - ts).num_seconds() as f64 / 3600.0).max(0.0),
        None => 0.0,
    };
    let decayed = 1.0 - age_h.min(RECENCY_HORIZON_HOURS) / RECENCY_HORIZON_HOURS * RECENCY_MAX_DECAY;
    decayed.clamp(1.0 - RECENCY_MAX_DECAY, 1.0)
}

/// Corroboration multiplier: `clamp(1 + 0.05·n, 1, 1.2)`.
pub fn corroboration_factor(n_corroborators: usize) -> f64 {
    (1.0 + 0.05 * n_corroborators as f64).clamp(1.0, 1.2)
}

/// Reliability weight for a source type string; unknown types get
/// [`UNKNOWN_SOURCE_RELIABILITY`].
pub fn source_reliability(table: &BTreeMap<String, f64>, source_type: &str) -> f64 {
    table
        .get(source_type)
        .copied()
        .unwrap_or(UNKNOWN_SOURCE_RELIABILITY)
}

/// Compute the confidence of one observation, rounded to three decimals.
pub fn confidence(
    reliability: &BTreeMap<String, f64>,
    observation: &StateObservation,
    now: DateTime<Utc>,
) -> f64 {
    let weight = source_reliability(reliability, observation.source.source_type.as_str());
    let product = weight
        * intent_factor(observation.intent)
        * recency_factor(&observation.event_ts, now)
        * corroboration_factor(observation.corroborators.len());
    round3(clamp01(product))
}

/// Resolve an observation against the current document.
///
/// `force_commit` short-circuits the thresholds entirely (used by the CLI's
/// explicit override and nothing else); the confidence and margin are still
/// computed and reported.
pub fn resolve(
    doc: &Document,
    observation: &StateObservation,
    now: DateTime<Utc>,
    force_commit: bool,
) -> Resolution {
    let source_type = observation.source.source_type.as_str();
    let weight = source_reliability(&doc.source_reliability, source_type);
    let intent = intent_factor(observation.intent);
    let recency = recency_factor(&observation.event_ts, now);
    let corroboration = corroboration_factor(observation.corroborators.len());
    let conf = round3(clamp01(weight * intent * recency * corroboration));

    let current_confidence = doc
        .record(
            &observation.entity_id,
            observation.domain,
            observation.stored_field(),
        )
        .map(|r| r.confidence)
        .unwrap_or(0.0);
    let margin = round3(conf - current_confidence);

    if force_commit {
        return Resolution {
            decision: Decision::AutoCommit,
            confidence: conf,
            current_confidence,
            margin,
            reasons: vec!["force_commit=true".to_string()],
        };
    }

    let mut reasons = vec![
        format!("source={source_type} reliability={weight:.2}"),
        format!(
            "intent={} factor={intent:.2}",
            observation.intent.as_str()
        ),
        format!("recency_factor={recency:.3}"),
        format!(
            "corroborators={} factor={corroboration:.2}",
            observation.corroborators.len()
        ),
    ];

    let thresholds = doc.thresholds(observation.domain);
    let decision = if conf >= thresholds.auto_threshold && margin >= thresholds.margin_threshold {
        reasons.push(format!(
            "confidence {conf:.3} >= auto {:.2} and margin {margin:.3} >= {:.2}",
            thresholds.auto_threshold, thresholds.margin_threshold
        ));
        Decision::AutoCommit
    } else if conf >= thresholds.ask_threshold {
        reasons.push(format!(
            "confidence {conf:.3} in ask band [{:.2}, {:.2})",
            thresholds.ask_threshold, thresholds.auto_threshold
        ));
        Decision::AskUser
    } else {
        reasons.push(format!(
            "confidence {conf:.3} below ask {:.2}",
            thresholds.ask_threshold
        ));
        Decision::TentativeReject
    };

    Resolution {
        decision,
        confidence: conf,
        current_confidence,
        margin,
        reasons,
    }
}
