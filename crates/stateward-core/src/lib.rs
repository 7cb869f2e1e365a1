//! stateward-core: Pure Rust kernel for the Stateward state-consistency
//! engine.
//!
//! The engine maintains a canonical, machine-owned view of facts asserted
//! about entities by heterogeneous, partially unreliable sources. It resolves
//! contradictions deterministically, defers to a human when confidence is
//! insufficient, and projects the committed state into human-readable
//! artifacts. The CLI wrapper, cron installers, the calendar/mail fetcher,
//! and the host chat runtime are external collaborators behind the seams in
//! [`traits`].
//!
//! # Crate Organization
//!
//! - `events` — Canonical status/decision string constants
//! - `errors` — All error types (StatewardError, StoreError, etc.)
//! - `models` — Data model (observations, records, prompts, outcomes)
//! - `config` — Threshold tables, reliability weights, env contract
//! - `schema` — Strict JSON Schema validation for inbound payloads
//! - `dlq` — Dead-letter log with fold-by-id semantics
//! - `document` — The canonical document and its invariants
//! - `store` — Atomic persistence (document, audit, NDJSON logs)
//! - `resolver` — Pure confidence scoring and decision resolution
//! - `intent` — Rule-based and child-process intent classifiers
//! - `ingest` — The ingestion pipeline (`StateEngine`)
//! - `signal` — Calendar/mail batches → deterministic observations
//! - `confirm` — Pending-prompt lifecycle and review-queue promotion
//! - `projection` — Machine-managed Markdown zones with drift detection
//! - `retry` — DLQ retry scheduler with exponential backoff
//! - `learner` — Adaptive threshold learner (off/shadow/apply)
//! - `worker` — Confirmation-loop worker (one prompt in flight)
//! - `bridge` — Host-chat hooks and the `/state-confirm` command
//! - `traits` — Seam contracts (ChatTransport, IntentClassifier)
//! - `testing` — Concrete fakes and builders for tests

pub mod bridge;
pub mod config;
pub mod confirm;
pub mod dlq;
pub mod document;
pub mod errors;
pub mod events;
pub mod ingest;
pub mod intent;
pub mod learner;
pub mod models;
pub mod projection;
pub mod resolver;
pub mod retry;
pub mod schema;
pub mod signal;
pub mod store;
pub mod testing;
pub mod traits;
pub mod worker;

pub use config::EngineConfig;
pub use errors::StatewardError;
pub use ingest::StateEngine;
