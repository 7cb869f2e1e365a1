//! Error types for the Stateward kernel.
//!
//! This module defines the full error taxonomy:
//!
//! - [`StatewardError`] — top-level enum wrapping all component errors
//! - [`SchemaError`] — schema compilation failures (fatal at startup)
//! - [`StoreError`] — canonical-store I/O and serialization errors
//! - [`ProjectionError`] — projection artifact errors
//! - [`TransportError`] — chat-transport dispatch errors
//! - [`ClassifierError`] — external intent-classifier errors
//! - [`WorkerError`] — confirmation-loop worker errors
//!
//! Validation failures, duplicates, and lookup misses are **not** errors:
//! engine operations report them through structured outcome enums (see
//! [`crate::models`]). Errors here mean the engine could not carry out an
//! operation at all.

use serde::Serialize;

// -- SchemaError --

/// Schema registry errors. Any of these at startup is fatal.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum SchemaError {
    /// The named schema document is not shipped with the engine.
    #[error("unknown schema: {name}")]
    Unknown { name: String },

    /// A shipped schema document failed to parse as JSON.
    #[error("schema {name} is not valid JSON: {message}")]
    Malformed { name: String, message: String },

    /// A shipped schema document failed to compile.
    #[error("schema {name} failed to compile: {message}")]
    Uncompilable { name: String, message: String },
}

// -- StoreError --

/// Canonical-store errors: the document, audit log, DLQ log, or
/// learning-events log could not be read or written.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum StoreError {
    /// Filesystem I/O failed.
    #[error("store i/o failed at {path}: {message}")]
    Io { path: String, message: String },

    /// The canonical document exists but does not deserialize.
    #[error("corrupt document at {path}: {message}")]
    Corrupt { path: String, message: String },

    /// An atomic replace (tempfile + rename) failed.
    #[error("atomic write failed at {path}: {message}")]
    AtomicWrite { path: String, message: String },
}

impl StoreError {
    /// Wrap an `io::Error` with the path it occurred on.
    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

// -- ProjectionError --

/// Projection artifact errors.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ProjectionError {
    /// The artifact could not be read or written.
    #[error("projection i/o failed at {path}: {message}")]
    Io { path: String, message: String },

    /// A zone has a BEGIN marker with no matching END marker.
    #[error("unterminated zone {zone_id} in {path}")]
    UnterminatedZone { zone_id: String, path: String },
}

// -- TransportError --

/// Chat transport errors. The worker logs these and leaves state untouched.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum TransportError {
    /// The send command/API call failed.
    #[error("chat send failed: {message}")]
    SendFailed {
        message: String,
        target: Option<String>,
    },

    /// No dispatch target could be resolved from config, env, or side-car.
    #[error("no chat target configured")]
    NoTarget,
}

// -- ClassifierError --

/// External intent-classifier errors. Callers fall back to the rule-based
/// classifier on any of these.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ClassifierError {
    /// The classifier child process could not be spawned.
    #[error("classifier spawn failed: {message}")]
    SpawnFailed { message: String },

    /// The classifier exited non-zero or produced no usable output.
    #[error("classifier failed: {message}")]
    Failed { message: String },

    /// The classifier's stdout did not validate against the intent schema.
    #[error("classifier output rejected: {message}")]
    InvalidOutput { message: String },

    /// The classifier exceeded its time budget.
    #[error("classifier timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

// -- WorkerError --

/// Confirmation-loop worker errors.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum WorkerError {
    /// The persistent runtime-state file could not be read or written.
    #[error("worker state i/o failed at {path}: {message}")]
    StateIo { path: String, message: String },

    /// The host-chat session file could not be read.
    #[error("session read failed at {path}: {message}")]
    SessionRead { path: String, message: String },
}

// -- StatewardError --

/// Top-level error enum wrapping all component errors.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum StatewardError {
    /// A schema registry error.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A canonical-store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A projection error.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// A chat-transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An intent-classifier error.
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    /// A confirmation-loop worker error.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}
