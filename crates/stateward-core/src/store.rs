//! Single-writer persistence for the canonical document and its siblings.
//!
//! The store owns the `memory/` directory layout:
//!
//! | file | contents |
//! |------|----------|
//! | `state-tracker.json` | canonical [`Document`], pretty JSON + trailing newline |
//! | `state-changes.md` | append-only audit bullets `- <iso> \| <message>` |
//! | `state-dlq.jsonl` | append-only DLQ lines (see [`crate::dlq`]) |
//! | `state-learning-events.jsonl` | append-only learning events |
//! | `state-telegram-review-state.json` | confirmation-worker runtime state |
//!
//! Every document write goes through sibling tempfile → fsync → rename, so
//! readers and a killed tick only ever observe fully-formed documents.
//! Appends use OS append mode under the single-writer assumption. Every
//! `save` stamps `last_consistency_check`.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::dlq::DlqLog;
use crate::document::Document;
use crate::errors::StoreError;
use crate::models::format_ts;

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Handle on the on-disk store rooted at `<root_dir>/memory/`.
#[derive(Debug, Clone)]
pub struct StateStore {
    root_dir: PathBuf,
}

impl StateStore {
    /// Wrap a root directory. Nothing is created until
    /// [`ensure_bootstrap`](Self::ensure_bootstrap) or the first write.
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    /// The directory holding all store files.
    pub fn memory_dir(&self) -> PathBuf {
        self.root_dir.join("memory")
    }

    /// Path of the canonical document.
    pub fn document_path(&self) -> PathBuf {
        self.memory_dir().join("state-tracker.json")
    }

    /// Path of the audit log.
    pub fn audit_path(&self) -> PathBuf {
        self.memory_dir().join("state-changes.md")
    }

    /// Path of the learning-events log.
    pub fn learning_events_path(&self) -> PathBuf {
        self.memory_dir().join("state-learning-events.jsonl")
    }

    /// Path of the confirmation-worker runtime state.
    pub fn worker_state_path(&self) -> PathBuf {
        self.memory_dir().join("state-telegram-review-state.json")
    }

    /// Handle on the DLQ log.
    pub fn dlq(&self) -> DlqLog {
        DlqLog::new(self.memory_dir().join("state-dlq.jsonl"))
    }

    /// Create the store files if missing: the bootstrap document plus empty
    /// audit, DLQ, and learning-events logs. Existing files are untouched.
    pub fn ensure_bootstrap(&self, config: &EngineConfig) -> Result<(), StoreError> {
        let dir = self.memory_dir();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        if !self.document_path().exists() {
            let mut doc = Document::bootstrap(config, &format_ts(Utc::now()));
            self.save(&mut doc)?;
        }
        for path in [
            self.audit_path(),
            self.dlq().path().to_path_buf(),
            self.learning_events_path(),
        ] {
            if !path.exists() {
                std::fs::write(&path, b"").map_err(|e| StoreError::io(&path, e))?;
            }
        }
        Ok(())
    }

    /// Load the canonical document. A missing document is a
    /// [`StoreError::Io`]; call [`ensure_bootstrap`](Self::ensure_bootstrap)
    /// first.
    pub fn load(&self) -> Result<Document, StoreError> {
        let path = self.document_path();
        let text = std::fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_str(&text).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Persist the document atomically, stamping `last_consistency_check`.
    pub fn save(&self, doc: &mut Document) -> Result<(), StoreError> {
        doc.last_consistency_check = format_ts(Utc::now());
        let mut text = serde_json::to_string_pretty(doc).map_err(|e| StoreError::Io {
            path: self.document_path().display().to_string(),
            message: e.to_string(),
        })?;
        text.push('\n');
        write_atomic(&self.document_path(), text.as_bytes())
    }

    /// Append one audit line: `- <iso> | <message>`.
    pub fn append_audit(&self, message: &str) -> Result<(), StoreError> {
        let path = self.audit_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        writeln!(file, "- {} | {}", format_ts(Utc::now()), message)
            .map_err(|e| StoreError::io(&path, e))
    }

    /// The last `n` audit bullet lines (lines starting with `- `), oldest
    /// first. A missing log reads as empty.
    pub fn audit_tail(&self, n: usize) -> Result<Vec<String>, StoreError> {
        let path = self.audit_path();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let bullets: Vec<String> = text
            .lines()
            .filter(|line| line.starts_with("- "))
            .map(str::to_string)
            .collect();
        let start = bullets.len().saturating_sub(n);
        Ok(bullets[start..].to_vec())
    }
}

// ---------------------------------------------------------------------------
// Atomic write helpers
// ---------------------------------------------------------------------------

/// Write bytes via sibling tempfile → fsync → rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| StoreError::AtomicWrite {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    tmp.write_all(bytes).map_err(|e| StoreError::AtomicWrite {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::AtomicWrite {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    tmp.persist(path).map_err(|e| StoreError::AtomicWrite {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// Serialize a value as pretty JSON (+ trailing newline) and write it
/// atomically. Used for the document and the worker runtime state.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut text = serde_json::to_string_pretty(value).map_err(|e| StoreError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    text.push('\n');
    write_atomic(path, text.as_bytes())
}
