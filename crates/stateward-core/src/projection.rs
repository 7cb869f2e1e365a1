//! Deterministic projection of the canonical document into a Markdown
//! artifact.
//!
//! Two machine-managed zones are rebuilt at the end of the artifact on every
//! projection:
//!
//! ```text
//! ## <Heading>
//!
//! <!-- STATE:BEGIN zone_id=<id> schema=v1 -->
//! <body>
//! <!-- STATE:END zone_id=<id> -->
//! ```
//!
//! Zone boundaries are located by the literal marker strings — no Markdown
//! AST — so the rewrite is a pure function of the document plus the last 20
//! audit lines, and two projections with the same input are byte-identical.
//!
//! Drift detection hashes the existing in-file body per zone: a body that
//! matches neither the last persisted hash nor the new body was edited by
//! hand, which is audited (`drift_detected`) before being overwritten.
//! Legacy-string mode additionally writes a `.bak` sibling and a warning
//! audit line before any content change.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::document::{Document, ProjectionMode};
use crate::errors::{ProjectionError, StatewardError};
use crate::events;
use crate::ingest::StateEngine;
use crate::models::value_display;

/// Audit lines carried in the change-log zone.
const CHANGE_LOG_LINES: usize = 20;

/// Result of one projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionReport {
    /// Whether the artifact file changed.
    pub wrote: bool,
    /// Headings whose zones carried unexpected hand edits.
    pub drift: Vec<String>,
    /// Backup path written in legacy mode (only when the file changed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
}

// ---------------------------------------------------------------------------
// Zone plumbing
// ---------------------------------------------------------------------------

fn begin_marker(zone_id: &str) -> String {
    format!("<!-- STATE:BEGIN zone_id={zone_id} schema=v1 -->")
}

fn end_marker(zone_id: &str) -> String {
    format!("<!-- STATE:END zone_id={zone_id} -->")
}

/// The body currently between a zone's markers, if the zone exists.
fn extract_zone_body(content: &str, zone_id: &str) -> Option<String> {
    let begin = begin_marker(zone_id);
    let end = end_marker(zone_id);
    let start = content.find(&begin)? + begin.len();
    let stop = start + content[start..].find(&end)?;
    Some(content[start..stop].trim_matches('\n').to_string())
}

/// Remove a managed section: the `## <heading>` line through its END marker,
/// or (legacy anchored sections without markers) through the next heading.
/// Also removes orphan marker blocks left behind by partial edits.
fn strip_managed_section(content: &str, heading: &str, zone_id: &str) -> String {
    let mut text = content.to_string();
    let heading_line = format!("## {heading}");
    let end = end_marker(zone_id);

    while let Some(pos) = text.find(&heading_line) {
        let after = match text[pos..].find(&end) {
            Some(rel) => pos + rel + end.len(),
            // Legacy section: no markers, cut to the next heading or EOF.
            None => match text[pos + heading_line.len()..].find("\n## ") {
                Some(rel) => pos + heading_line.len() + rel + 1,
                None => text.len(),
            },
        };
        text.replace_range(pos..after, "");
    }

    // Orphan zone blocks (markers whose heading was hand-deleted).
    let begin = begin_marker(zone_id);
    while let Some(pos) = text.find(&begin) {
        let after = match text[pos..].find(&end) {
            Some(rel) => pos + rel + end.len(),
            None => text.len(),
        };
        text.replace_range(pos..after, "");
    }
    text
}

fn sha256_hex(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the canonical-state zone body: committed records sorted by
/// `(entity_id, domain, field)`, then the pending subsection by `created_at`.
fn render_canonical_body(doc: &Document) -> String {
    let mut lines = Vec::new();
    let mut any = false;
    for (entity_id, entity) in &doc.entities {
        for (domain, fields) in &entity.state {
            for (field, record) in fields {
                any = true;
                lines.push(format!(
                    "- [{entity_id}] {domain}.{field} = {} (confidence={}, source={})",
                    value_display(&record.value),
                    record.confidence,
                    record.source,
                ));
            }
        }
    }
    if !any {
        lines.push("- No committed state yet.".to_string());
    }

    lines.push(String::new());
    lines.push("### Pending Confirmations".to_string());
    lines.push(String::new());
    let pending = doc.pending_by_created();
    if pending.is_empty() {
        lines.push("- None".to_string());
    } else {
        for prompt in pending {
            lines.push(format!(
                "- [{}] {} {}: {} (confidence={})",
                &prompt.prompt_id[..8.min(prompt.prompt_id.len())],
                prompt.entity_id,
                prompt.domain.as_str(),
                prompt.proposed_change,
                prompt.confidence,
            ));
        }
    }
    lines.join("\n")
}

/// Render the change-log zone body from the last audit bullets.
fn render_change_log_body(audit_tail: &[String]) -> String {
    if audit_tail.is_empty() {
        "- No state changes yet.".to_string()
    } else {
        audit_tail.join("\n")
    }
}

fn render_section(heading: &str, zone_id: &str, body: &str) -> String {
    format!(
        "## {heading}\n\n{}\n{body}\n{}\n",
        begin_marker(zone_id),
        end_marker(zone_id)
    )
}

// ---------------------------------------------------------------------------
// project
// ---------------------------------------------------------------------------

impl StateEngine {
    /// Rewrite the machine-managed zones inside `artifact_path`.
    ///
    /// With unchanged inputs the write is skipped entirely, so repeated
    /// projections are byte-identical and audit-silent.
    pub fn project(&self, artifact_path: &Path) -> Result<ProjectionReport, StatewardError> {
        let mut doc = self.store().load()?;
        let existing = match std::fs::read_to_string(artifact_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(StatewardError::Projection(ProjectionError::Io {
                    path: artifact_path.display().to_string(),
                    message: e.to_string(),
                }))
            }
        };

        let canonical_body = render_canonical_body(&doc);
        let change_log_body = render_change_log_body(&self.store().audit_tail(CHANGE_LOG_LINES)?);

        let zones = [
            (
                events::HEADING_CANONICAL_STATE,
                events::ZONE_CANONICAL_STATE,
                &canonical_body,
            ),
            (
                events::HEADING_STATE_CHANGE_LOG,
                events::ZONE_STATE_CHANGE_LOG,
                &change_log_body,
            ),
        ];

        // Drift check against the persisted hashes before anything moves.
        let mut drift = Vec::new();
        for (heading, zone_id, new_body) in &zones {
            let Some(existing_body) = extract_zone_body(&existing, zone_id) else {
                continue;
            };
            let Some(persisted) = doc.runtime.projection_hashes.get(*heading) else {
                // First projection over a pre-existing zone: adopt it.
                continue;
            };
            let existing_hash = sha256_hex(&existing_body);
            if existing_hash != *persisted && existing_hash != sha256_hex(new_body) {
                drift.push(heading.to_string());
                self.store().append_audit(&format!(
                    "drift_detected | section={heading} | action=reconcile"
                ))?;
            }
        }

        // Rebuild: strip every managed section, then append fresh blocks.
        let mut base = existing.clone();
        for (heading, zone_id, _) in &zones {
            base = strip_managed_section(&base, heading, zone_id);
        }
        let mut next = base.trim_end().to_string();
        for (heading, zone_id, body) in &zones {
            if !next.is_empty() {
                next.push_str("\n\n");
            }
            next.push_str(&render_section(heading, zone_id, body));
        }
        if !next.ends_with('\n') {
            next.push('\n');
        }

        let wrote = next != existing;
        let mut backup = None;
        if wrote {
            if doc.runtime.projection_mode == ProjectionMode::LegacyString && !existing.is_empty() {
                let backup_path = artifact_path.with_extension("md.bak");
                std::fs::write(&backup_path, &existing).map_err(|e| {
                    StatewardError::Projection(ProjectionError::Io {
                        path: backup_path.display().to_string(),
                        message: e.to_string(),
                    })
                })?;
                self.store().append_audit(&format!(
                    "legacy_projection_write | artifact={} | backup={}",
                    artifact_path.display(),
                    backup_path.display()
                ))?;
                backup = Some(backup_path.display().to_string());
            }
            crate::store::write_atomic(artifact_path, next.as_bytes())?;
        }

        // Persist the new body hashes; skip the save when nothing moved so a
        // no-op projection leaves the store untouched too.
        let mut hashes_changed = false;
        for (heading, _, body) in &zones {
            let hash = sha256_hex(body);
            if doc.runtime.projection_hashes.get(*heading) != Some(&hash) {
                doc.runtime
                    .projection_hashes
                    .insert(heading.to_string(), hash);
                hashes_changed = true;
            }
        }
        if hashes_changed {
            self.store().save(&mut doc)?;
        }

        Ok(ProjectionReport {
            wrote,
            drift,
            backup,
        })
    }
}
