//! Canonical status and decision name constants for the Stateward kernel.
//!
//! Every audit line, DLQ record, learning event, and structured result in the
//! engine references outcomes by these string constants. Keeping them in one
//! module guarantees that the audit log, the retry scheduler's resolved-status
//! tables, and the projection change-log all agree on spelling.
//!
//! # Categories
//!
//! | Category   | Constants            | Description                              |
//! |------------|----------------------|------------------------------------------|
//! | Decision   | `DECISION_*`         | Resolver verdicts for one observation    |
//! | Ingest     | `STATUS_*`           | Terminal statuses of an ingest attempt   |
//! | Confirm    | `CONFIRM_*`          | Terminal statuses of a confirmation      |
//! | DLQ        | `DLQ_*`              | Dead-letter entry lifecycle states       |
//! | Learning   | `OUTCOME_*`          | Ask-user outcomes fed to the learner     |
//! | Projection | `ZONE_*`, `HEADING_*`| Machine-managed artifact zones           |

// --- Resolver decisions ---

/// The observation clears the auto threshold and margin; commit directly.
pub const DECISION_AUTO_COMMIT: &str = "auto_commit";
/// The observation lands in the review band; queue a pending prompt.
pub const DECISION_ASK_USER: &str = "ask_user";
/// The observation is below the ask threshold; stash as tentative.
pub const DECISION_TENTATIVE_REJECT: &str = "tentative_reject";

// --- Ingest statuses ---

/// A state record was written (or deleted, for a retract).
pub const STATUS_COMMITTED: &str = "committed";
/// A pending prompt was created and awaits a human decision.
pub const STATUS_PENDING_CONFIRMATION: &str = "pending_confirmation";
/// The observation was stashed without mutating state.
pub const STATUS_TENTATIVE: &str = "tentative";
/// The event id was already processed; nothing happened.
pub const STATUS_DUPLICATE: &str = "duplicate";
/// The payload failed schema validation and was quarantined.
pub const STATUS_VALIDATION_FAILED: &str = "validation_failed";

// --- Confirmation statuses ---

/// The confirmation resolved its prompt without a state mutation.
pub const CONFIRM_REJECTED: &str = "rejected";
/// No pending prompt exists for the referenced id.
pub const CONFIRM_NOT_FOUND: &str = "not_found";
/// The confirmation's entity/domain disagree with the stored prompt.
pub const CONFIRM_MISMATCH: &str = "mismatch";

// --- Signal status ---

/// A signal batch was processed; see the per-item counters.
pub const STATUS_OK: &str = "ok";

// --- DLQ lifecycle ---

/// Waiting for its next retry window.
pub const DLQ_PENDING_RETRY: &str = "pending_retry";
/// A retry produced a terminal, successful status.
pub const DLQ_RESOLVED: &str = "resolved";
/// Retries exhausted or the result status can never succeed.
pub const DLQ_FAILED_PERMANENT: &str = "failed_permanent";
/// The quarantined payload names a schema the scheduler cannot dispatch.
pub const DLQ_UNSUPPORTED_SCHEMA: &str = "unsupported_schema";

// --- Learning outcomes ---

/// The user confirmed the proposed change as-is.
pub const OUTCOME_ACCEPTED: &str = "accepted";
/// The user rejected or edited the proposed change.
pub const OUTCOME_CORRECTED: &str = "corrected";

// --- Projection zones ---

/// Zone id of the committed-state section.
pub const ZONE_CANONICAL_STATE: &str = "canonical_state";
/// Zone id of the rolling change-log section.
pub const ZONE_STATE_CHANGE_LOG: &str = "state_change_log";
/// Heading of the committed-state section.
pub const HEADING_CANONICAL_STATE: &str = "Canonical State (Machine Managed)";
/// Heading of the rolling change-log section.
pub const HEADING_STATE_CHANGE_LOG: &str = "State Change Log (Machine Managed)";

// --- Aggregates ---

/// All terminal ingest statuses, for iteration and validation.
pub const ALL_INGEST_STATUSES: &[&str] = &[
    STATUS_COMMITTED,
    STATUS_PENDING_CONFIRMATION,
    STATUS_TENTATIVE,
    STATUS_DUPLICATE,
    STATUS_VALIDATION_FAILED,
];

/// All DLQ lifecycle states.
pub const ALL_DLQ_STATUSES: &[&str] = &[DLQ_PENDING_RETRY, DLQ_RESOLVED, DLQ_FAILED_PERMANENT];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_constants() {
        assert_eq!(DECISION_AUTO_COMMIT, "auto_commit");
        assert_eq!(DECISION_ASK_USER, "ask_user");
        assert_eq!(DECISION_TENTATIVE_REJECT, "tentative_reject");
    }

    #[test]
    fn ingest_status_constants() {
        assert_eq!(STATUS_COMMITTED, "committed");
        assert_eq!(STATUS_PENDING_CONFIRMATION, "pending_confirmation");
        assert_eq!(STATUS_TENTATIVE, "tentative");
        assert_eq!(STATUS_DUPLICATE, "duplicate");
        assert_eq!(STATUS_VALIDATION_FAILED, "validation_failed");
    }

    #[test]
    fn confirmation_constants() {
        assert_eq!(CONFIRM_REJECTED, "rejected");
        assert_eq!(CONFIRM_NOT_FOUND, "not_found");
        assert_eq!(CONFIRM_MISMATCH, "mismatch");
    }

    #[test]
    fn dlq_constants() {
        assert_eq!(DLQ_PENDING_RETRY, "pending_retry");
        assert_eq!(DLQ_RESOLVED, "resolved");
        assert_eq!(DLQ_FAILED_PERMANENT, "failed_permanent");
        assert_eq!(DLQ_UNSUPPORTED_SCHEMA, "unsupported_schema");
    }

    #[test]
    fn learning_outcome_constants() {
        assert_eq!(OUTCOME_ACCEPTED, "accepted");
        assert_eq!(OUTCOME_CORRECTED, "corrected");
    }

    #[test]
    fn projection_constants() {
        assert_eq!(ZONE_CANONICAL_STATE, "canonical_state");
        assert_eq!(ZONE_STATE_CHANGE_LOG, "state_change_log");
        assert_eq!(HEADING_CANONICAL_STATE, "Canonical State (Machine Managed)");
        assert_eq!(HEADING_STATE_CHANGE_LOG, "State Change Log (Machine Managed)");
    }

    #[test]
    fn aggregates_have_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for status in ALL_INGEST_STATUSES {
            assert!(seen.insert(status), "duplicate ingest status: {status}");
        }
        seen.clear();
        for status in ALL_DLQ_STATUSES {
            assert!(seen.insert(status), "duplicate DLQ status: {status}");
        }
    }
}
