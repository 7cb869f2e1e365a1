//! Strict JSON Schema validation for every inbound payload.
//!
//! Four schema documents ship with the engine under `schemas/` and are
//! embedded at compile time: `observation`, `confirmation`, `signal`, and
//! the optional `intent` schema enforced on command-mode classifier output.
//! All use `additionalProperties: false`, closed enumerations, RFC-3339
//! timestamps, uuid formats, and the entity-id pattern.
//!
//! A schema that fails to parse or compile is a fatal construction error
//! ([`SchemaError`]): the engine refuses to start rather than ingest
//! unvalidated payloads.
//!
//! # Connections
//!
//! - [`crate::ingest`], [`crate::signal`], and [`crate::confirm`] validate
//!   before touching the store; failures go to the DLQ ([`crate::dlq`]).
//! - [`crate::intent`]'s command mode validates classifier stdout.

use jsonschema::Validator;
use serde_json::Value;

use crate::errors::SchemaError;

const OBSERVATION_SCHEMA: &str = include_str!("../schemas/observation.schema.json");
const CONFIRMATION_SCHEMA: &str = include_str!("../schemas/confirmation.schema.json");
const SIGNAL_SCHEMA: &str = include_str!("../schemas/signal.schema.json");
const INTENT_SCHEMA: &str = include_str!("../schemas/intent.schema.json");

// ---------------------------------------------------------------------------
// SchemaName
// ---------------------------------------------------------------------------

/// The shipped schema documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaName {
    Observation,
    Confirmation,
    Signal,
    Intent,
}

impl SchemaName {
    /// The wire string used in DLQ records and retry dispatch.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaName::Observation => "observation",
            SchemaName::Confirmation => "confirmation",
            SchemaName::Signal => "signal",
            SchemaName::Intent => "intent",
        }
    }

    /// Parse a wire string. Returns `None` for unknown schema names.
    pub fn parse(s: &str) -> Option<SchemaName> {
        match s {
            "observation" => Some(SchemaName::Observation),
            "confirmation" => Some(SchemaName::Confirmation),
            "signal" => Some(SchemaName::Signal),
            "intent" => Some(SchemaName::Intent),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SchemaValidator
// ---------------------------------------------------------------------------

/// Compiled validators for all shipped schemas.
pub struct SchemaValidator {
    observation: Validator,
    confirmation: Validator,
    signal: Validator,
    intent: Validator,
}

impl SchemaValidator {
    /// Compile every shipped schema. Fatal on any compile failure.
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            observation: compile("observation", OBSERVATION_SCHEMA)?,
            confirmation: compile("confirmation", CONFIRMATION_SCHEMA)?,
            signal: compile("signal", SIGNAL_SCHEMA)?,
            intent: compile("intent", INTENT_SCHEMA)?,
        })
    }

    /// Validate a payload against a schema.
    ///
    /// Returns `Ok(())` when valid, or the full list of violation messages
    /// (instance path plus description) when not. Never panics on any input.
    pub fn validate(&self, schema: SchemaName, payload: &Value) -> Result<(), Vec<String>> {
        let validator = match schema {
            SchemaName::Observation => &self.observation,
            SchemaName::Confirmation => &self.confirmation,
            SchemaName::Signal => &self.signal,
            SchemaName::Intent => &self.intent,
        };
        let errors: Vec<String> = validator
            .iter_errors(payload)
            .map(|err| {
                let path = err.instance_path().to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{path}: {err}")
                }
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn compile(name: &str, text: &str) -> Result<Validator, SchemaError> {
    let schema: Value = serde_json::from_str(text).map_err(|err| SchemaError::Malformed {
        name: name.to_string(),
        message: err.to_string(),
    })?;
    jsonschema::options()
        .should_validate_formats(true)
        .build(&schema)
        .map_err(|err| SchemaError::Uncompilable {
            name: name.to_string(),
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> SchemaValidator {
        SchemaValidator::new().expect("shipped schemas compile")
    }

    fn valid_observation() -> Value {
        json!({
            "event_id": "cf98a1f4-5208-4dfe-90f2-9bd2f3a6a111",
            "event_ts": "2026-02-20T08:00:00Z",
            "domain": "travel",
            "entity_id": "user:primary",
            "field": "travel.location",
            "candidate_value": "Tahoe",
            "intent": "assertive",
            "source": {"type": "conversation_assertive", "ref": "thread:1:msg:1"},
            "corroborators": []
        })
    }

    #[test]
    fn observation_valid_payload_passes() {
        assert!(validator()
            .validate(SchemaName::Observation, &valid_observation())
            .is_ok());
    }

    #[test]
    fn observation_null_candidate_value_is_allowed() {
        let mut payload = valid_observation();
        payload["candidate_value"] = Value::Null;
        payload["intent"] = json!("retract");
        assert!(validator()
            .validate(SchemaName::Observation, &payload)
            .is_ok());
    }

    #[test]
    fn observation_extra_property_rejected() {
        let mut payload = valid_observation();
        payload["surprise"] = json!(true);
        let errors = validator()
            .validate(SchemaName::Observation, &payload)
            .unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn observation_bad_domain_rejected() {
        let mut payload = valid_observation();
        payload["domain"] = json!("cooking");
        assert!(validator()
            .validate(SchemaName::Observation, &payload)
            .is_err());
    }

    #[test]
    fn observation_bad_entity_id_rejected() {
        let mut payload = valid_observation();
        payload["entity_id"] = json!("robot:primary");
        assert!(validator()
            .validate(SchemaName::Observation, &payload)
            .is_err());
    }

    #[test]
    fn observation_bad_uuid_rejected() {
        let mut payload = valid_observation();
        payload["event_id"] = json!("not-a-uuid");
        assert!(validator()
            .validate(SchemaName::Observation, &payload)
            .is_err());
    }

    #[test]
    fn observation_unknown_source_type_rejected() {
        let mut payload = valid_observation();
        payload["source"]["type"] = json!("carrier_pigeon");
        assert!(validator()
            .validate(SchemaName::Observation, &payload)
            .is_err());
    }

    #[test]
    fn observation_collects_multiple_errors() {
        let mut payload = valid_observation();
        payload["domain"] = json!("cooking");
        payload["intent"] = json!("sarcastic");
        let errors = validator()
            .validate(SchemaName::Observation, &payload)
            .unwrap_err();
        assert!(errors.len() >= 2, "expected both violations, got {errors:?}");
    }

    #[test]
    fn confirmation_valid_payload_passes() {
        let payload = json!({
            "prompt_id": "3e0c8f62-1fb3-4a55-9f37-0c2d6d2b1111",
            "entity_id": "user:primary",
            "domain": "travel",
            "proposed_change": "alert -> Leave for Tahoe Friday",
            "confidence": 0.66,
            "reason_summary": ["review band"],
            "action": "edit",
            "edited_value": "Leave for Tahoe Saturday",
            "ts": "2026-02-20T08:00:00Z"
        });
        assert!(validator()
            .validate(SchemaName::Confirmation, &payload)
            .is_ok());
    }

    #[test]
    fn confirmation_bad_action_rejected() {
        let payload = json!({
            "prompt_id": "3e0c8f62-1fb3-4a55-9f37-0c2d6d2b1111",
            "entity_id": "user:primary",
            "domain": "travel",
            "proposed_change": "x",
            "confidence": 0.5,
            "action": "maybe",
            "ts": "2026-02-20T08:00:00Z"
        });
        assert!(validator()
            .validate(SchemaName::Confirmation, &payload)
            .is_err());
    }

    #[test]
    fn confirmation_confidence_out_of_range_rejected() {
        let payload = json!({
            "prompt_id": "3e0c8f62-1fb3-4a55-9f37-0c2d6d2b1111",
            "entity_id": "user:primary",
            "domain": "travel",
            "proposed_change": "x",
            "confidence": 1.5,
            "action": "confirm",
            "ts": "2026-02-20T08:00:00Z"
        });
        assert!(validator()
            .validate(SchemaName::Confirmation, &payload)
            .is_err());
    }

    #[test]
    fn signal_valid_payload_passes() {
        let payload = json!({
            "signal_id": "7d7cbe2c-30c6-4a3e-8d3f-111111111111",
            "event_ts": "2026-02-20T08:00:00Z",
            "source": {"kind": "calendar", "mode": "poll", "ref": "gcal:primary"},
            "entity_id": "user:primary",
            "items": [{
                "domain": "travel",
                "field": "travel.next_event",
                "ref": "calendar_event:abc",
                "value": {"start": "2026-02-22T07:00:00-08:00"},
                "intent": "planning",
                "corroborators": []
            }]
        });
        assert!(validator().validate(SchemaName::Signal, &payload).is_ok());
    }

    #[test]
    fn signal_bad_kind_rejected() {
        let payload = json!({
            "signal_id": "7d7cbe2c-30c6-4a3e-8d3f-111111111111",
            "event_ts": "2026-02-20T08:00:00Z",
            "source": {"kind": "fax", "mode": "poll", "ref": "x"},
            "entity_id": "user:primary",
            "items": []
        });
        assert!(validator().validate(SchemaName::Signal, &payload).is_err());
    }

    #[test]
    fn intent_output_schema_enforced() {
        let good = json!({"intent": "planning", "confidence": 0.8, "reason": "future tense"});
        assert!(validator().validate(SchemaName::Intent, &good).is_ok());

        let bad = json!({"intent": "sarcastic", "confidence": 0.8});
        assert!(validator().validate(SchemaName::Intent, &bad).is_err());

        let freeform = json!("planning");
        assert!(validator().validate(SchemaName::Intent, &freeform).is_err());
    }

    #[test]
    fn schema_name_roundtrip() {
        for name in [
            SchemaName::Observation,
            SchemaName::Confirmation,
            SchemaName::Signal,
            SchemaName::Intent,
        ] {
            assert_eq!(SchemaName::parse(name.as_str()), Some(name));
        }
        assert_eq!(SchemaName::parse("telemetry"), None);
    }
}
