use std::fmt;

use cortex_types::value::string_list;
use cortex_types::{HooksConfig, Warning, WarningCode};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::failed_approach::{extract_failed_approach, mentions_failed_approach, FailedApproach};
use crate::trailer::{parse_trailer, Trailer};

/// Top-level keys that make a stop payload a native claim.
pub const CLAIM_KEYS: [&str; 4] = [
    "challenge_coverage",
    "requirement_audit",
    "required_requirement_ids",
    "failed_approach",
];

pub const STRUCTURED_KEY: &str = "cortex_stop";
const MESSAGE_KEYS: [&str; 2] = ["last_assistant_message", "assistant_message"];

/// The channel a stop claim was read from, highest precedence first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimSource {
    Native,
    StructuredPayload,
    MessageFallback,
}

impl ClaimSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimSource::Native => "native",
            ClaimSource::StructuredPayload => "structured_payload",
            ClaimSource::MessageFallback => "message_fallback",
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, ClaimSource::Native | ClaimSource::StructuredPayload)
    }
}

impl fmt::Display for ClaimSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the agent asserts at stop time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StopClaim {
    pub challenge_coverage: Option<Map<String, Value>>,
    pub requirement_audit: Option<Value>,
    pub required_requirement_ids: Vec<String>,
    pub failed_approach: Option<FailedApproach>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedStop {
    /// Empty when no channel yielded a claim.
    pub claim: StopClaim,
    pub source: Option<ClaimSource>,
    pub contract_violation: bool,
    pub warnings: Vec<Warning>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StopResolver {
    pub allow_message_fallback: bool,
    pub require_structured: bool,
}

impl From<&HooksConfig> for StopResolver {
    fn from(hooks: &HooksConfig) -> Self {
        Self {
            allow_message_fallback: hooks.allow_message_stop_fallback,
            require_structured: hooks.require_structured_stop_payload,
        }
    }
}

impl StopResolver {
    /// Resolve the claim from the first channel that yields one.
    ///
    /// A higher channel that yields an empty claim still wins. A malformed
    /// channel counts as absent. When a structured source is required, any
    /// other outcome is a contract violation.
    pub fn resolve(&self, payload: &Map<String, Value>) -> ResolvedStop {
        let mut warnings = Vec::new();
        let channel = self.native(payload).or_else(|| {
            self.structured(payload, &mut warnings)
                .or_else(|| self.message(payload, &mut warnings))
        });

        let (claim, source) = match channel {
            Some((source, fields)) => (claim_from(&fields, &mut warnings), Some(source)),
            None => {
                warnings.push(Warning::new(
                    WarningCode::MissingStopClaim,
                    "No stop claim found; include challenge_coverage and requirement_audit in the stop payload",
                ));
                (StopClaim::default(), None)
            }
        };

        let contract_violation = self.require_structured && !source.is_some_and(|s| s.is_structured());
        if contract_violation {
            let message = match source {
                Some(ClaimSource::MessageFallback) => {
                    "Structured stop payload is required; trailer-only claim is rejected"
                }
                _ => "Structured stop payload is required; include claim fields directly or via cortex_stop",
            };
            warnings.push(Warning::new(WarningCode::StopContractViolation, message));
        }
        debug!(
            source = source.map(|s| s.as_str()).unwrap_or("none"),
            contract_violation,
            "stop claim resolved"
        );

        ResolvedStop {
            claim,
            source,
            contract_violation,
            warnings,
        }
    }

    fn native(&self, payload: &Map<String, Value>) -> Option<(ClaimSource, Map<String, Value>)> {
        CLAIM_KEYS
            .iter()
            .any(|k| payload.get(*k).is_some_and(|v| !v.is_null()))
            .then(|| (ClaimSource::Native, payload.clone()))
    }

    fn structured(
        &self,
        payload: &Map<String, Value>,
        warnings: &mut Vec<Warning>,
    ) -> Option<(ClaimSource, Map<String, Value>)> {
        let parsed = match payload.get(STRUCTURED_KEY)? {
            Value::Null => return None,
            Value::Object(map) => Ok(map.clone()),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err("expected a JSON object".to_string()),
                Err(err) => Err(err.to_string()),
            },
            _ => Err("expected an object".to_string()),
        };
        match parsed {
            Ok(fields) => Some((ClaimSource::StructuredPayload, fields)),
            Err(reason) => {
                warnings.push(Warning::new(
                    WarningCode::StopPayloadMalformed,
                    format!("Ignoring invalid {STRUCTURED_KEY} field: {reason}"),
                ));
                None
            }
        }
    }

    fn message(
        &self,
        payload: &Map<String, Value>,
        warnings: &mut Vec<Warning>,
    ) -> Option<(ClaimSource, Map<String, Value>)> {
        if !self.allow_message_fallback {
            return None;
        }
        let text = MESSAGE_KEYS.iter().find_map(|k| payload.get(*k).and_then(Value::as_str))?;
        match parse_trailer(text) {
            Trailer::Found(fields) => Some((ClaimSource::MessageFallback, fields)),
            Trailer::Invalid(reason) => {
                warnings.push(Warning::new(
                    WarningCode::StopPayloadMalformed,
                    format!("Ignoring invalid stop trailer: {reason}"),
                ));
                None
            }
            Trailer::Absent => None,
        }
    }
}

fn claim_from(fields: &Map<String, Value>, warnings: &mut Vec<Warning>) -> StopClaim {
    let challenge_coverage = match fields.get("challenge_coverage") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => {
            warnings.push(Warning::new(
                WarningCode::StopPayloadMalformed,
                "Ignoring challenge_coverage; expected an object",
            ));
            None
        }
    };

    let failed_approach = extract_failed_approach(fields);
    if failed_approach.is_none() && mentions_failed_approach(fields) {
        warnings.push(Warning::new(
            WarningCode::FailedApproachIncomplete,
            "Failed approach needs both a summary and a reason; not recorded",
        ));
    }

    StopClaim {
        challenge_coverage,
        requirement_audit: fields.get("requirement_audit").filter(|v| !v.is_null()).cloned(),
        required_requirement_ids: string_list(fields.get("required_requirement_ids")),
        failed_approach,
    }
}
