use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, machine-readable warning codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    ConfigParseError,
    ConfigChallengeCategory,
    SessionAutoStarted,
    SessionAlreadyStarted,
    ContractAlreadySet,
    GraveyardMatch,
    MalformedPayload,
    UnknownHook,
    StopPayloadMalformed,
    StopContractViolation,
    MissingStopClaim,
    RequirementAudit,
    RequirementNotInContract,
    RequirementNoContract,
    EvidenceUncheckable,
    ChallengeCoverage,
    InvariantFailure,
    InvariantsSkipped,
    FailedApproachIncomplete,
    PolicyAdvisory,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::ConfigParseError => "config_parse_error",
            WarningCode::ConfigChallengeCategory => "config_challenge_category",
            WarningCode::SessionAutoStarted => "session_auto_started",
            WarningCode::SessionAlreadyStarted => "session_already_started",
            WarningCode::ContractAlreadySet => "contract_already_set",
            WarningCode::GraveyardMatch => "graveyard_match",
            WarningCode::MalformedPayload => "malformed_payload",
            WarningCode::UnknownHook => "unknown_hook",
            WarningCode::StopPayloadMalformed => "stop_payload_malformed",
            WarningCode::StopContractViolation => "stop_contract_violation",
            WarningCode::MissingStopClaim => "missing_stop_claim",
            WarningCode::RequirementAudit => "requirement_audit",
            WarningCode::RequirementNotInContract => "requirement_not_in_contract",
            WarningCode::RequirementNoContract => "requirement_no_contract",
            WarningCode::EvidenceUncheckable => "evidence_uncheckable",
            WarningCode::ChallengeCoverage => "challenge_coverage",
            WarningCode::InvariantFailure => "invariant_failure",
            WarningCode::InvariantsSkipped => "invariants_skipped",
            WarningCode::FailedApproachIncomplete => "failed_approach_incomplete",
            WarningCode::PolicyAdvisory => "policy_advisory",
        }
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A warning surfaced in a hook response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
}

impl Warning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
