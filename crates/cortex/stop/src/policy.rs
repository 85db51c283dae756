//! The stop decision. Pure: no I/O, no clock.

use std::fmt;

use cortex_types::{HooksConfig, Mode, SessionStatus};
use serde::Serialize;

/// A failed gate, in reporting order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    Invariants,
    StopContract,
    RequirementAudit,
    ChallengeCoverage,
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Violation::Invariants => "invariants",
            Violation::StopContract => "stop_contract",
            Violation::RequirementAudit => "requirement_audit",
            Violation::ChallengeCoverage => "challenge_coverage",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StopDecision {
    pub status: SessionStatus,
    pub recommend_revert: bool,
    pub violations: Vec<Violation>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StopPolicy {
    pub mode: Mode,
    /// In advisory mode, escalate a contract violation to a revert recommendation.
    pub hard_contract_violation_in_advisory: bool,
}

impl From<&HooksConfig> for StopPolicy {
    fn from(hooks: &HooksConfig) -> Self {
        Self {
            mode: hooks.mode,
            hard_contract_violation_in_advisory: hooks.hard_contract_violation_in_advisory,
        }
    }
}

impl StopPolicy {
    pub fn decide(
        &self,
        challenge_ok: bool,
        invariant_ok: bool,
        audit_ok: bool,
        contract_violation: bool,
    ) -> StopDecision {
        let mut violations = Vec::new();
        if !invariant_ok {
            violations.push(Violation::Invariants);
        }
        if contract_violation {
            violations.push(Violation::StopContract);
        }
        if !audit_ok {
            violations.push(Violation::RequirementAudit);
        }
        if !challenge_ok {
            violations.push(Violation::ChallengeCoverage);
        }

        let (status, recommend_revert) = match self.mode {
            Mode::Strict if !violations.is_empty() => (SessionStatus::ClosedFail, true),
            Mode::Strict => (SessionStatus::ClosedPass, false),
            Mode::Advisory if contract_violation && self.hard_contract_violation_in_advisory => {
                (SessionStatus::ClosedRevertRecommended, true)
            }
            Mode::Advisory => (SessionStatus::ClosedPass, false),
        };

        StopDecision {
            status,
            recommend_revert,
            violations,
        }
    }
}

/// Decide with the default advisory escalation (none).
pub fn decide(
    mode: Mode,
    challenge_ok: bool,
    invariant_ok: bool,
    audit_ok: bool,
    contract_violation: bool,
) -> StopDecision {
    StopPolicy {
        mode,
        hard_contract_violation_in_advisory: false,
    }
    .decide(challenge_ok, invariant_ok, audit_ok, contract_violation)
}
