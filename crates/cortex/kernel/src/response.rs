//! Hook responses. One JSON object per hook call.

use cortex_challenges::ChallengeReport;
use cortex_graveyard::GraveyardMatch;
use cortex_invariants::InvariantReport;
use cortex_requirements::RequirementAuditReport;
use cortex_stop::{ClaimSource, Violation};
use cortex_types::{RequirementContract, SessionStatus, Warning};
use serde::Serialize;
use serde_json::Value;

use crate::error::KernelError;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStartResponse {
    pub ok: bool,
    pub session_id: String,
    /// `false` when the session already existed.
    pub created: bool,
    pub requirement_contract: Option<RequirementContract>,
    pub graveyard_matches: Vec<GraveyardMatch>,
    pub warnings: Vec<Warning>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolUseResponse {
    pub ok: bool,
    pub session_id: String,
    pub event_id: i64,
    pub auto_started: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub graveyard_matches: Vec<GraveyardMatch>,
    pub warnings: Vec<Warning>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StopResponse {
    /// The call was handled. Policy failures keep this `true`.
    pub ok: bool,
    pub proceed: bool,
    pub recommend_revert: bool,
    pub session_id: String,
    pub session_status: SessionStatus,
    pub challenge_report: ChallengeReport,
    pub requirement_audit_report: Option<RequirementAuditReport>,
    pub structured_stop_violation: bool,
    pub invariant_report: Option<InvariantReport>,
    pub claim_source: Option<ClaimSource>,
    pub violations: Vec<Violation>,
    pub graveyard_entry_id: Option<i64>,
    pub warnings: Vec<Warning>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub session_id: Option<String>,
    pub error: ErrorBody,
    pub warnings: Vec<Warning>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HookResponse {
    SessionStart(SessionStartResponse),
    ToolUse(ToolUseResponse),
    Stop(Box<StopResponse>),
    Error(ErrorResponse),
}

impl HookResponse {
    pub fn error(session_id: Option<String>, err: &KernelError, warnings: Vec<Warning>) -> Self {
        HookResponse::Error(ErrorResponse {
            ok: false,
            session_id,
            error: ErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
            },
            warnings,
        })
    }

    pub fn ok(&self) -> bool {
        match self {
            HookResponse::SessionStart(r) => r.ok,
            HookResponse::ToolUse(r) => r.ok,
            HookResponse::Stop(r) => r.ok,
            HookResponse::Error(r) => r.ok,
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        match self {
            HookResponse::SessionStart(r) => &r.warnings,
            HookResponse::ToolUse(r) => &r.warnings,
            HookResponse::Stop(r) => &r.warnings,
            HookResponse::Error(r) => &r.warnings,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|err| {
            serde_json::json!({
                "ok": false,
                "error": {"code": "serialization", "message": err.to_string()},
            })
        })
    }
}
