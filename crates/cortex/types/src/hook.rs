//! Typed hook events.
//!
//! Adapters turn provider-specific requests into a canonical hook name plus a
//! JSON payload with canonical field names. [`HookEvent::parse`] then lifts that
//! pair into one of the known shapes. Anything that does not fit becomes
//! [`HookEvent::Unknown`] or [`HookEvent::Malformed`], and every consumer has to
//! handle those two variants explicitly.

use serde_json::{Map, Value};

use crate::event::HookKind;
use crate::session::{RequirementContract, SessionId};
use crate::value::{as_bool, first_str, non_empty_str, string_list, unique};

#[derive(Clone, Debug, PartialEq)]
pub struct SessionStartPayload {
    pub session_id: Option<SessionId>,
    /// Free-text task description (`task` or `objective`).
    pub task: Option<String>,
    pub target_files: Vec<String>,
    pub contract: Option<RequirementContract>,
    pub raw: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolUsePayload {
    pub session_id: Option<SessionId>,
    pub tool_name: Option<String>,
    pub status: Option<String>,
    pub raw: Map<String, Value>,
}

impl ToolUsePayload {
    /// Whether the tool reported a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.status.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("error" | "failed" | "fail")
        )
    }

    /// Failure description (`error` or `message`).
    pub fn failure_text(&self) -> String {
        first_str(&self.raw, &["error", "message"]).unwrap_or_default()
    }

    pub fn target_files(&self) -> Vec<String> {
        string_list(self.raw.get("target_files"))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StopPayload {
    pub session_id: Option<SessionId>,
    /// `run_invariants: false` skips the invariant run for this stop.
    pub run_invariants: bool,
    /// Extra runner arguments appended to every suite invocation.
    pub runner_args: Vec<String>,
    pub raw: Map<String, Value>,
}

/// A normalized hook call.
#[derive(Clone, Debug, PartialEq)]
pub enum HookEvent {
    SessionStart(SessionStartPayload),
    PreToolUse(ToolUsePayload),
    PostToolUse(ToolUsePayload),
    Stop(StopPayload),
    /// A hook name no adapter recognised.
    Unknown { name: String, raw: Value },
    /// A known hook whose payload is not a JSON object.
    Malformed {
        hook: HookKind,
        reason: String,
        raw: Value,
    },
}

impl HookEvent {
    /// Lift a canonical hook name and payload into a typed event.
    ///
    /// A `null` payload is treated as an empty object.
    pub fn parse(name: &str, payload: Value) -> Self {
        let Some(kind) = HookKind::parse(name) else {
            return HookEvent::Unknown {
                name: name.to_string(),
                raw: payload,
            };
        };

        let raw = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return HookEvent::Malformed {
                    hook: kind,
                    reason: format!("expected a JSON object payload, got {}", type_name(&other)),
                    raw: other,
                }
            }
        };

        match kind {
            HookKind::SessionStart => HookEvent::SessionStart(SessionStartPayload {
                session_id: session_id(&raw),
                task: first_str(&raw, &["task", "objective"]),
                target_files: string_list(raw.get("target_files")),
                contract: contract(&raw),
                raw,
            }),
            HookKind::PreToolUse => HookEvent::PreToolUse(tool_use(raw)),
            HookKind::PostToolUse => HookEvent::PostToolUse(tool_use(raw)),
            HookKind::Stop => {
                let mut runner_args = string_list(raw.get("runner_args"));
                runner_args.extend(string_list(raw.get("pytest_args")));
                HookEvent::Stop(StopPayload {
                    session_id: session_id(&raw),
                    run_invariants: as_bool(raw.get("run_invariants")).unwrap_or(true),
                    runner_args,
                    raw,
                })
            }
        }
    }

    pub fn kind(&self) -> Option<HookKind> {
        match self {
            HookEvent::SessionStart(_) => Some(HookKind::SessionStart),
            HookEvent::PreToolUse(_) => Some(HookKind::PreToolUse),
            HookEvent::PostToolUse(_) => Some(HookKind::PostToolUse),
            HookEvent::Stop(_) => Some(HookKind::Stop),
            HookEvent::Malformed { hook, .. } => Some(*hook),
            HookEvent::Unknown { .. } => None,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            HookEvent::SessionStart(p) => p.session_id.as_ref(),
            HookEvent::PreToolUse(p) | HookEvent::PostToolUse(p) => p.session_id.as_ref(),
            HookEvent::Stop(p) => p.session_id.as_ref(),
            HookEvent::Unknown { .. } | HookEvent::Malformed { .. } => None,
        }
    }
}

fn session_id(raw: &Map<String, Value>) -> Option<SessionId> {
    non_empty_str(raw.get("session_id")).map(SessionId::new)
}

fn tool_use(raw: Map<String, Value>) -> ToolUsePayload {
    let status = match raw.get("status") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };
    ToolUsePayload {
        session_id: session_id(&raw),
        tool_name: non_empty_str(raw.get("tool_name")),
        status,
        raw,
    }
}

/// Contract ids from `required_requirement_ids`, falling back to
/// `task_contract.required_requirement_ids` / `task_contract.required_ids`.
fn contract(raw: &Map<String, Value>) -> Option<RequirementContract> {
    let mut ids = string_list(raw.get("required_requirement_ids"));
    if ids.is_empty() {
        if let Some(Value::Object(task)) = raw.get("task_contract") {
            ids = string_list(task.get("required_requirement_ids"));
            if ids.is_empty() {
                ids = string_list(task.get("required_ids"));
            }
        }
    }
    let contract = RequirementContract::new(unique(ids));
    (!contract.is_empty()).then_some(contract)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
