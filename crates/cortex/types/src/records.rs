use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionId;

/// A recorded failed approach, as handed to the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewGraveyardEntry {
    pub session_id: Option<SessionId>,
    pub summary: String,
    pub reason: String,
    pub files: Vec<String>,
    pub keywords: Vec<String>,
}

/// A persisted graveyard entry. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraveyardEntry {
    pub id: i64,
    pub session_id: Option<SessionId>,
    pub summary: String,
    pub reason: String,
    pub files: Vec<String>,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one invariant suite run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantStatus {
    Pass,
    Fail,
    Error,
    Missing,
    /// A session-authored test promoted into the invariant suite set.
    Graduated,
}

impl InvariantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvariantStatus::Pass => "pass",
            InvariantStatus::Fail => "fail",
            InvariantStatus::Error => "error",
            InvariantStatus::Missing => "missing",
            InvariantStatus::Graduated => "graduated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(InvariantStatus::Pass),
            "fail" => Some(InvariantStatus::Fail),
            "error" => Some(InvariantStatus::Error),
            "missing" => Some(InvariantStatus::Missing),
            "graduated" => Some(InvariantStatus::Graduated),
            _ => None,
        }
    }
}

impl fmt::Display for InvariantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvariantResult {
    pub session_id: SessionId,
    pub test_path: String,
    pub status: InvariantStatus,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graduated_from: Option<String>,
}

impl InvariantResult {
    pub fn new(session_id: SessionId, test_path: impl Into<String>, status: InvariantStatus) -> Self {
        Self {
            session_id,
            test_path: test_path.into(),
            status,
            duration_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
            graduated_from: None,
        }
    }
}

/// Declared coverage of one challenge category at one stop evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResult {
    pub session_id: SessionId,
    pub category: String,
    pub covered: bool,
    pub evidence: Value,
}
