use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key under which the requirement contract is persisted.
pub const CONTRACT_METADATA_KEY: &str = "requirement_contract";

/// Caller-supplied session identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a session.
///
/// `Open` is the only non-terminal state. A session leaves it exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    ClosedPass,
    ClosedFail,
    ClosedRevertRecommended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::ClosedPass => "closed_pass",
            SessionStatus::ClosedFail => "closed_fail",
            SessionStatus::ClosedRevertRecommended => "closed_revert_recommended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(SessionStatus::Open),
            "closed_pass" => Some(SessionStatus::ClosedPass),
            "closed_fail" => Some(SessionStatus::ClosedFail),
            "closed_revert_recommended" => Some(SessionStatus::ClosedRevertRecommended),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self, SessionStatus::Open)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative set of requirement ids fixed at session start.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementContract {
    pub required_requirement_ids: Vec<String>,
}

impl RequirementContract {
    /// Build a contract from raw ids, trimming blanks and duplicates while
    /// keeping first-seen order.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for id in ids {
            let id = id.as_ref().trim();
            if !id.is_empty() && !out.iter().any(|existing| existing == id) {
                out.push(id.to_string());
            }
        }
        Self {
            required_requirement_ids: out,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.required_requirement_ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.required_requirement_ids.iter().any(|r| r == id)
    }
}

/// A single agent session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub metadata: Map<String, Value>,
}

impl Session {
    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some() || self.status.is_closed()
    }

    /// The persisted requirement contract, if one was set at session start.
    pub fn requirement_contract(&self) -> Option<RequirementContract> {
        let raw = self.metadata.get(CONTRACT_METADATA_KEY)?;
        serde_json::from_value(raw.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            SessionStatus::Open,
            SessionStatus::ClosedPass,
            SessionStatus::ClosedFail,
            SessionStatus::ClosedRevertRecommended,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("pending"), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::ClosedRevertRecommended).unwrap();
        assert_eq!(json, "\"closed_revert_recommended\"");
    }

    #[test]
    fn contract_dedupes_and_trims() {
        let contract = RequirementContract::new(["R1", " R2 ", "", "R1"]);
        assert_eq!(contract.required_requirement_ids, vec!["R1", "R2"]);
        assert!(contract.contains("R2"));
        assert!(!contract.contains("R3"));
    }

    #[test]
    fn contract_read_from_metadata() {
        let mut metadata = Map::new();
        metadata.insert(
            CONTRACT_METADATA_KEY.into(),
            serde_json::json!({"required_requirement_ids": ["R1"]}),
        );
        let session = Session {
            session_id: "s1".into(),
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Open,
            metadata,
        };
        let contract = session.requirement_contract().unwrap();
        assert_eq!(contract.required_requirement_ids, vec!["R1"]);
        assert!(!session.is_closed());
    }
}
