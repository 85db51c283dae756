use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionId;

/// Monotonic event identifier assigned by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle hook that produced an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    SessionStart,
    PreToolUse,
    PostToolUse,
    Stop,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::SessionStart => "session_start",
            HookKind::PreToolUse => "pre_tool_use",
            HookKind::PostToolUse => "post_tool_use",
            HookKind::Stop => "stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session_start" => Some(HookKind::SessionStart),
            "pre_tool_use" => Some(HookKind::PreToolUse),
            "post_tool_use" => Some(HookKind::PostToolUse),
            "stop" => Some(HookKind::Stop),
            _ => None,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, HookKind::PreToolUse | HookKind::PostToolUse)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event as it is handed to the store for appending.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEvent {
    pub hook: HookKind,
    pub tool_name: Option<String>,
    pub status: Option<String>,
    pub payload: Value,
}

impl NewEvent {
    pub fn new(hook: HookKind, payload: Value) -> Self {
        Self {
            hook,
            tool_name: None,
            status: None,
            payload,
        }
    }

    pub fn with_tool(mut self, tool_name: Option<String>) -> Self {
        self.tool_name = tool_name;
        self
    }

    pub fn with_status(mut self, status: Option<String>) -> Self {
        self.status = status;
        self
    }
}

/// A persisted, immutable hook event. Part of the witness log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: EventId,
    pub session_id: SessionId,
    pub hook: HookKind,
    pub tool_name: Option<String>,
    pub status: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Filter for querying a session's events.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub hooks: Vec<HookKind>,
    pub tool_name: Option<String>,
    pub status: Option<String>,
    pub after: Option<EventId>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(mut self, hook: HookKind) -> Self {
        if !self.hooks.contains(&hook) {
            self.hooks.push(hook);
        }
        self
    }

    pub fn tool_use() -> Self {
        Self::new()
            .with_hook(HookKind::PreToolUse)
            .with_hook(HookKind::PostToolUse)
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn after(mut self, id: EventId) -> Self {
        self.after = Some(id);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if an event matches this filter. `limit` is applied by the caller.
    pub fn matches(&self, event: &SessionEvent) -> bool {
        if !self.hooks.is_empty() && !self.hooks.contains(&event.hook) {
            return false;
        }

        if let Some(ref tool) = self.tool_name {
            if event.tool_name.as_deref() != Some(tool.as_str()) {
                return false;
            }
        }

        if let Some(ref status) = self.status {
            if event.status.as_deref() != Some(status.as_str()) {
                return false;
            }
        }

        if let Some(after) = self.after {
            if event.id <= after {
                return false;
            }
        }

        true
    }
}
