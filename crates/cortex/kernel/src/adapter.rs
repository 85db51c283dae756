//! Provider adapters.
//!
//! Hosts name the same hooks and fields differently. An adapter maps a host's
//! event name to a canonical [`HookKind`] and rewrites known field aliases, so
//! that nothing past [`Adapter::normalize`] sees provider-specific names.

use std::str::FromStr;

use cortex_types::{HookEvent, HookKind};
use serde_json::{Map, Value};

/// Field aliases rewritten onto canonical names when the canonical one is absent.
const FIELD_ALIASES: [(&str, &str); 5] = [
    ("tool", "tool_name"),
    ("toolName", "tool_name"),
    ("action", "tool_name"),
    ("sessionId", "session_id"),
    ("toolInput", "tool_input"),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Adapter {
    /// Accept every known naming.
    #[default]
    Auto,
    /// `SessionStart`, `PreToolUse`, `PostToolUse`, `Stop`.
    Claude,
    /// `start`, `before_tool`, `after_tool`, `done`.
    Aider,
}

impl Adapter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Adapter::Auto => "auto",
            Adapter::Claude => "claude",
            Adapter::Aider => "aider",
        }
    }

    /// Canonical hook kind for a host event name.
    ///
    /// Names compare case-insensitively with `-` and `_` ignored, so
    /// `PreToolUse`, `pre-tool-use` and `pre_tool_use` are the same hook.
    pub fn hook_kind(&self, event_name: &str) -> Option<HookKind> {
        let key: String = event_name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        let canonical = match key.as_str() {
            "sessionstart" => Some(HookKind::SessionStart),
            "pretooluse" => Some(HookKind::PreToolUse),
            "posttooluse" => Some(HookKind::PostToolUse),
            "stop" => Some(HookKind::Stop),
            _ => None,
        };
        let aider = match key.as_str() {
            "start" => Some(HookKind::SessionStart),
            "beforetool" => Some(HookKind::PreToolUse),
            "aftertool" => Some(HookKind::PostToolUse),
            "done" => Some(HookKind::Stop),
            _ => None,
        };
        match self {
            Adapter::Claude => canonical,
            Adapter::Aider | Adapter::Auto => canonical.or(aider),
        }
    }

    /// Turn a host event into a typed [`HookEvent`].
    pub fn normalize(&self, event_name: &str, payload: Value) -> HookEvent {
        let Some(kind) = self.hook_kind(event_name) else {
            return HookEvent::parse(event_name, payload);
        };
        let payload = match payload {
            Value::Object(map) => Value::Object(self.rewrite_fields(kind, map)),
            other => other,
        };
        HookEvent::parse(kind.as_str(), payload)
    }

    fn rewrite_fields(&self, kind: HookKind, mut map: Map<String, Value>) -> Map<String, Value> {
        for (alias, canonical) in FIELD_ALIASES {
            if map.get(canonical).map_or(true, Value::is_null) {
                if let Some(value) = map.remove(alias) {
                    map.insert(canonical.to_string(), value);
                }
            }
        }

        // Claude reports tool failures inside `tool_response`.
        if kind == HookKind::PostToolUse && map.get("status").map_or(true, Value::is_null) {
            let is_error = map
                .get("tool_response")
                .and_then(|r| r.get("is_error"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if is_error {
                map.insert("status".to_string(), Value::String("error".to_string()));
            }
        }
        map
    }
}

impl FromStr for Adapter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Adapter::Auto),
            "claude" => Ok(Adapter::Claude),
            "aider" => Ok(Adapter::Aider),
            other => Err(format!("unknown adapter '{other}' (expected auto, claude or aider)")),
        }
    }
}
