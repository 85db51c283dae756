use cortex_types::value::{first_str, non_empty_str, string_list};
use serde::Serialize;
use serde_json::{Map, Value};

const SUMMARY_KEYS: [&str; 4] = ["what_was_tried", "failed_summary", "approach", "failed_approach_summary"];
const REASON_KEYS: [&str; 3] = ["why_failed", "failure_reason", "reason"];
const FILE_KEYS: [&str; 3] = ["failed_files", "files", "target_files"];

/// An approach the agent tried and abandoned, destined for the graveyard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedApproach {
    pub summary: String,
    pub reason: String,
    pub files: Vec<String>,
}

/// Whether `fields` mentions a failed approach in any accepted shape.
pub fn mentions_failed_approach(fields: &Map<String, Value>) -> bool {
    fields.get("failed_approach").is_some_and(|v| !v.is_null())
        || SUMMARY_KEYS
            .iter()
            .chain(REASON_KEYS.iter())
            .filter(|k| **k != "reason")
            .any(|k| fields.contains_key(*k))
}

/// Extract a failed approach from one claim channel's fields.
///
/// `failed_approach` may be an object (`summary`/`what_was_tried`/`approach`,
/// `reason`/`why_failed`, `files`) or a bare summary string. Missing parts
/// fall back to the top-level aliases. Without both a summary and a reason
/// nothing is returned.
pub fn extract_failed_approach(fields: &Map<String, Value>) -> Option<FailedApproach> {
    let (mut summary, mut reason, mut files) = match fields.get("failed_approach") {
        Some(Value::Object(obj)) => (
            first_str(obj, &["summary", "what_was_tried", "approach"]),
            first_str(obj, &["reason", "why_failed"]),
            string_list(obj.get("files")),
        ),
        Some(value @ Value::String(_)) => (non_empty_str(Some(value)), None, Vec::new()),
        _ => (None, None, Vec::new()),
    };

    if summary.is_none() {
        summary = first_str(fields, &SUMMARY_KEYS);
    }
    if reason.is_none() {
        reason = first_str(fields, &REASON_KEYS);
    }
    if files.is_empty() {
        files = FILE_KEYS
            .iter()
            .map(|k| string_list(fields.get(*k)))
            .find(|list| !list.is_empty())
            .unwrap_or_default();
    }

    Some(FailedApproach {
        summary: summary?,
        reason: reason?,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn object_form() {
        let f = fields(json!({
            "failed_approach": {"summary": "cache by pointer", "why_failed": "aliasing", "files": ["src/cache.rs"]}
        }));
        assert_eq!(
            extract_failed_approach(&f),
            Some(FailedApproach {
                summary: "cache by pointer".into(),
                reason: "aliasing".into(),
                files: vec!["src/cache.rs".into()],
            })
        );
    }

    #[test]
    fn string_form_with_aliases() {
        let f = fields(json!({
            "failed_approach": "retry loop",
            "failure_reason": "livelock",
            "target_files": ["src/net.rs"]
        }));
        let approach = extract_failed_approach(&f).unwrap();
        assert_eq!(approach.summary, "retry loop");
        assert_eq!(approach.reason, "livelock");
        assert_eq!(approach.files, vec!["src/net.rs"]);
    }

    #[test]
    fn incomplete_is_dropped() {
        let f = fields(json!({"what_was_tried": "something"}));
        assert!(mentions_failed_approach(&f));
        assert_eq!(extract_failed_approach(&f), None);
        assert!(!mentions_failed_approach(&fields(json!({"reason": "x"}))));
    }
}
