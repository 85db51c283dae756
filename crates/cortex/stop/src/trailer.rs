//! Stop claims embedded in free-form assistant text.
//!
//! Recognised, in order:
//!
//! 1. a fenced block tagged `cortex-stop` or `cortex_stop`;
//! 2. a fenced `json` block that mentions `challenge_coverage`;
//! 3. the last `CORTEX_STOP_JSON:` marker, followed by one JSON object.
//!
//! The first shape present decides; a later shape is not tried when an
//! earlier one is present but invalid.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

pub const STOP_MARKER: &str = "CORTEX_STOP_JSON:";

static TAGGED_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:cortex-stop|cortex_stop)\s*(\{.*?\})\s*```").expect("valid fence regex")
});
static JSON_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)```json\s*(\{.*?"challenge_coverage".*?\})\s*```"#).expect("valid json fence regex")
});

#[derive(Clone, Debug, PartialEq)]
pub enum Trailer {
    Found(Map<String, Value>),
    /// A trailer was present but did not hold a JSON object.
    Invalid(String),
    Absent,
}

pub fn parse_trailer(text: &str) -> Trailer {
    for re in [&*TAGGED_FENCE_RE, &*JSON_FENCE_RE] {
        if let Some(body) = re.captures(text).and_then(|c| c.get(1)) {
            return match serde_json::from_str::<Value>(body.as_str()) {
                Ok(Value::Object(map)) => Trailer::Found(map),
                Ok(_) => Trailer::Invalid("expected a JSON object".to_string()),
                Err(err) => Trailer::Invalid(err.to_string()),
            };
        }
    }

    let Some(idx) = text.rfind(STOP_MARKER) else {
        return Trailer::Absent;
    };
    let rest = text[idx + STOP_MARKER.len()..].trim_start();
    match serde_json::Deserializer::from_str(rest).into_iter::<Value>().next() {
        Some(Ok(Value::Object(map))) => Trailer::Found(map),
        Some(Ok(_)) => Trailer::Invalid("expected a JSON object".to_string()),
        Some(Err(err)) => Trailer::Invalid(err.to_string()),
        None => Trailer::Invalid("marker not followed by JSON".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn found(text: &str) -> Value {
        match parse_trailer(text) {
            Trailer::Found(map) => Value::Object(map),
            other => panic!("expected a trailer, got {other:?}"),
        }
    }

    #[test]
    fn tagged_fence() {
        let text = "Done.\n```cortex-stop\n{\"challenge_coverage\": {\"null_inputs\": true}}\n```\n";
        assert_eq!(found(text), json!({"challenge_coverage": {"null_inputs": true}}));
    }

    #[test]
    fn json_fence_needs_challenge_coverage() {
        let unrelated = "```json\n{\"a\": 1}\n```";
        assert_eq!(parse_trailer(unrelated), Trailer::Absent);
        let text = "```json\n{\"challenge_coverage\": {}}\n```";
        assert_eq!(found(text), json!({"challenge_coverage": {}}));
    }

    #[test]
    fn last_marker_wins_and_trailing_text_is_ignored() {
        let text = format!(
            "{STOP_MARKER} {{\"v\": 1}}\nmore\n{STOP_MARKER} {{\"v\": 2}} thanks!"
        );
        assert_eq!(found(&text), json!({"v": 2}));
    }

    #[test]
    fn invalid_trailers() {
        assert!(matches!(
            parse_trailer("CORTEX_STOP_JSON: {not json"),
            Trailer::Invalid(_)
        ));
        assert!(matches!(parse_trailer("CORTEX_STOP_JSON: [1, 2]"), Trailer::Invalid(_)));
        assert!(matches!(parse_trailer("CORTEX_STOP_JSON:"), Trailer::Invalid(_)));
        assert_eq!(parse_trailer("nothing to see"), Trailer::Absent);
    }

    proptest! {
        #[test]
        fn never_panics(text in "\\PC{0,200}") {
            let _ = parse_trailer(&text);
        }

        #[test]
        fn never_panics_near_marker(tail in "[{}\\[\\]\":, a-z0-9]{0,60}") {
            let _ = parse_trailer(&format!("{STOP_MARKER}{tail}"));
            let _ = parse_trailer(&format!("```cortex-stop\n{tail}\n```"));
        }
    }
}
