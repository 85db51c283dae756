//! Cortex challenge gate.
//!
//! At stop time the agent declares which adversarial test categories it
//! covered. A category counts only when it is present and explicitly `true`
//! (or an object with `covered: true`). Absent, falsy, and merely truthy-looking
//! values are all missing. There is no partial credit.

#![deny(unsafe_code)]

use cortex_types::settings::BUILTIN_CHALLENGE_CATEGORIES;
use cortex_types::{ChallengeResult, ChallengesConfig, SessionId, Warning, WarningCode};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryCoverage {
    pub category: String,
    pub covered: bool,
    pub evidence: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChallengeReport {
    pub active_categories: Vec<String>,
    /// Project-specific challenge definitions, passed through from configuration.
    pub custom_paths: Vec<String>,
    pub results: Vec<CategoryCoverage>,
    pub missing_categories: Vec<String>,
    pub config_warnings: Vec<Warning>,
    pub ok: bool,
}

/// Evaluate declared coverage against the active categories. No I/O.
///
/// `ok` is `true` when nothing is missing, or when coverage is not required.
pub fn assess(coverage: &Map<String, Value>, config: &ChallengesConfig) -> ChallengeReport {
    let mut active: Vec<String> = Vec::new();
    for category in &config.active_categories {
        let category = category.trim();
        if !category.is_empty() && !active.iter().any(|c| c == category) {
            active.push(category.to_string());
        }
    }

    let mut config_warnings = Vec::new();
    let missing_builtin: Vec<&str> = BUILTIN_CHALLENGE_CATEGORIES
        .iter()
        .copied()
        .filter(|b| !active.iter().any(|c| c == b))
        .collect();
    if !missing_builtin.is_empty() {
        config_warnings.push(Warning::new(
            WarningCode::ConfigChallengeCategory,
            format!(
                "Built-in challenge categories missing from active set: {}",
                missing_builtin.join(", ")
            ),
        ));
    }

    let mut results = Vec::with_capacity(active.len());
    let mut missing = Vec::new();
    for category in &active {
        let (covered, mut evidence) = coerce(coverage.get(category));
        if !BUILTIN_CHALLENGE_CATEGORIES.contains(&category.as_str()) {
            evidence
                .entry("warning")
                .or_insert_with(|| Value::String("Unknown category".to_string()));
            config_warnings.push(Warning::new(
                WarningCode::ConfigChallengeCategory,
                format!("Unknown challenge category in active set: {category}"),
            ));
        }
        if !covered {
            missing.push(category.clone());
        }
        results.push(CategoryCoverage {
            category: category.clone(),
            covered,
            evidence: Value::Object(evidence),
        });
    }

    let ok = missing.is_empty() || !config.require_coverage;
    ChallengeReport {
        active_categories: active,
        custom_paths: config.custom_paths.clone(),
        results,
        missing_categories: missing,
        config_warnings,
        ok,
    }
}

impl ChallengeReport {
    /// One row per active category, for the session's closing write.
    pub fn records(&self, session_id: &SessionId) -> Vec<ChallengeResult> {
        self.results
            .iter()
            .map(|r| ChallengeResult {
                session_id: session_id.clone(),
                category: r.category.clone(),
                covered: r.covered,
                evidence: r.evidence.clone(),
            })
            .collect()
    }
}

/// Split a declared coverage value into `(covered, evidence)`.
fn coerce(raw: Option<&Value>) -> (bool, Map<String, Value>) {
    match raw {
        None | Some(Value::Null) => (false, Map::new()),
        Some(Value::Bool(b)) => (*b, Map::new()),
        Some(Value::Object(obj)) => {
            let covered = matches!(obj.get("covered"), Some(Value::Bool(true)));
            let evidence = obj
                .iter()
                .filter(|(k, _)| k.as_str() != "covered")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            (covered, evidence)
        }
        Some(other) => {
            let mut evidence = Map::new();
            evidence.insert("raw".to_string(), other.clone());
            (false, evidence)
        }
    }
}

/// Challenge gate for one configuration.
///
/// Evaluation writes nothing. The rows from [`ChallengeReport::records`] are
/// persisted with the session close.
pub struct ChallengeGate {
    config: ChallengesConfig,
}

impl ChallengeGate {
    pub fn new(config: ChallengesConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChallengesConfig {
        &self.config
    }

    pub fn evaluate(&self, session_id: &SessionId, coverage: &Map<String, Value>) -> ChallengeReport {
        let report = assess(coverage, &self.config);
        debug!(
            session_id = %session_id,
            ok = report.ok,
            missing = report.missing_categories.len(),
            "challenge coverage evaluated"
        );
        report
    }
}
