//! Deterministic token normalization: light stemming plus a small synonym
//! canonicalization table.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

/// Built-in canonicalizations. Configuration entries are merged over these.
pub const BUILTIN_SYNONYMS: &[(&str, &str)] = &[
    ("redis", "cache"),
    ("caching", "cache"),
    ("latency", "timeout"),
    ("slow", "timeout"),
    ("slowness", "timeout"),
    ("crash", "fail"),
    ("crashed", "fail"),
    ("failure", "fail"),
    ("failed", "fail"),
    ("error", "fail"),
    ("errors", "fail"),
    ("exception", "fail"),
    ("exceptions", "fail"),
    ("connection", "connect"),
    ("connections", "connect"),
];

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_./-]+").expect("valid word regex"));

#[derive(Clone, Debug)]
pub struct Normalizer {
    synonyms: BTreeMap<String, String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

impl Normalizer {
    pub fn new(extra: &BTreeMap<String, String>) -> Self {
        let mut synonyms: BTreeMap<String, String> = BUILTIN_SYNONYMS
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        for (from, to) in extra {
            synonyms.insert(from.trim().to_lowercase(), to.trim().to_lowercase());
        }
        Self { synonyms }
    }

    /// Tokens in text order, duplicates kept.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        WORD_RE
            .find_iter(text)
            .filter_map(|m| self.normalize_token(m.as_str()))
            .collect()
    }

    /// Distinct tokens.
    pub fn keywords(&self, text: &str) -> BTreeSet<String> {
        self.tokenize(text).into_iter().collect()
    }

    /// Lowercase, trim punctuation, drop short tokens, stem, canonicalize.
    pub fn normalize_token(&self, raw: &str) -> Option<String> {
        let lowered = raw.to_lowercase();
        let value = lowered.trim_matches(|c| matches!(c, '.' | '_' | '/' | '-'));
        if value.chars().count() <= 2 {
            return None;
        }
        if let Some(canonical) = self.synonyms.get(value) {
            return Some(canonical.clone());
        }
        let stemmed = stem(value);
        Some(self.synonyms.get(&stemmed).cloned().unwrap_or(stemmed))
    }
}

fn stem(value: &str) -> String {
    let len = value.len();
    if len > 4 && value.ends_with("ies") {
        format!("{}y", &value[..len - 3])
    } else if len > 5 && value.ends_with("ing") {
        value[..len - 3].to_string()
    } else if len > 4 && value.ends_with("ed") {
        value[..len - 2].to_string()
    } else if len > 3 && value.ends_with('s') {
        value[..len - 1].to_string()
    } else {
        value.to_string()
    }
}

/// Normalize a file path for set comparison: forward slashes, no `.`/empty segments.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}
