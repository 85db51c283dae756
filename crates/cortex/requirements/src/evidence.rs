//! Evidence reference classification.
//!
//! Each evidence string is classified by shape alone:
//!
//! | Shape | Kind |
//! |---|---|
//! | `tool:<name>` | tool |
//! | `cmd:<command>`, or text naming a known runner (`pytest`, `cargo test`, ...) | command |
//! | contains `/` or `\`, or starts with `.` / `~` | path |
//! | anything else | note |

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(pytest|npm|pnpm|yarn|npx|ruff|mypy|go test|cargo test|python\s+-m)\b")
        .expect("valid command regex")
});
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static SUCCESS_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[:\-]\s*(ok|pass|passed|success|succeeded)$").expect("valid suffix regex")
});
static LINE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\d+(:\d+|-\d+)?$").expect("valid line suffix regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Path,
    Command,
    Tool,
    Note,
}

/// A classified evidence reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvidenceRef {
    /// Absolute, lexically normalized path.
    Path(PathBuf),
    /// Normalized command text.
    Command(String),
    /// Lowercased tool name.
    Tool(String),
    Note(String),
}

impl EvidenceRef {
    pub fn classify(reference: &str, root: &Path) -> Self {
        let text = reference.trim();
        if let Some(rest) = strip_prefix_ci(text, "tool:") {
            return EvidenceRef::Tool(rest.trim().to_lowercase());
        }
        if let Some(rest) = strip_prefix_ci(text, "cmd:") {
            return EvidenceRef::Command(normalize_command(rest));
        }
        if looks_like_command(text) {
            return EvidenceRef::Command(normalize_command(text));
        }
        match evidence_path(text, root) {
            Some(path) => EvidenceRef::Path(path),
            None => EvidenceRef::Note(text.to_string()),
        }
    }

    pub fn kind(&self) -> EvidenceKind {
        match self {
            EvidenceRef::Path(_) => EvidenceKind::Path,
            EvidenceRef::Command(_) => EvidenceKind::Command,
            EvidenceRef::Tool(_) => EvidenceKind::Tool,
            EvidenceRef::Note(_) => EvidenceKind::Note,
        }
    }
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

pub fn looks_like_command(text: &str) -> bool {
    COMMAND_RE.is_match(&text.to_lowercase())
}

/// Lowercase, strip backticks, collapse whitespace, drop a trailing
/// success marker such as `: passed`.
pub fn normalize_command(text: &str) -> String {
    let value = text.replace('`', "").trim().to_lowercase();
    let value = WHITESPACE_RE.replace_all(&value, " ");
    SUCCESS_SUFFIX_RE.replace(&value, "").trim().to_string()
}

/// Extract a path from an evidence string, resolved against `root`.
///
/// URLs are not paths. `#anchor`, `:line`, `:line:col` and `:a-b` suffixes and
/// trailing punctuation are stripped. When the text has spaces, only the first
/// token is used if it looks like a path.
pub fn evidence_path(reference: &str, root: &Path) -> Option<PathBuf> {
    let text = reference.trim();
    if text.is_empty() || text.starts_with("http://") || text.starts_with("https://") {
        return None;
    }

    let mut path_text = text.split('#').next().unwrap_or("").trim();
    if path_text.contains(char::is_whitespace) {
        if let Some(first) = path_text.split_whitespace().next() {
            if looks_like_path(first) {
                path_text = first;
            }
        }
    }
    let stripped = LINE_SUFFIX_RE.replace(path_text, "");
    let path_text = stripped.trim().trim_end_matches(['.', ',', ';', ':']);
    if path_text.is_empty() || !looks_like_path(path_text) {
        return None;
    }
    Some(resolve_path(path_text, root))
}

fn looks_like_path(text: &str) -> bool {
    text.contains('/') || text.contains('\\') || text.starts_with('.') || text.starts_with('~')
}

/// Resolve against `root` (expanding `~`) and normalize `.`/`..` lexically.
pub fn resolve_path(text: &str, root: &Path) -> PathBuf {
    let text = text.replace('\\', "/");
    let expanded = match text.strip_prefix("~/") {
        Some(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => PathBuf::from(&text),
        },
        None => PathBuf::from(&text),
    };
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        root.join(expanded)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
