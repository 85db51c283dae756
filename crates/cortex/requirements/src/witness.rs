//! What the session's event log can vouch for.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use cortex_types::value::{non_empty_str, string_list};
use cortex_types::SessionEvent;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::evidence::{normalize_command, resolve_path, EvidenceRef};

const FILE_LIST_KEYS: [&str; 3] = ["target_files", "planned_files", "files"];
const FILE_KEYS: [&str; 3] = ["file_path", "path", "notebook_path"];
const COMMAND_KEYS: [&str; 2] = ["command", "cmd"];
const INPUT_KEYS: [&str; 2] = ["tool_input", "input"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Verified,
    Unverified,
    Uncheckable,
}

/// Tools, commands and files seen in tool-use events, normalized the same
/// way evidence references are.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WitnessLog {
    tools: BTreeSet<String>,
    commands: BTreeSet<String>,
    files: BTreeSet<PathBuf>,
}

impl WitnessLog {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a SessionEvent>, root: &Path) -> Self {
        let mut log = WitnessLog::default();
        for event in events.into_iter().filter(|e| e.hook.is_tool_use()) {
            if let Some(tool) = event.tool_name.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                log.tools.insert(tool.to_lowercase());
            }
            if let Value::Object(payload) = &event.payload {
                log.absorb(payload, root);
                for key in INPUT_KEYS {
                    if let Some(Value::Object(input)) = payload.get(key) {
                        log.absorb(input, root);
                    }
                }
            }
        }
        log
    }

    fn absorb(&mut self, map: &Map<String, Value>, root: &Path) {
        for key in COMMAND_KEYS {
            if let Some(command) = non_empty_str(map.get(key)) {
                let normalized = normalize_command(&command);
                if !normalized.is_empty() {
                    self.commands.insert(normalized);
                }
            }
        }
        for key in FILE_LIST_KEYS {
            for file in string_list(map.get(key)) {
                self.files.insert(resolve_path(&file, root));
            }
        }
        for key in FILE_KEYS {
            if let Some(file) = non_empty_str(map.get(key)) {
                self.files.insert(resolve_path(&file, root));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.commands.is_empty() && self.files.is_empty()
    }

    pub fn tools(&self) -> &BTreeSet<String> {
        &self.tools
    }

    pub fn commands(&self) -> &BTreeSet<String> {
        &self.commands
    }

    pub fn files(&self) -> &BTreeSet<PathBuf> {
        &self.files
    }

    /// Classify one evidence reference against the log.
    ///
    /// Paths: touched in the log → verified; neither touched nor on disk →
    /// unverified; on disk but never touched → uncheckable.
    /// Tools and commands: nothing of that kind logged → uncheckable; found →
    /// verified; otherwise unverified. Commands match when one is a contiguous
    /// run of the other's whitespace-separated tokens, in either direction.
    /// Notes are always uncheckable.
    pub fn verify(&self, evidence: &EvidenceRef) -> Verification {
        match evidence {
            EvidenceRef::Path(path) => {
                if self.files.contains(path) {
                    Verification::Verified
                } else if path.exists() {
                    Verification::Uncheckable
                } else {
                    Verification::Unverified
                }
            }
            EvidenceRef::Tool(tool) => {
                if self.tools.is_empty() {
                    Verification::Uncheckable
                } else if self.tools.contains(tool) {
                    Verification::Verified
                } else {
                    Verification::Unverified
                }
            }
            EvidenceRef::Command(command) => {
                if self.commands.is_empty() || command.is_empty() {
                    Verification::Uncheckable
                } else if self
                    .commands
                    .iter()
                    .any(|seen| contains_tokens(seen, command) || contains_tokens(command, seen))
                {
                    Verification::Verified
                } else {
                    Verification::Unverified
                }
            }
            EvidenceRef::Note(_) => Verification::Uncheckable,
        }
    }
}

/// Whether `needle`'s tokens appear as a contiguous run inside `haystack`'s.
fn contains_tokens(haystack: &str, needle: &str) -> bool {
    let haystack: Vec<&str> = haystack.split_whitespace().collect();
    let needle: Vec<&str> = needle.split_whitespace().collect();
    !needle.is_empty()
        && needle.len() <= haystack.len()
        && haystack.windows(needle.len()).any(|run| run == needle.as_slice())
}
