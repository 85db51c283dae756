//! Configuration for the Cortex kernel.
//!
//! Loaded from `cortex.toml` at the project root, layered with
//! `CORTEX_<SECTION>__<KEY>` environment overrides. Every section falls back to
//! its defaults, so a missing file is the same as an empty one.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the configuration file looked up at the project root.
pub const CONFIG_FILE_NAME: &str = "cortex.toml";

/// Built-in challenge categories.
pub const BUILTIN_CHALLENGE_CATEGORIES: [&str; 4] = [
    "null_inputs",
    "boundary_values",
    "error_handling",
    "graveyard_regression",
];

/// Enforcement mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Strict,
    #[default]
    Advisory,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Strict => "strict",
            Mode::Advisory => "advisory",
        }
    }
}

/// Where invariant suites run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Host,
    Container,
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CortexConfig {
    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(default)]
    pub challenges: ChallengesConfig,

    #[serde(default)]
    pub invariants: InvariantsConfig,

    #[serde(default)]
    pub graveyard: GraveyardConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,

    /// Set when the file existed but could not be parsed.
    #[serde(skip)]
    pub parse_error: Option<String>,
}

/// Stop-time enforcement policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub mode: Mode,
    pub require_structured_stop_payload: bool,
    pub allow_message_stop_fallback: bool,
    pub require_requirement_audit: bool,
    pub require_evidence_for_passed_requirement: bool,
    /// Promote a contract violation to a revert recommendation in advisory mode.
    pub hard_contract_violation_in_advisory: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Advisory,
            require_structured_stop_payload: false,
            allow_message_stop_fallback: false,
            require_requirement_audit: false,
            require_evidence_for_passed_requirement: true,
            hard_contract_violation_in_advisory: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengesConfig {
    pub active_categories: Vec<String>,
    /// Project-specific challenge definition files, reported back as-is.
    pub custom_paths: Vec<String>,
    pub require_coverage: bool,
}

impl Default for ChallengesConfig {
    fn default() -> Self {
        Self {
            active_categories: BUILTIN_CHALLENGE_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            custom_paths: Vec::new(),
            require_coverage: true,
        }
    }
}

/// Invariant suite execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvariantsConfig {
    /// Suite paths, relative to the project root unless absolute.
    pub suite_paths: Vec<String>,
    pub run_on_stop: bool,
    /// Host runner command; the suite path is appended.
    pub runner: Vec<String>,
    /// Runner exit codes that mean "could not run" rather than "tests failed".
    pub error_exit_codes: Vec<i32>,
    pub timeout_secs: u64,
    pub execution_mode: ExecutionMode,
    pub container_engine: String,
    pub container_image: String,
    pub container_workdir: String,
    pub container_runner: Vec<String>,
    pub graduation_dir: String,
}

impl Default for InvariantsConfig {
    fn default() -> Self {
        Self {
            suite_paths: Vec::new(),
            run_on_stop: true,
            runner: vec!["pytest".to_string()],
            error_exit_codes: vec![2, 3, 4],
            timeout_secs: 60,
            execution_mode: ExecutionMode::Host,
            container_engine: "docker".to_string(),
            container_image: "python:3.11-slim".to_string(),
            container_workdir: "/workspace".to_string(),
            container_runner: vec!["python".into(), "-m".into(), "pytest".into()],
            graduation_dir: "tests/invariants/graduated".to_string(),
        }
    }
}

/// Graveyard matching thresholds and blend weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraveyardConfig {
    pub enabled: bool,
    pub max_matches: usize,
    pub similarity_threshold: f64,
    pub min_keyword_overlap: usize,
    pub keyword_weight: f64,
    pub semantic_weight: f64,
    pub file_weight: f64,
    /// Newest entries considered when no full-text index is available.
    pub corpus_limit: usize,
    /// Full-text shortlist size.
    pub candidate_limit: usize,
    /// Extra token canonicalizations, merged over the built-in table.
    pub synonyms: BTreeMap<String, String>,
}

impl Default for GraveyardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_matches: 5,
            similarity_threshold: 0.35,
            min_keyword_overlap: 1,
            keyword_weight: 0.45,
            semantic_weight: 0.30,
            file_weight: 0.25,
            corpus_limit: 200,
            candidate_limit: 80,
            synonyms: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database path, relative to the project root unless absolute.
    pub path: String,
    pub lock_retry_attempts: u32,
    pub lock_retry_backoff_ms: u64,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: ".cortex/cortex.db".to_string(),
            lock_retry_attempts: 5,
            lock_retry_backoff_ms: 25,
            busy_timeout_ms: 5000,
        }
    }
}

impl CortexConfig {
    /// Load `cortex.toml` from a project root.
    ///
    /// Never fails: a malformed file yields the defaults with `parse_error` set.
    pub fn load_from_root(root: &Path) -> Self {
        Self::load(&root.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from a specific file. See [`CortexConfig::load_from_root`].
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "config parse failed, using defaults");
                Self {
                    source_path: Some(path.to_path_buf()),
                    parse_error: Some(err.to_string()),
                    ..Self::default()
                }
            }
        }
    }

    /// Load configuration, surfacing parse failures.
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        Self::try_load_with_env(path, None)
    }

    /// `env` replaces the process environment when set.
    fn try_load_with_env(
        path: &Path,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let load_err = |source| ConfigError::Load {
            path: display.clone(),
            source,
        };

        let builder = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                ::config::Environment::with_prefix("CORTEX")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            );

        let mut config: CortexConfig = builder
            .build()
            .map_err(load_err)?
            .try_deserialize()
            .map_err(load_err)?;

        config.validate()?;
        if path.exists() {
            config.source_path = Some(path.to_path_buf());
        }
        Ok(config)
    }

    /// Reject values that would make the kernel misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.graveyard;
        for (field, value) in [
            ("graveyard.keyword_weight", g.keyword_weight),
            ("graveyard.semantic_weight", g.semantic_weight),
            ("graveyard.file_weight", g.file_weight),
            ("graveyard.similarity_threshold", g.similarity_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    reason: format!("must be a non-negative number, got {value}"),
                });
            }
        }
        if self.invariants.runner.is_empty() {
            return Err(ConfigError::Invalid {
                field: "invariants.runner".to_string(),
                reason: "must name at least one program".to_string(),
            });
        }
        if self.invariants.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "invariants.timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the database path against a project root.
    pub fn db_path(&self, root: &Path) -> PathBuf {
        resolve(root, &self.store.path)
    }
}

/// Resolve a configured path against the project root.
pub fn resolve(root: &Path, configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = CortexConfig::default();
        assert_eq!(config.hooks.mode, Mode::Advisory);
        assert!(!config.hooks.require_structured_stop_payload);
        assert!(config.hooks.require_evidence_for_passed_requirement);
        assert_eq!(config.challenges.active_categories.len(), 4);
        assert_eq!(config.invariants.error_exit_codes, vec![2, 3, 4]);
        assert_eq!(config.graveyard.max_matches, 5);
        assert_eq!(config.store.lock_retry_attempts, 5);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CortexConfig::load_from_root(dir.path());
        assert!(config.parse_error.is_none());
        assert!(config.source_path.is_none());
        assert_eq!(config.hooks, HooksConfig::default());
    }

    #[test]
    fn file_overrides_selected_keys() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
[hooks]
mode = "strict"
require_structured_stop_payload = true

[invariants]
suite_paths = ["tests/invariants"]
execution_mode = "container"

[challenges]
custom_paths = [".cortex/challenges/custom.toml"]

[graveyard]
similarity_threshold = 0.5
synonyms = { outage = "fail" }
"#,
        )
        .unwrap();

        let config = CortexConfig::load_from_root(dir.path());
        assert!(config.parse_error.is_none(), "{:?}", config.parse_error);
        assert_eq!(config.hooks.mode, Mode::Strict);
        assert!(config.hooks.require_structured_stop_payload);
        assert!(!config.hooks.allow_message_stop_fallback);
        assert_eq!(config.invariants.suite_paths, vec!["tests/invariants"]);
        assert_eq!(config.invariants.execution_mode, ExecutionMode::Container);
        assert_eq!(config.invariants.container_engine, "docker");
        assert_eq!(config.graveyard.similarity_threshold, 0.5);
        assert_eq!(config.challenges.custom_paths, vec![".cortex/challenges/custom.toml"]);
        assert_eq!(config.graveyard.synonyms.get("outage").map(String::as_str), Some("fail"));
        assert!(config.source_path.is_some());
    }

    #[test]
    fn env_overrides_use_section_double_underscore_key() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "[hooks]\nmode = \"advisory\"\n").unwrap();
        let env = HashMap::from([
            ("CORTEX_HOOKS__MODE".to_string(), "strict".to_string()),
            ("CORTEX_GRAVEYARD__MAX_MATCHES".to_string(), "2".to_string()),
        ]);

        let config =
            CortexConfig::try_load_with_env(&dir.path().join(CONFIG_FILE_NAME), Some(env)).unwrap();
        assert_eq!(config.hooks.mode, Mode::Strict);
        assert_eq!(config.graveyard.max_matches, 2);
        assert!(config.challenges.custom_paths.is_empty());
    }

    #[test]
    fn malformed_file_degrades_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "[hooks\nmode = ").unwrap();

        let config = CortexConfig::load_from_root(dir.path());
        assert!(config.parse_error.is_some());
        assert_eq!(config.hooks.mode, Mode::Advisory);
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut config = CortexConfig::default();
        config.graveyard.file_weight = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "graveyard.file_weight"
        ));
    }

    #[test]
    fn db_path_resolution() {
        let config = CortexConfig::default();
        let root = Path::new("/repo");
        assert_eq!(config.db_path(root), PathBuf::from("/repo/.cortex/cortex.db"));
        assert_eq!(resolve(root, "/abs/x.db"), PathBuf::from("/abs/x.db"));
    }
}
