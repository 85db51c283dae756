use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cortex_store::SessionStore;
use cortex_types::settings::resolve;
use cortex_types::{InvariantResult, InvariantStatus, InvariantsConfig, SessionId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{InvariantError, RunnerResult};
use crate::executor::{ExecOutcome, ProcessExecutor, SuiteExecutor};
use crate::plan::plan_command;

/// Aggregate of one stop-time invariant run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InvariantReport {
    pub configured_paths: Vec<String>,
    pub results: Vec<InvariantResult>,
    pub ok: bool,
    pub had_errors: bool,
}

pub struct InvariantRunner {
    root: PathBuf,
    store: Arc<SessionStore>,
    config: InvariantsConfig,
    executor: Arc<dyn SuiteExecutor>,
}

impl InvariantRunner {
    pub fn new(root: impl Into<PathBuf>, store: Arc<SessionStore>, config: InvariantsConfig) -> Self {
        Self::with_executor(root, store, config, Arc::new(ProcessExecutor))
    }

    pub fn with_executor(
        root: impl Into<PathBuf>,
        store: Arc<SessionStore>,
        config: InvariantsConfig,
        executor: Arc<dyn SuiteExecutor>,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            config,
            executor,
        }
    }

    pub fn config(&self) -> &InvariantsConfig {
        &self.config
    }

    /// Run every configured suite once, in order.
    ///
    /// Nothing is written here: the results go into the session's closing
    /// write, after every subprocess has returned. `ok` holds only when every
    /// suite passed. An empty suite list is `ok`.
    pub async fn run(&self, session_id: &SessionId, extra_args: &[String]) -> InvariantReport {
        let mut report = InvariantReport {
            configured_paths: self.config.suite_paths.clone(),
            results: Vec::with_capacity(self.config.suite_paths.len()),
            ok: true,
            had_errors: false,
        };

        for suite_path in &self.config.suite_paths {
            let result = self.run_one(session_id, suite_path, extra_args).await;
            match result.status {
                InvariantStatus::Pass => {}
                InvariantStatus::Error => {
                    report.ok = false;
                    report.had_errors = true;
                }
                _ => report.ok = false,
            }
            report.results.push(result);
        }

        info!(
            session_id = %session_id,
            suites = report.results.len(),
            ok = report.ok,
            "invariant run complete"
        );
        report
    }

    async fn run_one(&self, session_id: &SessionId, suite_path: &str, extra_args: &[String]) -> InvariantResult {
        let mut result = InvariantResult::new(session_id.clone(), suite_path, InvariantStatus::Error);
        let suite = resolve(&self.root, suite_path);
        if !suite.exists() {
            debug!(suite = suite_path, "invariant suite missing");
            result.status = InvariantStatus::Missing;
            result.stderr = format!("Invariant path not found: {suite_path}");
            return result;
        }

        let plan = match plan_command(&self.root, suite_path, &suite, &self.config, extra_args) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(suite = suite_path, error = %err, "invariant suite not runnable");
                result.stderr = err.to_string();
                return result;
            }
        };

        let started = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let outcome = self.executor.execute(&plan, timeout).await;
        result.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            ExecOutcome::Exited { code, stdout, stderr } => {
                result.status = self.classify_exit(code);
                result.stdout = stdout;
                result.stderr = stderr;
            }
            ExecOutcome::Signaled { stdout, stderr } => {
                result.stdout = stdout;
                result.stderr = if stderr.is_empty() {
                    "Invariant runner terminated by signal".to_string()
                } else {
                    stderr
                };
            }
            ExecOutcome::TimedOut => {
                result.stderr = format!(
                    "Invariant suite timed out after {}s: {}",
                    self.config.timeout_secs,
                    plan.display()
                );
            }
            ExecOutcome::SpawnFailed(reason) => {
                result.stderr = reason;
            }
        }
        debug!(suite = suite_path, status = %result.status, duration_ms = result.duration_ms, "invariant suite finished");
        result
    }

    fn classify_exit(&self, code: i32) -> InvariantStatus {
        if code == 0 {
            InvariantStatus::Pass
        } else if self.config.error_exit_codes.contains(&code) {
            InvariantStatus::Error
        } else {
            InvariantStatus::Fail
        }
    }

    /// Promote a session-authored test into the graduated invariant set.
    pub fn promote(&self, session_id: &SessionId, source: &Path) -> RunnerResult<PathBuf> {
        let source = if source.is_absolute() {
            source.to_path_buf()
        } else {
            self.root.join(source)
        };
        let file_name = match source.file_name() {
            Some(name) if source.is_file() => name.to_owned(),
            _ => return Err(InvariantError::SourceNotFound(source)),
        };

        let target_dir = resolve(&self.root, &self.config.graduation_dir);
        std::fs::create_dir_all(&target_dir)?;
        let target = target_dir.join(file_name);
        std::fs::copy(&source, &target)?;

        let test_path = target
            .strip_prefix(&self.root)
            .unwrap_or(&target)
            .to_string_lossy()
            .replace('\\', "/");
        let mut result = InvariantResult::new(session_id.clone(), test_path, InvariantStatus::Graduated);
        result.graduated_from = Some(source.display().to_string());
        self.store.record_invariant_result(&result)?;
        info!(session_id = %session_id, target = %target.display(), "test graduated to invariant suite");
        Ok(target)
    }
}
