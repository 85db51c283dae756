use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::plan::CommandPlan;

/// Raw outcome of one subprocess run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecOutcome {
    Exited {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Terminated without an exit code (killed by a signal).
    Signaled { stdout: String, stderr: String },
    TimedOut,
    SpawnFailed(String),
}

/// Runs planned commands. Implemented by [`ProcessExecutor`]; tests swap in
/// scripted executors.
#[async_trait]
pub trait SuiteExecutor: Send + Sync {
    async fn execute(&self, plan: &CommandPlan, timeout: Duration) -> ExecOutcome;
}

/// Spawns real subprocesses with captured output and a hard timeout.
///
/// On timeout the child is killed when its handle is dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl SuiteExecutor for ProcessExecutor {
    #[instrument(skip(self, plan), fields(program = %plan.program))]
    async fn execute(&self, plan: &CommandPlan, timeout: Duration) -> ExecOutcome {
        let child = Command::new(&plan.program)
            .args(&plan.args)
            .current_dir(&plan.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(err) => {
                warn!(error = %err, "failed to spawn invariant runner");
                return ExecOutcome::SpawnFailed(format!("{}: {err}", plan.program));
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                match output.status.code() {
                    Some(code) => {
                        debug!(code, "invariant runner exited");
                        ExecOutcome::Exited {
                            code,
                            stdout,
                            stderr,
                        }
                    }
                    None => ExecOutcome::Signaled { stdout, stderr },
                }
            }
            Ok(Err(err)) => ExecOutcome::SpawnFailed(format!("{}: {err}", plan.program)),
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "invariant runner timed out");
                ExecOutcome::TimedOut
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> CommandPlan {
        CommandPlan {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            cwd: PathBuf::from("."),
        }
    }

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let outcome = ProcessExecutor
            .execute(&sh("echo out; echo err >&2; exit 3"), Duration::from_secs(10))
            .await;
        assert_eq!(
            outcome,
            ExecOutcome::Exited {
                code: 3,
                stdout: "out".into(),
                stderr: "err".into()
            }
        );
    }

    #[tokio::test]
    async fn times_out() {
        let outcome = ProcessExecutor
            .execute(&sh("sleep 5"), Duration::from_millis(100))
            .await;
        assert_eq!(outcome, ExecOutcome::TimedOut);
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let plan = CommandPlan {
            program: "cortex-definitely-missing-binary".into(),
            args: vec![],
            cwd: PathBuf::from("."),
        };
        let outcome = ProcessExecutor.execute(&plan, Duration::from_secs(1)).await;
        assert!(matches!(outcome, ExecOutcome::SpawnFailed(_)));
    }
}
