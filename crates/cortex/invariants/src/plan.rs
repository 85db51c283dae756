//! Turning a suite path into a concrete command line.

use std::path::{Component, Path, PathBuf};

use cortex_types::{ExecutionMode, InvariantsConfig};

use crate::error::{InvariantError, RunnerResult};

/// A fully resolved command, ready to spawn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandPlan {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl CommandPlan {
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Build the command for one suite.
///
/// `suite` must already exist. In container mode the engine binary must be
/// resolvable, and the suite must live under `root` so it can be addressed
/// inside the mounted workdir.
pub fn plan_command(
    root: &Path,
    suite_path: &str,
    suite: &Path,
    config: &InvariantsConfig,
    extra_args: &[String],
) -> RunnerResult<CommandPlan> {
    match config.execution_mode {
        ExecutionMode::Host => {
            let (program, runner_args) = config
                .runner
                .split_first()
                .ok_or(InvariantError::EmptyRunner)?;
            let mut args = runner_args.to_vec();
            args.push(suite.display().to_string());
            args.extend(extra_args.iter().cloned());
            Ok(CommandPlan {
                program: program.clone(),
                args,
                cwd: root.to_path_buf(),
            })
        }
        ExecutionMode::Container => {
            let engine = resolve_program(&config.container_engine)
                .ok_or_else(|| InvariantError::EngineNotFound(config.container_engine.clone()))?;
            let relative = relative_to_root(root, suite).ok_or_else(|| InvariantError::OutsideRoot {
                path: suite.to_path_buf(),
                root: root.to_path_buf(),
            })?;
            let workdir = config.container_workdir.trim_end_matches('/');
            let relative = relative.to_string_lossy().replace('\\', "/");
            let in_container = format!("{workdir}/{relative}");

            let mut args = vec![
                "run".to_string(),
                "--rm".to_string(),
                "-v".to_string(),
                format!("{}:{}", root.display(), workdir),
                "-v".to_string(),
                format!("{}:{}:ro", suite.display(), in_container),
                "-w".to_string(),
                workdir.to_string(),
                config.container_image.clone(),
            ];
            args.extend(config.container_runner.iter().cloned());
            args.push(relative);
            args.extend(extra_args.iter().cloned());
            tracing::debug!(suite = suite_path, engine = %engine.display(), "planned container run");
            Ok(CommandPlan {
                program: engine.display().to_string(),
                args,
                cwd: root.to_path_buf(),
            })
        }
    }
}

/// Resolve a program name against `PATH`, or accept an existing path.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let program = program.trim();
    if program.is_empty() {
        return None;
    }
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// `suite` relative to `root`, lexically normalized. `None` if it escapes.
fn relative_to_root(root: &Path, suite: &Path) -> Option<PathBuf> {
    let root = normalize(&root.canonicalize().unwrap_or_else(|_| root.to_path_buf()));
    let suite = normalize(&suite.canonicalize().unwrap_or_else(|_| suite.to_path_buf()));
    suite.strip_prefix(&root).ok().map(Path::to_path_buf)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_plan_appends_suite_and_extra_args() {
        let config = InvariantsConfig {
            runner: vec!["python".into(), "-m".into(), "pytest".into()],
            ..InvariantsConfig::default()
        };
        let plan = plan_command(
            Path::new("/repo"),
            "tests/inv",
            Path::new("/repo/tests/inv"),
            &config,
            &["-x".to_string()],
        )
        .unwrap();
        assert_eq!(plan.program, "python");
        assert_eq!(plan.args, vec!["-m", "pytest", "/repo/tests/inv", "-x"]);
        assert_eq!(plan.cwd, PathBuf::from("/repo"));
    }

    #[test]
    fn empty_runner_is_rejected() {
        let config = InvariantsConfig {
            runner: vec![],
            ..InvariantsConfig::default()
        };
        assert!(matches!(
            plan_command(Path::new("/r"), "t", Path::new("/r/t"), &config, &[]),
            Err(InvariantError::EmptyRunner)
        ));
    }

    #[test]
    fn unresolvable_engine_fails_closed() {
        let config = InvariantsConfig {
            execution_mode: ExecutionMode::Container,
            container_engine: "cortex-no-such-engine-4f1c".into(),
            ..InvariantsConfig::default()
        };
        let err = plan_command(Path::new("/r"), "t", Path::new("/r/t"), &config, &[]).unwrap_err();
        assert!(matches!(err, InvariantError::EngineNotFound(ref e) if e == "cortex-no-such-engine-4f1c"));
    }

    #[cfg(unix)]
    #[test]
    fn container_plan_mounts_suite_read_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let engine = dir.path().join("fake-engine");
        std::fs::write(&engine, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();
        let root = dir.path().join("repo");
        let suite = root.join("tests/inv");
        std::fs::create_dir_all(&suite).unwrap();

        let config = InvariantsConfig {
            execution_mode: ExecutionMode::Container,
            container_engine: engine.display().to_string(),
            ..InvariantsConfig::default()
        };
        let plan = plan_command(&root, "tests/inv", &suite, &config, &[]).unwrap();
        assert_eq!(plan.program, engine.display().to_string());
        assert_eq!(&plan.args[..3], &["run", "--rm", "-v"]);
        assert!(plan.args.iter().any(|a| a.ends_with(":/workspace/tests/inv:ro")));
        assert!(plan.args.contains(&"python:3.11-slim".to_string()));
        assert_eq!(plan.args.last().map(String::as_str), Some("tests/inv"));
    }

    #[cfg(unix)]
    #[test]
    fn container_suite_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let outside = dir.path().join("elsewhere");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        let config = InvariantsConfig {
            execution_mode: ExecutionMode::Container,
            container_engine: "/bin/sh".into(),
            ..InvariantsConfig::default()
        };
        assert!(matches!(
            plan_command(&root, "../elsewhere", &outside, &config, &[]),
            Err(InvariantError::OutsideRoot { .. })
        ));
    }
}
