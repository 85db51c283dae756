use std::path::{Path, PathBuf};

use clap::Subcommand;
use cortex_kernel::{Kernel, KernelError};
use cortex_types::{CortexConfig, SessionId};
use serde_json::json;

use crate::output::print_json;

#[derive(Subcommand)]
pub enum InvariantCommands {
    /// Promote a session-authored test into the graduated invariant suite
    Promote {
        /// Session that authored the test
        session_id: String,

        /// Test file to promote
        source: PathBuf,
    },

    /// List configured suites
    List,
}

pub fn execute(command: InvariantCommands, root: &Path, config: CortexConfig) -> anyhow::Result<()> {
    match command {
        InvariantCommands::Promote { session_id, source } => {
            let kernel = Kernel::open(root, config)?;
            let session_id = SessionId::new(session_id);
            let response = match kernel.invariants().promote(&session_id, &source) {
                Ok(target) => json!({
                    "ok": true,
                    "session_id": session_id,
                    "graduated": target.display().to_string(),
                }),
                Err(err) => {
                    let err = KernelError::from(err);
                    json!({
                        "ok": false,
                        "session_id": session_id,
                        "error": {"code": err.code(), "message": err.to_string()},
                    })
                }
            };
            print_json(&response)
        }
        InvariantCommands::List => print_json(&json!({
            "ok": true,
            "execution_mode": config.invariants.execution_mode,
            "suite_paths": config.invariants.suite_paths,
        })),
    }
}
