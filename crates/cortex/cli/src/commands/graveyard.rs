use std::path::Path;

use clap::Subcommand;
use cortex_kernel::Kernel;
use cortex_types::CortexConfig;
use serde_json::json;

use crate::output::print_json;

#[derive(Subcommand)]
pub enum GraveyardCommands {
    /// List recorded failures, newest first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Rank recorded failures against a description
    Find {
        /// What is about to be attempted, or what just failed
        summary: String,

        /// Files involved (repeatable)
        #[arg(short, long = "file")]
        files: Vec<String>,

        /// Maximum matches (defaults to graveyard.max_matches)
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

pub fn execute(command: GraveyardCommands, root: &Path, config: CortexConfig) -> anyhow::Result<()> {
    let kernel = Kernel::open(root, config)?;
    match command {
        GraveyardCommands::List { limit } => {
            let entries = kernel.store().list_graveyard(limit)?;
            print_json(&json!({"ok": true, "entries": entries}))
        }
        GraveyardCommands::Find { summary, files, limit } => {
            let matches = kernel.graveyard().find_similar(&summary, &files, limit)?;
            print_json(&json!({"ok": true, "matches": matches}))
        }
    }
}
