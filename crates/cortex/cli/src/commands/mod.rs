pub mod graveyard;
pub mod hook;
pub mod invariants;
pub mod store;

use cortex_types::CortexConfig;
use serde_json::json;

use crate::output::print_json;

pub fn show_config(config: &CortexConfig) -> anyhow::Result<()> {
    print_json(&json!({
        "source_path": config.source_path.as_ref().map(|p| p.display().to_string()),
        "parse_error": config.parse_error,
        "config": config,
    }))
}
