use std::path::Path;

use cortex_kernel::KernelError;
use cortex_store::SessionStore;
use cortex_types::CortexConfig;
use serde_json::json;
use tracing::info;

use crate::output::print_json;

/// Open (creating if needed) the configured store and report its schema.
pub fn init_db(root: &Path, config: &CortexConfig) -> anyhow::Result<()> {
    let path = config.db_path(root);
    let response = match SessionStore::open(&path, &config.store) {
        Ok(store) => {
            let version = store.schema_version()?;
            info!(path = %path.display(), version, "store ready");
            json!({"ok": true, "db_path": path.display().to_string(), "schema_version": version})
        }
        Err(err) => {
            let err = KernelError::from(err);
            json!({
                "ok": false,
                "db_path": path.display().to_string(),
                "error": {"code": err.code(), "message": err.to_string()},
            })
        }
    };
    print_json(&response)
}

