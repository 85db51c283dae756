use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use cortex_kernel::{Adapter, HookResponse, Kernel};
use cortex_types::{CortexConfig, HookEvent};
use serde_json::Value;
use tracing::{debug, warn};

use crate::output::print_json;

#[derive(Args)]
pub struct HookArgs {
    /// Hook event name (session_start, PreToolUse, after_tool, ...)
    pub event: String,

    /// Read the payload from a file instead of stdin
    #[arg(long)]
    pub payload_file: Option<PathBuf>,

    /// Host naming convention (auto, claude, aider)
    #[arg(long, default_value = "auto")]
    pub adapter: Adapter,
}

pub async fn execute(args: HookArgs, root: &Path, config: CortexConfig) -> anyhow::Result<()> {
    let text = read_payload(args.payload_file.as_deref())?;
    let event = parse_event(args.adapter, &args.event, &text);
    debug!(event = %args.event, adapter = args.adapter.as_str(), "hook received");

    let response = match Kernel::open(root, config) {
        Ok(kernel) => kernel.handle(event).await,
        Err(err) => {
            warn!(error = %err, "store unavailable");
            HookResponse::error(event.session_id().map(|s| s.to_string()), &err, Vec::new())
        }
    };
    print_json(&response)
}

fn read_payload(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading payload file {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading payload from stdin")?;
            Ok(buf)
        }
    }
}

/// Blank input is an empty payload. Invalid JSON becomes a malformed event
/// for known hooks.
fn parse_event(adapter: Adapter, name: &str, text: &str) -> HookEvent {
    if text.trim().is_empty() {
        return adapter.normalize(name, Value::Null);
    }
    match serde_json::from_str::<Value>(text) {
        Ok(payload) => adapter.normalize(name, payload),
        Err(err) => match adapter.hook_kind(name) {
            Some(hook) => HookEvent::Malformed {
                hook,
                reason: format!("payload is not valid JSON: {err}"),
                raw: Value::String(text.to_string()),
            },
            None => adapter.normalize(name, Value::Null),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_types::HookKind;

    #[test]
    fn blank_and_invalid_payloads() {
        assert!(matches!(
            parse_event(Adapter::Auto, "Stop", "  \n"),
            HookEvent::Stop(_)
        ));
        assert!(matches!(
            parse_event(Adapter::Auto, "Stop", "{nope"),
            HookEvent::Malformed { hook: HookKind::Stop, .. }
        ));
        assert!(matches!(
            parse_event(Adapter::Auto, "Bogus", "{nope"),
            HookEvent::Unknown { .. }
        ));
    }

    #[test]
    fn payload_file_is_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stop.json");
        std::fs::write(&path, r#"{"session_id": "s1"}"#).unwrap();

        let text = read_payload(Some(&path)).unwrap();
        match parse_event(Adapter::Claude, "Stop", &text) {
            HookEvent::Stop(p) => assert_eq!(p.session_id.map(|s| s.to_string()), Some("s1".into())),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(read_payload(Some(&dir.path().join("absent.json"))).is_err());
    }
}
