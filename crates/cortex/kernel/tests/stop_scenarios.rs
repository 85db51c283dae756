//! End-to-end hook sequences against an on-disk store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_invariants::{CommandPlan, ExecOutcome, SuiteExecutor};
use cortex_kernel::{Adapter, Kernel};
use cortex_types::{CortexConfig, EventFilter, ExecutionMode, HookKind, Mode, SessionId, SessionStatus};
use serde_json::{json, Value};
use tempfile::TempDir;

fn config(mode: Mode) -> CortexConfig {
    let mut config = CortexConfig::default();
    config.hooks.mode = mode;
    config
}

fn kernel(dir: &TempDir, config: CortexConfig) -> Kernel {
    Kernel::open(dir.path(), config).unwrap()
}

async fn call(kernel: &Kernel, hook: &str, payload: Value) -> Value {
    kernel.handle(Adapter::Auto.normalize(hook, payload)).await.to_value()
}

fn full_coverage() -> Value {
    json!({
        "null_inputs": true,
        "boundary_values": true,
        "error_handling": true,
        "graveyard_regression": true
    })
}

/// Counts calls and always reports success.
#[derive(Default)]
struct CountingExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl SuiteExecutor for CountingExecutor {
    async fn execute(&self, _plan: &CommandPlan, _timeout: Duration) -> ExecOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ExecOutcome::Exited {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Succeeds after a delay, so overlapping stops are all in flight at once.
struct SlowExecutor {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl SuiteExecutor for SlowExecutor {
    async fn execute(&self, _plan: &CommandPlan, _timeout: Duration) -> ExecOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        ExecOutcome::Exited {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

#[tokio::test]
async fn uncovered_contract_id_fails_strict_session() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, config(Mode::Strict));

    let start = call(
        &kernel,
        "SessionStart",
        json!({"session_id": "S1", "required_requirement_ids": ["R1", "R2"]}),
    )
    .await;
    assert_eq!(start["ok"], true);

    let stop = call(
        &kernel,
        "Stop",
        json!({
            "session_id": "S1",
            "challenge_coverage": full_coverage(),
            "requirement_audit": {"items": [
                {"id": "R1", "status": "pass", "evidence": ["checked the output by hand"]}
            ]}
        }),
    )
    .await;

    assert_eq!(stop["ok"], true);
    assert_eq!(stop["requirement_audit_report"]["missing_required_ids"], json!(["R2"]));
    assert_eq!(stop["requirement_audit_report"]["ok"], false);
    assert_eq!(stop["session_status"], "closed_fail");
    assert_eq!(stop["recommend_revert"], true);
    assert_eq!(stop["proceed"], false);
    assert_eq!(stop["violations"], json!(["requirement_audit"]));

    let session = kernel.store().get_session(&SessionId::new("S1")).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::ClosedFail);
    assert_eq!(session.metadata["violations"], json!(["requirement_audit"]));
}

#[tokio::test]
async fn witnessed_evidence_passes_strict_session() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, config(Mode::Strict));

    call(
        &kernel,
        "SessionStart",
        json!({"session_id": "S2", "required_requirement_ids": ["R1"]}),
    )
    .await;
    call(
        &kernel,
        "PostToolUse",
        json!({"session_id": "S2", "tool_name": "Edit", "tool_input": {"file_path": "src/lib.rs"}}),
    )
    .await;
    call(
        &kernel,
        "PostToolUse",
        json!({"session_id": "S2", "tool_name": "Bash", "tool_input": {"command": "cargo test --workspace"}}),
    )
    .await;

    let stop = call(
        &kernel,
        "Stop",
        json!({
            "session_id": "S2",
            "challenge_coverage": full_coverage(),
            "requirement_audit": {
                "items": [{"id": "R1", "status": "pass", "evidence": ["src/lib.rs:10", "cmd:cargo test", "tool:Edit"]}],
                "completeness_verdict": "pass"
            }
        }),
    )
    .await;

    assert_eq!(stop["requirement_audit_report"]["ok"], true, "{stop}");
    assert_eq!(stop["session_status"], "closed_pass");
    assert_eq!(stop["proceed"], true);
    assert_eq!(stop["claim_source"], "native");
}

#[tokio::test]
async fn missing_suite_fails_invariants() {
    let dir = TempDir::new().unwrap();
    let mut config = config(Mode::Strict);
    config.invariants.suite_paths = vec!["tests/invariants/test_missing.py".into()];
    let kernel = kernel(&dir, config);

    let stop = call(
        &kernel,
        "Stop",
        json!({"session_id": "S3", "challenge_coverage": full_coverage()}),
    )
    .await;

    assert_eq!(stop["invariant_report"]["results"][0]["status"], "missing");
    assert_eq!(stop["invariant_report"]["ok"], false);
    assert_eq!(stop["violations"], json!(["invariants"]));
    assert_eq!(stop["session_status"], "closed_fail");
}

#[tokio::test]
async fn unresolvable_container_engine_is_error_without_spawn() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("inv")).unwrap();
    std::fs::write(dir.path().join("inv/test_inv.py"), "def test_ok(): pass\n").unwrap();

    let mut config = config(Mode::Advisory);
    config.invariants.suite_paths = vec!["inv/test_inv.py".into()];
    config.invariants.execution_mode = ExecutionMode::Container;
    config.invariants.container_engine = "cortex-no-such-engine-4f1c".into();
    let executor = Arc::new(CountingExecutor::default());
    let kernel = kernel(&dir, config).with_executor(executor.clone());

    let stop = call(
        &kernel,
        "Stop",
        json!({"session_id": "S4", "challenge_coverage": full_coverage()}),
    )
    .await;

    assert_eq!(stop["ok"], true);
    assert_eq!(stop["invariant_report"]["results"][0]["status"], "error");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(stop["session_status"], "closed_pass");
}

#[tokio::test]
async fn runner_args_and_opt_out() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("test_inv.py"), "").unwrap();
    let mut config = config(Mode::Strict);
    config.invariants.suite_paths = vec!["test_inv.py".into()];
    let executor = Arc::new(CountingExecutor::default());
    let kernel = kernel(&dir, config).with_executor(executor.clone());

    let stop = call(
        &kernel,
        "Stop",
        json!({"session_id": "S5", "challenge_coverage": full_coverage(), "runner_args": ["-q"]}),
    )
    .await;
    assert_eq!(stop["invariant_report"]["ok"], true);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    let skipped = call(
        &kernel,
        "Stop",
        json!({"session_id": "S6", "challenge_coverage": full_coverage(), "run_invariants": false}),
    )
    .await;
    assert_eq!(skipped["invariant_report"], Value::Null);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    assert!(skipped["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .any(|w| w["code"] == "invariants_skipped"));
}

#[tokio::test]
async fn native_claim_beats_trailer() {
    let dir = TempDir::new().unwrap();
    let mut config = config(Mode::Strict);
    config.hooks.allow_message_stop_fallback = true;
    let kernel = kernel(&dir, config);

    let stop = call(
        &kernel,
        "Stop",
        json!({
            "session_id": "S7",
            "challenge_coverage": full_coverage(),
            "last_assistant_message": "CORTEX_STOP_JSON: {\"challenge_coverage\": {\"null_inputs\": false}}"
        }),
    )
    .await;

    assert_eq!(stop["claim_source"], "native");
    assert_eq!(stop["challenge_report"]["ok"], true);
    assert_eq!(stop["session_status"], "closed_pass");
}

#[tokio::test]
async fn trailer_only_claim_violates_structured_requirement() {
    let dir = TempDir::new().unwrap();
    let mut config = config(Mode::Strict);
    config.hooks.allow_message_stop_fallback = true;
    config.hooks.require_structured_stop_payload = true;
    let kernel = kernel(&dir, config);

    let trailer = format!("All done.\nCORTEX_STOP_JSON: {}", json!({"challenge_coverage": full_coverage()}));
    let stop = call(
        &kernel,
        "Stop",
        json!({"session_id": "S8", "last_assistant_message": trailer}),
    )
    .await;

    assert_eq!(stop["claim_source"], "message_fallback");
    assert_eq!(stop["structured_stop_violation"], true);
    assert_eq!(stop["challenge_report"]["ok"], true);
    assert_eq!(stop["session_status"], "closed_fail");
    assert_eq!(stop["recommend_revert"], true);
}

#[tokio::test]
async fn advisory_mode_reports_without_enforcing() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, config(Mode::Advisory));

    let stop = call(&kernel, "Stop", json!({"session_id": "S9"})).await;

    assert_eq!(stop["session_status"], "closed_pass");
    assert_eq!(stop["proceed"], true);
    assert_eq!(stop["violations"], json!(["challenge_coverage"]));
    let codes: Vec<&str> = stop["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|w| w["code"].as_str())
        .collect();
    assert!(codes.contains(&"session_auto_started"));
    assert!(codes.contains(&"missing_stop_claim"));
    assert!(codes.contains(&"challenge_coverage"));
    assert!(codes.contains(&"policy_advisory"));
}

#[tokio::test]
async fn second_stop_is_already_closed() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, config(Mode::Advisory));

    let first = call(
        &kernel,
        "Stop",
        json!({"session_id": "S10", "challenge_coverage": full_coverage()}),
    )
    .await;
    assert_eq!(first["session_status"], "closed_pass");

    let second = call(
        &kernel,
        "Stop",
        json!({"session_id": "S10", "challenge_coverage": full_coverage()}),
    )
    .await;
    assert_eq!(second["ok"], false);
    assert_eq!(second["error"]["code"], "already_closed");

    let late_tool = call(&kernel, "PreToolUse", json!({"session_id": "S10", "tool_name": "Edit"})).await;
    assert_eq!(late_tool["error"]["code"], "already_closed");
}

#[tokio::test]
async fn failed_approach_feeds_the_graveyard() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, config(Mode::Advisory));

    let stop = call(
        &kernel,
        "Stop",
        json!({
            "session_id": "S11",
            "challenge_coverage": full_coverage(),
            "failed_approach": {
                "summary": "memoize tokenizer output across parser calls",
                "reason": "stale tokens after buffer mutation",
                "files": ["src/tokenizer.rs"]
            }
        }),
    )
    .await;
    assert!(stop["graveyard_entry_id"].is_i64());

    let start = call(
        &kernel,
        "SessionStart",
        json!({
            "session_id": "S12",
            "task": "memoize the tokenizer to speed up parser",
            "target_files": ["src/tokenizer.rs"]
        }),
    )
    .await;
    assert_eq!(start["graveyard_matches"][0]["summary"], "memoize tokenizer output across parser calls");
    assert!(start["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .any(|w| w["code"] == "graveyard_match"));
}

#[tokio::test]
async fn empty_graveyard_query_is_empty() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, config(Mode::Advisory));
    kernel
        .graveyard()
        .record_failure(None, "something broke", "because", &[])
        .unwrap();
    assert!(kernel.graveyard().find_similar("", &[], None).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stops_close_once_without_orphan_rows() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("test_inv.py"), "").unwrap();
    let mut config = config(Mode::Strict);
    config.invariants.suite_paths = vec!["test_inv.py".into()];
    let executor = Arc::new(SlowExecutor {
        delay: Duration::from_millis(300),
        calls: AtomicUsize::new(0),
    });
    // Two hook processes on one project root, each with its own connection.
    let first = Arc::new(kernel(&dir, config.clone()).with_executor(executor.clone()));
    let second = Arc::new(kernel(&dir, config).with_executor(executor.clone()));

    call(&first, "SessionStart", json!({"session_id": "S13"})).await;
    let stop = json!({
        "session_id": "S13",
        "challenge_coverage": full_coverage(),
        "failed_approach": {"summary": "shard the cache by tenant", "reason": "hot shard under load"}
    });

    let mut stops = Vec::new();
    for kernel in [first.clone(), second.clone()] {
        let stop = stop.clone();
        stops.push(tokio::spawn(async move { call(&kernel, "Stop", stop).await }));
    }
    let mut tools = Vec::new();
    for n in 0..4 {
        let kernel = if n % 2 == 0 { first.clone() } else { second.clone() };
        tools.push(tokio::spawn(async move {
            call(
                &kernel,
                "PostToolUse",
                json!({"session_id": "S13", "tool_name": "Bash", "tool_input": {"command": format!("echo {n}")}}),
            )
            .await
        }));
    }

    let mut stop_responses = Vec::new();
    for handle in stops {
        stop_responses.push(handle.await.unwrap());
    }
    let mut accepted_tools = 0;
    for handle in tools {
        let response = handle.await.unwrap();
        if response["ok"] == true {
            accepted_tools += 1;
        } else {
            assert_eq!(response["error"]["code"], "already_closed", "{response}");
        }
    }

    let winners: Vec<&Value> = stop_responses.iter().filter(|r| r["ok"] == true).collect();
    assert_eq!(winners.len(), 1, "{stop_responses:?}");
    assert_eq!(winners[0]["session_status"], "closed_pass");
    let loser = stop_responses.iter().find(|r| r["ok"] == false).unwrap();
    assert_eq!(loser["error"]["code"], "already_closed");

    let store = first.store();
    let sid = SessionId::new("S13");
    let session = store.get_session(&sid).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::ClosedPass);

    // Only the winning stop's rows exist.
    assert_eq!(store.list_graveyard(10).unwrap().len(), 1);
    assert_eq!(store.list_challenge_results(&sid).unwrap().len(), 4);
    assert_eq!(store.list_invariant_results(&sid).unwrap().len(), 1);
    let events = store.query_events(&sid, &EventFilter::new()).unwrap();
    assert_eq!(events.iter().filter(|e| e.hook == HookKind::Stop).count(), 1);
    assert_eq!(
        events.iter().filter(|e| e.hook == HookKind::PostToolUse).count(),
        accepted_tools
    );
    assert!(executor.calls.load(Ordering::SeqCst) >= 1);
}
