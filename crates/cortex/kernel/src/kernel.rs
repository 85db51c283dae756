use std::path::{Path, PathBuf};
use std::sync::Arc;

use cortex_challenges::ChallengeGate;
use cortex_graveyard::{explain, Graveyard, GraveyardMatch};
use cortex_invariants::{InvariantReport, InvariantRunner, SuiteExecutor};
use cortex_requirements::{AuditPolicy, RequirementAuditor, WitnessLog};
use cortex_stop::{StopPolicy, StopResolver};
use cortex_store::{CloseRecords, SessionStore, StoreError};
use cortex_types::{
    CortexConfig, EventFilter, HookEvent, HookKind, InvariantStatus, Mode, NewEvent, Session, SessionId,
    SessionStartPayload, StopPayload, ToolUsePayload, Warning, WarningCode,
};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{KernelError, KernelResult};
use crate::response::{HookResponse, SessionStartResponse, StopResponse, ToolUseResponse};

/// Metadata flag on sessions created implicitly by a non-start hook.
pub const AUTO_STARTED_KEY: &str = "auto_started";

/// Generate a session id for payloads that carry none.
pub fn generate_session_id() -> SessionId {
    let hex = Uuid::new_v4().simple().to_string();
    SessionId::new(format!("sess-{}", &hex[..12]))
}

/// The enforcement kernel: one instance per project root.
///
/// Every hook call runs to completion inside [`Kernel::handle`]. Handled
/// failures come back as an error response, never as a panic or `Err`.
pub struct Kernel {
    root: PathBuf,
    config: CortexConfig,
    store: Arc<SessionStore>,
    graveyard: Graveyard,
    challenges: ChallengeGate,
    invariants: InvariantRunner,
    auditor: RequirementAuditor,
    resolver: StopResolver,
    policy: StopPolicy,
}

impl Kernel {
    /// Open the store configured for `root` and build the kernel.
    pub fn open(root: impl Into<PathBuf>, config: CortexConfig) -> KernelResult<Self> {
        let root = root.into();
        let store = SessionStore::open(&config.db_path(&root), &config.store)?;
        Ok(Self::with_store(root, config, Arc::new(store)))
    }

    pub fn with_store(root: impl Into<PathBuf>, config: CortexConfig, store: Arc<SessionStore>) -> Self {
        let root = root.into();
        Self {
            graveyard: Graveyard::new(store.clone(), config.graveyard.clone()),
            challenges: ChallengeGate::new(config.challenges.clone()),
            invariants: InvariantRunner::new(root.clone(), store.clone(), config.invariants.clone()),
            auditor: RequirementAuditor::new(root.clone(), AuditPolicy::from(&config.hooks)),
            resolver: StopResolver::from(&config.hooks),
            policy: StopPolicy::from(&config.hooks),
            root,
            config,
            store,
        }
    }

    /// Replace the subprocess executor used for invariant suites.
    pub fn with_executor(mut self, executor: Arc<dyn SuiteExecutor>) -> Self {
        self.invariants = InvariantRunner::with_executor(
            self.root.clone(),
            self.store.clone(),
            self.config.invariants.clone(),
            executor,
        );
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &CortexConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn graveyard(&self) -> &Graveyard {
        &self.graveyard
    }

    pub fn invariants(&self) -> &InvariantRunner {
        &self.invariants
    }

    /// Handle one hook call.
    pub async fn handle(&self, event: HookEvent) -> HookResponse {
        let session_id = event.session_id().map(|s| s.to_string());
        let kind = event.kind();
        match self.dispatch(event).await {
            Ok(response) => response,
            Err(err) => {
                warn!(hook = ?kind, code = err.code(), error = %err, "hook call failed");
                let warning_code = match &err {
                    KernelError::UnknownHook(_) => Some(WarningCode::UnknownHook),
                    KernelError::MalformedPayload { .. } => Some(WarningCode::MalformedPayload),
                    _ => None,
                };
                let warnings = warning_code
                    .map(|code| vec![Warning::new(code, err.to_string())])
                    .unwrap_or_default();
                HookResponse::error(session_id, &err, warnings)
            }
        }
    }

    async fn dispatch(&self, event: HookEvent) -> KernelResult<HookResponse> {
        match event {
            HookEvent::SessionStart(payload) => self.session_start(payload).map(HookResponse::SessionStart),
            HookEvent::PreToolUse(payload) => self
                .tool_use(HookKind::PreToolUse, payload)
                .map(HookResponse::ToolUse),
            HookEvent::PostToolUse(payload) => self
                .tool_use(HookKind::PostToolUse, payload)
                .map(HookResponse::ToolUse),
            HookEvent::Stop(payload) => self
                .stop(payload)
                .await
                .map(|r| HookResponse::Stop(Box::new(r))),
            HookEvent::Unknown { name, .. } => Err(KernelError::UnknownHook(name)),
            HookEvent::Malformed { hook, reason, .. } => Err(KernelError::MalformedPayload { hook, reason }),
        }
    }

    // ── session_start ───────────────────────────────────────────────────

    #[instrument(skip(self, payload), fields(session_id = tracing::field::Empty))]
    fn session_start(&self, payload: SessionStartPayload) -> KernelResult<SessionStartResponse> {
        let session_id = payload.session_id.clone().unwrap_or_else(generate_session_id);
        tracing::Span::current().record("session_id", session_id.as_str());
        let mut warnings = Vec::new();
        if let Some(parse_error) = &self.config.parse_error {
            warnings.push(Warning::new(
                WarningCode::ConfigParseError,
                format!("Configuration could not be parsed; defaults in use: {parse_error}"),
            ));
        }

        let mut metadata = Map::new();
        if let Some(task) = &payload.task {
            metadata.insert("task".to_string(), Value::String(task.clone()));
        }
        if !payload.target_files.is_empty() {
            metadata.insert("target_files".to_string(), json!(payload.target_files));
        }

        let created = match self.store.open_session(&session_id, metadata) {
            Ok(_) => true,
            Err(StoreError::AlreadyExists(_)) => {
                let existing = self.require_session(&session_id)?;
                if existing.is_closed() {
                    return Err(StoreError::AlreadyClosed(session_id).into());
                }
                let how = if is_auto_started(&existing) {
                    "was auto-started by an earlier hook"
                } else {
                    "is already open"
                };
                warnings.push(Warning::new(
                    WarningCode::SessionAlreadyStarted,
                    format!("Session {session_id} {how}; attaching to it"),
                ));
                false
            }
            Err(err) => return Err(err.into()),
        };

        let mut requirement_contract = None;
        if let Some(contract) = payload.contract.filter(|c| !c.is_empty()) {
            match self.store.set_requirement_contract(&session_id, &contract) {
                Ok(()) => requirement_contract = Some(contract),
                Err(StoreError::ContractAlreadySet(_)) => warnings.push(Warning::new(
                    WarningCode::ContractAlreadySet,
                    "Requirement contract already set for this session; the new one was ignored",
                )),
                Err(err) => return Err(err.into()),
            }
        }
        if requirement_contract.is_none() {
            requirement_contract = self.require_session(&session_id)?.requirement_contract();
        }

        self.store.append_event(
            &session_id,
            &NewEvent::new(HookKind::SessionStart, Value::Object(payload.raw)),
        )?;

        let task = payload.task.unwrap_or_default();
        let graveyard_matches = self.consult_graveyard(&task, &payload.target_files, &mut warnings)?;

        info!(session_id = %session_id, created, "session start handled");
        Ok(SessionStartResponse {
            ok: true,
            session_id: session_id.to_string(),
            created,
            requirement_contract,
            graveyard_matches,
            warnings,
        })
    }

    // ── pre/post_tool_use ───────────────────────────────────────────────

    fn tool_use(&self, hook: HookKind, payload: ToolUsePayload) -> KernelResult<ToolUseResponse> {
        let session_id = payload.session_id.clone().unwrap_or_else(generate_session_id);
        let mut warnings = Vec::new();
        let auto_started = self.ensure_open(&session_id, &mut warnings)?;

        let event = NewEvent::new(hook, Value::Object(payload.raw.clone()))
            .with_tool(payload.tool_name.clone())
            .with_status(payload.status.clone());
        let event_id = self.store.append_event(&session_id, &event)?;
        debug!(session_id = %session_id, %hook, event_id = event_id.0, "tool event recorded");

        let graveyard_matches = if hook == HookKind::PostToolUse && payload.is_failure() {
            let mut text = payload.failure_text();
            if text.is_empty() {
                text = payload.tool_name.clone().unwrap_or_default();
            }
            self.consult_graveyard(&text, &payload.target_files(), &mut warnings)?
        } else {
            Vec::new()
        };

        Ok(ToolUseResponse {
            ok: true,
            session_id: session_id.to_string(),
            event_id: event_id.0,
            auto_started,
            graveyard_matches,
            warnings,
        })
    }

    // ── stop ────────────────────────────────────────────────────────────

    #[instrument(skip(self, payload), fields(session_id = tracing::field::Empty))]
    async fn stop(&self, payload: StopPayload) -> KernelResult<StopResponse> {
        let session_id = payload.session_id.clone().unwrap_or_else(generate_session_id);
        tracing::Span::current().record("session_id", session_id.as_str());
        let mut warnings = Vec::new();
        self.ensure_open(&session_id, &mut warnings)?;
        let session = self.require_session(&session_id)?;
        if session.is_closed() {
            return Err(StoreError::AlreadyClosed(session_id).into());
        }

        // Nothing below writes until the closing transaction. A concurrent
        // stop that closes first turns this call into `AlreadyClosed` with no
        // rows left behind.
        let resolved = self.resolver.resolve(&payload.raw);
        warnings.extend(resolved.warnings.iter().cloned());
        let claim = &resolved.claim;

        // Requirement audit against the witness log.
        let events = self.store.query_events(&session_id, &EventFilter::tool_use())?;
        let witness = WitnessLog::from_events(&events, &self.root);
        let contract = session.requirement_contract();
        let audit = self.auditor.audit(
            contract.as_ref(),
            &claim.required_requirement_ids,
            claim.requirement_audit.as_ref(),
            &witness,
        );
        warnings.extend(audit.warnings.iter().cloned());

        // Challenge coverage. An absent map covers nothing.
        let coverage = claim.challenge_coverage.clone().unwrap_or_default();
        let challenge_report = self.challenges.evaluate(&session_id, &coverage);
        warnings.extend(challenge_report.config_warnings.iter().cloned());
        if !challenge_report.missing_categories.is_empty() {
            warnings.push(Warning::new(
                WarningCode::ChallengeCoverage,
                format!(
                    "Missing challenge coverage: {}",
                    challenge_report.missing_categories.join(", ")
                ),
            ));
        }

        // Invariants.
        let invariant_report = self.run_invariants(&session_id, &payload, &mut warnings).await;
        let invariant_ok = invariant_report.as_ref().map_or(true, |r| r.ok);

        let decision = self.policy.decide(
            challenge_report.ok,
            invariant_ok,
            audit.ok,
            resolved.contract_violation,
        );
        if self.policy.mode == Mode::Advisory && !decision.violations.is_empty() {
            let names: Vec<&str> = decision.violations.iter().map(|v| v.as_str()).collect();
            warnings.push(Warning::new(
                WarningCode::PolicyAdvisory,
                format!("Advisory mode: not enforcing {}", names.join(", ")),
            ));
        }

        let records = CloseRecords {
            events: vec![NewEvent::new(HookKind::Stop, Value::Object(payload.raw.clone()))],
            challenge_results: challenge_report.records(&session_id),
            invariant_results: invariant_report
                .as_ref()
                .map(|r| r.results.clone())
                .unwrap_or_default(),
            graveyard_entry: claim.failed_approach.as_ref().and_then(|approach| {
                self.graveyard.failure_entry(
                    Some(&session_id),
                    &approach.summary,
                    &approach.reason,
                    &approach.files,
                )
            }),
        };

        let mut summary = Map::new();
        summary.insert("mode".to_string(), json!(self.policy.mode.as_str()));
        summary.insert("violations".to_string(), json!(decision.violations));
        summary.insert("recommend_revert".to_string(), json!(decision.recommend_revert));
        summary.insert("claim_source".to_string(), json!(resolved.source));
        summary.insert("structured_stop_violation".to_string(), json!(resolved.contract_violation));
        summary.insert("challenge_ok".to_string(), json!(challenge_report.ok));
        summary.insert("invariant_ok".to_string(), json!(invariant_ok));
        summary.insert("requirement_audit".to_string(), json!(audit.report));
        let closed = self
            .store
            .close_session_with(&session_id, decision.status, summary, &records)?;
        let graveyard_entry_id = closed.graveyard_entry_id;
        let closed = closed.session;

        info!(
            session_id = %session_id,
            status = %closed.status,
            recommend_revert = decision.recommend_revert,
            violations = decision.violations.len(),
            "stop handled"
        );
        Ok(StopResponse {
            ok: true,
            proceed: !decision.recommend_revert,
            recommend_revert: decision.recommend_revert,
            session_id: session_id.to_string(),
            session_status: closed.status,
            challenge_report,
            requirement_audit_report: audit.report,
            structured_stop_violation: resolved.contract_violation,
            invariant_report,
            claim_source: resolved.source,
            violations: decision.violations,
            graveyard_entry_id,
            warnings,
        })
    }

    async fn run_invariants(
        &self,
        session_id: &SessionId,
        payload: &StopPayload,
        warnings: &mut Vec<Warning>,
    ) -> Option<InvariantReport> {
        let config = self.invariants.config();
        if config.suite_paths.is_empty() {
            return None;
        }
        if !config.run_on_stop || !payload.run_invariants {
            warnings.push(Warning::new(
                WarningCode::InvariantsSkipped,
                "Invariant suites were not run for this stop",
            ));
            return None;
        }

        let report = self.invariants.run(session_id, &payload.runner_args).await;
        for result in report.results.iter().filter(|r| r.status != InvariantStatus::Pass) {
            warnings.push(Warning::new(
                WarningCode::InvariantFailure,
                format!("Invariant {} reported {}", result.test_path, result.status),
            ));
        }
        Some(report)
    }

    // ── helpers ─────────────────────────────────────────────────────────

    fn require_session(&self, id: &SessionId) -> KernelResult<Session> {
        self.store
            .get_session(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()).into())
    }

    /// Auto-start an unknown session. Returns whether it was created.
    fn ensure_open(&self, id: &SessionId, warnings: &mut Vec<Warning>) -> KernelResult<bool> {
        let mut metadata = Map::new();
        metadata.insert(AUTO_STARTED_KEY.to_string(), Value::Bool(true));
        let (_, created) = self.store.ensure_session(id, metadata)?;
        if created {
            warnings.push(Warning::new(
                WarningCode::SessionAutoStarted,
                format!("No session_start seen for {id}; session auto-started"),
            ));
        }
        Ok(created)
    }

    fn consult_graveyard(
        &self,
        text: &str,
        files: &[String],
        warnings: &mut Vec<Warning>,
    ) -> KernelResult<Vec<GraveyardMatch>> {
        let matches = self.graveyard.find_similar(text, files, None)?;
        if let Some(line) = explain(&matches) {
            warnings.push(Warning::new(WarningCode::GraveyardMatch, line));
        }
        Ok(matches)
    }
}

fn is_auto_started(session: &Session) -> bool {
    session
        .metadata
        .get(AUTO_STARTED_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
