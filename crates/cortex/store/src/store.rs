use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cortex_types::session::CONTRACT_METADATA_KEY;
use cortex_types::{
    ChallengeResult, EventFilter, EventId, GraveyardEntry, HookKind, InvariantResult,
    InvariantStatus, NewEvent, NewGraveyardEntry, RequirementContract, Session, SessionEvent,
    SessionId, SessionStatus, StoreConfig,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::schema;

/// Bounded exponential backoff for busy/locked writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Rows a stop writes alongside the close itself.
///
/// [`SessionStore::close_session_with`] commits these and the status change in
/// one transaction, so a caller that loses the race to close writes nothing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CloseRecords {
    pub events: Vec<NewEvent>,
    pub challenge_results: Vec<ChallengeResult>,
    pub invariant_results: Vec<InvariantResult>,
    pub graveyard_entry: Option<NewGraveyardEntry>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClosedSession {
    pub session: Session,
    pub event_ids: Vec<EventId>,
    pub graveyard_entry_id: Option<i64>,
}

/// Durable session store.
///
/// Every write runs in its own `BEGIN IMMEDIATE` transaction so concurrent
/// hook processes serialize on SQLite's write lock. Busy/locked failures are
/// retried per [`RetryPolicy`]; other failures surface immediately.
pub struct SessionStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    retry: RetryPolicy,
}

impl SessionStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        let store = Self::init(conn, Some(path.to_path_buf()), config)?;
        debug!(path = %path.display(), "opened session store");
        Ok(store)
    }

    /// In-memory store, for tests and dry runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, None, &StoreConfig::default())
    }

    fn init(mut conn: Connection, path: Option<PathBuf>, config: &StoreConfig) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::ensure_schema(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            retry: RetryPolicy {
                attempts: config.lock_retry_attempts.max(1),
                base_delay: Duration::from_millis(config.lock_retry_backoff_ms),
            },
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> StoreResult<i64> {
        schema::schema_version(&*self.lock()?)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Run `op` in an immediate transaction, retrying on busy/locked.
    fn write<T>(&self, op: &str, mut f: impl FnMut(&Transaction<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.lock()?;
        let mut attempt = 0;
        loop {
            let result = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(StoreError::from)
                .and_then(|tx| {
                    let value = f(&tx)?;
                    tx.commit()?;
                    Ok(value)
                });

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_busy() => {
                    attempt += 1;
                    if attempt >= self.retry.attempts {
                        warn!(op, attempts = attempt, "store busy, giving up");
                        return Err(StoreError::StoreBusy { attempts: attempt });
                    }
                    let delay = self.retry.delay(attempt - 1);
                    debug!(op, attempt, delay_ms = delay.as_millis() as u64, "store busy, retrying");
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Create a new open session. Fails if the id is already known.
    pub fn open_session(&self, id: &SessionId, metadata: Map<String, Value>) -> StoreResult<Session> {
        let session = self.write("open_session", |tx| {
            if load_session(tx, id)?.is_some() {
                return Err(StoreError::AlreadyExists(id.clone()));
            }
            insert_session(tx, id, &metadata)
        })?;
        info!(session_id = %id, "session opened");
        Ok(session)
    }

    /// Return the session, creating an open one with `metadata` if unknown.
    ///
    /// The flag is `true` when the session was created by this call.
    pub fn ensure_session(
        &self,
        id: &SessionId,
        metadata: Map<String, Value>,
    ) -> StoreResult<(Session, bool)> {
        let (session, created) = self.write("ensure_session", |tx| match load_session(tx, id)? {
            Some(existing) => Ok((existing, false)),
            None => Ok((insert_session(tx, id, &metadata)?, true)),
        })?;
        if created {
            info!(session_id = %id, "session auto-started");
        }
        Ok((session, created))
    }

    pub fn get_session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        let conn = self.lock()?;
        load_session(&conn, id)
    }

    /// Persist the requirement contract. Set at most once per session.
    pub fn set_requirement_contract(
        &self,
        id: &SessionId,
        contract: &RequirementContract,
    ) -> StoreResult<()> {
        let value = serde_json::to_value(contract)?;
        self.write("set_requirement_contract", |tx| {
            let session = load_session(tx, id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if session.is_closed() {
                return Err(StoreError::AlreadyClosed(id.clone()));
            }
            if session.metadata.contains_key(CONTRACT_METADATA_KEY) {
                return Err(StoreError::ContractAlreadySet(id.clone()));
            }
            let mut metadata = session.metadata;
            metadata.insert(CONTRACT_METADATA_KEY.to_string(), value.clone());
            tx.execute(
                "UPDATE sessions SET metadata_json = ?1 WHERE session_id = ?2",
                params![serde_json::to_string(&metadata)?, id.as_str()],
            )?;
            Ok(())
        })?;
        debug!(session_id = %id, ids = contract.required_requirement_ids.len(), "requirement contract set");
        Ok(())
    }

    /// Close a session exactly once, merging `summary` into its metadata.
    pub fn close_session(
        &self,
        id: &SessionId,
        status: SessionStatus,
        summary: Map<String, Value>,
    ) -> StoreResult<Session> {
        self.close_session_with(id, status, summary, &CloseRecords::default())
            .map(|closed| closed.session)
    }

    /// Close a session and append `records` in the same transaction.
    ///
    /// The open-status check, every appended row and the status change commit
    /// together. A session that is already closed fails with `AlreadyClosed`
    /// and nothing from `records` is written.
    pub fn close_session_with(
        &self,
        id: &SessionId,
        status: SessionStatus,
        summary: Map<String, Value>,
        records: &CloseRecords,
    ) -> StoreResult<ClosedSession> {
        if !status.is_closed() {
            return Err(StoreError::InvalidStatus {
                session_id: id.clone(),
                status,
            });
        }
        let closed = self.write("close_session", |tx| {
            let session = load_session(tx, id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if session.is_closed() {
                return Err(StoreError::AlreadyClosed(id.clone()));
            }

            let mut event_ids = Vec::with_capacity(records.events.len());
            for event in &records.events {
                event_ids.push(insert_event(tx, id, event)?);
            }
            for result in &records.challenge_results {
                insert_challenge_result(tx, result)?;
            }
            for result in &records.invariant_results {
                insert_invariant_result(tx, result)?;
            }
            let graveyard_entry_id = records
                .graveyard_entry
                .as_ref()
                .map(|entry| insert_graveyard_entry(tx, entry))
                .transpose()?;

            let ended_at = Utc::now();
            let mut metadata = session.metadata;
            for (k, v) in &summary {
                // The contract stays authoritative.
                if k != CONTRACT_METADATA_KEY {
                    metadata.insert(k.clone(), v.clone());
                }
            }
            tx.execute(
                "UPDATE sessions SET ended_at = ?1, status = ?2, metadata_json = ?3 WHERE session_id = ?4",
                params![
                    ended_at.to_rfc3339(),
                    status.as_str(),
                    serde_json::to_string(&metadata)?,
                    id.as_str()
                ],
            )?;
            Ok(ClosedSession {
                session: Session {
                    session_id: id.clone(),
                    started_at: session.started_at,
                    ended_at: Some(ended_at),
                    status,
                    metadata,
                },
                event_ids,
                graveyard_entry_id,
            })
        })?;
        info!(
            session_id = %id,
            status = %status,
            events = records.events.len(),
            graveyard_entry = ?closed.graveyard_entry_id,
            "session closed"
        );
        Ok(closed)
    }

    // ── Events ──────────────────────────────────────────────────────────

    /// Append an event to an open session.
    pub fn append_event(&self, id: &SessionId, event: &NewEvent) -> StoreResult<EventId> {
        let event_id = self.write("append_event", |tx| {
            let session = load_session(tx, id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if session.is_closed() {
                return Err(StoreError::AlreadyClosed(id.clone()));
            }
            insert_event(tx, id, event)
        })?;
        debug!(session_id = %id, hook = %event.hook, event_id = %event_id, "event appended");
        Ok(event_id)
    }

    /// A session's events in append order, restricted by `filter`.
    pub fn query_events(&self, id: &SessionId, filter: &EventFilter) -> StoreResult<Vec<SessionEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, hook, tool_name, status, payload_json, created_at \
             FROM events WHERE session_id = ?1 AND id > ?2 ORDER BY id ASC",
        )?;
        let after = filter.after.map(|e| e.0).unwrap_or(0);
        let rows = stmt.query_map(params![id.as_str(), after], RawEvent::from_row)?;

        let mut events = Vec::new();
        for raw in rows {
            let event = raw?.into_event()?;
            if filter.matches(&event) {
                events.push(event);
                if filter.limit.is_some_and(|limit| events.len() >= limit) {
                    break;
                }
            }
        }
        Ok(events)
    }

    // ── Graveyard ───────────────────────────────────────────────────────

    pub fn record_graveyard_entry(&self, entry: &NewGraveyardEntry) -> StoreResult<i64> {
        let id = self.write("record_graveyard_entry", |tx| insert_graveyard_entry(tx, entry))?;
        info!(entry_id = id, "graveyard entry recorded");
        Ok(id)
    }

    /// Newest-first graveyard entries.
    pub fn list_graveyard(&self, limit: usize) -> StoreResult<Vec<GraveyardEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, summary, reason, files_json, keywords_json, created_at \
             FROM graveyard ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], RawGraveyard::from_row)?;
        rows.map(|r| r?.into_entry()).collect()
    }

    /// Full-text shortlist over the newest `corpus_limit` entries.
    ///
    /// Returns `Ok(None)` when FTS5 is unavailable so callers can fall back
    /// to scanning the corpus. Hits are ordered by bm25 relevance.
    pub fn graveyard_fts_candidates(
        &self,
        tokens: &[String],
        corpus_limit: usize,
        candidate_limit: usize,
    ) -> StoreResult<Option<Vec<GraveyardEntry>>> {
        let terms: Vec<String> = tokens
            .iter()
            .filter(|t| !t.is_empty())
            .take(12)
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect();
        if terms.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let conn = self.lock()?;
        if let Err(err) = conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS temp.graveyard_fts USING fts5(entry_id UNINDEXED, body);",
        ) {
            debug!(error = %err, "fts5 unavailable, scanning corpus");
            return Ok(None);
        }

        conn.execute("DELETE FROM temp.graveyard_fts", [])?;
        conn.execute(
            "INSERT INTO temp.graveyard_fts (entry_id, body) \
             SELECT id, summary || ' ' || reason || ' ' || keywords_json \
             FROM graveyard ORDER BY id DESC LIMIT ?1",
            params![corpus_limit as i64],
        )?;

        let mut stmt = conn.prepare(
            "SELECT g.id, g.session_id, g.summary, g.reason, g.files_json, g.keywords_json, g.created_at \
             FROM temp.graveyard_fts f JOIN graveyard g ON g.id = f.entry_id \
             WHERE graveyard_fts MATCH ?1 \
             ORDER BY bm25(graveyard_fts), g.id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![terms.join(" OR "), candidate_limit as i64],
            RawGraveyard::from_row,
        )?;
        let entries = rows.map(|r| r?.into_entry()).collect::<StoreResult<Vec<_>>>()?;
        Ok(Some(entries))
    }

    // ── Verification records ────────────────────────────────────────────

    pub fn record_invariant_result(&self, result: &InvariantResult) -> StoreResult<i64> {
        self.write("record_invariant_result", |tx| insert_invariant_result(tx, result))
    }

    pub fn list_invariant_results(&self, id: &SessionId) -> StoreResult<Vec<InvariantResult>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, test_path, status, duration_ms, stdout, stderr, graduated_from \
             FROM invariants WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;
        rows.map(|r| -> StoreResult<InvariantResult> {
            let (session_id, test_path, status, duration_ms, stdout, stderr, graduated_from) = r?;
            let status = InvariantStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("invariant status {status:?}")))?;
            Ok(InvariantResult {
                session_id: SessionId::new(session_id),
                test_path,
                status,
                duration_ms: duration_ms.max(0) as u64,
                stdout,
                stderr,
                graduated_from,
            })
        })
        .collect()
    }

    pub fn record_challenge_result(&self, result: &ChallengeResult) -> StoreResult<i64> {
        self.write("record_challenge_result", |tx| insert_challenge_result(tx, result))
    }

    pub fn list_challenge_results(&self, id: &SessionId) -> StoreResult<Vec<ChallengeResult>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, category, covered, evidence_json \
             FROM challenge_results WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        rows.map(|r| -> StoreResult<ChallengeResult> {
            let (session_id, category, covered, evidence) = r?;
            Ok(ChallengeResult {
                session_id: SessionId::new(session_id),
                category,
                covered,
                evidence: serde_json::from_str(&evidence)?,
            })
        })
        .collect()
    }
}

fn insert_event(tx: &Transaction<'_>, id: &SessionId, event: &NewEvent) -> StoreResult<EventId> {
    tx.execute(
        "INSERT INTO events (session_id, hook, tool_name, status, payload_json, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.as_str(),
            event.hook.as_str(),
            event.tool_name,
            event.status,
            serde_json::to_string(&event.payload)?,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(EventId(tx.last_insert_rowid()))
}

fn insert_graveyard_entry(tx: &Transaction<'_>, entry: &NewGraveyardEntry) -> StoreResult<i64> {
    tx.execute(
        "INSERT INTO graveyard (session_id, summary, reason, files_json, keywords_json, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.session_id.as_ref().map(SessionId::as_str),
            entry.summary,
            entry.reason,
            serde_json::to_string(&entry.files)?,
            serde_json::to_string(&entry.keywords)?,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn insert_invariant_result(tx: &Transaction<'_>, result: &InvariantResult) -> StoreResult<i64> {
    tx.execute(
        "INSERT INTO invariants (session_id, test_path, status, duration_ms, stdout, stderr, graduated_from, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            result.session_id.as_str(),
            result.test_path,
            result.status.as_str(),
            result.duration_ms as i64,
            result.stdout,
            result.stderr,
            result.graduated_from,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn insert_challenge_result(tx: &Transaction<'_>, result: &ChallengeResult) -> StoreResult<i64> {
    tx.execute(
        "INSERT INTO challenge_results (session_id, category, covered, evidence_json, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            result.session_id.as_str(),
            result.category,
            result.covered,
            serde_json::to_string(&result.evidence)?,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn insert_session(tx: &Transaction<'_>, id: &SessionId, metadata: &Map<String, Value>) -> StoreResult<Session> {
    let started_at = Utc::now();
    tx.execute(
        "INSERT INTO sessions (session_id, started_at, status, metadata_json) VALUES (?1, ?2, ?3, ?4)",
        params![
            id.as_str(),
            started_at.to_rfc3339(),
            SessionStatus::Open.as_str(),
            serde_json::to_string(metadata)?
        ],
    )?;
    Ok(Session {
        session_id: id.clone(),
        started_at,
        ended_at: None,
        status: SessionStatus::Open,
        metadata: metadata.clone(),
    })
}

fn load_session(conn: &Connection, id: &SessionId) -> StoreResult<Option<Session>> {
    let row = conn
        .query_row(
            "SELECT started_at, ended_at, status, metadata_json FROM sessions WHERE session_id = ?1",
            params![id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((started_at, ended_at, status, metadata)) = row else {
        return Ok(None);
    };
    let status = SessionStatus::parse(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("session status {status:?}")))?;
    let metadata = match serde_json::from_str::<Value>(&metadata)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(Some(Session {
        session_id: id.clone(),
        started_at: parse_time(&started_at)?,
        ended_at: ended_at.as_deref().map(parse_time).transpose()?,
        status,
        metadata,
    }))
}

fn parse_time(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

struct RawEvent {
    id: i64,
    session_id: String,
    hook: String,
    tool_name: Option<String>,
    status: Option<String>,
    payload: String,
    created_at: String,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            hook: row.get(2)?,
            tool_name: row.get(3)?,
            status: row.get(4)?,
            payload: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_event(self) -> StoreResult<SessionEvent> {
        let hook = HookKind::parse(&self.hook)
            .ok_or_else(|| StoreError::Corrupt(format!("event hook {:?}", self.hook)))?;
        Ok(SessionEvent {
            id: EventId(self.id),
            session_id: SessionId::new(self.session_id),
            hook,
            tool_name: self.tool_name,
            status: self.status,
            // A payload that fails to parse is kept as an opaque string.
            payload: serde_json::from_str(&self.payload).unwrap_or(Value::String(self.payload)),
            created_at: parse_time(&self.created_at)?,
        })
    }
}

struct RawGraveyard {
    id: i64,
    session_id: Option<String>,
    summary: String,
    reason: String,
    files: String,
    keywords: String,
    created_at: String,
}

impl RawGraveyard {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            summary: row.get(2)?,
            reason: row.get(3)?,
            files: row.get(4)?,
            keywords: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_entry(self) -> StoreResult<GraveyardEntry> {
        Ok(GraveyardEntry {
            id: self.id,
            session_id: self.session_id.map(SessionId::new),
            summary: self.summary,
            reason: self.reason,
            files: serde_json::from_str(&self.files)?,
            keywords: serde_json::from_str(&self.keywords)?,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sid(s: &str) -> SessionId {
        SessionId::new(s)
    }

    fn store() -> SessionStore {
        SessionStore::open_in_memory().unwrap()
    }

    #[test]
    fn open_twice_fails() {
        let store = store();
        store.open_session(&sid("s1"), Map::new()).unwrap();
        assert!(matches!(
            store.open_session(&sid("s1"), Map::new()),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn ensure_session_creates_once() {
        let store = store();
        let (_, created) = store.ensure_session(&sid("s1"), Map::new()).unwrap();
        assert!(created);
        let (session, created) = store.ensure_session(&sid("s1"), Map::new()).unwrap();
        assert!(!created);
        assert_eq!(session.status, SessionStatus::Open);
    }

    #[test]
    fn close_is_terminal() {
        let store = store();
        let id = sid("s1");
        store.open_session(&id, Map::new()).unwrap();
        let mut summary = Map::new();
        summary.insert("violations".into(), json!([]));
        let closed = store
            .close_session(&id, SessionStatus::ClosedPass, summary)
            .unwrap();
        assert!(closed.ended_at.is_some());
        assert_eq!(closed.metadata["violations"], json!([]));

        assert!(matches!(
            store.close_session(&id, SessionStatus::ClosedFail, Map::new()),
            Err(StoreError::AlreadyClosed(_))
        ));
        assert!(matches!(
            store.append_event(&id, &NewEvent::new(HookKind::Stop, json!({}))),
            Err(StoreError::AlreadyClosed(_))
        ));
        let reloaded = store.get_session(&id).unwrap().unwrap();
        assert_eq!(reloaded.status, SessionStatus::ClosedPass);
    }

    #[test]
    fn close_with_records_commits_together() {
        let store = store();
        let id = sid("s1");
        store.open_session(&id, Map::new()).unwrap();
        let records = CloseRecords {
            events: vec![NewEvent::new(HookKind::Stop, json!({"n": 1}))],
            challenge_results: vec![ChallengeResult {
                session_id: id.clone(),
                category: "null_inputs".into(),
                covered: true,
                evidence: json!({}),
            }],
            invariant_results: vec![InvariantResult::new(id.clone(), "inv.py", InvariantStatus::Pass)],
            graveyard_entry: Some(NewGraveyardEntry {
                session_id: Some(id.clone()),
                summary: "cache the parser".into(),
                reason: "stale output".into(),
                files: vec![],
                keywords: vec!["cache".into()],
            }),
        };

        let closed = store
            .close_session_with(&id, SessionStatus::ClosedFail, Map::new(), &records)
            .unwrap();
        assert_eq!(closed.session.status, SessionStatus::ClosedFail);
        assert_eq!(closed.event_ids.len(), 1);
        assert!(closed.graveyard_entry_id.is_some());

        // Losing a close race leaves no trace.
        assert!(matches!(
            store.close_session_with(&id, SessionStatus::ClosedPass, Map::new(), &records),
            Err(StoreError::AlreadyClosed(_))
        ));
        assert_eq!(store.query_events(&id, &EventFilter::new()).unwrap().len(), 1);
        assert_eq!(store.list_challenge_results(&id).unwrap().len(), 1);
        assert_eq!(store.list_invariant_results(&id).unwrap().len(), 1);
        assert_eq!(store.list_graveyard(10).unwrap().len(), 1);
    }

    #[test]
    fn close_unknown_and_open_status_rejected() {
        let store = store();
        assert!(matches!(
            store.close_session(&sid("nope"), SessionStatus::ClosedFail, Map::new()),
            Err(StoreError::NotFound(_))
        ));
        store.open_session(&sid("s1"), Map::new()).unwrap();
        assert!(matches!(
            store.close_session(&sid("s1"), SessionStatus::Open, Map::new()),
            Err(StoreError::InvalidStatus { .. })
        ));
    }

    #[test]
    fn contract_is_set_once() {
        let store = store();
        let id = sid("s1");
        store.open_session(&id, Map::new()).unwrap();
        let contract = RequirementContract::new(["R1", "R2"]);
        store.set_requirement_contract(&id, &contract).unwrap();
        assert!(matches!(
            store.set_requirement_contract(&id, &RequirementContract::new(["R3"])),
            Err(StoreError::ContractAlreadySet(_))
        ));

        // Closing metadata cannot overwrite the contract.
        let mut summary = Map::new();
        summary.insert(CONTRACT_METADATA_KEY.into(), json!({"required_requirement_ids": []}));
        let closed = store
            .close_session(&id, SessionStatus::ClosedFail, summary)
            .unwrap();
        assert_eq!(closed.requirement_contract(), Some(contract));
    }

    #[test]
    fn events_are_ordered_and_filtered() {
        let store = store();
        let id = sid("s1");
        store.open_session(&id, Map::new()).unwrap();
        let first = store
            .append_event(
                &id,
                &NewEvent::new(HookKind::PreToolUse, json!({"command": "pytest"}))
                    .with_tool(Some("Bash".into())),
            )
            .unwrap();
        let second = store
            .append_event(
                &id,
                &NewEvent::new(HookKind::PostToolUse, json!({}))
                    .with_tool(Some("Bash".into()))
                    .with_status(Some("ok".into())),
            )
            .unwrap();
        store
            .append_event(&id, &NewEvent::new(HookKind::Stop, json!({})))
            .unwrap();
        assert!(second > first);

        let all = store.query_events(&id, &EventFilter::new()).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        let tools = store.query_events(&id, &EventFilter::tool_use()).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].payload["command"], "pytest");

        let after = store
            .query_events(&id, &EventFilter::new().after(first).with_limit(1))
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, second);

        // Re-running the query yields the same sequence.
        assert_eq!(store.query_events(&id, &EventFilter::new()).unwrap(), all);
    }

    #[test]
    fn append_to_unknown_session_fails() {
        let store = store();
        assert!(matches!(
            store.append_event(&sid("ghost"), &NewEvent::new(HookKind::Stop, json!({}))),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn graveyard_newest_first_and_fts() {
        let store = store();
        for (summary, keywords) in [
            ("redis cache timeout", vec!["cache", "timeout"]),
            ("parser panics on empty input", vec!["parser", "panic", "empty"]),
        ] {
            store
                .record_graveyard_entry(&NewGraveyardEntry {
                    session_id: None,
                    summary: summary.into(),
                    reason: "did not work".into(),
                    files: vec!["src/a.rs".into()],
                    keywords: keywords.into_iter().map(String::from).collect(),
                })
                .unwrap();
        }
        let listed = store.list_graveyard(10).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].id > listed[1].id);

        if let Some(hits) = store
            .graveyard_fts_candidates(&["cache".to_string()], 200, 80)
            .unwrap()
        {
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].summary, "redis cache timeout");
        }
        assert_eq!(
            store.graveyard_fts_candidates(&[], 200, 80).unwrap(),
            Some(Vec::new())
        );
    }

    #[test]
    fn verification_records_round_trip() {
        let store = store();
        let id = sid("s1");
        store.open_session(&id, Map::new()).unwrap();

        let mut result = InvariantResult::new(id.clone(), "tests/inv.py", InvariantStatus::Missing);
        result.stderr = "not found".into();
        store.record_invariant_result(&result).unwrap();
        assert_eq!(store.list_invariant_results(&id).unwrap(), vec![result]);

        let challenge = ChallengeResult {
            session_id: id.clone(),
            category: "null_inputs".into(),
            covered: true,
            evidence: json!({"tests": ["t1"]}),
        };
        store.record_challenge_result(&challenge).unwrap();
        assert_eq!(store.list_challenge_results(&id).unwrap(), vec![challenge]);
    }

    #[test]
    fn on_disk_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cortex.db");
        {
            let store = SessionStore::open(&path, &StoreConfig::default()).unwrap();
            store.open_session(&sid("s1"), Map::new()).unwrap();
        }
        let store = SessionStore::open(&path, &StoreConfig::default()).unwrap();
        assert!(store.get_session(&sid("s1")).unwrap().is_some());
        assert_eq!(store.schema_version().unwrap(), schema::SCHEMA_VERSION);
    }

    #[test]
    fn incompatible_on_disk_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cortex.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }
        assert!(matches!(
            SessionStore::open(&path, &StoreConfig::default()),
            Err(StoreError::MigrationRequired { found: 99, .. })
        ));
    }

    #[test]
    fn concurrent_writers_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cortex.db");
        let config = StoreConfig::default();
        let seed = SessionStore::open(&path, &config).unwrap();
        seed.open_session(&sid("s1"), Map::new()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let path = path.clone();
                let config = config.clone();
                std::thread::spawn(move || {
                    let store = SessionStore::open(&path, &config).unwrap();
                    for i in 0..10 {
                        store
                            .append_event(
                                &sid("s1"),
                                &NewEvent::new(HookKind::PostToolUse, json!({"n": n, "i": i})),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(seed.query_events(&sid("s1"), &EventFilter::new()).unwrap().len(), 40);
    }

    #[test]
    fn retry_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(25));
        assert_eq!(policy.delay(1), Duration::from_millis(50));
        assert_eq!(policy.delay(3), Duration::from_millis(200));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn events_come_back_in_append_order(hooks in proptest::collection::vec(0u8..3, 1..20)) {
                let store = store();
                let id = sid("p");
                store.open_session(&id, Map::new()).unwrap();
                let kinds = [HookKind::PreToolUse, HookKind::PostToolUse, HookKind::SessionStart];
                let mut ids = Vec::new();
                for h in &hooks {
                    ids.push(store.append_event(&id, &NewEvent::new(kinds[*h as usize], json!({}))).unwrap());
                }
                let events = store.query_events(&id, &EventFilter::new()).unwrap();
                prop_assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
            }
        }
    }
}
