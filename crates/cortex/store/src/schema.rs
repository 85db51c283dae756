//! Schema definition and version gate.
//!
//! The schema version lives in `PRAGMA user_version`. Any change to a table
//! shape must bump [`SCHEMA_VERSION`]; opening a database stamped with another
//! version fails with [`StoreError::MigrationRequired`].

use rusqlite::{Connection, OptionalExtension};

use crate::error::{StoreError, StoreResult};

pub const SCHEMA_VERSION: i64 = 1;

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    status TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(session_id),
    hook TEXT NOT NULL,
    tool_name TEXT,
    status TEXT,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id, id);

CREATE TABLE IF NOT EXISTS graveyard (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT,
    summary TEXT NOT NULL,
    reason TEXT NOT NULL,
    files_json TEXT NOT NULL,
    keywords_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS invariants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(session_id),
    test_path TEXT NOT NULL,
    status TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    stdout TEXT NOT NULL,
    stderr TEXT NOT NULL,
    graduated_from TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_invariants_session ON invariants(session_id, id);

CREATE TABLE IF NOT EXISTS challenge_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(session_id),
    category TEXT NOT NULL,
    covered INTEGER NOT NULL,
    evidence_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_challenges_session ON challenge_results(session_id, id);

CREATE TRIGGER IF NOT EXISTS events_append_only_update BEFORE UPDATE ON events
BEGIN SELECT RAISE(ABORT, 'events are append-only'); END;
CREATE TRIGGER IF NOT EXISTS events_append_only_delete BEFORE DELETE ON events
BEGIN SELECT RAISE(ABORT, 'events are append-only'); END;
CREATE TRIGGER IF NOT EXISTS graveyard_append_only_update BEFORE UPDATE ON graveyard
BEGIN SELECT RAISE(ABORT, 'graveyard is append-only'); END;
CREATE TRIGGER IF NOT EXISTS graveyard_append_only_delete BEFORE DELETE ON graveyard
BEGIN SELECT RAISE(ABORT, 'graveyard is append-only'); END;
"#;

/// Read the stamped schema version.
pub fn schema_version(conn: &Connection) -> StoreResult<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Create the schema on a fresh database, or verify the stamped version.
pub fn ensure_schema(conn: &mut Connection) -> StoreResult<()> {
    let found = schema_version(conn)?;
    if found == SCHEMA_VERSION {
        return Ok(());
    }

    // Unstamped but populated: written by something we do not understand.
    if found != 0 || has_user_tables(conn)? {
        return Err(StoreError::MigrationRequired {
            found,
            expected: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    tx.execute_batch(DDL)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    tracing::debug!(version = SCHEMA_VERSION, "initialized store schema");
    Ok(())
}

fn has_user_tables(conn: &Connection) -> StoreResult<bool> {
    let name: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name.is_some())
}
