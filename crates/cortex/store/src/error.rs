use cortex_types::{SessionId, SessionStatus};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Session store errors.
///
/// Only [`StoreError::Sqlite`] failures with a busy/locked code are retried;
/// everything else surfaces on the first attempt.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session already closed: {0}")]
    AlreadyClosed(SessionId),

    #[error("requirement contract already set for session: {0}")]
    ContractAlreadySet(SessionId),

    #[error("invalid closing status for session {session_id}: {status}")]
    InvalidStatus {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error("store busy: write lock not acquired after {attempts} attempts")]
    StoreBusy { attempts: u32 },

    #[error("database schema version {found} is not supported (expected {expected}); migration required")]
    MigrationRequired { found: i64, expected: i64 },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store connection lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether this is transient write contention worth retrying.
    pub fn is_busy(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
