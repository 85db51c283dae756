use std::path::PathBuf;

use cortex_store::StoreError;
use thiserror::Error;

pub type RunnerResult<T> = Result<T, InvariantError>;

/// Invariant runner errors.
///
/// Planning failures ([`InvariantError::EngineNotFound`],
/// [`InvariantError::OutsideRoot`]) never escape [`crate::InvariantRunner::run`];
/// they become deterministic `error` results for the affected suite.
#[derive(Debug, Error)]
pub enum InvariantError {
    #[error("container engine not resolvable: {0}")]
    EngineNotFound(String),

    #[error("invariant path is outside the project root: {path} (root: {root})")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("runner command is empty")]
    EmptyRunner,

    #[error("graduation source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
