use cortex_invariants::InvariantError;
use cortex_store::StoreError;
use cortex_types::HookKind;
use thiserror::Error;

pub type KernelResult<T> = Result<T, KernelError>;

/// Errors a hook call can end in. Policy outcomes are never errors.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown hook event: {0}")]
    UnknownHook(String),

    #[error("malformed {hook} payload: {reason}")]
    MalformedPayload { hook: HookKind, reason: String },

    #[error("invariant runner failed: {0}")]
    Invariants(InvariantError),
}

impl From<InvariantError> for KernelError {
    fn from(err: InvariantError) -> Self {
        match err {
            InvariantError::Store(inner) => KernelError::Store(inner),
            other => KernelError::Invariants(other),
        }
    }
}

impl KernelError {
    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::Store(StoreError::AlreadyClosed(_)) => "already_closed",
            KernelError::Store(StoreError::NotFound(_)) => "not_found",
            KernelError::Store(StoreError::MigrationRequired { .. }) => "migration_required",
            KernelError::Store(StoreError::StoreBusy { .. }) => "store_busy",
            KernelError::Store(_) => "store",
            KernelError::UnknownHook(_) => "unknown_hook",
            KernelError::MalformedPayload { .. } => "malformed_payload",
            KernelError::Invariants(_) => "invariants",
        }
    }
}
