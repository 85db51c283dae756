//! Cortex shared types.
//!
//! Everything that crosses a component boundary inside the enforcement kernel
//! lives here:
//!
//! - **Sessions** and their lifecycle status, including the embedded
//!   requirement contract fixed at session start.
//! - **Events** recorded for every hook call. The event log is the witness log
//!   that stop-time claims are checked against.
//! - **Records** appended by the verification components (graveyard entries,
//!   invariant results, challenge results).
//! - **Hook events**: the normalized, typed shape of an incoming hook call.
//!   Provider-specific field names never reach this layer.
//! - **Configuration** threaded explicitly into every component.
//! - **Warnings**: machine-readable codes with a human-readable message.

#![deny(unsafe_code)]

pub mod settings;
pub mod error;
pub mod event;
pub mod hook;
pub mod records;
pub mod session;
pub mod value;
pub mod warning;

pub use settings::{
    ChallengesConfig, CortexConfig, ExecutionMode, GraveyardConfig, HooksConfig,
    InvariantsConfig, Mode, StoreConfig,
};
pub use error::ConfigError;
pub use event::{EventFilter, EventId, HookKind, NewEvent, SessionEvent};
pub use hook::{HookEvent, SessionStartPayload, StopPayload, ToolUsePayload};
pub use records::{
    ChallengeResult, GraveyardEntry, InvariantResult, InvariantStatus, NewGraveyardEntry,
};
pub use session::{RequirementContract, Session, SessionId, SessionStatus};
pub use warning::{Warning, WarningCode};
