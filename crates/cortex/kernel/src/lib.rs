//! Cortex enforcement kernel.
//!
//! Four hooks drive a session:
//!
//! - `session_start` opens the session, fixes its requirement contract and
//!   surfaces similar past failures from the graveyard;
//! - `pre_tool_use` and `post_tool_use` append to the witness log, and a
//!   failed tool call is matched against the graveyard;
//! - `stop` resolves the agent's claim, audits requirements, checks challenge
//!   coverage, runs invariant suites and closes the session with a verdict.
//!
//! Host-specific event and field names are handled by [`Adapter`] and never
//! reach the kernel.

#![deny(unsafe_code)]

pub mod adapter;
mod error;
mod kernel;
pub mod response;

pub use adapter::Adapter;
pub use error::{KernelError, KernelResult};
pub use kernel::{generate_session_id, Kernel, AUTO_STARTED_KEY};
pub use response::{
    ErrorBody, ErrorResponse, HookResponse, SessionStartResponse, StopResponse, ToolUseResponse,
};
