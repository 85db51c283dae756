//! Cortex stop handling.
//!
//! [`StopResolver`] reads the agent's stop claim from the highest-precedence
//! channel that yields one: native top-level fields, a structured
//! `cortex_stop` field, or (only when allowed) a trailer in the last assistant
//! message. [`StopPolicy`] turns the gate results into the closing status.

#![deny(unsafe_code)]

mod failed_approach;
pub mod policy;
mod resolver;
pub mod trailer;

pub use failed_approach::{extract_failed_approach, FailedApproach};
pub use policy::{decide, StopDecision, StopPolicy, Violation};
pub use resolver::{ClaimSource, ResolvedStop, StopClaim, StopResolver, CLAIM_KEYS, STRUCTURED_KEY};
pub use trailer::{parse_trailer, Trailer};
