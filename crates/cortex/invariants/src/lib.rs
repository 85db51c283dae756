//! Cortex invariant runner.
//!
//! Invariants are externally authored test suites the audited agent does not
//! control. At stop time each configured suite runs once as a subprocess with
//! a bounded timeout, on the host or wrapped in a container engine, and the
//! raw exit is mapped to `pass`, `fail`, `error` or `missing`. Failures are
//! never retried.

#![deny(unsafe_code)]

mod error;
pub mod executor;
pub mod plan;
mod runner;

pub use error::{InvariantError, RunnerResult};
pub use executor::{ExecOutcome, ProcessExecutor, SuiteExecutor};
pub use plan::{plan_command, resolve_program, CommandPlan};
pub use runner::{InvariantReport, InvariantRunner};
