//! Cortex requirement audit engine.
//!
//! A stop claim may carry a `requirement_audit`: one item per requirement
//! with a claimed `status` and `evidence` references. The engine reconciles
//! the items with the contract fixed at session start, classifies every
//! evidence reference by shape, and witnesses it against the session's own
//! event log. Only the compact [`RequirementAuditReport`] is part of the
//! hook response.

#![deny(unsafe_code)]

mod audit;
pub mod evidence;
pub mod witness;

pub use audit::{
    AuditOutcome, AuditPolicy, EvidenceCheck, ItemAssessment, RequirementAuditReport, RequirementAuditor,
};
pub use evidence::{EvidenceKind, EvidenceRef};
pub use witness::{Verification, WitnessLog};
