use std::collections::BTreeSet;
use std::path::PathBuf;

use cortex_types::value::{non_empty_str, string_list, unique};
use cortex_types::{HooksConfig, RequirementContract, Warning, WarningCode};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::evidence::{EvidenceKind, EvidenceRef};
use crate::witness::{Verification, WitnessLog};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuditPolicy {
    /// An absent audit fails even without a contract.
    pub require_audit: bool,
    pub require_evidence_for_pass: bool,
}

impl From<&HooksConfig> for AuditPolicy {
    fn from(hooks: &HooksConfig) -> Self {
        Self {
            require_audit: hooks.require_requirement_audit,
            require_evidence_for_pass: hooks.require_evidence_for_passed_requirement,
        }
    }
}

impl Default for AuditPolicy {
    fn default() -> Self {
        AuditPolicy::from(&HooksConfig::default())
    }
}

/// The public audit result. Per-item detail stays in [`AuditOutcome::items`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RequirementAuditReport {
    pub ok: bool,
    pub errors: Vec<String>,
    pub missing_required_ids: Vec<String>,
    /// Every submitted item with an id, duplicates and out-of-contract ids
    /// included. `pass_count` and `fail_count` cover only assessed items.
    pub item_count: usize,
    pub pass_count: usize,
    pub fail_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EvidenceCheck {
    pub reference: String,
    pub kind: EvidenceKind,
    pub verification: Verification,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ItemAssessment {
    pub id: String,
    pub status: String,
    pub checks: Vec<EvidenceCheck>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditOutcome {
    pub ok: bool,
    /// `None` when no audit was submitted and none was required.
    pub report: Option<RequirementAuditReport>,
    pub required_ids: Vec<String>,
    pub items: Vec<ItemAssessment>,
    pub warnings: Vec<Warning>,
}

struct RawItem {
    id: String,
    status: String,
    evidence: Vec<String>,
    gap: Option<String>,
}

pub struct RequirementAuditor {
    root: PathBuf,
    policy: AuditPolicy,
}

impl RequirementAuditor {
    pub fn new(root: impl Into<PathBuf>, policy: AuditPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    /// Reconcile a submitted audit with the session contract and witness its
    /// evidence against the event log.
    ///
    /// With a contract, audit ids outside it are dropped and contract ids the
    /// audit does not cover are reported missing. Without one, the claim's
    /// `required_requirement_ids` (or else the audit's own ids) are used and an
    /// advisory warning is raised.
    pub fn audit(
        &self,
        contract: Option<&RequirementContract>,
        claimed_required: &[String],
        audit: Option<&Value>,
        witness: &WitnessLog,
    ) -> AuditOutcome {
        let mut warnings = Vec::new();
        if let Some(contract) = contract {
            let claimed: BTreeSet<&str> = claimed_required.iter().map(String::as_str).collect();
            let fixed: BTreeSet<&str> = contract.required_requirement_ids.iter().map(String::as_str).collect();
            if !claimed.is_empty() && claimed != fixed {
                warnings.push(Warning::new(
                    WarningCode::RequirementNotInContract,
                    "Ignoring required_requirement_ids from the stop claim; the session contract applies",
                ));
            }
        }

        let Some(audit) = audit else {
            let mut outcome = self.absent(contract, claimed_required);
            warnings.append(&mut outcome.warnings);
            outcome.warnings = warnings;
            return outcome;
        };

        let mut errors = Vec::new();
        let (raw_items, verdict) = parse_audit(audit, &mut errors);
        let submitted = raw_items.len();

        let mut seen = BTreeSet::new();
        let mut items = Vec::with_capacity(raw_items.len());
        for item in raw_items {
            if !seen.insert(item.id.clone()) {
                errors.push(format!("Duplicate requirement id in audit: {}", item.id));
                continue;
            }
            if let Some(contract) = contract {
                if !contract.contains(&item.id) {
                    warnings.push(Warning::new(
                        WarningCode::RequirementNotInContract,
                        format!("Requirement {} is not in the session contract and was ignored", item.id),
                    ));
                    continue;
                }
            }
            items.push(item);
        }

        let required_ids = match contract {
            Some(contract) => contract.required_requirement_ids.clone(),
            None => {
                let ids = if claimed_required.is_empty() {
                    items.iter().map(|i| i.id.clone()).collect()
                } else {
                    unique(claimed_required.iter().cloned())
                };
                warnings.push(Warning::new(
                    WarningCode::RequirementNoContract,
                    "Session declared no requirement contract at start; audit ids are self-reported",
                ));
                ids
            }
        };

        let mut report = RequirementAuditReport {
            item_count: submitted,
            ..RequirementAuditReport::default()
        };
        let mut assessments = Vec::with_capacity(items.len());
        for item in &items {
            assessments.push(self.assess_item(item, witness, &mut report, &mut errors, &mut warnings));
        }

        let covered: BTreeSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
        report.missing_required_ids = required_ids
            .iter()
            .filter(|id| !covered.contains(id.as_str()))
            .cloned()
            .collect();
        if !report.missing_required_ids.is_empty() {
            errors.push(format!(
                "Missing required requirement ids: {}",
                report.missing_required_ids.join(", ")
            ));
        }

        if let Some(verdict) = verdict {
            let expected = if !items.is_empty() && report.fail_count == 0 && errors.is_empty() {
                "pass"
            } else {
                "fail"
            };
            match verdict.as_str() {
                "pass" | "fail" if verdict == expected => {}
                "pass" | "fail" => errors.push(format!(
                    "completeness_verdict '{verdict}' does not match computed verdict '{expected}'"
                )),
                other => errors.push(format!("completeness_verdict must be pass or fail, got '{other}'")),
            }
        }

        report.ok = errors.is_empty() && report.fail_count == 0;
        report.errors = errors;
        if !report.ok {
            warnings.push(Warning::new(
                WarningCode::RequirementAudit,
                format!(
                    "Requirement audit failed: {} error(s), {} failing item(s)",
                    report.errors.len(),
                    report.fail_count
                ),
            ));
        }
        debug!(
            items = report.item_count,
            missing = report.missing_required_ids.len(),
            ok = report.ok,
            "requirement audit evaluated"
        );

        AuditOutcome {
            ok: report.ok,
            report: Some(report),
            required_ids,
            items: assessments,
            warnings,
        }
    }

    fn absent(&self, contract: Option<&RequirementContract>, claimed_required: &[String]) -> AuditOutcome {
        let required_ids = match contract {
            Some(contract) => contract.required_requirement_ids.clone(),
            None => unique(claimed_required.iter().cloned()),
        };
        if contract.is_none() && !self.policy.require_audit {
            return AuditOutcome {
                ok: true,
                report: None,
                required_ids,
                items: Vec::new(),
                warnings: Vec::new(),
            };
        }

        let report = RequirementAuditReport {
            ok: false,
            errors: vec!["requirement_audit is required but was not provided".to_string()],
            missing_required_ids: required_ids.clone(),
            ..RequirementAuditReport::default()
        };
        AuditOutcome {
            ok: false,
            report: Some(report),
            required_ids,
            items: Vec::new(),
            warnings: vec![Warning::new(
                WarningCode::RequirementAudit,
                "Stop claim carried no requirement_audit",
            )],
        }
    }

    fn assess_item(
        &self,
        item: &RawItem,
        witness: &WitnessLog,
        report: &mut RequirementAuditReport,
        errors: &mut Vec<String>,
        warnings: &mut Vec<Warning>,
    ) -> ItemAssessment {
        let mut checks = Vec::new();
        match item.status.as_str() {
            "pass" => {
                report.pass_count += 1;
                if item.evidence.is_empty() && self.policy.require_evidence_for_pass {
                    errors.push(format!("{}: status pass requires evidence", item.id));
                }
                for reference in &item.evidence {
                    let evidence = EvidenceRef::classify(reference, &self.root);
                    let verification = witness.verify(&evidence);
                    match verification {
                        Verification::Verified => {}
                        Verification::Unverified => errors.push(format!(
                            "{}: evidence '{}' is contradicted by the session log",
                            item.id, reference
                        )),
                        Verification::Uncheckable => warnings.push(Warning::new(
                            WarningCode::EvidenceUncheckable,
                            format!("{}: evidence '{}' cannot be confirmed", item.id, reference),
                        )),
                    }
                    checks.push(EvidenceCheck {
                        reference: reference.clone(),
                        kind: evidence.kind(),
                        verification,
                    });
                }
            }
            "fail" => {
                report.fail_count += 1;
                if item.gap.is_none() {
                    errors.push(format!("{}: status fail requires gap", item.id));
                }
            }
            other => errors.push(format!(
                "{}: invalid status '{}' (expected pass or fail)",
                item.id, other
            )),
        }
        ItemAssessment {
            id: item.id.clone(),
            status: item.status.clone(),
            checks,
        }
    }
}

/// Accepts `{items: [...], completeness_verdict?}` or a bare item list.
fn parse_audit(audit: &Value, errors: &mut Vec<String>) -> (Vec<RawItem>, Option<String>) {
    let (raw_items, verdict) = match audit {
        Value::Array(items) => (items.as_slice(), None),
        Value::Object(map) => {
            let verdict = non_empty_str(map.get("completeness_verdict")).map(|v| v.to_lowercase());
            match map.get("items") {
                Some(Value::Array(items)) => (items.as_slice(), verdict),
                _ => {
                    errors.push("requirement_audit.items must be a list".to_string());
                    (&[][..], verdict)
                }
            }
        }
        _ => {
            errors.push("requirement_audit must be an object or a list".to_string());
            return (Vec::new(), None);
        }
    };

    if raw_items.is_empty() {
        errors.push("requirement_audit has no items".to_string());
    }

    let mut items = Vec::with_capacity(raw_items.len());
    for (index, raw) in raw_items.iter().enumerate() {
        let Value::Object(map) = raw else {
            errors.push(format!("requirement_audit item {index} must be an object"));
            continue;
        };
        match parse_item(map) {
            Some(item) => items.push(item),
            None => errors.push(format!("requirement_audit item {index} has no id")),
        }
    }
    (items, verdict)
}

fn parse_item(map: &Map<String, Value>) -> Option<RawItem> {
    let id = non_empty_str(map.get("id"))?;
    Some(RawItem {
        id,
        status: non_empty_str(map.get("status"))
            .map(|s| s.to_lowercase())
            .unwrap_or_default(),
        evidence: string_list(map.get("evidence")),
        gap: non_empty_str(map.get("gap")),
    })
}
