// src/strategy/compliance.rs

//! Business-safety gate applied to every recommendation of a rule run.
//!
//! Checks, in order:
//! - the delta's sign matches the rule family (a failure is a defect),
//! - the resulting quantity is not negative,
//! - the store's summed increases stay within the rule's per-store cap.
//!
//! Failing recommendations stay in the output with `fast_fish_compliant =
//! false` and the reasons appended to their rationale.

use tracing::error;

use crate::error::EngineError;
use crate::model::recommendation::{Recommendation, RuleFamily, RuleId};
use crate::strategy::investment::store_totals;
use crate::strategy::quantity::QTY_EPSILON;

#[derive(Debug, Clone, Copy)]
pub struct ComplianceGate {
    rule: RuleId,
    family: RuleFamily,
    store_cap: Option<f64>,
}

#[derive(Debug, Default)]
pub struct ComplianceReport {
    pub reviewed: usize,
    pub compliant: usize,
    /// Sign violations. Each one points at a logic defect in the rule.
    pub defects: Vec<EngineError>,
}

impl ComplianceReport {
    pub fn rejected(&self) -> usize {
        self.reviewed - self.compliant
    }
}

impl ComplianceGate {
    pub fn for_rule(rule: RuleId, store_cap: Option<f64>) -> Self {
        Self {
            rule,
            family: rule.family(),
            store_cap,
        }
    }

    pub fn review(&self, recommendations: &mut [Recommendation]) -> ComplianceReport {
        let totals = store_totals(recommendations);
        let mut report = ComplianceReport {
            reviewed: recommendations.len(),
            ..ComplianceReport::default()
        };

        for rec in recommendations.iter_mut() {
            let mut reasons: Vec<String> = Vec::new();
            let delta = rec.recommended_quantity_change;

            if !self.family.admits(delta) {
                let reason = format!("quantity change {delta:.2} violates {:?} direction", self.family);
                let defect = EngineError::ConstraintViolation {
                    rule: self.rule,
                    str_code: rec.str_code.clone(),
                    category_dimension: rec.category_dimension.clone(),
                    reason: reason.clone(),
                };
                error!("{defect}");
                report.defects.push(defect);
                reasons.push(reason);
            }

            if rec.resulting_quantity() < -QTY_EPSILON {
                reasons.push(format!(
                    "resulting quantity {:.2} is negative",
                    rec.resulting_quantity()
                ));
            }

            if let (Some(cap), Some(store)) = (self.store_cap, totals.get(&rec.str_code)) {
                if store.increase_quantity > cap + QTY_EPSILON {
                    reasons.push(format!(
                        "store increases {:.2} exceed cap {:.2}",
                        store.increase_quantity, cap
                    ));
                }
            }

            rec.fast_fish_compliant = reasons.is_empty();
            let verdict = if rec.fast_fish_compliant {
                report.compliant += 1;
                "Fast Fish compliant".to_string()
            } else {
                format!("Not compliant: {}", reasons.join("; "))
            };
            if rec.business_rationale.is_empty() {
                rec.business_rationale = verdict;
            } else {
                rec.business_rationale = format!("{} | {}", rec.business_rationale, verdict);
            }
        }
        report
    }
}
