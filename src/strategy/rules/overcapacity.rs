// src/strategy/rules/overcapacity.rs

//! Rule 10: a store holds more of a dimension than its sales justify.
//!
//! Capacity target = store sales x median quantity-per-sales of the cohort.
//! Reductions never exceed `max_reduction_pct` of the current quantity.

use crate::error::EngineResult;
use crate::model::allocation::MetricKind;
use crate::model::recommendation::{AnomalyMeasure, Recommendation, RuleDetail, RuleId};
use crate::pipeline::config::OvercapacityConfig;
use crate::stats::classifier::classify_excess;
use crate::stats::cohort::{quantile, CohortTable};
use crate::strategy::investment::price_recommendations;
use crate::strategy::quantity::decrease_only;
use crate::strategy::rules::{member_anomaly, too_small};
use crate::strategy::traits::{AllocationRule, RuleContext, RuleEvaluation};

#[derive(Debug, Clone)]
pub struct SmartOvercapacityRule {
    config: OvercapacityConfig,
}

impl SmartOvercapacityRule {
    pub fn new(config: OvercapacityConfig) -> Self {
        Self { config }
    }

    fn describe(rec: &Recommendation) -> String {
        match &rec.detail {
            RuleDetail::SmartOvercapacity {
                capacity_target,
                excess_quantity,
                reduction_cap,
            } => format!(
                "Holding {:.1} against a sales-implied capacity of {:.1} ({:.1} excess); reduce by {:.1} (cap {:.1}), releasing {:.2}",
                rec.current_quantity,
                capacity_target,
                excess_quantity,
                -rec.recommended_quantity_change,
                reduction_cap,
                -rec.investment_required
            ),
            _ => String::new(),
        }
    }
}

impl AllocationRule for SmartOvercapacityRule {
    fn rule_id(&self) -> RuleId {
        RuleId::SmartOvercapacity
    }

    fn store_cap(&self) -> Option<f64> {
        None
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> EngineResult<RuleEvaluation> {
        let cfg = &self.config;
        let table = CohortTable::build(ctx.allocations, ctx.clusters, MetricKind::Quantity);
        let mut evaluation = RuleEvaluation::default();
        let mut recommendations = Vec::new();

        for cohort in table.iter() {
            if too_small(RuleId::SmartOvercapacity, cohort, cfg.min_cohort_size) {
                evaluation.excluded_cohorts += 1;
                continue;
            }

            let mut ratios: Vec<f64> = cohort
                .members
                .iter()
                .map(|m| &ctx.allocations[m.record_index])
                .filter(|r| r.quantity > 0.0 && r.sales_amount > 0.0)
                .map(|r| r.quantity / r.sales_amount)
                .collect();
            if ratios.is_empty() {
                continue;
            }
            ratios.sort_by(|a, b| a.total_cmp(b));
            let peer_rate = quantile(&ratios, 0.5);

            for member in &cohort.members {
                let record = &ctx.allocations[member.record_index];
                let target = record.sales_amount.max(0.0) * peer_rate;
                let class = classify_excess(record.quantity, target, cfg.tolerance);
                if !class.triggered {
                    continue;
                }
                let Some(delta) = decrease_only(record.quantity, target, cfg.max_reduction_pct) else {
                    continue;
                };
                let anomaly = member_anomaly(
                    RuleId::SmartOvercapacity,
                    cohort,
                    member,
                    record,
                    ctx.level,
                    AnomalyMeasure::ThresholdGap(record.quantity - target),
                    class.severity,
                );
                let detail = RuleDetail::SmartOvercapacity {
                    capacity_target: target,
                    excess_quantity: record.quantity - target,
                    reduction_cap: record.quantity * cfg.max_reduction_pct,
                };
                recommendations.push(Recommendation::from_anomaly(anomaly, ctx.period, delta, detail));
            }
        }

        price_recommendations(&mut recommendations);
        for rec in recommendations.iter_mut() {
            rec.business_rationale = Self::describe(rec);
        }
        evaluation.recommendations = recommendations;
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::allocation::{AllocationRecord, AnalysisLevel};
    use crate::model::store::{ClusterAssignment, ClusterMap};
    use crate::stats::classifier::Severity;

    fn rec(store: &str, qty: f64, sales: f64) -> AllocationRecord {
        AllocationRecord {
            str_code: store.into(),
            category_dimension: "Tops".into(),
            subcategory: None,
            quantity: qty,
            sales_amount: sales,
            unit_price: 25.0,
        }
    }

    fn run(allocations: &[AllocationRecord], config: OvercapacityConfig) -> RuleEvaluation {
        let clusters = ClusterMap::from_assignments(allocations.iter().map(|r| ClusterAssignment {
            str_code: r.str_code.clone(),
            cluster_id: 2,
        }));
        let ctx = RuleContext {
            period: "202507A".parse().unwrap(),
            level: AnalysisLevel::Subcategory,
            clusters: &clusters,
            allocations,
        };
        SmartOvercapacityRule::new(config).evaluate(&ctx).unwrap()
    }

    #[test]
    fn reduces_toward_sales_implied_capacity() {
        let allocations = vec![rec("P1", 10.0, 100.0), rec("P2", 10.0, 100.0), rec("S2", 20.0, 120.0)];
        let eval = run(&allocations, OvercapacityConfig::default());
        assert_eq!(eval.recommendations.len(), 1);
        let r = &eval.recommendations[0];
        assert_eq!(r.str_code, "S2");
        assert!(r.recommended_quantity_change <= -4.8 && r.recommended_quantity_change >= -8.0);
        assert!(r.investment_required < 0.0);
        assert_eq!(r.severity, Severity::Medium);
        assert_eq!(r.subcategory.as_deref(), Some("Tops"));
    }

    #[test]
    fn reduction_respects_pct_cap() {
        let allocations = vec![rec("P1", 10.0, 100.0), rec("P2", 10.0, 100.0), rec("S2", 20.0, 10.0)];
        let eval = run(&allocations, OvercapacityConfig::default());
        let r = &eval.recommendations[0];
        assert!((r.recommended_quantity_change + 8.0).abs() < 1e-9);
    }

    #[test]
    fn single_store_cohort_is_excluded() {
        let eval = run(&[rec("S1", 50.0, 1.0)], OvercapacityConfig::default());
        assert!(eval.recommendations.is_empty());
        assert_eq!(eval.excluded_cohorts, 1);
    }
}
