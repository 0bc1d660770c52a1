// src/strategy/rules/below_minimum.rs

//! Rule 9: a carried dimension sells through fewer units per window than the
//! cluster-category minimum.
//!
//! Meeting the minimum exactly is not a shortfall. A zero rate is an absent
//! dimension and belongs to rule 7.

use crate::error::EngineResult;
use crate::model::allocation::MetricKind;
use crate::model::recommendation::{AnomalyMeasure, Recommendation, RuleDetail, RuleId};
use crate::pipeline::config::BelowMinimumConfig;
use crate::stats::classifier::{classify_shortfall, Severity};
use crate::stats::cohort::CohortTable;
use crate::strategy::quantity::increase_only;
use crate::strategy::rules::{finish_increases, member_anomaly};
use crate::strategy::traits::{AllocationRule, RuleContext, RuleEvaluation};

#[derive(Debug, Clone)]
pub struct BelowMinimumRule {
    config: BelowMinimumConfig,
}

impl BelowMinimumRule {
    pub fn new(config: BelowMinimumConfig) -> Self {
        Self { config }
    }

    fn describe(rec: &Recommendation) -> String {
        match &rec.detail {
            RuleDetail::BelowMinimum {
                unit_rate,
                minimum_rate,
            } => format!(
                "Unit rate {:.2} is below cluster-category minimum {:.2}; boost by {:.2} units",
                unit_rate, minimum_rate, rec.recommended_quantity_change
            ),
            _ => String::new(),
        }
    }
}

impl AllocationRule for BelowMinimumRule {
    fn rule_id(&self) -> RuleId {
        RuleId::BelowMinimum
    }

    fn store_cap(&self) -> Option<f64> {
        Some(self.config.max_total_qty_per_store)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> EngineResult<RuleEvaluation> {
        let cfg = &self.config;
        let period_days = f64::from(ctx.period.days());
        let metric = MetricKind::UnitRate {
            window_days: cfg.window_days,
            period_days,
        };
        let table = CohortTable::build(ctx.allocations, ctx.clusters, metric);
        let mut recommendations = Vec::new();

        for cohort in table.iter() {
            for member in &cohort.members {
                let class = classify_shortfall(member.value, cfg.min_unit_rate);
                if !class.triggered || class.severity == Severity::Absent {
                    continue;
                }
                let record = &ctx.allocations[member.record_index];
                let gap_rate = cfg.min_unit_rate - member.value;
                let gap_quantity = gap_rate * period_days / cfg.window_days;
                let Some(delta) =
                    increase_only(record.quantity, record.quantity + gap_quantity, cfg.min_boost_qty)
                else {
                    continue;
                };
                let anomaly = member_anomaly(
                    RuleId::BelowMinimum,
                    cohort,
                    member,
                    record,
                    ctx.level,
                    AnomalyMeasure::ThresholdGap(gap_rate),
                    class.severity,
                );
                let detail = RuleDetail::BelowMinimum {
                    unit_rate: member.value,
                    minimum_rate: cfg.min_unit_rate,
                };
                recommendations.push(Recommendation::from_anomaly(anomaly, ctx.period, delta, detail));
            }
        }

        Ok(RuleEvaluation {
            recommendations: finish_increases(
                recommendations,
                cfg.max_total_qty_per_store,
                cfg.min_boost_qty,
                Self::describe,
            ),
            ..RuleEvaluation::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::allocation::{AllocationRecord, AnalysisLevel};
    use crate::model::store::{ClusterAssignment, ClusterMap};

    fn setup(quantities: &[(&str, f64)]) -> (ClusterMap, Vec<AllocationRecord>) {
        let clusters = ClusterMap::from_assignments(quantities.iter().map(|(s, _)| ClusterAssignment {
            str_code: s.to_string(),
            cluster_id: 1,
        }));
        let allocations = quantities
            .iter()
            .map(|(s, q)| AllocationRecord {
                str_code: s.to_string(),
                category_dimension: "SPU1".into(),
                subcategory: None,
                quantity: *q,
                sales_amount: q * 10.0,
                unit_price: 10.0,
            })
            .collect();
        (clusters, allocations)
    }

    #[test]
    fn boosts_below_minimum_by_at_least_min_boost() {
        let (clusters, allocations) = setup(&[("S1", 0.8), ("S2", 3.0)]);
        let ctx = RuleContext {
            period: "202507A".parse().unwrap(),
            level: AnalysisLevel::Spu,
            clusters: &clusters,
            allocations: &allocations,
        };
        let eval = BelowMinimumRule::new(BelowMinimumConfig::default()).evaluate(&ctx).unwrap();
        assert_eq!(eval.recommendations.len(), 1);
        let r = &eval.recommendations[0];
        assert_eq!(r.str_code, "S1");
        assert!(r.recommended_quantity_change >= 0.5);
        assert!((r.investment_required - 5.0).abs() < 1e-9);
    }

    #[test]
    fn exact_minimum_and_zero_are_not_flagged() {
        let (clusters, allocations) = setup(&[("S1", 1.0), ("S2", 0.0)]);
        let ctx = RuleContext {
            period: "202507A".parse().unwrap(),
            level: AnalysisLevel::Spu,
            clusters: &clusters,
            allocations: &allocations,
        };
        let eval = BelowMinimumRule::new(BelowMinimumConfig::default()).evaluate(&ctx).unwrap();
        assert!(eval.recommendations.is_empty());
    }

    #[test]
    fn longer_period_needs_more_units() {
        // 16-day half: 1.0 unit/15 days needs 16/15 units over the period.
        let (clusters, allocations) = setup(&[("S1", 0.5)]);
        let ctx = RuleContext {
            period: "202507B".parse().unwrap(),
            level: AnalysisLevel::Spu,
            clusters: &clusters,
            allocations: &allocations,
        };
        let eval = BelowMinimumRule::new(BelowMinimumConfig::default()).evaluate(&ctx).unwrap();
        let r = &eval.recommendations[0];
        let expected = 16.0 / 15.0 - 0.5;
        assert!((r.recommended_quantity_change - expected).abs() < 1e-9);
    }
}
