// src/strategy/rules/sales_performance.rs

//! Rule 12: grades every store-dimension by its sales z-score within the
//! cohort and recommends upside allocation for the opportunity tiers.
//!
//! The uplift closes a tier-weighted share of the gap to the cohort's upper
//! quartile. Stores also receive a store-level tier from their mean z-score.

use std::collections::BTreeMap;

use crate::error::EngineResult;
use crate::model::allocation::MetricKind;
use crate::model::recommendation::{AnomalyMeasure, Recommendation, RuleDetail, RuleId};
use crate::model::store::StoreCode;
use crate::pipeline::config::SalesPerformanceConfig;
use crate::stats::cohort::CohortTable;
use crate::strategy::investment::margin_impact;
use crate::strategy::quantity::increase_only;
use crate::strategy::rules::{finish_increases, member_anomaly, too_small};
use crate::strategy::traits::{AllocationRule, RuleContext, RuleEvaluation, StoreScore};

#[derive(Debug, Clone)]
pub struct SalesPerformanceRule {
    config: SalesPerformanceConfig,
}

impl SalesPerformanceRule {
    pub fn new(config: SalesPerformanceConfig) -> Self {
        Self { config }
    }

    fn describe(rec: &Recommendation) -> String {
        match &rec.detail {
            RuleDetail::SalesPerformance {
                z_score,
                tier,
                benchmark_sales,
                margin_impact,
            } => format!(
                "{tier} (z {:+.2}) against top-quartile sales {:.2}; add {:.1} units for an expected margin of {:.2}",
                z_score, benchmark_sales, rec.recommended_quantity_change, margin_impact
            ),
            _ => String::new(),
        }
    }
}

impl AllocationRule for SalesPerformanceRule {
    fn rule_id(&self) -> RuleId {
        RuleId::SalesPerformance
    }

    fn store_cap(&self) -> Option<f64> {
        Some(self.config.max_total_qty_per_store)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> EngineResult<RuleEvaluation> {
        let cfg = &self.config;
        let table = CohortTable::build(ctx.allocations, ctx.clusters, MetricKind::SalesAmount);
        let mut evaluation = RuleEvaluation::default();
        let mut recommendations = Vec::new();
        let mut store_z: BTreeMap<StoreCode, Vec<f64>> = BTreeMap::new();

        for cohort in table.iter() {
            if too_small(RuleId::SalesPerformance, cohort, cfg.min_cohort_size) {
                evaluation.excluded_cohorts += 1;
                continue;
            }
            let stats = cohort.stats;

            for member in &cohort.members {
                let Some(z) = stats.z_score(member.value) else {
                    continue;
                };
                store_z.entry(member.str_code.clone()).or_default().push(z);

                let tier = cfg.bands.classify(z);
                if !tier.is_opportunity() {
                    continue;
                }
                let record = &ctx.allocations[member.record_index];
                if record.unit_price <= 0.0 {
                    continue;
                }
                let gap_sales = (stats.p75 - member.value).max(0.0) * tier.uplift_weight();
                let uplift_units = gap_sales / record.unit_price;
                let Some(delta) =
                    increase_only(record.quantity, record.quantity + uplift_units, cfg.min_boost_qty)
                else {
                    continue;
                };
                let anomaly = member_anomaly(
                    RuleId::SalesPerformance,
                    cohort,
                    member,
                    record,
                    ctx.level,
                    AnomalyMeasure::ZScore(z),
                    tier.severity(),
                );
                let detail = RuleDetail::SalesPerformance {
                    z_score: z,
                    tier,
                    benchmark_sales: stats.p75,
                    margin_impact: 0.0,
                };
                recommendations.push(Recommendation::from_anomaly(anomaly, ctx.period, delta, detail));
            }
        }

        let margin_rate = cfg.margin_rate;
        let mut kept = finish_increases(
            recommendations,
            cfg.max_total_qty_per_store,
            cfg.min_boost_qty,
            |_| String::new(),
        );
        for rec in kept.iter_mut() {
            if let RuleDetail::SalesPerformance { margin_impact: m, .. } = &mut rec.detail {
                *m = margin_impact(rec.recommended_quantity_change, rec.unit_price, margin_rate);
            }
            rec.business_rationale = Self::describe(rec);
        }

        evaluation.store_scores = store_z
            .into_iter()
            .map(|(store, zs)| {
                let mean = zs.iter().sum::<f64>() / zs.len() as f64;
                (
                    store,
                    StoreScore {
                        mean_z_score: mean,
                        tier: Some(cfg.bands.classify(mean)),
                    },
                )
            })
            .collect();
        evaluation.recommendations = kept;
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::allocation::{AllocationRecord, AnalysisLevel};
    use crate::model::store::{ClusterAssignment, ClusterMap};
    use crate::stats::classifier::PerformanceTier;

    fn rec(store: &str, qty: f64, sales: f64) -> AllocationRecord {
        AllocationRecord {
            str_code: store.into(),
            category_dimension: "Knitwear".into(),
            subcategory: None,
            quantity: qty,
            sales_amount: sales,
            unit_price: 10.0,
        }
    }

    #[test]
    fn opportunity_tiers_receive_upside_only() {
        let allocations = vec![
            rec("S1", 5.0, 50.0),
            rec("S2", 10.0, 200.0),
            rec("S3", 10.0, 205.0),
            rec("S4", 10.0, 210.0),
            rec("S5", 10.0, 215.0),
            rec("S6", 10.0, 220.0),
            rec("S7", 10.0, 225.0),
            rec("S8", 10.0, 230.0),
        ];
        let clusters = ClusterMap::from_assignments(allocations.iter().map(|r| ClusterAssignment {
            str_code: r.str_code.clone(),
            cluster_id: 1,
        }));
        let ctx = RuleContext {
            period: "202507A".parse().unwrap(),
            level: AnalysisLevel::Subcategory,
            clusters: &clusters,
            allocations: &allocations,
        };
        let eval = SalesPerformanceRule::new(SalesPerformanceConfig::default())
            .evaluate(&ctx)
            .unwrap();
        assert_eq!(eval.recommendations.len(), 1);
        let r = &eval.recommendations[0];
        assert_eq!(r.str_code, "S1");
        assert!(r.recommended_quantity_change > 0.0);
        match r.detail {
            RuleDetail::SalesPerformance { tier, margin_impact, .. } => {
                assert_eq!(tier, PerformanceTier::MajorOpportunity);
                let expected = r.recommended_quantity_change * 10.0 * 0.4;
                assert!((margin_impact - expected).abs() < 1e-9);
            }
            _ => panic!("unexpected detail"),
        }
        assert_eq!(eval.store_scores["S1"].tier, Some(PerformanceTier::MajorOpportunity));
        assert_eq!(eval.store_scores.len(), 8);
    }
}
