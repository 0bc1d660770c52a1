// src/strategy/rules/missed_sales.rs

//! Rule 11: a store's sales of a dimension trail the cohort benchmark
//! (upper quantile of peer sales) by a wide margin.

use crate::error::EngineResult;
use crate::model::allocation::MetricKind;
use crate::model::recommendation::{AnomalyMeasure, Recommendation, RuleDetail, RuleId};
use crate::pipeline::config::MissedSalesConfig;
use crate::stats::classifier::classify_ratio_below;
use crate::stats::cohort::{quantile, CohortTable};
use crate::strategy::quantity::increase_only;
use crate::strategy::rules::{finish_increases, member_anomaly, too_small};
use crate::strategy::traits::{AllocationRule, RuleContext, RuleEvaluation};

#[derive(Debug, Clone)]
pub struct MissedSalesRule {
    config: MissedSalesConfig,
}

impl MissedSalesRule {
    pub fn new(config: MissedSalesConfig) -> Self {
        Self { config }
    }

    fn describe(rec: &Recommendation) -> String {
        match &rec.detail {
            RuleDetail::MissedSales {
                peer_benchmark_sales,
                sales_ratio,
            } => format!(
                "Sales {:.2} reach {:.0}% of the peer benchmark {:.2}; add {:.1} units to capture missed demand",
                rec.metric_value,
                sales_ratio * 100.0,
                peer_benchmark_sales,
                rec.recommended_quantity_change
            ),
            _ => String::new(),
        }
    }
}

impl AllocationRule for MissedSalesRule {
    fn rule_id(&self) -> RuleId {
        RuleId::MissedSales
    }

    fn store_cap(&self) -> Option<f64> {
        Some(self.config.max_total_qty_per_store)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> EngineResult<RuleEvaluation> {
        let cfg = &self.config;
        let table = CohortTable::build(ctx.allocations, ctx.clusters, MetricKind::SalesAmount);
        let mut evaluation = RuleEvaluation::default();
        let mut recommendations = Vec::new();

        for cohort in table.iter() {
            if too_small(RuleId::MissedSales, cohort, cfg.min_cohort_size) {
                evaluation.excluded_cohorts += 1;
                continue;
            }
            let benchmark = quantile(&cohort.sorted_values(), cfg.benchmark_quantile);
            if !(benchmark >= cfg.min_sales_volume) || benchmark <= 0.0 {
                continue;
            }

            for member in &cohort.members {
                let record = &ctx.allocations[member.record_index];
                if record.unit_price <= 0.0 {
                    continue;
                }
                let ratio = member.value.max(0.0) / benchmark;
                let class = classify_ratio_below(ratio, cfg.max_sales_ratio);
                if !class.triggered {
                    continue;
                }
                let missing_units = (benchmark - member.value.max(0.0)) / record.unit_price;
                let Some(delta) =
                    increase_only(record.quantity, record.quantity + missing_units, cfg.min_boost_qty)
                else {
                    continue;
                };
                let anomaly = member_anomaly(
                    RuleId::MissedSales,
                    cohort,
                    member,
                    record,
                    ctx.level,
                    AnomalyMeasure::ThresholdGap(benchmark - member.value),
                    class.severity,
                );
                let detail = RuleDetail::MissedSales {
                    peer_benchmark_sales: benchmark,
                    sales_ratio: ratio,
                };
                recommendations.push(Recommendation::from_anomaly(anomaly, ctx.period, delta, detail));
            }
        }

        evaluation.recommendations = finish_increases(
            recommendations,
            cfg.max_total_qty_per_store,
            cfg.min_boost_qty,
            Self::describe,
        );
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
            category_dimension: "SPU9".into(),
            subcategory: Some("Denim".into()),
            quantity: qty,
            sales_amount: sales,
            unit_price: 50.0,
        }
    }

    #[test]
    fn laggard_gets_uplift_toward_benchmark() {
        let allocations = vec![
            rec("S1", 2.0, 100.0),
            rec("S2", 8.0, 400.0),
            rec("S3", 8.0, 400.0),
            rec("S4", 8.0, 400.0),
        ];
        let clusters = ClusterMap::from_assignments(allocations.iter().map(|r| ClusterAssignment {
            str_code: r.str_code.clone(),
            cluster_id: 1,
        }));
        let ctx = RuleContext {
            period: "202507A".parse().unwrap(),
            level: AnalysisLevel::Spu,
            clusters: &clusters,
            allocations: &allocations,
        };
        let eval = MissedSalesRule::new(MissedSalesConfig::default()).evaluate(&ctx).unwrap();
        assert_eq!(eval.recommendations.len(), 1);
        let r = &eval.recommendations[0];
        assert_eq!(r.str_code, "S1");
        assert_eq!(r.severity, Severity::High);
        assert!((r.recommended_quantity_change - 6.0).abs() < 1e-9);
        assert!((r.investment_required - 300.0).abs() < 1e-9);
    }

    #[test]
    fn small_benchmark_is_ignored() {
        let allocations = vec![rec("S1", 1.0, 1.0), rec("S2", 1.0, 10.0), rec("S3", 1.0, 10.0)];
        let clusters = ClusterMap::from_assignments(allocations.iter().map(|r| ClusterAssignment {
            str_code: r.str_code.clone(),
            cluster_id: 1,
        }));
        let ctx = RuleContext {
            period: "202507A".parse().unwrap(),
            level: AnalysisLevel::Spu,
            clusters: &clusters,
            allocations: &allocations,
        };
        let eval = MissedSalesRule::new(MissedSalesConfig::default()).evaluate(&ctx).unwrap();
        assert!(eval.recommendations.is_empty());
    }
}
