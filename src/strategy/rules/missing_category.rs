// src/strategy/rules/missing_category.rs

//! Rule 7: a dimension most of the cluster carries is absent from a store.

use tracing::debug;

use crate::error::EngineResult;
use crate::model::allocation::MetricKind;
use crate::model::recommendation::{Anomaly, AnomalyMeasure, Recommendation, RuleDetail, RuleId};
use crate::pipeline::config::MissingCategoryConfig;
use crate::stats::classifier::Severity;
use crate::stats::cohort::{quantile, CohortTable};
use crate::strategy::quantity::increase_only;
use crate::strategy::rules::finish_increases;
use crate::strategy::traits::{AllocationRule, RuleContext, RuleEvaluation};

#[derive(Debug, Clone)]
pub struct MissingCategoryRule {
    config: MissingCategoryConfig,
}

impl MissingCategoryRule {
    pub fn new(config: MissingCategoryConfig) -> Self {
        Self { config }
    }

    fn describe(rec: &Recommendation) -> String {
        match &rec.detail {
            RuleDetail::MissingCategory {
                peer_adoption_rate,
                peer_sellers,
                peer_median_quantity,
            } => format!(
                "{:.0}% of cluster {} ({} stores) carry {}; store carries none. Add {:.1} units (peer median {:.1})",
                peer_adoption_rate * 100.0,
                rec.cluster_id,
                peer_sellers,
                rec.category_dimension,
                rec.recommended_quantity_change,
                peer_median_quantity
            ),
            _ => String::new(),
        }
    }
}

impl AllocationRule for MissingCategoryRule {
    fn rule_id(&self) -> RuleId {
        RuleId::MissingCategory
    }

    fn store_cap(&self) -> Option<f64> {
        Some(self.config.max_total_qty_per_store)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> EngineResult<RuleEvaluation> {
        let cfg = &self.config;
        let table = CohortTable::build(ctx.allocations, ctx.clusters, MetricKind::SalesAmount);
        let cluster_members = ctx.clusters.members();
        let mut evaluation = RuleEvaluation::default();
        let mut recommendations = Vec::new();

        for cohort in table.iter() {
            let Some(stores) = cluster_members.get(&cohort.key.cluster_id) else {
                continue;
            };

            let carriers: Vec<_> = cohort
                .members
                .iter()
                .filter(|m| {
                    let record = &ctx.allocations[m.record_index];
                    record.quantity > 0.0 || record.sales_amount > 0.0
                })
                .collect();

            if carriers.len() < cfg.min_peer_stores {
                evaluation.excluded_cohorts += 1;
                continue;
            }

            let adoption = carriers.len() as f64 / stores.len() as f64;
            let peer_sales: f64 = carriers.iter().map(|m| m.value.max(0.0)).sum();
            if adoption < cfg.min_adoption_rate || peer_sales < cfg.min_cluster_sales {
                continue;
            }

            let mut quantities: Vec<f64> = carriers
                .iter()
                .map(|m| ctx.allocations[m.record_index].quantity)
                .collect();
            quantities.sort_by(|a, b| a.total_cmp(b));
            let median_quantity = quantile(&quantities, 0.5);

            let mut prices: Vec<f64> = carriers
                .iter()
                .map(|m| ctx.allocations[m.record_index].unit_price)
                .collect();
            prices.sort_by(|a, b| a.total_cmp(b));
            let peer_price = quantile(&prices, 0.5);

            let subcategory = carriers
                .iter()
                .find_map(|m| ctx.allocations[m.record_index].subcategory_for(ctx.level));

            for store in stores {
                if carriers.iter().any(|m| &m.str_code == store) {
                    continue;
                }
                let Some(delta) = increase_only(0.0, median_quantity, cfg.min_boost_qty) else {
                    debug!(str_code = %store, dimension = %cohort.key.category_dimension, "no feasible boost");
                    continue;
                };
                let anomaly = Anomaly {
                    rule_id: RuleId::MissingCategory,
                    str_code: store.clone(),
                    cluster_id: cohort.key.cluster_id,
                    category_dimension: cohort.key.category_dimension.clone(),
                    subcategory: subcategory.clone(),
                    measure: AnomalyMeasure::Absent,
                    severity: Severity::Absent,
                    metric_value: 0.0,
                    current_quantity: 0.0,
                    unit_price: peer_price,
                };
                let detail = RuleDetail::MissingCategory {
                    peer_adoption_rate: adoption,
                    peer_sellers: carriers.len(),
                    peer_median_quantity: median_quantity,
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
