// src/strategy/rules/imbalanced.rs

//! Rule 8: allocation quantity is a statistical outlier within its cohort.
//!
//! Increases and decreases are paired inside each store so the store's net
//! investment stays at zero.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::EngineResult;
use crate::model::allocation::MetricKind;
use crate::model::recommendation::{AnomalyMeasure, Recommendation, RuleDetail, RuleId};
use crate::model::store::StoreCode;
use crate::pipeline::config::ImbalancedConfig;
use crate::stats::classifier::classify_z;
use crate::stats::cohort::{CohortStats, CohortTable};
use crate::strategy::investment::price_recommendations;
use crate::strategy::quantity::{rebalance_store, RebalanceLeg, QTY_EPSILON};
use crate::strategy::rules::{member_anomaly, too_small};
use crate::strategy::traits::{AllocationRule, RuleContext, RuleEvaluation, StoreScore};

#[derive(Debug, Clone)]
pub struct ImbalancedRule {
    config: ImbalancedConfig,
}

impl ImbalancedRule {
    pub fn new(config: ImbalancedConfig) -> Self {
        Self { config }
    }

    fn describe(rec: &Recommendation) -> String {
        match &rec.detail {
            RuleDetail::Imbalanced {
                z_score,
                cohort_mean,
                ..
            } => {
                let side = if rec.recommended_quantity_change >= 0.0 {
                    "under-allocated"
                } else {
                    "over-allocated"
                };
                format!(
                    "{} is {side} (z {:+.2}, cluster mean {:.1}, current {:.1}); rebalance {:+.1} units funded within the store",
                    rec.category_dimension,
                    z_score,
                    cohort_mean,
                    rec.current_quantity,
                    rec.recommended_quantity_change
                )
            }
            _ => String::new(),
        }
    }
}

struct Flagged {
    recommendation: Recommendation,
    leg: RebalanceLeg,
}

impl AllocationRule for ImbalancedRule {
    fn rule_id(&self) -> RuleId {
        RuleId::Imbalanced
    }

    fn store_cap(&self) -> Option<f64> {
        Some(self.config.max_total_qty_per_store)
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> EngineResult<RuleEvaluation> {
        let cfg = &self.config;
        let table = CohortTable::build(ctx.allocations, ctx.clusters, MetricKind::Quantity);
        let mut evaluation = RuleEvaluation::default();
        let mut flagged: BTreeMap<StoreCode, Vec<Flagged>> = BTreeMap::new();
        let mut store_z: BTreeMap<StoreCode, Vec<f64>> = BTreeMap::new();

        for cohort in table.iter() {
            if too_small(RuleId::Imbalanced, cohort, cfg.min_cohort_size) {
                evaluation.excluded_cohorts += 1;
                continue;
            }
            let stats: CohortStats = cohort.stats;
            if !stats.has_deviation() {
                continue;
            }

            for member in &cohort.members {
                let Some(z) = stats.z_score(member.value) else {
                    continue;
                };
                store_z.entry(member.str_code.clone()).or_default().push(z.abs());

                let class = classify_z(Some(z), &cfg.bands);
                if !class.triggered {
                    continue;
                }
                let record = &ctx.allocations[member.record_index];
                let anomaly = member_anomaly(
                    RuleId::Imbalanced,
                    cohort,
                    member,
                    record,
                    ctx.level,
                    AnomalyMeasure::ZScore(z),
                    class.severity,
                );
                let detail = RuleDetail::Imbalanced {
                    z_score: z,
                    cohort_mean: stats.mean,
                    cohort_std: stats.std,
                };
                flagged.entry(member.str_code.clone()).or_default().push(Flagged {
                    recommendation: Recommendation::from_anomaly(anomaly, ctx.period, 0.0, detail),
                    leg: RebalanceLeg {
                        current: record.quantity,
                        target: stats.mean,
                        unit_price: record.unit_price,
                    },
                });
            }
        }

        let mut recommendations = Vec::new();
        for (store, items) in flagged {
            let legs: Vec<RebalanceLeg> = items.iter().map(|f| f.leg).collect();
            let Some(deltas) = rebalance_store(&legs, cfg.adjustment_factor, Some(cfg.max_total_qty_per_store))
            else {
                debug!(str_code = %store, cohorts = items.len(), "no investment-neutral rebalance possible");
                continue;
            };
            for (item, delta) in items.into_iter().zip(deltas) {
                if delta.abs() <= QTY_EPSILON {
                    continue;
                }
                let mut rec = item.recommendation;
                rec.recommended_quantity_change = delta;
                recommendations.push(rec);
            }
        }

        price_recommendations(&mut recommendations);
        for rec in recommendations.iter_mut() {
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
                        tier: None,
                    },
                )
            })
            .collect();
        evaluation.recommendations = recommendations;
        Ok(evaluation)
    }
}
