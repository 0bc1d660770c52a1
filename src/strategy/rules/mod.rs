// src/strategy/rules/mod.rs

pub mod below_minimum;
pub mod imbalanced;
pub mod missed_sales;
pub mod missing_category;
pub mod overcapacity;
pub mod sales_performance;

use tracing::debug;

use crate::error::EngineError;
use crate::model::allocation::{AllocationRecord, AnalysisLevel};
use crate::model::recommendation::{Anomaly, AnomalyMeasure, Recommendation, RuleId};
use crate::pipeline::config::EngineConfig;
use crate::stats::classifier::Severity;
use crate::stats::cohort::{Cohort, CohortMember};
use crate::strategy::investment::price_recommendations;
use crate::strategy::quantity::cap_store_increases;
use crate::strategy::traits::AllocationRule;

pub use below_minimum::BelowMinimumRule;
pub use imbalanced::ImbalancedRule;
pub use missed_sales::MissedSalesRule;
pub use missing_category::MissingCategoryRule;
pub use overcapacity::SmartOvercapacityRule;
pub use sales_performance::SalesPerformanceRule;

/// Instantiates a rule from the engine configuration.
pub fn build_rule(rule: RuleId, config: &EngineConfig) -> Box<dyn AllocationRule> {
    match rule {
        RuleId::MissingCategory => Box::new(MissingCategoryRule::new(config.missing_category.clone())),
        RuleId::Imbalanced => Box::new(ImbalancedRule::new(config.imbalanced.clone())),
        RuleId::BelowMinimum => Box::new(BelowMinimumRule::new(config.below_minimum.clone())),
        RuleId::SmartOvercapacity => {
            Box::new(SmartOvercapacityRule::new(config.overcapacity.clone()))
        }
        RuleId::MissedSales => Box::new(MissedSalesRule::new(config.missed_sales.clone())),
        RuleId::SalesPerformance => {
            Box::new(SalesPerformanceRule::new(config.sales_performance.clone()))
        }
    }
}

/// Returns `true` (and logs why) when a cohort is too small to compare.
pub(crate) fn too_small(rule: RuleId, cohort: &Cohort, required: usize) -> bool {
    if cohort.stats.count >= required {
        return false;
    }
    let reason = EngineError::InsufficientCohort {
        cluster_id: cohort.key.cluster_id,
        category_dimension: cohort.key.category_dimension.clone(),
        count: cohort.stats.count,
        required,
    };
    debug!(%rule, "excluded: {reason}");
    true
}

/// Builds an anomaly for a cohort member from its allocation record.
pub(crate) fn member_anomaly(
    rule: RuleId,
    cohort: &Cohort,
    member: &CohortMember,
    record: &AllocationRecord,
    level: AnalysisLevel,
    measure: AnomalyMeasure,
    severity: Severity,
) -> Anomaly {
    Anomaly {
        rule_id: rule,
        str_code: member.str_code.clone(),
        cluster_id: cohort.key.cluster_id,
        category_dimension: cohort.key.category_dimension.clone(),
        subcategory: record.subcategory_for(level),
        measure,
        severity,
        metric_value: member.value,
        current_quantity: record.quantity,
        unit_price: record.unit_price,
    }
}

/// Shared tail of the increase-only rules: per-store cap, pricing, and a
/// rationale per surviving recommendation.
pub(crate) fn finish_increases<F>(
    recommendations: Vec<Recommendation>,
    max_total_qty_per_store: f64,
    min_boost_qty: f64,
    describe: F,
) -> Vec<Recommendation>
where
    F: Fn(&Recommendation) -> String,
{
    let mut kept = cap_store_increases(recommendations, max_total_qty_per_store, min_boost_qty);
    price_recommendations(&mut kept);
    for rec in kept.iter_mut() {
        rec.business_rationale = describe(rec);
    }
    kept
}
