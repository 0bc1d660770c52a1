// src/strategy/traits.rs

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::error::EngineResult;
use crate::model::allocation::{AllocationRecord, AnalysisLevel};
use crate::model::period::PeriodLabel;
use crate::model::recommendation::{Recommendation, RuleId};
use crate::model::store::{ClusterMap, StoreCode};
use crate::stats::classifier::PerformanceTier;

/// Read-only inputs handed to a rule for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub period: PeriodLabel,
    pub level: AnalysisLevel,
    pub clusters: &'a ClusterMap,
    /// Deduplicated allocations, sorted by store then dimension.
    pub allocations: &'a [AllocationRecord],
}

/// Store-level score a rule may report alongside its recommendations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreScore {
    pub mean_z_score: f64,
    pub tier: Option<PerformanceTier>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleEvaluation {
    pub recommendations: Vec<Recommendation>,
    pub store_scores: BTreeMap<StoreCode, StoreScore>,
    /// Cohorts skipped for having too few members to compare.
    pub excluded_cohorts: usize,
}

/// Decision logic of one allocation rule.
///
/// Implementations hold their own immutable configuration and must not keep
/// state between evaluations. `Send + Sync` lets the engine run rules on a
/// worker pool.
pub trait AllocationRule: Debug + Send + Sync {
    fn rule_id(&self) -> RuleId;

    /// Ceiling on a store's summed increases, if the rule has one.
    fn store_cap(&self) -> Option<f64>;

    /// Detects anomalies and turns them into priced recommendations with a
    /// rationale. Compliance flags are left to the runner.
    fn evaluate(&self, ctx: &RuleContext<'_>) -> EngineResult<RuleEvaluation>;
}
