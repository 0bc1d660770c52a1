// src/pipeline/runner.rs

//! Runs one rule end to end: evaluation, compliance review, neutrality
//! check and the store-level results table.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::model::period::PeriodLabel;
use crate::model::recommendation::{DetailRow, Recommendation, RuleFamily, RuleId};
use crate::model::store::{ClusterId, StoreCode};
use crate::stats::classifier::{PerformanceTier, Severity};
use crate::strategy::compliance::{ComplianceGate, ComplianceReport};
use crate::strategy::investment::{check_neutrality, NeutralityBreach};
use crate::strategy::traits::{AllocationRule, RuleContext};

/// One row of a rule's store-level results table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreResult {
    pub rule_id: u8,
    pub period_label: String,
    pub str_code: StoreCode,
    pub cluster_id: ClusterId,
    pub rule_triggered: bool,
    pub anomaly_count: usize,
    pub high_severity_count: usize,
    pub compliant_count: usize,
    pub total_quantity_change: f64,
    pub total_investment: f64,
    pub mean_z_score: Option<f64>,
    pub performance_tier: Option<PerformanceTier>,
}

#[derive(Debug)]
pub struct RuleOutput {
    pub rule_id: RuleId,
    pub period: PeriodLabel,
    pub run_sequence: u32,
    pub results: Vec<StoreResult>,
    pub details: Vec<Recommendation>,
    pub compliance: ComplianceReport,
    pub neutrality_breaches: Vec<NeutralityBreach>,
    pub excluded_cohorts: usize,
}

impl RuleOutput {
    pub fn detail_rows(&self) -> Vec<DetailRow> {
        self.details
            .iter()
            .map(|rec| DetailRow::from_recommendation(rec, self.run_sequence))
            .collect()
    }
}

#[derive(Debug)]
pub struct RuleRunner {
    rule: Box<dyn AllocationRule>,
    run_sequence: u32,
    neutrality_epsilon: f64,
}

impl RuleRunner {
    pub fn new(rule: Box<dyn AllocationRule>, run_sequence: u32, neutrality_epsilon: f64) -> Self {
        Self {
            rule,
            run_sequence,
            neutrality_epsilon,
        }
    }

    pub fn rule_id(&self) -> RuleId {
        self.rule.rule_id()
    }

    pub fn run(&self, ctx: &RuleContext<'_>) -> EngineResult<RuleOutput> {
        let rule_id = self.rule.rule_id();
        let evaluation = self.rule.evaluate(ctx)?;

        let mut details = evaluation.recommendations;
        details.sort_by(|a, b| {
            a.str_code
                .cmp(&b.str_code)
                .then_with(|| a.category_dimension.cmp(&b.category_dimension))
        });

        let gate = ComplianceGate::for_rule(rule_id, self.rule.store_cap());
        let compliance = gate.review(&mut details);

        let neutrality_breaches = if rule_id.family() == RuleFamily::Bidirectional {
            check_neutrality(&details, self.neutrality_epsilon)
        } else {
            Vec::new()
        };

        let mut by_store: BTreeMap<&str, Vec<&Recommendation>> = BTreeMap::new();
        for rec in &details {
            by_store.entry(rec.str_code.as_str()).or_default().push(rec);
        }

        let results = ctx
            .clusters
            .stores()
            .map(|(store, cluster_id)| {
                let recs = by_store.remove(store.as_str()).unwrap_or_default();
                let score = evaluation.store_scores.get(store);
                StoreResult {
                    rule_id: rule_id.number(),
                    period_label: ctx.period.to_string(),
                    str_code: store.clone(),
                    cluster_id,
                    rule_triggered: !recs.is_empty(),
                    anomaly_count: recs.len(),
                    high_severity_count: recs
                        .iter()
                        .filter(|r| r.severity >= Severity::High)
                        .count(),
                    compliant_count: recs.iter().filter(|r| r.fast_fish_compliant).count(),
                    total_quantity_change: recs.iter().map(|r| r.recommended_quantity_change).sum(),
                    total_investment: recs.iter().map(|r| r.investment_required).sum(),
                    mean_z_score: score.map(|s| s.mean_z_score),
                    performance_tier: score.and_then(|s| s.tier),
                }
            })
            .collect();

        if !compliance.defects.is_empty() {
            warn!(rule = %rule_id, defects = compliance.defects.len(), "rule produced constraint violations");
        }
        info!(
            rule = %rule_id,
            recommendations = details.len(),
            compliant = compliance.compliant,
            rejected = compliance.rejected(),
            excluded_cohorts = evaluation.excluded_cohorts,
            "rule evaluated"
        );

        Ok(RuleOutput {
            rule_id,
            period: ctx.period,
            run_sequence: self.run_sequence,
            results,
            details,
            compliance,
            neutrality_breaches,
            excluded_cohorts: evaluation.excluded_cohorts,
        })
    }
}
