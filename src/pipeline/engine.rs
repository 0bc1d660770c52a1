// src/pipeline/engine.rs

//! Runs the enabled rules on a bounded worker pool, then hands whatever
//! completed to the consolidator.
//!
//! A rule that fails (missing input, error, panic) is reported on its own and
//! shows up as NA in the consolidated tables; it never stops the other rules.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{error, info};

use crate::error::{EngineError, EngineResult};
use crate::model::allocation::{aggregate_records, AllocationRecord};
use crate::model::period::PeriodLabel;
use crate::model::recommendation::RuleId;
use crate::model::store::ClusterMap;
use crate::pipeline::config::EngineConfig;
use crate::pipeline::consolidate::{subcategory_lookup, Consolidation, Consolidator, RuleDetails};
use crate::pipeline::runner::{RuleOutput, RuleRunner};
use crate::strategy::rules::build_rule;
use crate::strategy::traits::{AllocationRule, RuleContext};

/// Everything the rules read. Absent tables are `None`; the paths are only
/// used to word the resulting `MissingInput` errors.
#[derive(Debug, Clone, Default)]
pub struct EngineInputs {
    pub clusters: Option<ClusterMap>,
    pub cluster_source: PathBuf,
    pub allocations: Option<Vec<AllocationRecord>>,
    pub allocation_source: PathBuf,
    /// Replaces the shared allocation table for one rule.
    pub rule_allocations: BTreeMap<RuleId, RuleAllocations>,
}

/// A rule-specific allocation table. `records` is `None` when the file was
/// not found, which fails that rule alone.
#[derive(Debug, Clone, Default)]
pub struct RuleAllocations {
    pub source: PathBuf,
    pub records: Option<Vec<AllocationRecord>>,
}

impl EngineInputs {
    pub fn new(clusters: ClusterMap, allocations: Vec<AllocationRecord>) -> Self {
        Self {
            clusters: Some(clusters),
            allocations: Some(allocations),
            ..Self::default()
        }
    }

    pub fn with_rule_allocations(mut self, rule: RuleId, records: Vec<AllocationRecord>) -> Self {
        self.rule_allocations.insert(
            rule,
            RuleAllocations {
                source: PathBuf::new(),
                records: Some(records),
            },
        );
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleStatus {
    Completed { recommendations: usize, rejected: usize },
    Failed { reason: String },
    Disabled,
}

impl RuleStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RuleStatus::Completed { .. })
    }
}

#[derive(Debug)]
pub struct EngineRun {
    pub period: PeriodLabel,
    pub outputs: BTreeMap<RuleId, RuleOutput>,
    pub statuses: BTreeMap<RuleId, RuleStatus>,
    pub consolidation: Consolidation,
}

#[derive(Debug)]
pub struct RebalancingEngine {
    config: EngineConfig,
}

impl RebalancingEngine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs every enabled rule built from the configuration.
    pub fn run(&self, period: PeriodLabel, inputs: &EngineInputs) -> EngineResult<EngineRun> {
        let rules = RuleId::ALL
            .iter()
            .filter(|rule| self.config.is_enabled(**rule))
            .map(|rule| build_rule(*rule, &self.config))
            .collect();
        self.run_with_rules(period, inputs, rules)
    }

    /// Runs the given rules. Only pool construction can fail here; rule
    /// failures are captured in the statuses.
    pub fn run_with_rules(
        &self,
        period: PeriodLabel,
        inputs: &EngineInputs,
        rules: Vec<Box<dyn AllocationRule>>,
    ) -> EngineResult<EngineRun> {
        info!(%period, rules = rules.len(), workers = self.config.workers, "starting rule runs");

        let shared = inputs.allocations.as_deref().map(aggregate_records);
        let overrides: BTreeMap<RuleId, (Option<Vec<AllocationRecord>>, &Path)> = inputs
            .rule_allocations
            .iter()
            .map(|(rule, table)| {
                let records = table.records.as_deref().map(aggregate_records);
                (*rule, (records, table.source.as_path()))
            })
            .collect();

        let runners: Vec<RuleRunner> = rules
            .into_iter()
            .map(|rule| RuleRunner::new(rule, self.config.run_sequence, self.config.neutrality_epsilon))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()?;

        let results: Vec<(RuleId, EngineResult<RuleOutput>)> = pool.install(|| {
            runners
                .par_iter()
                .map(|runner| {
                    let rule = runner.rule_id();
                    let (allocations, source) = match overrides.get(&rule) {
                        Some((records, source)) => (records.as_ref(), *source),
                        None => (shared.as_ref(), inputs.allocation_source.as_path()),
                    };
                    (rule, self.run_isolated(runner, period, inputs, allocations, source))
                })
                .collect()
        });

        // Join barrier: every rule has finished or failed past this point.
        let mut statuses: BTreeMap<RuleId, RuleStatus> =
            RuleId::ALL.iter().map(|rule| (*rule, RuleStatus::Disabled)).collect();
        let mut outputs = BTreeMap::new();
        for (rule, result) in results {
            match result {
                Ok(output) => {
                    statuses.insert(
                        rule,
                        RuleStatus::Completed {
                            recommendations: output.details.len(),
                            rejected: output.compliance.rejected(),
                        },
                    );
                    outputs.insert(rule, output);
                }
                Err(e) => {
                    error!(%rule, error = %e, "rule failed");
                    statuses.insert(rule, RuleStatus::Failed { reason: e.to_string() });
                }
            }
        }

        let details: RuleDetails = RuleId::ALL
            .iter()
            .map(|rule| (*rule, outputs.get(rule).map(RuleOutput::detail_rows)))
            .collect();
        let lookup = shared
            .as_deref()
            .map(|records| subcategory_lookup(records, self.config.analysis_level))
            .unwrap_or_default();
        let consolidation =
            Consolidator::new(inputs.clusters.as_ref(), lookup).consolidate(period, details);

        Ok(EngineRun {
            period,
            outputs,
            statuses,
            consolidation,
        })
    }

    fn run_isolated(
        &self,
        runner: &RuleRunner,
        period: PeriodLabel,
        inputs: &EngineInputs,
        allocations: Option<&Vec<AllocationRecord>>,
        allocation_source: &Path,
    ) -> EngineResult<RuleOutput> {
        let rule = runner.rule_id();
        let clusters = inputs.clusters.as_ref().ok_or_else(|| EngineError::MissingInput {
            what: "cluster assignment",
            path: inputs.cluster_source.clone(),
        })?;
        let allocations = allocations.ok_or_else(|| EngineError::MissingInput {
            what: "allocation table",
            path: allocation_source.to_path_buf(),
        })?;

        let ctx = RuleContext {
            period,
            level: self.config.analysis_level,
            clusters,
            allocations,
        };
        catch_unwind(AssertUnwindSafe(|| runner.run(&ctx)))
            .unwrap_or(Err(EngineError::RulePanicked { rule }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::store::ClusterAssignment;
    use crate::strategy::traits::RuleEvaluation;

    #[derive(Debug)]
    struct Exploding;

    impl AllocationRule for Exploding {
        fn rule_id(&self) -> RuleId {
            RuleId::Imbalanced
        }

        fn store_cap(&self) -> Option<f64> {
            None
        }

        fn evaluate(&self, _ctx: &RuleContext<'_>) -> EngineResult<RuleEvaluation> {
            panic!("boom");
        }
    }

    fn inputs() -> EngineInputs {
        let clusters = ClusterMap::from_assignments(["S1", "S2"].into_iter().map(|s| ClusterAssignment {
            str_code: s.into(),
            cluster_id: 1,
        }));
        let allocations = vec![
            AllocationRecord {
                str_code: "S1".into(),
                category_dimension: "SPU1".into(),
                subcategory: None,
                quantity: 0.8,
                sales_amount: 8.0,
                unit_price: 10.0,
            },
            AllocationRecord {
                str_code: "S2".into(),
                category_dimension: "SPU1".into(),
                subcategory: None,
                quantity: 3.0,
                sales_amount: 30.0,
                unit_price: 10.0,
            },
        ];
        EngineInputs::new(clusters, allocations)
    }

    #[test]
    fn panicking_rule_is_isolated() {
        let engine = RebalancingEngine::new(EngineConfig::default()).unwrap();
        let config = engine.config().clone();
        let rules = vec![Box::new(Exploding) as Box<dyn AllocationRule>, build_rule(RuleId::BelowMinimum, &config)];
        let run = engine
            .run_with_rules("202507A".parse().unwrap(), &inputs(), rules)
            .unwrap();

        assert!(matches!(run.statuses[&RuleId::Imbalanced], RuleStatus::Failed { .. }));
        assert!(run.statuses[&RuleId::BelowMinimum].is_completed());
        assert_eq!(run.statuses[&RuleId::MissedSales], RuleStatus::Disabled);
        assert!(run.consolidation.missing.contains(&RuleId::Imbalanced));
        assert_eq!(run.consolidation.summaries.len(), 2);
    }

    #[test]
    fn missing_clusters_fail_every_rule_but_still_consolidate() {
        let mut inputs = inputs();
        inputs.clusters = None;
        inputs.cluster_source = PathBuf::from("clusters.csv");
        let engine = RebalancingEngine::new(EngineConfig::default()).unwrap();
        let run = engine.run("202507A".parse().unwrap(), &inputs).unwrap();

        assert!(run.outputs.is_empty());
        match &run.statuses[&RuleId::BelowMinimum] {
            RuleStatus::Failed { reason } => assert!(reason.contains("clusters.csv")),
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(run.consolidation.missing.len(), 6);
        assert!(run.consolidation.records.is_empty());
    }

    #[test]
    fn rule_specific_allocations_override_shared_table() {
        let base = inputs();
        let mut override_rows = base.allocations.clone().unwrap();
        override_rows[0].quantity = 5.0;
        let inputs = base.with_rule_allocations(RuleId::BelowMinimum, override_rows);

        let mut config = EngineConfig::default();
        config.enabled_rules = vec![RuleId::BelowMinimum];
        let run = RebalancingEngine::new(config)
            .unwrap()
            .run("202507A".parse().unwrap(), &inputs)
            .unwrap();
        assert!(run.outputs[&RuleId::BelowMinimum].details.is_empty());
    }

    #[test]
    fn missing_rule_table_fails_only_that_rule() {
        let mut inputs = inputs();
        inputs.rule_allocations.insert(
            RuleId::SmartOvercapacity,
            RuleAllocations {
                source: PathBuf::from("rule10_allocations.csv"),
                records: None,
            },
        );
        let run = RebalancingEngine::new(EngineConfig::default())
            .unwrap()
            .run("202507A".parse().unwrap(), &inputs)
            .unwrap();
        assert!(matches!(run.statuses[&RuleId::SmartOvercapacity], RuleStatus::Failed { .. }));
        assert_eq!(run.outputs.len(), 5);
        assert_eq!(run.consolidation.missing, vec![RuleId::SmartOvercapacity]);
    }
}
