// src/pipeline/consolidate.rs

//! Merges the six rules' detail tables into one cohort-grain table and one
//! store-grain summary.
//!
//! Runs in three phases: load (done by the caller, a missing table arrives as
//! `None`), merge (full outer join on store and dimension) and dedup (one row
//! per rule per key, highest `run_sequence` first, later row on a tie).

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::allocation::{AllocationRecord, AnalysisLevel};
use crate::model::period::PeriodLabel;
use crate::model::recommendation::{DetailRow, OpportunityType, RuleId};
use crate::model::store::{ClusterId, ClusterMap, StoreCode};
use crate::stats::classifier::Severity;

/// Detail rows per rule. `None` means the rule produced no table this run.
pub type RuleDetails = BTreeMap<RuleId, Option<Vec<DetailRow>>>;

/// category_dimension -> subcategory.
pub type SubcategoryLookup = BTreeMap<String, String>;

/// Builds the subcategory lookup from allocation rows.
pub fn subcategory_lookup(records: &[AllocationRecord], level: AnalysisLevel) -> SubcategoryLookup {
    let mut lookup = SubcategoryLookup::new();
    for record in records {
        if let Some(sub) = record.subcategory_for(level) {
            lookup.entry(record.category_dimension.clone()).or_insert(sub);
        }
    }
    lookup
}

// =========================================================================
// Output records
// =========================================================================

/// One rule's contribution to a consolidated key.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleCell {
    pub quantity_change: f64,
    pub investment: f64,
    pub compliant: bool,
    pub opportunity_type: OpportunityType,
    pub severity: Severity,
    pub run_sequence: u32,
}

impl From<&DetailRow> for RuleCell {
    fn from(row: &DetailRow) -> Self {
        Self {
            quantity_change: row.recommended_quantity_change,
            investment: row.investment_required,
            compliant: row.fast_fish_compliant,
            opportunity_type: row.opportunity_type,
            severity: row.severity,
            run_sequence: row.run_sequence,
        }
    }
}

/// One unique `(str_code, category_dimension)` across all rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedRecord {
    pub str_code: StoreCode,
    pub cluster_id: Option<ClusterId>,
    pub category_dimension: String,
    pub subcategory: Option<String>,
    pub cells: BTreeMap<RuleId, RuleCell>,
}

impl ConsolidatedRecord {
    pub fn cell(&self, rule: RuleId) -> Option<&RuleCell> {
        self.cells.get(&rule)
    }

    pub fn total_quantity_change(&self) -> f64 {
        self.cells.values().map(|c| c.quantity_change).sum()
    }

    pub fn total_investment(&self) -> f64 {
        self.cells.values().map(|c| c.investment).sum()
    }

    pub fn rules_triggered(&self) -> usize {
        self.cells.len()
    }
}

/// Per-rule aggregates for one store.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuleTally {
    pub anomaly_count: usize,
    pub compliant_count: usize,
    pub quantity_change: f64,
    pub investment: f64,
}

/// Store-grain summary row. A rule that contributed no table this run has
/// `None` in place of its tally.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSummary {
    pub str_code: StoreCode,
    pub cluster_id: Option<ClusterId>,
    pub tallies: BTreeMap<RuleId, Option<RuleTally>>,
}

impl StoreSummary {
    pub fn tally(&self, rule: RuleId) -> Option<&RuleTally> {
        self.tallies.get(&rule).and_then(Option::as_ref)
    }

    fn present(&self) -> impl Iterator<Item = &RuleTally> {
        self.tallies.values().flatten()
    }

    pub fn total_anomalies(&self) -> usize {
        self.present().map(|t| t.anomaly_count).sum()
    }

    pub fn total_quantity_change(&self) -> f64 {
        self.present().map(|t| t.quantity_change).sum()
    }

    pub fn total_investment(&self) -> f64 {
        self.present().map(|t| t.investment).sum()
    }

    pub fn rules_triggered(&self) -> usize {
        self.present().filter(|t| t.anomaly_count > 0).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Consolidation {
    pub period: PeriodLabel,
    /// Rules whose table was present (possibly empty).
    pub contributing: Vec<RuleId>,
    /// Rules with no table; their columns are NA throughout.
    pub missing: Vec<RuleId>,
    pub records: Vec<ConsolidatedRecord>,
    pub summaries: Vec<StoreSummary>,
    pub collisions: usize,
}

// =========================================================================
// Consolidator
// =========================================================================

type Key = (StoreCode, String);

#[derive(Debug, Clone, Default)]
pub struct Consolidator<'a> {
    clusters: Option<&'a ClusterMap>,
    subcategories: SubcategoryLookup,
}

impl<'a> Consolidator<'a> {
    pub fn new(clusters: Option<&'a ClusterMap>, subcategories: SubcategoryLookup) -> Self {
        Self {
            clusters,
            subcategories,
        }
    }

    pub fn consolidate(&self, period: PeriodLabel, details: RuleDetails) -> Consolidation {
        let mut contributing = Vec::new();
        let mut missing = Vec::new();
        for rule in RuleId::ALL {
            match details.get(&rule) {
                Some(Some(_)) => contributing.push(rule),
                _ => missing.push(rule),
            }
        }

        let merged = Self::merge(details);
        let (deduped, collisions) = Self::dedup(merged);
        let records = self.enrich(deduped);
        let summaries = self.summarize(&records, &contributing);

        info!(
            %period,
            contributing = ?contributing.iter().map(|r| r.number()).collect::<Vec<_>>(),
            missing = ?missing.iter().map(|r| r.number()).collect::<Vec<_>>(),
            records = records.len(),
            stores = summaries.len(),
            collisions,
            "consolidation complete"
        );

        Consolidation {
            period,
            contributing,
            missing,
            records,
            summaries,
            collisions,
        }
    }

    /// Full outer join: every key seen in any rule, with every row that
    /// carried it, in load order.
    fn merge(details: RuleDetails) -> BTreeMap<Key, BTreeMap<RuleId, Vec<DetailRow>>> {
        let mut merged: BTreeMap<Key, BTreeMap<RuleId, Vec<DetailRow>>> = BTreeMap::new();
        for (rule, rows) in details {
            for row in rows.into_iter().flatten() {
                let key = (row.str_code.clone(), row.category_dimension.clone());
                merged.entry(key).or_default().entry(rule).or_default().push(row);
            }
        }
        merged
    }

    fn dedup(
        merged: BTreeMap<Key, BTreeMap<RuleId, Vec<DetailRow>>>,
    ) -> (BTreeMap<Key, BTreeMap<RuleId, DetailRow>>, usize) {
        let mut collisions = 0usize;
        let deduped = merged
            .into_iter()
            .map(|(key, per_rule)| {
                let rows = per_rule
                    .into_iter()
                    .filter_map(|(rule, rows)| {
                        let mut winner: Option<DetailRow> = None;
                        for row in rows {
                            winner = Some(match winner {
                                None => row,
                                Some(kept) => {
                                    collisions += 1;
                                    let (keep, drop) = if row.run_sequence >= kept.run_sequence {
                                        (row, kept)
                                    } else {
                                        (kept, row)
                                    };
                                    let collision = EngineError::ConsolidationKeyCollision {
                                        rule,
                                        str_code: key.0.clone(),
                                        category_dimension: key.1.clone(),
                                        kept_run: keep.run_sequence,
                                        dropped_run: drop.run_sequence,
                                    };
                                    warn!("{collision}");
                                    keep
                                }
                            });
                        }
                        winner.map(|row| (rule, row))
                    })
                    .collect();
                (key, rows)
            })
            .collect();
        (deduped, collisions)
    }

    fn cluster_for(&self, str_code: &str, fallback: Option<ClusterId>) -> Option<ClusterId> {
        self.clusters
            .and_then(|map| map.cluster_of(str_code))
            .or(fallback)
    }

    fn enrich(&self, deduped: BTreeMap<Key, BTreeMap<RuleId, DetailRow>>) -> Vec<ConsolidatedRecord> {
        deduped
            .into_iter()
            .map(|((str_code, category_dimension), rows)| {
                let row_cluster = rows.values().find_map(|r| r.cluster_id);
                let subcategory = rows
                    .values()
                    .find_map(|r| r.subcategory.clone().filter(|s| !s.is_empty()))
                    .or_else(|| self.subcategories.get(&category_dimension).cloned());
                ConsolidatedRecord {
                    cluster_id: self.cluster_for(&str_code, row_cluster),
                    cells: rows.iter().map(|(rule, row)| (*rule, RuleCell::from(row))).collect(),
                    str_code,
                    category_dimension,
                    subcategory,
                }
            })
            .collect()
    }

    /// One row per store in the cluster map. Without a map the stores seen in
    /// the detail tables stand in for it.
    fn summarize(&self, records: &[ConsolidatedRecord], contributing: &[RuleId]) -> Vec<StoreSummary> {
        let mut stores: BTreeMap<StoreCode, Option<ClusterId>> = BTreeMap::new();
        match self.clusters {
            Some(map) => {
                for (code, cluster) in map.stores() {
                    stores.insert(code.clone(), Some(cluster));
                }
                let unassigned: BTreeSet<&str> = records
                    .iter()
                    .map(|r| r.str_code.as_str())
                    .filter(|code| !stores.contains_key(*code))
                    .collect();
                for str_code in unassigned {
                    warn!(str_code, "store has detail rows but no cluster assignment; left out of summary");
                }
            }
            None => {
                for record in records {
                    stores
                        .entry(record.str_code.clone())
                        .or_insert(record.cluster_id);
                }
            }
        }

        let present: BTreeSet<RuleId> = contributing.iter().copied().collect();
        let mut summaries: BTreeMap<StoreCode, StoreSummary> = stores
            .into_iter()
            .map(|(str_code, cluster_id)| {
                let tallies = RuleId::ALL
                    .iter()
                    .map(|rule| (*rule, present.contains(rule).then(RuleTally::default)))
                    .collect();
                let summary = StoreSummary {
                    str_code: str_code.clone(),
                    cluster_id,
                    tallies,
                };
                (str_code, summary)
            })
            .collect();

        for record in records {
            let Some(summary) = summaries.get_mut(&record.str_code) else {
                continue;
            };
            for (rule, cell) in &record.cells {
                if let Some(Some(tally)) = summary.tallies.get_mut(rule) {
                    tally.anomaly_count += 1;
                    tally.compliant_count += usize::from(cell.compliant);
                    tally.quantity_change += cell.quantity_change;
                    tally.investment += cell.investment;
                }
            }
        }

        summaries.into_values().collect()
    }
}
