// src/stats/cohort.rs

//! Per-cohort summary statistics.
//!
//! A cohort is every store of one cluster that reports an allocation for one
//! category dimension. Standard deviations are sample (n - 1) deviations.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::warn;

use crate::model::allocation::{AllocationRecord, MetricKind};
use crate::model::store::{ClusterId, ClusterMap, StoreCode};

/// Below this the cohort is treated as having no spread.
pub const ZERO_STD_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CohortKey {
    pub cluster_id: ClusterId,
    pub category_dimension: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CohortStats {
    pub count: usize,
    pub mean: f64,
    /// `NaN` when `count < 2`.
    pub std: f64,
    pub median: f64,
    pub p75: f64,
    pub total: f64,
}

impl CohortStats {
    pub fn from_values(values: &[f64]) -> Self {
        let count = values.len();
        if count == 0 {
            return Self {
                count,
                mean: f64::NAN,
                std: f64::NAN,
                median: f64::NAN,
                p75: f64::NAN,
                total: 0.0,
            };
        }

        let total: f64 = values.iter().sum();
        let mean = total / count as f64;
        let std = if count < 2 {
            f64::NAN
        } else {
            let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
            (ss / (count - 1) as f64).sqrt()
        };

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Self {
            count,
            mean,
            std,
            median: quantile(&sorted, 0.5),
            p75: quantile(&sorted, 0.75),
            total,
        }
    }

    /// Whether the cohort supports z-score comparison at all.
    pub fn has_deviation(&self) -> bool {
        self.count >= 2 && self.std.is_finite() && self.std > ZERO_STD_EPSILON
    }

    /// `(value - mean) / std`, or `None` for degenerate cohorts.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        if self.has_deviation() {
            Some((value - self.mean) / self.std)
        } else {
            None
        }
    }
}

/// Linear-interpolated quantile of an ascending slice.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = pos.floor() as usize;
            let upper = pos.ceil() as usize;
            let frac = pos - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

/// A store's contribution to a cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortMember {
    pub str_code: StoreCode,
    /// Index into the record slice the table was built from.
    pub record_index: usize,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct Cohort {
    pub key: CohortKey,
    pub members: Vec<CohortMember>,
    pub stats: CohortStats,
}

impl Cohort {
    /// Member values in ascending order.
    pub fn sorted_values(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.members.iter().map(|m| m.value).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values
    }
}

/// All cohorts of one metric for one rule invocation.
#[derive(Debug, Clone, Default)]
pub struct CohortTable {
    cohorts: BTreeMap<CohortKey, Cohort>,
}

impl CohortTable {
    /// Groups records into cohorts and computes their statistics.
    ///
    /// Records for stores missing from `clusters` are skipped. Statistics are
    /// computed in parallel across cohorts; the result is keyed so ordering
    /// does not depend on scheduling.
    pub fn build(records: &[AllocationRecord], clusters: &ClusterMap, metric: MetricKind) -> Self {
        let mut grouped: BTreeMap<CohortKey, Vec<CohortMember>> = BTreeMap::new();
        let mut unclustered = 0usize;

        for (index, record) in records.iter().enumerate() {
            let Some(cluster_id) = clusters.cluster_of(&record.str_code) else {
                unclustered += 1;
                continue;
            };
            grouped
                .entry(CohortKey {
                    cluster_id,
                    category_dimension: record.category_dimension.clone(),
                })
                .or_default()
                .push(CohortMember {
                    str_code: record.str_code.clone(),
                    record_index: index,
                    value: record.metric(metric),
                });
        }

        if unclustered > 0 {
            warn!(unclustered, "skipped allocation rows for unclustered stores");
        }

        let cohorts: BTreeMap<CohortKey, Cohort> = grouped
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(key, mut members)| {
                members.sort_by(|a, b| a.str_code.cmp(&b.str_code));
                let values: Vec<f64> = members.iter().map(|m| m.value).collect();
                let stats = CohortStats::from_values(&values);
                (key.clone(), Cohort { key, members, stats })
            })
            .collect();

        Self { cohorts }
    }

    pub fn get(&self, key: &CohortKey) -> Option<&Cohort> {
        self.cohorts.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cohort> {
        self.cohorts.values()
    }

    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }
}
