// src/pipeline/config.rs

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::model::allocation::AnalysisLevel;
use crate::model::recommendation::RuleId;
use crate::stats::classifier::{PerformanceBands, SeverityBands};
use crate::strategy::investment::NEUTRALITY_EPSILON;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissingCategoryConfig {
    /// Share of cluster stores that must sell the dimension.
    pub min_adoption_rate: f64,
    /// Minimum combined peer sales for the dimension to count as proven.
    pub min_cluster_sales: f64,
    pub min_peer_stores: usize,
    pub min_boost_qty: f64,
    pub max_total_qty_per_store: f64,
}

impl Default for MissingCategoryConfig {
    fn default() -> Self {
        Self {
            min_adoption_rate: 0.70,
            min_cluster_sales: 100.0,
            min_peer_stores: 2,
            min_boost_qty: 1.0,
            max_total_qty_per_store: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImbalancedConfig {
    /// |z| cutoffs; `bands.low` is the trigger threshold.
    pub bands: SeverityBands,
    pub min_cohort_size: usize,
    /// Share of the gap to the cluster mean a rebalance tries to close.
    pub adjustment_factor: f64,
    pub max_total_qty_per_store: f64,
}

impl Default for ImbalancedConfig {
    fn default() -> Self {
        Self {
            bands: SeverityBands {
                low: 2.0,
                medium: 3.0,
                high: 4.0,
            },
            min_cohort_size: 3,
            adjustment_factor: 1.0,
            max_total_qty_per_store: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BelowMinimumConfig {
    /// Minimum units per `window_days` window.
    pub min_unit_rate: f64,
    pub window_days: f64,
    pub min_boost_qty: f64,
    pub max_total_qty_per_store: f64,
}

impl Default for BelowMinimumConfig {
    fn default() -> Self {
        Self {
            min_unit_rate: 1.0,
            window_days: 15.0,
            min_boost_qty: 0.5,
            max_total_qty_per_store: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OvercapacityConfig {
    /// Allowed excess over the sales-implied capacity before flagging.
    pub tolerance: f64,
    pub max_reduction_pct: f64,
    pub min_cohort_size: usize,
}

impl Default for OvercapacityConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.2,
            max_reduction_pct: 0.4,
            min_cohort_size: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissedSalesConfig {
    /// Quantile of peer sales used as the benchmark.
    pub benchmark_quantile: f64,
    /// A store selling at or below this share of the benchmark is flagged.
    pub max_sales_ratio: f64,
    pub min_sales_volume: f64,
    pub min_cohort_size: usize,
    pub min_boost_qty: f64,
    pub max_total_qty_per_store: f64,
}

impl Default for MissedSalesConfig {
    fn default() -> Self {
        Self {
            benchmark_quantile: 0.75,
            max_sales_ratio: 0.5,
            min_sales_volume: 50.0,
            min_cohort_size: 3,
            min_boost_qty: 1.0,
            max_total_qty_per_store: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SalesPerformanceConfig {
    pub bands: PerformanceBands,
    pub min_cohort_size: usize,
    pub margin_rate: f64,
    pub min_boost_qty: f64,
    pub max_total_qty_per_store: f64,
}

impl Default for SalesPerformanceConfig {
    fn default() -> Self {
        Self {
            bands: PerformanceBands::default(),
            min_cohort_size: 3,
            margin_rate: 0.4,
            min_boost_qty: 1.0,
            max_total_qty_per_store: 50.0,
        }
    }
}

/// Immutable configuration for one engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analysis_level: AnalysisLevel,
    /// Rule runners executed concurrently.
    pub workers: usize,
    /// Recorded on every detail row; the consolidator keeps the highest.
    pub run_sequence: u32,
    pub enabled_rules: Vec<RuleId>,
    pub neutrality_epsilon: f64,
    pub missing_category: MissingCategoryConfig,
    pub imbalanced: ImbalancedConfig,
    pub below_minimum: BelowMinimumConfig,
    pub overcapacity: OvercapacityConfig,
    pub missed_sales: MissedSalesConfig,
    pub sales_performance: SalesPerformanceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analysis_level: AnalysisLevel::Spu,
            workers: 3,
            run_sequence: 0,
            enabled_rules: RuleId::ALL.to_vec(),
            neutrality_epsilon: NEUTRALITY_EPSILON,
            missing_category: MissingCategoryConfig::default(),
            imbalanced: ImbalancedConfig::default(),
            below_minimum: BelowMinimumConfig::default(),
            overcapacity: OvercapacityConfig::default(),
            missed_sales: MissedSalesConfig::default(),
            sales_performance: SalesPerformanceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults for the given level. Subcategory cohorts are smaller and
    /// smoother, so the imbalance trigger is looser there.
    pub fn for_level(level: AnalysisLevel) -> Self {
        let mut config = Self {
            analysis_level: level,
            ..Self::default()
        };
        if level == AnalysisLevel::Subcategory {
            config.imbalanced.bands = SeverityBands {
                low: 1.5,
                medium: 2.5,
                high: 3.5,
            };
        }
        config
    }

    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_enabled(&self, rule: RuleId) -> bool {
        self.enabled_rules.contains(&rule)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let fraction = |name: &str, v: f64| -> EngineResult<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!("{name} must be within [0, 1], got {v}")))
            }
        };
        let non_negative = |name: &str, v: f64| -> EngineResult<()> {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!("{name} must be >= 0, got {v}")))
            }
        };

        if self.workers == 0 {
            return Err(EngineError::InvalidConfig("workers must be at least 1".into()));
        }
        non_negative("neutrality_epsilon", self.neutrality_epsilon)?;

        let mc = &self.missing_category;
        fraction("missing_category.min_adoption_rate", mc.min_adoption_rate)?;
        non_negative("missing_category.min_cluster_sales", mc.min_cluster_sales)?;
        non_negative("missing_category.min_boost_qty", mc.min_boost_qty)?;
        non_negative("missing_category.max_total_qty_per_store", mc.max_total_qty_per_store)?;

        let im = &self.imbalanced;
        if !(im.bands.low > 0.0 && im.bands.low <= im.bands.medium && im.bands.medium <= im.bands.high) {
            return Err(EngineError::InvalidConfig(
                "imbalanced.bands must satisfy 0 < low <= medium <= high".into(),
            ));
        }
        if im.min_cohort_size < 2 {
            return Err(EngineError::InvalidConfig(
                "imbalanced.min_cohort_size must be at least 2".into(),
            ));
        }
        fraction("imbalanced.adjustment_factor", im.adjustment_factor)?;
        non_negative("imbalanced.max_total_qty_per_store", im.max_total_qty_per_store)?;

        let bm = &self.below_minimum;
        non_negative("below_minimum.min_unit_rate", bm.min_unit_rate)?;
        if bm.window_days <= 0.0 {
            return Err(EngineError::InvalidConfig("below_minimum.window_days must be > 0".into()));
        }
        non_negative("below_minimum.min_boost_qty", bm.min_boost_qty)?;
        non_negative("below_minimum.max_total_qty_per_store", bm.max_total_qty_per_store)?;

        let oc = &self.overcapacity;
        non_negative("overcapacity.tolerance", oc.tolerance)?;
        fraction("overcapacity.max_reduction_pct", oc.max_reduction_pct)?;

        let ms = &self.missed_sales;
        fraction("missed_sales.benchmark_quantile", ms.benchmark_quantile)?;
        fraction("missed_sales.max_sales_ratio", ms.max_sales_ratio)?;
        non_negative("missed_sales.min_sales_volume", ms.min_sales_volume)?;
        non_negative("missed_sales.min_boost_qty", ms.min_boost_qty)?;
        non_negative("missed_sales.max_total_qty_per_store", ms.max_total_qty_per_store)?;

        let sp = &self.sales_performance;
        let b = &sp.bands;
        if !(b.major_z <= b.good_z && b.good_z <= b.some_z && b.some_z < b.top_z) {
            return Err(EngineError::InvalidConfig(
                "sales_performance.bands must satisfy major_z <= good_z <= some_z < top_z".into(),
            ));
        }
        if sp.min_cohort_size < 2 {
            return Err(EngineError::InvalidConfig(
                "sales_performance.min_cohort_size must be at least 2".into(),
            ));
        }
        fraction("sales_performance.margin_rate", sp.margin_rate)?;
        non_negative("sales_performance.min_boost_qty", sp.min_boost_qty)?;
        non_negative("sales_performance.max_total_qty_per_store", sp.max_total_qty_per_store)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
        EngineConfig::for_level(AnalysisLevel::Subcategory).validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "workers": 2, "overcapacity": { "max_reduction_pct": 0.25 } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.overcapacity.max_reduction_pct, 0.25);
        assert_eq!(config.overcapacity.tolerance, 0.2);
        assert_eq!(config.enabled_rules.len(), 6);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = EngineConfig::default();
        config.overcapacity.max_reduction_pct = 1.5;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));

        let mut config = EngineConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());
    }
}
