// src/model/recommendation.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::period::PeriodLabel;
use crate::model::store::{ClusterId, StoreCode};
use crate::stats::classifier::{PerformanceTier, Severity};

// =========================================================================
// Rule identity
// =========================================================================

/// The six allocation rules, numbered as in the production pipeline (7-12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    MissingCategory,
    Imbalanced,
    BelowMinimum,
    SmartOvercapacity,
    MissedSales,
    SalesPerformance,
}

impl RuleId {
    pub const ALL: [RuleId; 6] = [
        RuleId::MissingCategory,
        RuleId::Imbalanced,
        RuleId::BelowMinimum,
        RuleId::SmartOvercapacity,
        RuleId::MissedSales,
        RuleId::SalesPerformance,
    ];

    pub fn number(self) -> u8 {
        match self {
            RuleId::MissingCategory => 7,
            RuleId::Imbalanced => 8,
            RuleId::BelowMinimum => 9,
            RuleId::SmartOvercapacity => 10,
            RuleId::MissedSales => 11,
            RuleId::SalesPerformance => 12,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        RuleId::ALL.into_iter().find(|rule| rule.number() == number)
    }

    pub fn family(self) -> RuleFamily {
        match self {
            RuleId::Imbalanced => RuleFamily::Bidirectional,
            RuleId::SmartOvercapacity => RuleFamily::DecreaseOnly,
            RuleId::MissingCategory
            | RuleId::BelowMinimum
            | RuleId::MissedSales
            | RuleId::SalesPerformance => RuleFamily::IncreaseOnly,
        }
    }

    pub fn opportunity_type(self) -> OpportunityType {
        match self {
            RuleId::MissingCategory => OpportunityType::MissingAssortment,
            RuleId::Imbalanced => OpportunityType::Rebalance,
            RuleId::BelowMinimum => OpportunityType::BelowMinimumBoost,
            RuleId::SmartOvercapacity => OpportunityType::CapacityReduction,
            RuleId::MissedSales => OpportunityType::MissedSalesUplift,
            RuleId::SalesPerformance => OpportunityType::PerformanceUpside,
        }
    }

    /// File and column prefix, e.g. `rule10`.
    pub fn prefix(self) -> String {
        format!("rule{}", self.number())
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {}", self.number())
    }
}

impl FromStr for RuleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("rule");
        digits
            .parse::<u8>()
            .ok()
            .and_then(RuleId::from_number)
            .ok_or_else(|| format!("unknown rule '{s}' (expected 7-12)"))
    }
}

/// Directional constraint on a rule's quantity changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFamily {
    IncreaseOnly,
    DecreaseOnly,
    Bidirectional,
}

impl RuleFamily {
    pub fn admits(self, delta: f64) -> bool {
        if !delta.is_finite() {
            return false;
        }
        match self {
            RuleFamily::IncreaseOnly => delta >= 0.0,
            RuleFamily::DecreaseOnly => delta <= 0.0,
            RuleFamily::Bidirectional => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityType {
    MissingAssortment,
    Rebalance,
    BelowMinimumBoost,
    CapacityReduction,
    MissedSalesUplift,
    PerformanceUpside,
}

impl fmt::Display for OpportunityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OpportunityType::MissingAssortment => "missing_assortment",
            OpportunityType::Rebalance => "rebalance",
            OpportunityType::BelowMinimumBoost => "below_minimum_boost",
            OpportunityType::CapacityReduction => "capacity_reduction",
            OpportunityType::MissedSalesUplift => "missed_sales_uplift",
            OpportunityType::PerformanceUpside => "performance_upside",
        };
        f.write_str(label)
    }
}

// =========================================================================
// Anomalies and recommendations
// =========================================================================

/// How far a store sits from its cohort.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnomalyMeasure {
    ZScore(f64),
    /// Signed distance to a threshold or benchmark in metric units.
    ThresholdGap(f64),
    /// Nothing allocated where peers carry the dimension.
    Absent,
}

/// A detected anomaly, consumed immediately by the recommendation step.
#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub rule_id: RuleId,
    pub str_code: StoreCode,
    pub cluster_id: ClusterId,
    pub category_dimension: String,
    pub subcategory: Option<String>,
    pub measure: AnomalyMeasure,
    pub severity: Severity,
    pub metric_value: f64,
    pub current_quantity: f64,
    pub unit_price: f64,
}

/// Rule-specific fields carried next to the shared recommendation columns.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleDetail {
    MissingCategory {
        peer_adoption_rate: f64,
        peer_sellers: usize,
        peer_median_quantity: f64,
    },
    Imbalanced {
        z_score: f64,
        cohort_mean: f64,
        cohort_std: f64,
    },
    BelowMinimum {
        unit_rate: f64,
        minimum_rate: f64,
    },
    SmartOvercapacity {
        capacity_target: f64,
        excess_quantity: f64,
        reduction_cap: f64,
    },
    MissedSales {
        peer_benchmark_sales: f64,
        sales_ratio: f64,
    },
    SalesPerformance {
        z_score: f64,
        tier: PerformanceTier,
        benchmark_sales: f64,
        margin_impact: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub rule_id: RuleId,
    pub period: PeriodLabel,
    pub str_code: StoreCode,
    pub cluster_id: ClusterId,
    pub category_dimension: String,
    pub subcategory: Option<String>,
    pub severity: Severity,
    pub measure: AnomalyMeasure,
    pub opportunity_type: OpportunityType,
    pub metric_value: f64,
    pub current_quantity: f64,
    pub recommended_quantity_change: f64,
    pub unit_price: f64,
    pub investment_required: f64,
    pub business_rationale: String,
    pub fast_fish_compliant: bool,
    pub detail: RuleDetail,
}

impl Recommendation {
    /// Turns an anomaly into a recommendation with the given delta.
    /// Investment, rationale and compliance are filled in later.
    pub fn from_anomaly(
        anomaly: Anomaly,
        period: PeriodLabel,
        delta: f64,
        detail: RuleDetail,
    ) -> Self {
        Self {
            rule_id: anomaly.rule_id,
            period,
            str_code: anomaly.str_code,
            cluster_id: anomaly.cluster_id,
            category_dimension: anomaly.category_dimension,
            subcategory: anomaly.subcategory,
            severity: anomaly.severity,
            measure: anomaly.measure,
            opportunity_type: anomaly.rule_id.opportunity_type(),
            metric_value: anomaly.metric_value,
            current_quantity: anomaly.current_quantity,
            recommended_quantity_change: delta,
            unit_price: anomaly.unit_price,
            investment_required: 0.0,
            business_rationale: String::new(),
            fast_fish_compliant: false,
            detail,
        }
    }

    pub fn resulting_quantity(&self) -> f64 {
        self.current_quantity + self.recommended_quantity_change
    }
}

// =========================================================================
// Flat detail row (schema-stable CSV form)
// =========================================================================

/// Detail-table row. Every rule writes the same columns; the ones a rule does
/// not use stay empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRow {
    pub rule_id: u8,
    pub run_sequence: u32,
    pub period_label: String,
    pub str_code: StoreCode,
    pub cluster_id: Option<ClusterId>,
    pub category_dimension: String,
    pub subcategory: Option<String>,
    pub opportunity_type: OpportunityType,
    pub severity: Severity,
    pub current_quantity: f64,
    pub recommended_quantity_change: f64,
    pub unit_price: f64,
    pub investment_required: f64,
    pub metric_value: Option<f64>,
    pub benchmark_value: Option<f64>,
    pub z_score: Option<f64>,
    pub threshold_gap: Option<f64>,
    pub cohort_mean: Option<f64>,
    pub cohort_std: Option<f64>,
    pub peer_adoption_rate: Option<f64>,
    pub performance_tier: Option<PerformanceTier>,
    pub margin_impact: Option<f64>,
    pub fast_fish_compliant: bool,
    pub business_rationale: String,
}

impl DetailRow {
    pub fn from_recommendation(rec: &Recommendation, run_sequence: u32) -> Self {
        let mut row = Self {
            rule_id: rec.rule_id.number(),
            run_sequence,
            period_label: rec.period.to_string(),
            str_code: rec.str_code.clone(),
            cluster_id: Some(rec.cluster_id),
            category_dimension: rec.category_dimension.clone(),
            subcategory: rec.subcategory.clone(),
            opportunity_type: rec.opportunity_type,
            severity: rec.severity,
            current_quantity: rec.current_quantity,
            recommended_quantity_change: rec.recommended_quantity_change,
            unit_price: rec.unit_price,
            investment_required: rec.investment_required,
            metric_value: Some(rec.metric_value),
            benchmark_value: None,
            z_score: None,
            threshold_gap: None,
            cohort_mean: None,
            cohort_std: None,
            peer_adoption_rate: None,
            performance_tier: None,
            margin_impact: None,
            fast_fish_compliant: rec.fast_fish_compliant,
            business_rationale: rec.business_rationale.clone(),
        };

        match rec.measure {
            AnomalyMeasure::ZScore(z) => row.z_score = Some(z),
            AnomalyMeasure::ThresholdGap(gap) => row.threshold_gap = Some(gap),
            AnomalyMeasure::Absent => {}
        }

        match &rec.detail {
            RuleDetail::MissingCategory {
                peer_adoption_rate,
                peer_median_quantity,
                ..
            } => {
                row.peer_adoption_rate = Some(*peer_adoption_rate);
                row.benchmark_value = Some(*peer_median_quantity);
            }
            RuleDetail::Imbalanced {
                z_score,
                cohort_mean,
                cohort_std,
            } => {
                row.z_score = Some(*z_score);
                row.cohort_mean = Some(*cohort_mean);
                row.cohort_std = Some(*cohort_std);
                row.benchmark_value = Some(*cohort_mean);
            }
            RuleDetail::BelowMinimum { minimum_rate, .. } => {
                row.benchmark_value = Some(*minimum_rate);
            }
            RuleDetail::SmartOvercapacity {
                capacity_target, ..
            } => {
                row.benchmark_value = Some(*capacity_target);
            }
            RuleDetail::MissedSales {
                peer_benchmark_sales,
                ..
            } => {
                row.benchmark_value = Some(*peer_benchmark_sales);
            }
            RuleDetail::SalesPerformance {
                z_score,
                tier,
                benchmark_sales,
                margin_impact,
            } => {
                row.z_score = Some(*z_score);
                row.performance_tier = Some(*tier);
                row.benchmark_value = Some(*benchmark_sales);
                row.margin_impact = Some(*margin_impact);
            }
        }
        row
    }

    pub fn rule(&self) -> Option<RuleId> {
        RuleId::from_number(self.rule_id)
    }
}
