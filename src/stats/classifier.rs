// src/stats/classifier.rs

//! Maps deviations and threshold gaps onto severity tiers.
//!
//! Boundary convention: a value sitting exactly on a configured cutoff falls
//! into the more severe (triggering) class, except for shortfalls against a
//! minimum, where meeting the minimum exactly is not a shortfall.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered severity of an anomaly.
///
/// `Absent` is its own class: the store carries nothing where its peers do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Absent,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Absent => "absent",
        };
        f.write_str(label)
    }
}

/// Result of classifying a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub severity: Severity,
    pub triggered: bool,
}

impl Classification {
    pub const CLEAR: Classification = Classification {
        severity: Severity::None,
        triggered: false,
    };

    fn flagged(severity: Severity) -> Self {
        Self {
            severity,
            triggered: true,
        }
    }
}

/// Inclusive lower cutoffs for the low/medium/high tiers of a magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityBands {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl SeverityBands {
    pub fn classify(&self, magnitude: f64) -> Classification {
        if !magnitude.is_finite() {
            return Classification::CLEAR;
        }
        if magnitude >= self.high {
            Classification::flagged(Severity::High)
        } else if magnitude >= self.medium {
            Classification::flagged(Severity::Medium)
        } else if magnitude >= self.low {
            Classification::flagged(Severity::Low)
        } else {
            Classification::CLEAR
        }
    }
}

/// Classifies a two-sided z-score by its absolute value.
/// No z-score (degenerate cohort) never triggers.
pub fn classify_z(z: Option<f64>, bands: &SeverityBands) -> Classification {
    match z {
        Some(z) => bands.classify(z.abs()),
        None => Classification::CLEAR,
    }
}

/// Classifies a value against a required minimum.
///
/// Zero or negative values are `Absent`. A value strictly below the minimum is
/// a shortfall graded by the relative gap: at least half missing is high, at
/// least a quarter is medium, anything else low.
pub fn classify_shortfall(value: f64, minimum: f64) -> Classification {
    if value <= 0.0 {
        return Classification::flagged(Severity::Absent);
    }
    if minimum <= 0.0 || value >= minimum {
        return Classification::CLEAR;
    }
    let gap = (minimum - value) / minimum;
    let severity = if gap >= 0.5 {
        Severity::High
    } else if gap >= 0.25 {
        Severity::Medium
    } else {
        Severity::Low
    };
    Classification::flagged(severity)
}

/// Classifies a current level against a capacity target with a tolerance.
///
/// Triggers when `current >= target * (1 + tolerance)`. Severity follows the
/// excess ratio `(current - target) / target`: at least 1.0 is high, at least
/// 0.5 medium, otherwise low. A zero target with positive stock is high.
pub fn classify_excess(current: f64, target: f64, tolerance: f64) -> Classification {
    if current <= 0.0 || target < 0.0 {
        return Classification::CLEAR;
    }
    if target == 0.0 {
        return Classification::flagged(Severity::High);
    }
    if current < target * (1.0 + tolerance) {
        return Classification::CLEAR;
    }
    let ratio = (current - target) / target;
    let severity = if ratio >= 1.0 {
        Severity::High
    } else if ratio >= 0.5 {
        Severity::Medium
    } else {
        Severity::Low
    };
    Classification::flagged(severity)
}

/// Classifies a performance ratio (own / benchmark) against a ceiling.
///
/// Triggers when `ratio <= max_ratio`. Half the ceiling or less is high,
/// three quarters or less is medium.
pub fn classify_ratio_below(ratio: f64, max_ratio: f64) -> Classification {
    if !ratio.is_finite() || ratio > max_ratio {
        return Classification::CLEAR;
    }
    let severity = if ratio <= max_ratio * 0.5 {
        Severity::High
    } else if ratio <= max_ratio * 0.75 {
        Severity::Medium
    } else {
        Severity::Low
    };
    Classification::flagged(severity)
}

// =========================================================================
// Sales performance tiers
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    TopPerformer,
    PerformingWell,
    SomeOpportunity,
    GoodOpportunity,
    MajorOpportunity,
}

impl PerformanceTier {
    pub fn is_opportunity(self) -> bool {
        matches!(
            self,
            PerformanceTier::SomeOpportunity
                | PerformanceTier::GoodOpportunity
                | PerformanceTier::MajorOpportunity
        )
    }

    pub fn severity(self) -> Severity {
        match self {
            PerformanceTier::TopPerformer | PerformanceTier::PerformingWell => Severity::None,
            PerformanceTier::SomeOpportunity => Severity::Low,
            PerformanceTier::GoodOpportunity => Severity::Medium,
            PerformanceTier::MajorOpportunity => Severity::High,
        }
    }

    /// Share of the gap to benchmark that a recommendation should close.
    pub fn uplift_weight(self) -> f64 {
        match self {
            PerformanceTier::TopPerformer | PerformanceTier::PerformingWell => 0.0,
            PerformanceTier::SomeOpportunity => 0.5,
            PerformanceTier::GoodOpportunity => 0.75,
            PerformanceTier::MajorOpportunity => 1.0,
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PerformanceTier::TopPerformer => "top_performer",
            PerformanceTier::PerformingWell => "performing_well",
            PerformanceTier::SomeOpportunity => "some_opportunity",
            PerformanceTier::GoodOpportunity => "good_opportunity",
            PerformanceTier::MajorOpportunity => "major_opportunity",
        };
        f.write_str(label)
    }
}

/// z-score cutoffs for the performance tiers.
///
/// `z >= top_z` is a top performer; `z <= major_z`, `z <= good_z` and
/// `z <= some_z` are the opportunity tiers, checked most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBands {
    pub top_z: f64,
    pub some_z: f64,
    pub good_z: f64,
    pub major_z: f64,
}

impl Default for PerformanceBands {
    fn default() -> Self {
        Self {
            top_z: 1.0,
            some_z: -0.5,
            good_z: -1.0,
            major_z: -2.0,
        }
    }
}

impl PerformanceBands {
    pub fn classify(&self, z: f64) -> PerformanceTier {
        if z >= self.top_z {
            PerformanceTier::TopPerformer
        } else if z <= self.major_z {
            PerformanceTier::MajorOpportunity
        } else if z <= self.good_z {
            PerformanceTier::GoodOpportunity
        } else if z <= self.some_z {
            PerformanceTier::SomeOpportunity
        } else {
            PerformanceTier::PerformingWell
        }
    }
}
