// src/strategy/investment.rs

//! Monetary impact of quantity changes.
//!
//! Sign convention: positive investment is capital required, negative is a
//! saving released by a reduction.

use std::collections::BTreeMap;

use tracing::warn;

use crate::model::recommendation::Recommendation;
use crate::model::store::StoreCode;

/// Default tolerance for the investment-neutrality check.
pub const NEUTRALITY_EPSILON: f64 = 0.01;

pub fn investment_required(delta: f64, unit_price: f64) -> f64 {
    delta * unit_price
}

/// Gross margin gained (or forgone) by a quantity change.
pub fn margin_impact(delta: f64, unit_price: f64, margin_rate: f64) -> f64 {
    delta * unit_price * margin_rate
}

/// Fills `investment_required` from each recommendation's delta and price.
pub fn price_recommendations(recommendations: &mut [Recommendation]) {
    for rec in recommendations.iter_mut() {
        rec.investment_required =
            investment_required(rec.recommended_quantity_change, rec.unit_price);
    }
}

/// Per-store totals of quantity change and investment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StoreTotals {
    pub quantity_change: f64,
    pub investment: f64,
    pub increase_quantity: f64,
}

pub fn store_totals(recommendations: &[Recommendation]) -> BTreeMap<StoreCode, StoreTotals> {
    let mut totals: BTreeMap<StoreCode, StoreTotals> = BTreeMap::new();
    for rec in recommendations {
        let entry = totals.entry(rec.str_code.clone()).or_default();
        entry.quantity_change += rec.recommended_quantity_change;
        entry.investment += rec.investment_required;
        if rec.recommended_quantity_change > 0.0 {
            entry.increase_quantity += rec.recommended_quantity_change;
        }
    }
    totals
}

/// A store whose rebalanced investment does not net to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct NeutralityBreach {
    pub str_code: StoreCode,
    pub net_investment: f64,
}

/// Sums investment per store and reports every store whose absolute net
/// exceeds `epsilon`. Breaches are logged; output is never filtered.
pub fn check_neutrality(recommendations: &[Recommendation], epsilon: f64) -> Vec<NeutralityBreach> {
    let breaches: Vec<NeutralityBreach> = store_totals(recommendations)
        .into_iter()
        .filter(|(_, totals)| totals.investment.abs() > epsilon)
        .map(|(str_code, totals)| NeutralityBreach {
            str_code,
            net_investment: totals.investment,
        })
        .collect();

    for breach in &breaches {
        warn!(
            str_code = %breach.str_code,
            net_investment = breach.net_investment,
            epsilon,
            "rebalanced store is not investment-neutral"
        );
    }
    breaches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::period::PeriodLabel;
    use crate::model::recommendation::{Anomaly, AnomalyMeasure, RuleDetail, RuleId};
    use crate::stats::classifier::Severity;

    fn rec(store: &str, delta: f64, price: f64) -> Recommendation {
        let anomaly = Anomaly {
            rule_id: RuleId::Imbalanced,
            str_code: store.into(),
            cluster_id: 1,
            category_dimension: format!("D{delta}"),
            subcategory: None,
            measure: AnomalyMeasure::ZScore(2.5),
            severity: Severity::Low,
            metric_value: 10.0,
            current_quantity: 10.0,
            unit_price: price,
        };
        let detail = RuleDetail::Imbalanced {
            z_score: 2.5,
            cohort_mean: 5.0,
            cohort_std: 2.0,
        };
        Recommendation::from_anomaly(anomaly, "202507A".parse::<PeriodLabel>().unwrap(), delta, detail)
    }

    #[test]
    fn decreases_are_savings() {
        assert_eq!(investment_required(-4.0, 2.5), -10.0);
        assert_eq!(investment_required(4.0, 2.5), 10.0);
        assert!((margin_impact(2.0, 10.0, 0.4) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn neutrality_breaches_are_reported_not_filtered() {
        let mut recs = vec![rec("S1", 2.0, 5.0), rec("S1", -5.0, 2.0), rec("S2", 1.0, 3.0)];
        price_recommendations(&mut recs);
        let breaches = check_neutrality(&recs, NEUTRALITY_EPSILON);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].str_code, "S2");
        assert_eq!(recs.len(), 3);
    }
}
