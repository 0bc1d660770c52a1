// src/strategy/quantity.rs

//! Converts anomalies into bounded, sign-constrained quantity changes.
//!
//! Every function returns `None` when no delta satisfies the rule's sign and
//! cap constraints together; callers drop the cohort in that case.

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::recommendation::Recommendation;
use crate::model::store::StoreCode;

/// Tolerance used when comparing quantities.
pub const QTY_EPSILON: f64 = 1e-9;

// =========================================================================
// 1. Increase-only
// =========================================================================

/// Raises `current` to `target`, boosting by at least `min_boost_qty`.
///
/// Returns `None` when the target does not exceed the current level.
pub fn increase_only(current: f64, target: f64, min_boost_qty: f64) -> Option<f64> {
    if !current.is_finite() || !target.is_finite() {
        return None;
    }
    let current = current.max(0.0);
    let goal = target.max(current);
    let delta = goal - current;
    if delta <= QTY_EPSILON {
        return None;
    }
    Some(delta.max(min_boost_qty))
}

/// Applies a per-store ceiling on the sum of increases within one rule.
///
/// Within a store, recommendations are served most severe first, then by
/// larger delta, then by dimension name. A recommendation that no longer fits
/// is trimmed to the remaining headroom; when the headroom is below
/// `min_boost_qty` it is dropped.
pub fn cap_store_increases(
    recommendations: Vec<Recommendation>,
    max_total_qty_per_store: f64,
    min_boost_qty: f64,
) -> Vec<Recommendation> {
    let mut by_store: BTreeMap<StoreCode, Vec<Recommendation>> = BTreeMap::new();
    for rec in recommendations {
        by_store.entry(rec.str_code.clone()).or_default().push(rec);
    }

    let mut kept = Vec::new();
    for (store, mut recs) in by_store {
        recs.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| {
                    b.recommended_quantity_change
                        .total_cmp(&a.recommended_quantity_change)
                })
                .then_with(|| a.category_dimension.cmp(&b.category_dimension))
        });

        let mut remaining = max_total_qty_per_store;
        let mut dropped = 0usize;
        for mut rec in recs {
            let wanted = rec.recommended_quantity_change;
            if wanted <= remaining + QTY_EPSILON {
                remaining -= wanted;
                kept.push(rec);
            } else if remaining + QTY_EPSILON >= min_boost_qty && remaining > QTY_EPSILON {
                rec.recommended_quantity_change = remaining;
                remaining = 0.0;
                kept.push(rec);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(str_code = %store, dropped, "store increase cap reached");
        }
    }
    kept
}

// =========================================================================
// 2. Decrease-only
// =========================================================================

/// Lowers `current` toward `target`, never by more than
/// `current * max_reduction_pct` and never below zero.
///
/// Returns `None` when nothing would be removed.
pub fn decrease_only(current: f64, target: f64, max_reduction_pct: f64) -> Option<f64> {
    if !current.is_finite() || !target.is_finite() || current <= 0.0 {
        return None;
    }
    let goal = target.clamp(0.0, current);
    let raw = goal - current;
    let floor = -(current * max_reduction_pct.clamp(0.0, 1.0));
    let delta = raw.max(floor).max(-current);
    if delta >= -QTY_EPSILON {
        return None;
    }
    Some(delta)
}

// =========================================================================
// 3. Bidirectional (investment-neutral)
// =========================================================================

/// One imbalanced cohort of a store entering the rebalance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RebalanceLeg {
    pub current: f64,
    pub target: f64,
    pub unit_price: f64,
}

/// Moves each leg toward its target by `adjustment_factor` of the gap, then
/// scales the heavier side so increases and decreases cost the same money.
///
/// If `max_total_increase` is given and the increases exceed it, every delta
/// is scaled by the same factor, which keeps the book balanced. Returns one
/// delta per leg (zero for legs that end up unused), or `None` when the store
/// has nothing to fund an increase with (or nothing to spend a decrease on).
pub fn rebalance_store(
    legs: &[RebalanceLeg],
    adjustment_factor: f64,
    max_total_increase: Option<f64>,
) -> Option<Vec<f64>> {
    let factor = adjustment_factor.clamp(0.0, 1.0);
    let mut deltas: Vec<f64> = legs
        .iter()
        .map(|leg| {
            if leg.unit_price <= 0.0 || !leg.unit_price.is_finite() {
                return 0.0;
            }
            let raw = (leg.target.max(0.0) - leg.current) * factor;
            raw.max(-leg.current.max(0.0))
        })
        .collect();

    let money = |deltas: &[f64], positive: bool| -> f64 {
        deltas
            .iter()
            .zip(legs)
            .filter(|(d, _)| if positive { **d > 0.0 } else { **d < 0.0 })
            .map(|(d, leg)| d.abs() * leg.unit_price)
            .sum()
    };

    let increase_money = money(&deltas, true);
    let decrease_money = money(&deltas, false);
    if increase_money <= QTY_EPSILON || decrease_money <= QTY_EPSILON {
        return None;
    }

    if increase_money > decrease_money {
        let scale = decrease_money / increase_money;
        for d in deltas.iter_mut().filter(|d| **d > 0.0) {
            *d *= scale;
        }
    } else {
        let scale = increase_money / decrease_money;
        for d in deltas.iter_mut().filter(|d| **d < 0.0) {
            *d *= scale;
        }
    }

    if let Some(cap) = max_total_increase {
        let total_increase: f64 = deltas.iter().filter(|d| **d > 0.0).sum();
        if total_increase > cap && total_increase > 0.0 {
            let scale = (cap / total_increase).max(0.0);
            for d in deltas.iter_mut() {
                *d *= scale;
            }
        }
    }

    if deltas.iter().all(|d| d.abs() <= QTY_EPSILON) {
        return None;
    }
    Some(deltas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increase_is_floored_at_min_boost() {
        assert_eq!(increase_only(0.8, 1.0, 0.5), Some(0.5));
        let big = increase_only(2.0, 10.0, 0.5).unwrap();
        assert!((big - 8.0).abs() < 1e-9);
        assert_eq!(increase_only(5.0, 4.0, 0.5), None);
        assert_eq!(increase_only(5.0, 5.0, 0.5), None);
    }

    #[test]
    fn decrease_is_capped_by_reduction_pct() {
        let d = decrease_only(20.0, 12.0, 0.4).unwrap();
        assert!((d + 8.0).abs() < 1e-9);
        let capped = decrease_only(20.0, 2.0, 0.4).unwrap();
        assert!((capped + 8.0).abs() < 1e-9);
        assert_eq!(decrease_only(10.0, 10.0, 0.4), None);
        assert_eq!(decrease_only(0.0, -5.0, 0.4), None);
    }

    #[test]
    fn decrease_never_goes_below_zero() {
        let d = decrease_only(3.0, 0.0, 1.0).unwrap();
        assert!((d + 3.0).abs() < 1e-9);
    }

    #[test]
    fn rebalance_is_investment_neutral() {
        let legs = [
            RebalanceLeg { current: 2.0, target: 10.0, unit_price: 5.0 },
            RebalanceLeg { current: 30.0, target: 10.0, unit_price: 3.0 },
        ];
        let deltas = rebalance_store(&legs, 1.0, None).unwrap();
        assert!(deltas[0] > 0.0);
        assert!(deltas[1] < 0.0);
        let net: f64 = deltas.iter().zip(&legs).map(|(d, l)| d * l.unit_price).sum();
        assert!(net.abs() < 1e-9);
    }

    #[test]
    fn rebalance_needs_both_sides() {
        let legs = [
            RebalanceLeg { current: 2.0, target: 10.0, unit_price: 5.0 },
            RebalanceLeg { current: 1.0, target: 4.0, unit_price: 3.0 },
        ];
        assert_eq!(rebalance_store(&legs, 1.0, None), None);
    }

    #[test]
    fn rebalance_cap_scales_both_sides() {
        let legs = [
            RebalanceLeg { current: 0.0, target: 40.0, unit_price: 1.0 },
            RebalanceLeg { current: 100.0, target: 50.0, unit_price: 1.0 },
        ];
        let deltas = rebalance_store(&legs, 1.0, Some(10.0)).unwrap();
        assert!((deltas[0] - 10.0).abs() < 1e-9);
        assert!((deltas[1] + 10.0).abs() < 1e-9);
    }
}
