// src/model/allocation.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::store::StoreCode;

/// Granularity of the comparison dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisLevel {
    /// Individual SPU codes.
    #[default]
    Spu,
    /// Subcategory names.
    Subcategory,
}

/// What a rule measures on an allocation record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricKind {
    Quantity,
    SalesAmount,
    /// Quantity normalised to a fixed window of days.
    UnitRate { window_days: f64, period_days: f64 },
}

/// One store's allocation of one category dimension for the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub str_code: StoreCode,
    pub category_dimension: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub quantity: f64,
    #[serde(default)]
    pub sales_amount: f64,
    pub unit_price: f64,
}

impl AllocationRecord {
    pub fn metric(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Quantity => self.quantity,
            MetricKind::SalesAmount => self.sales_amount,
            MetricKind::UnitRate {
                window_days,
                period_days,
            } => {
                if period_days <= 0.0 {
                    0.0
                } else {
                    self.quantity * window_days / period_days
                }
            }
        }
    }

    /// Subcategory to report for this record at the given level.
    pub fn subcategory_for(&self, level: AnalysisLevel) -> Option<String> {
        match level {
            AnalysisLevel::Subcategory => Some(self.category_dimension.clone()),
            AnalysisLevel::Spu => self.subcategory.clone(),
        }
    }
}

/// Collapses duplicate `(store, dimension)` rows into one.
///
/// Quantities and sales are summed; unit price becomes the quantity-weighted
/// average (plain average when total quantity is zero). Output is sorted by
/// store code, then dimension.
pub fn aggregate_records(records: &[AllocationRecord]) -> Vec<AllocationRecord> {
    let mut merged: BTreeMap<(StoreCode, String), (AllocationRecord, usize, f64)> = BTreeMap::new();
    let mut duplicates = 0usize;

    for record in records {
        let key = (record.str_code.clone(), record.category_dimension.clone());
        match merged.get_mut(&key) {
            Some((acc, rows, price_sum)) => {
                duplicates += 1;
                let total_qty = acc.quantity + record.quantity;
                if total_qty.abs() > f64::EPSILON {
                    acc.unit_price = (acc.unit_price * acc.quantity
                        + record.unit_price * record.quantity)
                        / total_qty;
                }
                acc.quantity = total_qty;
                acc.sales_amount += record.sales_amount;
                if acc.subcategory.is_none() {
                    acc.subcategory = record.subcategory.clone();
                }
                *rows += 1;
                *price_sum += record.unit_price;
                if acc.quantity.abs() <= f64::EPSILON {
                    acc.unit_price = *price_sum / *rows as f64;
                }
            }
            None => {
                merged.insert(key, (record.clone(), 1, record.unit_price));
            }
        }
    }

    if duplicates > 0 {
        warn!(duplicates, "merged duplicate allocation rows");
    }

    merged.into_values().map(|(record, _, _)| record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(store: &str, dim: &str, qty: f64, price: f64) -> AllocationRecord {
        AllocationRecord {
            str_code: store.into(),
            category_dimension: dim.into(),
            subcategory: None,
            quantity: qty,
            sales_amount: qty * price,
            unit_price: price,
        }
    }

    #[test]
    fn unit_rate_scales_to_window() {
        let r = record("S1", "SPU1", 16.0, 10.0);
        let rate = r.metric(MetricKind::UnitRate {
            window_days: 15.0,
            period_days: 16.0,
        });
        assert!((rate - 15.0).abs() < 1e-9);
    }

    #[test]
    fn duplicates_merge_with_weighted_price() {
        let rows = vec![
            record("S1", "SPU1", 10.0, 20.0),
            record("S1", "SPU1", 30.0, 40.0),
            record("S0", "SPU1", 1.0, 5.0),
        ];
        let merged = aggregate_records(&rows);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].str_code, "S0");
        let s1 = &merged[1];
        assert!((s1.quantity - 40.0).abs() < 1e-9);
        assert!((s1.unit_price - 35.0).abs() < 1e-9);
        assert!((s1.sales_amount - 1400.0).abs() < 1e-9);
    }
}
