// src/io/reporting.rs

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::EngineResult;
use crate::model::period::PeriodLabel;
use crate::model::recommendation::RuleId;
use crate::pipeline::consolidate::Consolidation;
use crate::pipeline::engine::EngineRun;
use crate::pipeline::runner::RuleOutput;

/// Literal written for a missing value in the consolidated tables.
pub const NA: &str = "NA";

/// Column order of `DetailRow`.
pub const DETAIL_COLUMNS: [&str; 24] = [
    "rule_id",
    "run_sequence",
    "period_label",
    "str_code",
    "cluster_id",
    "category_dimension",
    "subcategory",
    "opportunity_type",
    "severity",
    "current_quantity",
    "recommended_quantity_change",
    "unit_price",
    "investment_required",
    "metric_value",
    "benchmark_value",
    "z_score",
    "threshold_gap",
    "cohort_mean",
    "cohort_std",
    "peer_adoption_rate",
    "performance_tier",
    "margin_impact",
    "fast_fish_compliant",
    "business_rationale",
];

/// Column order of `StoreResult`.
pub const RESULT_COLUMNS: [&str; 12] = [
    "rule_id",
    "period_label",
    "str_code",
    "cluster_id",
    "rule_triggered",
    "anomaly_count",
    "high_severity_count",
    "compliant_count",
    "total_quantity_change",
    "total_investment",
    "mean_z_score",
    "performance_tier",
];

// =========================================================================
// File names
// =========================================================================

pub fn rule_results_path(dir: &Path, rule: RuleId, period: PeriodLabel) -> PathBuf {
    dir.join(format!("{}_results_{}.csv", rule.prefix(), period))
}

pub fn rule_details_path(dir: &Path, rule: RuleId, period: PeriodLabel) -> PathBuf {
    dir.join(format!("{}_details_{}.csv", rule.prefix(), period))
}

pub fn consolidated_detailed_path(dir: &Path, period: PeriodLabel) -> PathBuf {
    dir.join(format!("consolidated_detailed_{period}.csv"))
}

pub fn consolidated_summary_path(dir: &Path, period: PeriodLabel) -> PathBuf {
    dir.join(format!("consolidated_summary_{period}.csv"))
}

// =========================================================================
// Writers
// =========================================================================

/// Writes rows under a fixed header. The header is written even when there
/// are no rows so every table keeps its schema.
pub fn write_table<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> EngineResult<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
    wtr.write_record(header)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;

    info!(rows = rows.len(), path = %path.display(), "exported table");
    Ok(())
}

/// Writes a rule's results and details tables; returns their paths.
pub fn write_rule_output(dir: &Path, output: &RuleOutput) -> EngineResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let results = rule_results_path(dir, output.rule_id, output.period);
    let details = rule_details_path(dir, output.rule_id, output.period);
    write_table(&results, &RESULT_COLUMNS, &output.results)?;
    write_table(&details, &DETAIL_COLUMNS, &output.detail_rows())?;
    Ok(vec![results, details])
}

fn num(value: f64) -> String {
    // Avoid writing "-0.0000".
    let value = if value == 0.0 { 0.0 } else { value };
    format!("{value:.4}")
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| NA.to_string(), |v| v.to_string())
}

pub fn consolidated_detailed_header() -> Vec<String> {
    let mut header: Vec<String> = ["str_code", "cluster_id", "category_dimension", "subcategory"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for rule in RuleId::ALL {
        let p = rule.prefix();
        for column in ["quantity_change", "investment", "compliant", "opportunity_type", "severity"] {
            header.push(format!("{p}_{column}"));
        }
    }
    header.extend(
        ["total_quantity_change", "total_investment", "rules_triggered"]
            .iter()
            .map(|s| s.to_string()),
    );
    header
}

pub fn consolidated_summary_header() -> Vec<String> {
    let mut header = vec!["str_code".to_string(), "cluster_id".to_string()];
    for rule in RuleId::ALL {
        let p = rule.prefix();
        for column in ["anomaly_count", "compliant_count", "quantity_change", "investment"] {
            header.push(format!("{p}_{column}"));
        }
    }
    header.extend(
        ["total_anomalies", "total_quantity_change", "total_investment", "rules_triggered"]
            .iter()
            .map(|s| s.to_string()),
    );
    header
}

/// Writes the consolidated detailed and summary tables. Every rule keeps its
/// column group; cells a rule did not fill are `NA`.
pub fn write_consolidation(dir: &Path, consolidation: &Consolidation) -> EngineResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let detailed_path = consolidated_detailed_path(dir, consolidation.period);
    let summary_path = consolidated_summary_path(dir, consolidation.period);

    let mut wtr = csv::Writer::from_path(&detailed_path)?;
    wtr.write_record(consolidated_detailed_header())?;
    for record in &consolidation.records {
        let mut row = vec![
            record.str_code.clone(),
            opt(record.cluster_id),
            record.category_dimension.clone(),
            record.subcategory.clone().unwrap_or_else(|| NA.to_string()),
        ];
        for rule in RuleId::ALL {
            match record.cell(rule) {
                Some(cell) => row.extend([
                    num(cell.quantity_change),
                    num(cell.investment),
                    cell.compliant.to_string(),
                    cell.opportunity_type.to_string(),
                    cell.severity.to_string(),
                ]),
                None => row.extend(std::iter::repeat(NA.to_string()).take(5)),
            }
        }
        row.push(num(record.total_quantity_change()));
        row.push(num(record.total_investment()));
        row.push(record.rules_triggered().to_string());
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    info!(rows = consolidation.records.len(), path = %detailed_path.display(), "exported table");

    let mut wtr = csv::Writer::from_path(&summary_path)?;
    wtr.write_record(consolidated_summary_header())?;
    for summary in &consolidation.summaries {
        let mut row = vec![summary.str_code.clone(), opt(summary.cluster_id)];
        for rule in RuleId::ALL {
            match summary.tally(rule) {
                Some(tally) => row.extend([
                    tally.anomaly_count.to_string(),
                    tally.compliant_count.to_string(),
                    num(tally.quantity_change),
                    num(tally.investment),
                ]),
                None => row.extend(std::iter::repeat(NA.to_string()).take(4)),
            }
        }
        row.push(summary.total_anomalies().to_string());
        row.push(num(summary.total_quantity_change()));
        row.push(num(summary.total_investment()));
        row.push(summary.rules_triggered().to_string());
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    info!(rows = consolidation.summaries.len(), path = %summary_path.display(), "exported table");

    Ok(vec![detailed_path, summary_path])
}

/// Writes every completed rule's tables followed by the consolidated ones.
pub fn write_run(dir: &Path, run: &EngineRun) -> EngineResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    for output in run.outputs.values() {
        written.extend(write_rule_output(dir, output)?);
    }
    written.extend(write_consolidation(dir, &run.consolidation)?);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::recommendation::{DetailRow, OpportunityType};
    use crate::pipeline::runner::StoreResult;
    use crate::stats::classifier::Severity;

    fn header_of<T: Serialize>(row: &T) -> Vec<String> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.serialize(row).unwrap();
        let bytes = wtr.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        text.lines().next().unwrap().split(',').map(str::to_string).collect()
    }

    #[test]
    fn fixed_headers_match_serialized_fields() {
        let detail = DetailRow {
            rule_id: 9,
            run_sequence: 0,
            period_label: "202507A".into(),
            str_code: "S1".into(),
            cluster_id: Some(1),
            category_dimension: "SPU1".into(),
            subcategory: None,
            opportunity_type: OpportunityType::BelowMinimumBoost,
            severity: Severity::Low,
            current_quantity: 1.0,
            recommended_quantity_change: 1.0,
            unit_price: 1.0,
            investment_required: 1.0,
            metric_value: None,
            benchmark_value: None,
            z_score: None,
            threshold_gap: None,
            cohort_mean: None,
            cohort_std: None,
            peer_adoption_rate: None,
            performance_tier: None,
            margin_impact: None,
            fast_fish_compliant: true,
            business_rationale: "ok".into(),
        };
        assert_eq!(header_of(&detail), DETAIL_COLUMNS);

        let result = StoreResult {
            rule_id: 9,
            period_label: "202507A".into(),
            str_code: "S1".into(),
            cluster_id: 1,
            rule_triggered: false,
            anomaly_count: 0,
            high_severity_count: 0,
            compliant_count: 0,
            total_quantity_change: 0.0,
            total_investment: 0.0,
            mean_z_score: None,
            performance_tier: None,
        };
        assert_eq!(header_of(&result), RESULT_COLUMNS);
    }

    #[test]
    fn empty_table_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_table::<DetailRow>(&path, &DETAIL_COLUMNS, &[]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), DETAIL_COLUMNS.join(","));
    }

    #[test]
    fn numbers_are_fixed_precision() {
        assert_eq!(num(-0.0), "0.0000");
        assert_eq!(num(2.5), "2.5000");
        assert_eq!(opt::<u32>(None), NA);
    }

    #[test]
    fn consolidated_headers_have_one_group_per_rule() {
        assert_eq!(consolidated_detailed_header().len(), 4 + 6 * 5 + 3);
        assert_eq!(consolidated_summary_header().len(), 2 + 6 * 4 + 4);
        assert!(consolidated_summary_header().contains(&"rule10_anomaly_count".to_string()));
    }
}
