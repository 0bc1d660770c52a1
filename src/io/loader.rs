// src/io/loader.rs

//! CSV readers for the engine's input tables and for previously written rule
//! detail tables.
//!
//! A missing file is not an error at this layer: loaders return `None` and
//! the caller decides whether the absence is fatal.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::io::reporting::rule_details_path;
use crate::model::allocation::AllocationRecord;
use crate::model::period::PeriodLabel;
use crate::model::recommendation::{DetailRow, RuleId};
use crate::model::store::{ClusterAssignment, ClusterAssignmentProvider, ClusterMap};
use crate::pipeline::consolidate::RuleDetails;

/// Parses every row of a headed CSV stream. Fields are trimmed.
pub fn read_rows<T, R>(reader: R) -> Result<Vec<T>, csv::Error>
where
    T: DeserializeOwned,
    R: Read,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    csv_reader.deserialize().collect()
}

/// Reads a table from disk. `Ok(None)` when the file does not exist.
pub fn read_table<T: DeserializeOwned>(path: &Path) -> EngineResult<Option<Vec<T>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let rows = read_rows(file).map_err(|source| EngineError::Table {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(rows))
}

pub fn load_cluster_assignments(path: &Path) -> EngineResult<Option<ClusterMap>> {
    let Some(rows) = read_table::<ClusterAssignment>(path)? else {
        warn!(path = %path.display(), "cluster assignment file not found");
        return Ok(None);
    };
    let map = ClusterMap::from_assignments(rows);
    info!(path = %path.display(), stores = map.len(), "loaded cluster assignments");
    Ok(Some(map))
}

pub fn load_allocations(path: &Path) -> EngineResult<Option<Vec<AllocationRecord>>> {
    let Some(rows) = read_table::<AllocationRecord>(path)? else {
        warn!(path = %path.display(), "allocation file not found");
        return Ok(None);
    };
    info!(path = %path.display(), rows = rows.len(), "loaded allocations");
    Ok(Some(rows))
}

/// Detail files for one rule and period: the plain file first, then any
/// `_<suffix>` variants in file-name order.
pub fn rule_detail_files(dir: &Path, rule: RuleId, period: PeriodLabel) -> EngineResult<Vec<PathBuf>> {
    let plain = rule_details_path(dir, rule, period);
    let variant_prefix = format!("{}_details_{}_", rule.prefix(), period);

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut variants = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(&variant_prefix) && name.ends_with(".csv") {
            variants.push(path);
        }
    }
    variants.sort();

    let mut files = Vec::with_capacity(variants.len() + 1);
    if plain.is_file() {
        files.push(plain);
    }
    files.extend(variants);
    Ok(files)
}

/// Loads a rule's detail rows for the period. `None` when no file exists,
/// which the consolidator treats as an absent rule.
pub fn load_rule_details(dir: &Path, rule: RuleId, period: PeriodLabel) -> EngineResult<Option<Vec<DetailRow>>> {
    let files = rule_detail_files(dir, rule, period)?;
    if files.is_empty() {
        info!(%rule, %period, "no detail table found");
        return Ok(None);
    }

    let mut rows = Vec::new();
    for path in &files {
        if let Some(mut loaded) = read_table::<DetailRow>(path)? {
            let foreign = loaded.iter().filter(|r| r.rule() != Some(rule)).count();
            if foreign > 0 {
                warn!(%rule, path = %path.display(), foreign, "dropping rows tagged with another rule");
                loaded.retain(|r| r.rule() == Some(rule));
            }
            rows.extend(loaded);
        }
    }
    info!(%rule, files = files.len(), rows = rows.len(), "loaded detail rows");
    Ok(Some(rows))
}

/// Loads the detail tables of every rule for the period.
///
/// A rule whose tables cannot be read is logged and recorded as absent, so
/// its consolidated columns become NA while the other rules still merge.
pub fn load_all_rule_details(dir: &Path, period: PeriodLabel) -> RuleDetails {
    RuleId::ALL
        .iter()
        .map(|&rule| {
            let rows = load_rule_details(dir, rule, period).unwrap_or_else(|e| {
                error!(%rule, %period, error = %e, "detail table unreadable; treating rule as absent");
                None
            });
            (rule, rows)
        })
        .collect()
}

/// Cluster assignments backed by a CSV file.
#[derive(Debug, Clone)]
pub struct CsvClusterProvider {
    path: PathBuf,
}

impl CsvClusterProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ClusterAssignmentProvider for CsvClusterProvider {
    fn assign(&self) -> EngineResult<ClusterMap> {
        load_cluster_assignments(&self.path)?.ok_or_else(|| EngineError::MissingInput {
            what: "cluster assignment",
            path: self.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::store::resolve_clusters;

    #[test]
    fn reads_cluster_alias_and_trims() {
        let csv = "str_code, Cluster\n S1 , 3\nS2,4\n";
        let rows: Vec<ClusterAssignment> = read_rows(csv.as_bytes()).unwrap();
        assert_eq!(rows[0].str_code, "S1");
        assert_eq!(rows[0].cluster_id, 3);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn allocation_optional_columns_default() {
        let csv = "str_code,category_dimension,quantity,unit_price\nS1,SPU1,4,12.5\n";
        let rows: Vec<AllocationRecord> = read_rows(csv.as_bytes()).unwrap();
        assert_eq!(rows[0].subcategory, None);
        assert_eq!(rows[0].sales_amount, 0.0);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_cluster_assignments(&dir.path().join("nope.csv")).unwrap();
        assert!(loaded.is_none());
        let provider = CsvClusterProvider::new(dir.path().join("nope.csv"));
        assert!(matches!(provider.assign(), Err(EngineError::MissingInput { .. })));
        assert!(resolve_clusters(&provider).unwrap().is_none());
    }

    #[test]
    fn provider_resolves_existing_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusters.csv");
        std::fs::write(&path, "str_code,cluster_id\nS1,1\nS2,2\n").unwrap();
        let map = resolve_clusters(&CsvClusterProvider::new(&path)).unwrap().unwrap();
        assert_eq!(map.len(), 2);

        std::fs::write(&path, "str_code,cluster_id\nS1,x\n").unwrap();
        assert!(matches!(
            resolve_clusters(&CsvClusterProvider::new(&path)),
            Err(EngineError::Table { .. })
        ));
    }

    #[test]
    fn malformed_table_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusters.csv");
        std::fs::write(&path, "str_code,cluster_id\nS1,not-a-number\n").unwrap();
        match load_cluster_assignments(&path) {
            Err(EngineError::Table { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn detail_files_plain_before_variants() {
        let dir = tempfile::tempdir().unwrap();
        let period: PeriodLabel = "202507A".parse().unwrap();
        for name in [
            "rule10_details_202507A_b.csv",
            "rule10_details_202507A.csv",
            "rule10_details_202507A_a.csv",
            "rule10_details_202507B.csv",
            "rule10_results_202507A.csv",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let files = rule_detail_files(dir.path(), RuleId::SmartOvercapacity, period).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "rule10_details_202507A.csv",
                "rule10_details_202507A_a.csv",
                "rule10_details_202507A_b.csv",
            ]
        );
    }

    #[test]
    fn corrupt_detail_table_marks_only_that_rule_absent() {
        let dir = tempfile::tempdir().unwrap();
        let period: PeriodLabel = "202507A".parse().unwrap();
        std::fs::write(
            rule_details_path(dir.path(), RuleId::Imbalanced, period),
            "rule_id,run_sequence\n8,notanumber\n",
        )
        .unwrap();
        crate::io::reporting::write_table::<DetailRow>(
            &rule_details_path(dir.path(), RuleId::BelowMinimum, period),
            &crate::io::reporting::DETAIL_COLUMNS,
            &[],
        )
        .unwrap();

        let details = load_all_rule_details(dir.path(), period);
        assert_eq!(details.len(), RuleId::ALL.len());
        assert_eq!(details[&RuleId::Imbalanced], None);
        assert_eq!(details[&RuleId::BelowMinimum], Some(Vec::new()));
        assert_eq!(details[&RuleId::MissingCategory], None);
    }
}
