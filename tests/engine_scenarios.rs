use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use cluster_rebalance::io::{loader, reporting, synthetic};
use cluster_rebalance::model::allocation::AllocationRecord;
use cluster_rebalance::model::recommendation::RuleFamily;
use cluster_rebalance::model::store::{resolve_clusters, ClusterAssignment, ClusterMap};
use cluster_rebalance::{EngineConfig, EngineInputs, PeriodLabel, RebalancingEngine, RuleId, RuleStatus};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn period() -> PeriodLabel {
    "202507A".parse().unwrap()
}

fn alloc(store: &str, dim: &str, qty: f64, sales: f64, price: f64) -> AllocationRecord {
    AllocationRecord {
        str_code: store.into(),
        category_dimension: dim.into(),
        subcategory: Some("Tops".into()),
        quantity: qty,
        sales_amount: sales,
        unit_price: price,
    }
}

fn one_cluster(stores: &[&str]) -> ClusterMap {
    ClusterMap::from_assignments(stores.iter().map(|s| ClusterAssignment {
        str_code: s.to_string(),
        cluster_id: 1,
    }))
}

fn synthetic_inputs() -> EngineInputs {
    let data = synthetic::generate(&synthetic::SyntheticConfig::default()).unwrap();
    EngineInputs::new(ClusterMap::from_assignments(data.clusters), data.allocations)
}

fn run_engine(config: EngineConfig, inputs: &EngineInputs) -> cluster_rebalance::EngineRun {
    RebalancingEngine::new(config).unwrap().run(period(), inputs).unwrap()
}

// ---------------------------------------------------------------------------
// Invariants over a realistic dataset
// ---------------------------------------------------------------------------

#[test]
fn every_rule_respects_its_sign_constraint() {
    let run = run_engine(EngineConfig::default(), &synthetic_inputs());
    assert_eq!(run.outputs.len(), 6);

    let mut total = 0;
    for (rule, output) in &run.outputs {
        for rec in &output.details {
            total += 1;
            let delta = rec.recommended_quantity_change;
            match rule.family() {
                RuleFamily::IncreaseOnly => assert!(delta > 0.0, "{rule}: {delta}"),
                RuleFamily::DecreaseOnly => assert!(delta < 0.0, "{rule}: {delta}"),
                RuleFamily::Bidirectional => assert!(delta != 0.0),
            }
            assert!(rec.investment_required.is_finite());
        }
        assert!(output.neutrality_breaches.is_empty(), "{rule} broke neutrality");
    }
    assert!(total > 0, "synthetic data should trigger at least one rule");
}

#[test]
fn consolidated_keys_are_unique_and_summary_is_complete() {
    let inputs = synthetic_inputs();
    let run = run_engine(EngineConfig::default(), &inputs);

    let mut seen = BTreeSet::new();
    for record in &run.consolidation.records {
        assert!(
            seen.insert((record.str_code.clone(), record.category_dimension.clone())),
            "duplicate key {} / {}",
            record.str_code,
            record.category_dimension
        );
    }

    let clusters = inputs.clusters.as_ref().unwrap();
    assert_eq!(run.consolidation.summaries.len(), clusters.len());
    for (store, _) in clusters.stores() {
        assert!(run.consolidation.summaries.iter().any(|s| &s.str_code == store));
    }
}

#[test]
fn repeated_runs_write_identical_files() {
    let inputs = synthetic_inputs();
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();

    for dir in [first.path(), second.path()] {
        let run = run_engine(EngineConfig::default(), &inputs);
        reporting::write_run(dir, &run).unwrap();
    }

    let names = |dir: &Path| -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    };
    let files = names(first.path());
    assert_eq!(files, names(second.path()));
    assert_eq!(files.len(), 6 * 2 + 2);
    for name in files {
        let a = fs::read(first.path().join(&name)).unwrap();
        let b = fs::read(second.path().join(&name)).unwrap();
        assert_eq!(a, b, "{name} differs between runs");
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn below_minimum_store_gets_boost() {
    let clusters = one_cluster(&["S1", "S2"]);
    let allocations = vec![
        alloc("S1", "SPU1", 0.8, 8.0, 10.0),
        alloc("S2", "SPU1", 3.0, 30.0, 10.0),
    ];
    let mut config = EngineConfig::default();
    config.enabled_rules = vec![RuleId::BelowMinimum];
    let run = run_engine(config, &EngineInputs::new(clusters, allocations));

    let output = &run.outputs[&RuleId::BelowMinimum];
    assert_eq!(output.details.len(), 1);
    let rec = &output.details[0];
    assert_eq!(rec.str_code, "S1");
    assert!(rec.recommended_quantity_change >= 0.5);
    assert!((rec.investment_required - rec.recommended_quantity_change * 10.0).abs() < 1e-9);
    assert!(rec.fast_fish_compliant);
    assert!(rec.business_rationale.ends_with("Fast Fish compliant"));

    let s1 = output.results.iter().find(|r| r.str_code == "S1").unwrap();
    assert!(s1.rule_triggered);
    let s2 = output.results.iter().find(|r| r.str_code == "S2").unwrap();
    assert!(!s2.rule_triggered);
}

#[test]
fn overcapacity_store_is_reduced() {
    let clusters = one_cluster(&["P1", "P2", "S2"]);
    let allocations = vec![
        alloc("P1", "SPU1", 10.0, 100.0, 25.0),
        alloc("P2", "SPU1", 10.0, 100.0, 25.0),
        alloc("S2", "SPU1", 20.0, 120.0, 25.0),
    ];
    let mut config = EngineConfig::default();
    config.enabled_rules = vec![RuleId::SmartOvercapacity];
    let run = run_engine(config, &EngineInputs::new(clusters, allocations));

    let details = &run.outputs[&RuleId::SmartOvercapacity].details;
    assert_eq!(details.len(), 1);
    let rec = &details[0];
    assert_eq!(rec.str_code, "S2");
    assert!(rec.recommended_quantity_change < 0.0);
    assert!(rec.recommended_quantity_change >= -8.0 - 1e-9);
    assert!(rec.investment_required < 0.0);
}

#[test]
fn missing_cluster_table_still_consolidates() {
    let dir = tempfile::tempdir().unwrap();
    let cluster_path = dir.path().join("clusters.csv");
    let mut inputs = synthetic_inputs();
    inputs.clusters = resolve_clusters(&loader::CsvClusterProvider::new(&cluster_path)).unwrap();
    inputs.cluster_source = cluster_path;

    let run = run_engine(EngineConfig::default(), &inputs);
    assert!(run
        .statuses
        .values()
        .all(|s| matches!(s, RuleStatus::Failed { .. })));

    let written = reporting::write_run(dir.path(), &run).unwrap();
    assert_eq!(written.len(), 2);
    assert!(written.iter().all(|p| p.exists()));
}
