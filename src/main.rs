// src/main.rs

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use cluster_rebalance::io::{loader, reporting, synthetic};
use cluster_rebalance::model::allocation::AnalysisLevel;
use cluster_rebalance::model::store::resolve_clusters;
use cluster_rebalance::pipeline::consolidate::{subcategory_lookup, Consolidator};
use cluster_rebalance::{
    EngineConfig, EngineInputs, PeriodLabel, RebalancingEngine, RuleAllocations, RuleId, RuleStatus,
};

#[derive(Parser, Debug)]
#[command(name = "cluster-rebalance")]
#[command(about = "Cluster-relative allocation anomaly detection and rebalancing")]
struct Args {
    /// Analysis period, e.g. 202507A
    #[arg(long)]
    period: PeriodLabel,

    /// Cluster assignment CSV (str_code, cluster_id)
    #[arg(long)]
    clusters: Option<PathBuf>,

    /// Allocation CSV shared by all rules
    #[arg(long)]
    allocations: Option<PathBuf>,

    /// Directory for rule and consolidated tables
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// JSON engine configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comparison dimension (spu or subcategory)
    #[arg(long, value_parser = parse_level)]
    level: Option<AnalysisLevel>,

    /// Worker threads for rule runs
    #[arg(long)]
    workers: Option<usize>,

    /// Tag written to every detail row; higher wins during consolidation
    #[arg(long)]
    run_sequence: Option<u32>,

    /// Rules to run, e.g. 7,8,10 (default: all)
    #[arg(long, value_delimiter = ',')]
    rules: Vec<RuleId>,

    /// Rule-specific allocation table, e.g. 10=overcapacity.csv
    #[arg(long = "rule-allocations", value_parser = parse_rule_path)]
    rule_allocations: Vec<(RuleId, PathBuf)>,

    /// Skip rule runs and consolidate detail tables already in the output directory
    #[arg(long)]
    consolidate_only: bool,

    /// Generate a synthetic dataset into the output directory and run on it
    #[arg(long)]
    demo: bool,

    /// Seed for --demo
    #[arg(long, default_value = "42")]
    seed: u64,
}

fn parse_level(s: &str) -> Result<AnalysisLevel, String> {
    match s.to_ascii_lowercase().as_str() {
        "spu" => Ok(AnalysisLevel::Spu),
        "subcategory" => Ok(AnalysisLevel::Subcategory),
        other => Err(format!("unknown analysis level '{other}' (expected spu or subcategory)")),
    }
}

fn parse_rule_path(s: &str) -> Result<(RuleId, PathBuf), String> {
    let (rule, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected RULE=PATH, got '{s}'"))?;
    Ok((rule.trim().parse()?, PathBuf::from(path.trim())))
}

fn build_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match (&args.config, args.level) {
        (Some(path), _) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        (None, Some(level)) => EngineConfig::for_level(level),
        (None, None) => EngineConfig::default(),
    };
    if let Some(level) = args.level {
        config.analysis_level = level;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(seq) = args.run_sequence {
        config.run_sequence = seq;
    }
    if !args.rules.is_empty() {
        config.enabled_rules = args.rules.clone();
    }
    Ok(config)
}

fn consolidate_only(args: &Args, config: &EngineConfig) -> Result<()> {
    let clusters = match &args.clusters {
        Some(path) => resolve_clusters(&loader::CsvClusterProvider::new(path))?,
        None => None,
    };
    let lookup = match &args.allocations {
        Some(path) => loader::load_allocations(path)?
            .map(|records| subcategory_lookup(&records, config.analysis_level))
            .unwrap_or_default(),
        None => Default::default(),
    };

    let details = loader::load_all_rule_details(&args.output_dir, args.period);
    let consolidation = Consolidator::new(clusters.as_ref(), lookup).consolidate(args.period, details);
    reporting::write_consolidation(&args.output_dir, &consolidation)?;

    println!(
        "Consolidated {} records across {} stores ({} of 6 rules contributed)",
        consolidation.records.len(),
        consolidation.summaries.len(),
        consolidation.contributing.len()
    );
    Ok(())
}

fn load_inputs(args: &Args) -> Result<EngineInputs> {
    // 1. SHARED TABLES
    let (cluster_path, allocation_path) = if args.demo {
        let dataset = synthetic::generate(&synthetic::SyntheticConfig {
            seed: args.seed,
            ..Default::default()
        })?;
        info!(
            stores = dataset.clusters.len(),
            rows = dataset.allocations.len(),
            "generated synthetic dataset"
        );
        synthetic::write_dataset(&args.output_dir, &dataset)?
    } else {
        match (&args.clusters, &args.allocations) {
            (Some(c), Some(a)) => (c.clone(), a.clone()),
            _ => bail!("--clusters and --allocations are required unless --demo is set"),
        }
    };

    let mut inputs = EngineInputs {
        clusters: resolve_clusters(&loader::CsvClusterProvider::new(&cluster_path))?,
        cluster_source: cluster_path,
        allocations: loader::load_allocations(&allocation_path)?,
        allocation_source: allocation_path,
        ..Default::default()
    };

    // 2. RULE-SPECIFIC TABLES
    for (rule, path) in &args.rule_allocations {
        let records = loader::load_allocations(path)?;
        if records.is_none() {
            warn!(%rule, path = %path.display(), "rule allocation table not found; the rule will fail");
        }
        inputs.rule_allocations.insert(
            *rule,
            RuleAllocations {
                source: path.clone(),
                records,
            },
        );
    }
    Ok(inputs)
}

fn print_report(output_dir: &Path, run: &cluster_rebalance::EngineRun) {
    println!("\n=== Rule Runs ({}) ===", run.period);
    for (rule, status) in &run.statuses {
        match status {
            RuleStatus::Completed {
                recommendations,
                rejected,
            } => println!("{rule}: {recommendations} recommendations, {rejected} not compliant"),
            RuleStatus::Failed { reason } => println!("{rule}: FAILED ({reason})"),
            RuleStatus::Disabled => println!("{rule}: disabled"),
        }
    }

    let consolidation = &run.consolidation;
    let quantity: f64 = consolidation.records.iter().map(|r| r.total_quantity_change()).sum();
    let investment: f64 = consolidation.records.iter().map(|r| r.total_investment()).sum();
    println!("\n=== Consolidation ===");
    println!("Records: {}", consolidation.records.len());
    println!("Stores: {}", consolidation.summaries.len());
    println!("Net quantity change: {quantity:.2}");
    println!("Net investment: {investment:.2}");
    println!("Tables written to {}", output_dir.display());
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    if args.consolidate_only {
        return consolidate_only(&args, &config);
    }

    let engine = RebalancingEngine::new(config)?;
    let inputs = load_inputs(&args)?;

    let run = engine.run(args.period, &inputs)?;
    reporting::write_run(&args.output_dir, &run)
        .with_context(|| format!("writing tables to {}", args.output_dir.display()))?;

    print_report(&args.output_dir, &run);
    Ok(())
}
