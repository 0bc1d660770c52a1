// src/io/synthetic.rs

//! Seeded synthetic dataset for demo runs.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::{EngineError, EngineResult};
use crate::io::reporting::write_table;
use crate::model::allocation::AllocationRecord;
use crate::model::store::ClusterAssignment;

const SUBCATEGORIES: [&str; 4] = ["Tops", "Denim", "Knitwear", "Outerwear"];

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub clusters: u32,
    pub stores_per_cluster: usize,
    pub dimensions: usize,
    /// Mean units sold per store-dimension.
    pub mean_quantity: f64,
    /// Relative spread of quantities around the cluster mean.
    pub volatility: f64,
    /// Chance a store carries nothing of a dimension.
    pub drop_rate: f64,
    /// Chance a store is heavily over-allocated on a dimension.
    pub skew_rate: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            clusters: 3,
            stores_per_cluster: 8,
            dimensions: 12,
            mean_quantity: 12.0,
            volatility: 0.35,
            drop_rate: 0.08,
            skew_rate: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticDataset {
    pub clusters: Vec<ClusterAssignment>,
    pub allocations: Vec<AllocationRecord>,
}

/// Generates clusters of stores selling a shared set of SPUs.
///
/// Each cluster gets its own mean per dimension; stores draw around it from a
/// Normal distribution. Quantities are clamped at zero and rounded to whole
/// units. The same seed always yields the same dataset.
pub fn generate(config: &SyntheticConfig) -> EngineResult<SyntheticDataset> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let cluster_spread = Normal::new(config.mean_quantity, config.mean_quantity * 0.25)
        .map_err(|e| EngineError::InvalidConfig(format!("synthetic mean: {e}")))?;

    let prices: Vec<f64> = (0..config.dimensions)
        .map(|_| (rng.gen_range(20.0..120.0_f64) * 100.0).round() / 100.0)
        .collect();

    let mut clusters = Vec::new();
    let mut allocations = Vec::new();

    for cluster_id in 1..=config.clusters {
        let means: Vec<f64> = (0..config.dimensions)
            .map(|_| cluster_spread.sample(&mut rng).max(1.0))
            .collect();

        for s in 0..config.stores_per_cluster {
            let str_code = format!("{}{:03}", cluster_id, s + 1);
            clusters.push(ClusterAssignment {
                str_code: str_code.clone(),
                cluster_id,
            });

            for (d, (&mean, &price)) in means.iter().zip(&prices).enumerate() {
                if rng.gen_bool(config.drop_rate) {
                    continue;
                }
                let store_draw = Normal::new(mean, mean * config.volatility)
                    .map_err(|e| EngineError::InvalidConfig(format!("synthetic volatility: {e}")))?;
                let sold = store_draw.sample(&mut rng).max(0.0).round();
                // Over-allocated cells hold far more than they sell.
                let quantity = if rng.gen_bool(config.skew_rate) {
                    (sold * 2.5).round().max(1.0)
                } else {
                    sold
                };
                allocations.push(AllocationRecord {
                    str_code: str_code.clone(),
                    category_dimension: format!("SPU{:03}", d + 1),
                    subcategory: Some(SUBCATEGORIES[d % SUBCATEGORIES.len()].to_string()),
                    quantity,
                    sales_amount: ((sold * price) * 100.0).round() / 100.0,
                    unit_price: price,
                });
            }
        }
    }

    Ok(SyntheticDataset {
        clusters,
        allocations,
    })
}

/// Writes the dataset as the engine's two input tables.
pub fn write_dataset(dir: &Path, dataset: &SyntheticDataset) -> EngineResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let clusters = dir.join("synthetic_clusters.csv");
    let allocations = dir.join("synthetic_allocations.csv");
    write_table(&clusters, &["str_code", "cluster_id"], &dataset.clusters)?;
    write_table(
        &allocations,
        &[
            "str_code",
            "category_dimension",
            "subcategory",
            "quantity",
            "sales_amount",
            "unit_price",
        ],
        &dataset.allocations,
    )?;
    Ok((clusters, allocations))
}
