// src/lib.rs

//! Cluster-relative allocation anomaly detection and rebalancing.
//!
//! Stores are grouped into clusters of comparable peers. Six rules compare
//! each store's allocation of a category dimension against its cluster
//! cohort and emit signed quantity recommendations; the consolidator merges
//! their outputs into one row per store and dimension.

pub mod error;
pub mod io;
pub mod model;
pub mod pipeline;
pub mod stats;
pub mod strategy;

pub use error::{EngineError, EngineResult};
pub use model::period::PeriodLabel;
pub use model::recommendation::RuleId;
pub use pipeline::config::EngineConfig;
pub use pipeline::engine::{EngineInputs, EngineRun, RebalancingEngine, RuleAllocations, RuleStatus};
