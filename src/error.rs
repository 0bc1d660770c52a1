// src/error.rs

//! Engine error types.
//!
//! Every failure mode of a rebalancing run has a named variant. Some variants
//! (insufficient cohorts, key collisions) are handled locally and only ever
//! logged; they exist so the log line carries the same wording everywhere.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::recommendation::RuleId;
use crate::model::store::ClusterId;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing required input: {what} ({})", path.display())]
    MissingInput { what: &'static str, path: PathBuf },

    #[error(
        "cohort (cluster {cluster_id}, {category_dimension}) has {count} members, needs {required}"
    )]
    InsufficientCohort {
        cluster_id: ClusterId,
        category_dimension: String,
        count: usize,
        required: usize,
    },

    #[error("constraint violation in {rule} for store {str_code} / {category_dimension}: {reason}")]
    ConstraintViolation {
        rule: RuleId,
        str_code: String,
        category_dimension: String,
        reason: String,
    },

    #[error(
        "duplicate key ({str_code}, {category_dimension}) in {rule}: kept run {kept_run}, dropped run {dropped_run}"
    )]
    ConsolidationKeyCollision {
        rule: RuleId,
        str_code: String,
        category_dimension: String,
        kept_run: u32,
        dropped_run: u32,
    },

    #[error("invalid period label '{0}' (expected YYYYMM followed by A or B)")]
    InvalidPeriod(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{rule} panicked during evaluation")]
    RulePanicked { rule: RuleId },

    #[error("failed to read table {}: {source}", path.display())]
    Table {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
