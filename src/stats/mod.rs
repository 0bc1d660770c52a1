// src/stats/mod.rs

pub mod classifier;
pub mod cohort;
