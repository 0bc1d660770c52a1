// src/pipeline/mod.rs

pub mod config;
pub mod consolidate;
pub mod engine;
pub mod runner;
