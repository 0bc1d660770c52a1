// src/strategy/mod.rs

pub mod compliance;
pub mod investment;
pub mod quantity;
pub mod rules;
pub mod traits;
