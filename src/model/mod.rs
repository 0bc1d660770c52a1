// src/model/mod.rs

pub mod allocation;
pub mod period;
pub mod recommendation;
pub mod store;
