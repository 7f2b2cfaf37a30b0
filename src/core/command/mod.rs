// src/core/command/mod.rs

pub mod classify;
pub mod coalesce;

pub use classify::{CommandClass, classify, extract_keys};
pub use coalesce::CoalescePolicy;
