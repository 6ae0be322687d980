// src/analysis/mod.rs
pub mod indicators;

pub use indicators::{compute_snapshot, MIN_CANDLES};
