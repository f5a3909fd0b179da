// src/decision/mod.rs
// Decision Engine (DE, SPEC_FULL §4.4).

pub mod engine;

pub use engine::{BatchResult, DecisionEngine};
