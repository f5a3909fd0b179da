// src/risk/mod.rs
// Risk Manager (RM, SPEC_FULL §4.6).

pub mod manager;

pub use manager::{RiskAssessment, RiskLevel, RiskManager, RiskManagerGate};
