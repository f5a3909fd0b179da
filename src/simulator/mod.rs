// src/simulator/mod.rs
// Live Simulator (LS, SPEC_FULL §4.7).

pub mod live_simulator;

pub use live_simulator::{LiveSimulator, OrderReceipt, OrderStatus, SimMode};
