// src/main.rs
// Headless binary entry point: initializes structured logging, builds the
// `Engine` composition root, wires a seed set of historical sources and
// trading pairs, and runs until a shutdown signal arrives. No HTTP/CLI
// surface ships here (out of scope, SPEC_FULL §1).

mod capabilities;
mod config;
mod correlation;
mod decision;
mod domain;
mod engine;
mod errors;
mod historical_data;
mod market_data;
mod metrics;
mod risk;
mod signal;
mod simulator;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use config::EngineConfig;
use historical_data::InMemoryHistoricalStore;

const DEFAULT_PAIRS: &[&str] = &["BTC/ETH", "ETH/SOL", "BTC/SOL"];
const STARTING_CASH: f64 = 1_000_000.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = EngineConfig::default();
    let historical_store: Arc<dyn capabilities::HistoricalDataStore> = Arc::new(InMemoryHistoricalStore::new());
    let pairs: Vec<String> = DEFAULT_PAIRS.iter().map(|s| s.to_string()).collect();

    let engine = engine::Engine::new(config, historical_store, pairs, STARTING_CASH);
    engine.start();

    info!("engine running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    engine.stop();

    Ok(())
}
