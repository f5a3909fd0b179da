// src/market_data/mod.rs
// Market Data Fabric (MDF, SPEC_FULL §4.1).

pub mod aggregator;
pub mod fabric;
pub mod health;
pub mod regime;
pub mod tick;
pub mod venue_stream;

pub use aggregator::AggregatedView;
pub use fabric::MarketDataFabric;
pub use health::Health;
pub use regime::RegimeClassification;
pub use tick::{Tick, TickRingBuffer};
