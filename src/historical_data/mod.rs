// src/historical_data/mod.rs
// Historical Data Adapter (HDA, SPEC_FULL §4.2).

pub mod adapter;
pub mod ohlcv;
pub mod store;

pub use adapter::{HistoricalDataAdapter, SourceConfig};
pub use ohlcv::{Ohlcv, QualityReport};
pub use store::InMemoryHistoricalStore;
