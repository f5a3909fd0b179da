// src/historical_data/store.rs
// In-memory HistoricalDataStore implementation for tests and as reference
// wiring for an embedder without a real historical data backend yet.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::capabilities::HistoricalDataStore;
use crate::errors::HistoricalStoreError;

use super::ohlcv::Ohlcv;

#[derive(Default)]
pub struct InMemoryHistoricalStore {
    series: Arc<RwLock<HashMap<(String, String), Vec<Ohlcv>>>>,
}

impl InMemoryHistoricalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, source: &str, symbol: &str, points: Vec<Ohlcv>) {
        self.series.write().await.insert((source.to_string(), symbol.to_string()), points);
    }
}

#[async_trait]
impl HistoricalDataStore for InMemoryHistoricalStore {
    async fn fetch(
        &self,
        source: &str,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _timeframe: &str,
    ) -> Result<Vec<Ohlcv>, HistoricalStoreError> {
        let series = self.series.read().await;
        match series.get(&(source.to_string(), symbol.to_string())) {
            Some(points) => Ok(points.iter().filter(|p| p.ts >= start && p.ts <= end).cloned().collect()),
            None => Err(HistoricalStoreError::NotFound { source: source.to_string(), symbol: symbol.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_series_is_returned_within_range() {
        let store = InMemoryHistoricalStore::new();
        let now = Utc::now();
        store
            .seed(
                "coingecko",
                "BTC",
                vec![Ohlcv {
                    ts: now,
                    symbol: "BTC".into(),
                    o: 100.0,
                    h: 101.0,
                    l: 99.0,
                    c: 100.5,
                    volume: 1000.0,
                    volume_usd: 100_500.0,
                    market_cap: 0.0,
                    source: "coingecko".into(),
                    quality: 1.0,
                    interpolated: false,
                    anomaly: false,
                }],
            )
            .await;

        let result = store
            .fetch("coingecko", "BTC", now - chrono::Duration::hours(1), now + chrono::Duration::hours(1), "1h")
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn unknown_source_symbol_yields_not_found() {
        let store = InMemoryHistoricalStore::new();
        let now = Utc::now();
        let result = store.fetch("unknown", "ETH", now, now, "1h").await;
        assert!(matches!(result, Err(HistoricalStoreError::NotFound { .. })));
    }
}
