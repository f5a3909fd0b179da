// src/market_data/venue_stream.rs
// In-memory VenueStream implementation, used by tests and as a reference
// wiring for embedders that don't yet have a real venue connection.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::capabilities::{RawTick, VenueStream};
use crate::errors::VenueStreamError;

/// Replays a fixed queue of ticks, then reports disconnection. Useful for
/// deterministic tests of the venue producer loop.
pub struct ReplayVenueStream {
    venue: String,
    queue: Mutex<std::collections::VecDeque<RawTick>>,
}

impl ReplayVenueStream {
    pub fn new(venue: impl Into<String>, ticks: Vec<RawTick>) -> Self {
        Self { venue: venue.into(), queue: Mutex::new(ticks.into()) }
    }
}

#[async_trait]
impl VenueStream for ReplayVenueStream {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn next_tick(&self) -> Result<RawTick, VenueStreamError> {
        let mut q = self.queue.lock().await;
        q.pop_front().ok_or_else(|| VenueStreamError::Disconnected(self.venue.clone()))
    }
}

/// Synthetic stream producing ticks around a mutable reference price, for
/// demos and for the live simulator's own synthetic-mode testing (SPEC_FULL
/// §4.7 "Non-goals: no live broker connectivity ships").
pub struct SyntheticVenueStream {
    venue: String,
    symbol: String,
    price: Arc<Mutex<f64>>,
}

impl SyntheticVenueStream {
    pub fn new(venue: impl Into<String>, symbol: impl Into<String>, start_price: f64) -> Self {
        Self { venue: venue.into(), symbol: symbol.into(), price: Arc::new(Mutex::new(start_price)) }
    }
}

#[async_trait]
impl VenueStream for SyntheticVenueStream {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn next_tick(&self) -> Result<RawTick, VenueStreamError> {
        let mut price = self.price.lock().await;
        let drift = (rand::random::<f64>() - 0.5) * 0.001 * *price;
        *price += drift;
        let mid = *price;
        let spread = mid * 0.0005;
        Ok(RawTick {
            symbol: self.symbol.clone(),
            ts: Utc::now(),
            bid: mid - spread / 2.0,
            ask: mid + spread / 2.0,
            last: mid,
            bid_size: 1.0,
            ask_size: 1.0,
            last_size: 1.0,
            volume_24h: 1_000_000.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_stream_exhausts_then_disconnects() {
        let stream = ReplayVenueStream::new(
            "binance",
            vec![RawTick {
                symbol: "BTC".into(),
                ts: Utc::now(),
                bid: 100.0,
                ask: 100.1,
                last: 100.05,
                bid_size: 1.0,
                ask_size: 1.0,
                last_size: 1.0,
                volume_24h: 1000.0,
            }],
        );
        assert!(stream.next_tick().await.is_ok());
        assert!(stream.next_tick().await.is_err());
    }
}
