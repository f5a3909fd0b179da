// src/capabilities.rs
// Narrow, read-only capability traits per consumer (SPEC_FULL §9), replacing
// the source's raw back-pointer cycles (DE owning a signal generator and a
// data processor, LS owning everything). Components depend on these, not on
// concrete peers; wiring happens once in `engine::Engine::new`.
//
// Shaped directly on market_data::provider::{MarketDataProvider,
// MarketDataIngest} and their Arc<T> blanket impls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::{Decision, PortfolioContext, PredictionOutcomePair, PositionRecord, RiskViolation, Signal};
use crate::errors::{HistoricalStoreError, VenueStreamError};
use crate::historical_data::ohlcv::Ohlcv;

/// Read path for the Decision Engine and Live Simulator: current signals
/// available for a pair.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn latest_signal(&self, pair: &str) -> Option<Signal>;
}

/// Read-only snapshot of portfolio state, consumed by DE and RM. Never a
/// mutation path — LS is the only writer of positions (SPEC_FULL §3.2).
#[async_trait]
pub trait PortfolioView: Send + Sync {
    async fn snapshot(&self) -> PortfolioContext;
}

/// Live price lookups for position monitoring (RM) and fill simulation (LS).
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Option<f64>;
}

/// Pre-trade gate, consumed by LS before opening a position.
#[async_trait]
pub trait RiskGate: Send + Sync {
    async fn evaluate(&self, symbol: &str, qty: f64, price: f64, is_long: bool) -> RiskGateResult;
}

#[derive(Debug, Clone)]
pub struct RiskGateResult {
    pub approved: bool,
    pub max_allowed_qty: f64,
    pub rejection_reason: Option<String>,
    pub warnings: Vec<String>,
    pub confidence: f64,
}

/// Sink for the emitted events of SPEC_FULL §6.4 and the CV feedback loop.
/// The `Engine` composition root wires this to a `tokio::sync::broadcast`
/// channel; CV implements the outcome-pair half directly.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn record_position(&self, record: PositionRecord);
    async fn record_violation(&self, violation: RiskViolation);
    async fn record_decision(&self, decision: Decision);
    async fn push_outcome(&self, pair: PredictionOutcomePair);
}

/// SPEC_FULL §6.1: abstract per-venue tick stream. Authentication and
/// reconnection live outside this trait — a producer loop owns backoff, this
/// trait only ever needs to produce the next tick or fail.
#[async_trait]
pub trait VenueStream: Send + Sync {
    fn venue(&self) -> &str;
    async fn next_tick(&self) -> Result<RawTick, VenueStreamError>;
}

#[derive(Debug, Clone)]
pub struct RawTick {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub last_size: f64,
    pub volume_24h: f64,
}

/// SPEC_FULL §6.2: the external historical store contract.
#[async_trait]
pub trait HistoricalDataStore: Send + Sync {
    async fn fetch(
        &self,
        source: &str,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: &str,
    ) -> Result<Vec<Ohlcv>, HistoricalStoreError>;
}

// Blanket impls so Arc<dyn Trait> composition (the capability-injection
// pattern this whole module exists for) is seamless everywhere, mirroring
// market_data::provider's Arc<T> impls.

#[async_trait]
impl<T: SignalSource + ?Sized> SignalSource for Arc<T> {
    async fn latest_signal(&self, pair: &str) -> Option<Signal> {
        (**self).latest_signal(pair).await
    }
}

#[async_trait]
impl<T: PortfolioView + ?Sized> PortfolioView for Arc<T> {
    async fn snapshot(&self) -> PortfolioContext {
        (**self).snapshot().await
    }
}

#[async_trait]
impl<T: PriceSource + ?Sized> PriceSource for Arc<T> {
    async fn current_price(&self, symbol: &str) -> Option<f64> {
        (**self).current_price(symbol).await
    }
}

#[async_trait]
impl<T: RiskGate + ?Sized> RiskGate for Arc<T> {
    async fn evaluate(&self, symbol: &str, qty: f64, price: f64, is_long: bool) -> RiskGateResult {
        (**self).evaluate(symbol, qty, price, is_long).await
    }
}

#[async_trait]
impl<T: OutcomeSink + ?Sized> OutcomeSink for Arc<T> {
    async fn record_position(&self, record: PositionRecord) {
        (**self).record_position(record).await
    }
    async fn record_violation(&self, violation: RiskViolation) {
        (**self).record_violation(violation).await
    }
    async fn record_decision(&self, decision: Decision) {
        (**self).record_decision(decision).await
    }
    async fn push_outcome(&self, pair: PredictionOutcomePair) {
        (**self).push_outcome(pair).await
    }
}

#[async_trait]
impl<T: HistoricalDataStore + ?Sized> HistoricalDataStore for Arc<T> {
    async fn fetch(
        &self,
        source: &str,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: &str,
    ) -> Result<Vec<Ohlcv>, HistoricalStoreError> {
        (**self).fetch(source, symbol, start, end, timeframe).await
    }
}
