// src/market_data/fabric.rs
// The Market Data Fabric composition: venue producer loops (one per venue,
// 10Hz+ as ticks arrive) feed per-(symbol, venue) ring buffers, and a single
// aggregator loop (10Hz) folds them into per-symbol AggregatedView + regime
// snapshots. Single-writer-per-resource throughout (SPEC_FULL §5): only the
// owning venue producer writes its own ring buffer and health entry; only
// the aggregator writes aggregates/regimes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::capabilities::VenueStream;
use crate::config::ConfigHandle;
use crate::metrics::Metrics;

use super::aggregator::{aggregate, AggregatedView};
use super::health::Health;
use super::regime::{classify, RegimeClassification};
use super::tick::{Tick, TickRingBuffer};

const AGGREGATOR_PERIOD: Duration = Duration::from_millis(100); // 10 Hz

pub struct MarketDataFabric {
    config: ConfigHandle,
    metrics: Metrics,
    running: Arc<AtomicBool>,

    ticks: Arc<DashMap<(String, String), TickRingBuffer>>,
    aggregates: Arc<DashMap<String, AggregatedView>>,
    regimes: Arc<DashMap<String, RegimeClassification>>,
    health: Arc<DashMap<String, Health>>,

    tick_tx: broadcast::Sender<Tick>,
    aggregate_tx: broadcast::Sender<AggregatedView>,
    error_tx: broadcast::Sender<String>,
}

impl MarketDataFabric {
    pub fn new(config: ConfigHandle, metrics: Metrics) -> Self {
        let (tick_tx, _) = broadcast::channel(1024);
        let (aggregate_tx, _) = broadcast::channel(256);
        let (error_tx, _) = broadcast::channel(256);
        Self {
            config,
            metrics,
            running: Arc::new(AtomicBool::new(true)),
            ticks: Arc::new(DashMap::new()),
            aggregates: Arc::new(DashMap::new()),
            regimes: Arc::new(DashMap::new()),
            health: Arc::new(DashMap::new()),
            tick_tx,
            aggregate_tx,
            error_tx,
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn on_tick(&self) -> broadcast::Receiver<Tick> {
        self.tick_tx.subscribe()
    }

    pub fn on_aggregate(&self) -> broadcast::Receiver<AggregatedView> {
        self.aggregate_tx.subscribe()
    }

    pub fn on_error(&self) -> broadcast::Receiver<String> {
        self.error_tx.subscribe()
    }

    pub fn latest_tick(&self, symbol: &str, venue: &str) -> Option<Tick> {
        self.ticks.get(&(symbol.to_string(), venue.to_string())).and_then(|b| b.latest())
    }

    pub fn recent_ticks(&self, symbol: &str, n: usize) -> Vec<Tick> {
        let mut merged: Vec<Tick> = self
            .ticks
            .iter()
            .filter(|entry| entry.key().0 == symbol)
            .flat_map(|entry| entry.value().recent(n))
            .collect();
        merged.sort_by_key(|t| t.ts);
        let len = merged.len();
        merged.split_off(len.saturating_sub(n))
    }

    pub fn aggregated(&self, symbol: &str) -> Option<AggregatedView> {
        self.aggregates.get(symbol).map(|v| v.value().clone())
    }

    pub fn regime(&self, symbol: &str) -> Option<RegimeClassification> {
        self.regimes.get(symbol).map(|v| v.value().clone())
    }

    pub fn health(&self, venue: &str) -> Option<Health> {
        self.health.get(venue).map(|v| v.value().clone())
    }

    /// True only if every venue the fabric has ever seen is currently
    /// healthy; an empty fabric (no venues yet) reports healthy.
    pub fn overall_health(&self) -> bool {
        self.health.iter().all(|entry| entry.value().healthy)
    }

    /// One producer loop per (venue, symbol list). Reconnects up to
    /// `reconnect_attempts` on stream failure, then gives up and marks the
    /// venue unhealthy (SPEC_FULL §4.1 failure semantics).
    pub fn spawn_venue_producer(
        &self,
        stream: Arc<dyn VenueStream>,
        symbols: Vec<String>,
    ) -> tokio::task::JoinHandle<()> {
        let venue = stream.venue().to_string();
        let ticks = self.ticks.clone();
        let health = self.health.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();
        let running = self.running.clone();
        let tick_tx = self.tick_tx.clone();
        let error_tx = self.error_tx.clone();

        health.insert(venue.clone(), Health::new(&venue, Utc::now()));
        for symbol in &symbols {
            ticks.entry((symbol.clone(), venue.clone())).or_insert_with(TickRingBuffer::new);
        }

        tokio::spawn(async move {
            let mut reconnects = 0u32;
            while running.load(Ordering::SeqCst) {
                match stream.next_tick().await {
                    Ok(raw) => {
                        let cfg = config.load().await;
                        let now = Utc::now();
                        let tick = Tick::from_raw(raw, &venue, now, &cfg);
                        metrics.record_tick(tick.stale);
                        if let Some(mut h) = health.get_mut(&venue) {
                            h.on_tick(tick.latency_ms, tick.quality, now);
                        }
                        let key = (tick.symbol.clone(), venue.clone());
                        ticks.entry(key).or_insert_with(TickRingBuffer::new).push(tick.clone());
                        let _ = tick_tx.send(tick);
                        reconnects = 0;
                    }
                    Err(err) => {
                        reconnects += 1;
                        if let Some(mut h) = health.get_mut(&venue) {
                            h.on_error(err.to_string());
                        }
                        let _ = error_tx.send(format!("venue {venue}: {err}"));
                        let max = config.load().await.reconnect_attempts;
                        if reconnects > max {
                            warn!(venue = %venue, "venue producer giving up after exhausting reconnect attempts");
                            if let Some(mut h) = health.get_mut(&venue) {
                                h.on_disconnect();
                            }
                            break;
                        }
                        if let Some(mut h) = health.get_mut(&venue) {
                            h.on_reconnect();
                        }
                        tokio::time::sleep(Duration::from_millis(200 * reconnects as u64)).await;
                    }
                }
            }
            info!(venue = %venue, "venue producer loop exited");
        })
    }

    /// The single aggregator loop: folds per-venue ring buffers into
    /// per-symbol AggregatedView + RegimeClassification at 10 Hz.
    pub fn spawn_aggregator_loop(&self, symbols: Vec<String>) -> tokio::task::JoinHandle<()> {
        let ticks = self.ticks.clone();
        let aggregates = self.aggregates.clone();
        let regimes = self.regimes.clone();
        let health = self.health.clone();
        let metrics = self.metrics.clone();
        let running = self.running.clone();
        let aggregate_tx = self.aggregate_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(AGGREGATOR_PERIOD);
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let now = Utc::now();
                for symbol in &symbols {
                    let symbol_ticks: Vec<Tick> = ticks
                        .iter()
                        .filter(|entry| {
                            entry.key().0 == *symbol
                                && health.get(&entry.key().1).map(|h| h.healthy).unwrap_or(true)
                        })
                        .flat_map(|entry| entry.value().recent(200))
                        .collect();

                    let view = aggregate(symbol, &symbol_ticks, now);
                    metrics.record_aggregation();
                    aggregates.insert(symbol.clone(), view.clone());
                    let _ = aggregate_tx.send(view);

                    let classification = classify(&symbol_ticks);
                    regimes.insert(symbol.clone(), classification);
                }
            }
        })
    }
}
