// src/engine.rs
// Composition root (SPEC_FULL §2, §9): builds every subsystem, wires the
// narrow capability traits between them, spawns the §5 cooperative loop
// set, and owns the `running` atomic plus the `ConfigHandle`. Generalizes
// the teacher's single `main.rs` binary wiring every engine into one
// `warp` app into a headless cooperative-loop host with no HTTP surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::capabilities::{HistoricalDataStore, OutcomeSink, PortfolioView, PriceSource, RiskGate, SignalSource, VenueStream};
use crate::config::{ConfigHandle, EngineConfig};
use crate::correlation::CorrelationValidator;
use crate::decision::DecisionEngine;
use crate::domain::{Decision, MarketRegime, PortfolioContext, PositionRecord, PredictionOutcomePair, RiskViolation, Signal, ViolationKind};
use crate::historical_data::HistoricalDataAdapter;
use crate::market_data::MarketDataFabric;
use crate::market_data::venue_stream::SyntheticVenueStream;
use crate::metrics::Metrics;
use crate::risk::{RiskManager, RiskManagerGate};
use crate::signal::generator::{PairInput, SignalGenerator};

fn split_pair(pair: &str) -> (&str, &str) {
    pair.split_once('/').unwrap_or((pair, pair))
}

fn empty_portfolio() -> PortfolioContext {
    PortfolioContext {
        total_value: 0.0,
        cash: 0.0,
        positions: Vec::new(),
        volatility: 0.1,
        var: 0.0,
        correlation: 0.0,
        sector_exposures: HashMap::new(),
        recent_returns_7d: 0.0,
        recent_returns_30d: 0.0,
        max_drawdown: 0.0,
    }
}

/// Adapts the signal cache (filled by `Engine`'s periodic signal loop) to
/// the `SignalSource` capability LS and DE consume.
struct CachedSignalSource {
    cache: Arc<DashMap<String, Signal>>,
}

#[async_trait]
impl SignalSource for CachedSignalSource {
    async fn latest_signal(&self, pair: &str) -> Option<Signal> {
        self.cache.get(pair).map(|s| s.value().clone())
    }
}

/// A pair's price is the ratio of its two legs' consolidated prices.
struct FabricPriceSource {
    fabric: Arc<MarketDataFabric>,
}

#[async_trait]
impl PriceSource for FabricPriceSource {
    async fn current_price(&self, pair: &str) -> Option<f64> {
        let (base, quote) = split_pair(pair);
        let base_view = self.fabric.aggregated(base)?;
        let quote_view = self.fabric.aggregated(quote)?;
        if quote_view.consolidated_price <= 0.0 {
            return None;
        }
        Some(base_view.consolidated_price / quote_view.consolidated_price)
    }
}

/// Read-only view of LS's position registry via a weak reference, so the
/// `RiskGate` the simulator is constructed with can observe the very
/// simulator it is wired into without an ownership cycle (SPEC_FULL §9:
/// "components depend on capabilities, not on concrete peers").
struct WeakSimulatorPortfolioView {
    simulator: Weak<crate::simulator::LiveSimulator>,
}

#[async_trait]
impl PortfolioView for WeakSimulatorPortfolioView {
    async fn snapshot(&self) -> PortfolioContext {
        match self.simulator.upgrade() {
            Some(sim) => sim.snapshot_portfolio().await,
            None => empty_portfolio(),
        }
    }
}

/// Fans outcome events out to the broadcast channels an embedder subscribes
/// to, and feeds realized prediction/outcome pairs into CV (SPEC_FULL §6.4).
struct EngineOutcomeSink {
    validator: Arc<CorrelationValidator>,
    metrics: Metrics,
    position_tx: broadcast::Sender<PositionRecord>,
    violation_tx: broadcast::Sender<RiskViolation>,
    decision_tx: broadcast::Sender<Decision>,
}

#[async_trait]
impl OutcomeSink for EngineOutcomeSink {
    async fn record_position(&self, record: PositionRecord) {
        let _ = self.position_tx.send(record);
    }

    async fn record_violation(&self, violation: RiskViolation) {
        self.metrics.record_violation();
        let _ = self.violation_tx.send(violation);
    }

    async fn record_decision(&self, decision: Decision) {
        self.metrics.record_decision(decision.action);
        let _ = self.decision_tx.send(decision);
    }

    async fn push_outcome(&self, pair: PredictionOutcomePair) {
        self.validator.push_outcome(pair).await;
    }
}

pub struct Engine {
    pub config: ConfigHandle,
    pub metrics: Metrics,
    pub fabric: Arc<MarketDataFabric>,
    pub historical: Arc<HistoricalDataAdapter>,
    pub correlation: Arc<CorrelationValidator>,
    pub risk_manager: Arc<RiskManager>,
    pub simulator: Arc<crate::simulator::LiveSimulator>,
    decision_engine: Arc<DecisionEngine>,
    signal_generator: Arc<SignalGenerator>,
    signal_cache: Arc<DashMap<String, Signal>>,
    pairs: Vec<String>,
    running: Arc<AtomicBool>,
    outcome_sink: Arc<dyn OutcomeSink>,
    handles: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    /// Builds every subsystem and wires the capability graph. Does not
    /// spawn any loop; call `start` once construction-time configuration
    /// (venues, historical sources) is complete.
    pub fn new(config: EngineConfig, historical_store: Arc<dyn HistoricalDataStore>, pairs: Vec<String>, starting_cash: f64) -> Arc<Self> {
        let config = ConfigHandle::new(config);
        let metrics = Metrics::new();
        let fabric = Arc::new(MarketDataFabric::new(config.clone(), metrics.clone()));
        let historical = Arc::new(HistoricalDataAdapter::new(historical_store, config.clone()));
        let correlation = Arc::new(CorrelationValidator::new());
        let risk_manager = Arc::new(RiskManager::new());
        let decision_engine = Arc::new(DecisionEngine::new());
        let signal_generator = Arc::new(SignalGenerator::new());
        let signal_cache: Arc<DashMap<String, Signal>> = Arc::new(DashMap::new());

        let (position_tx, _) = broadcast::channel(256);
        let (violation_tx, _) = broadcast::channel(256);
        let (decision_tx, _) = broadcast::channel(256);

        let signal_source: Arc<dyn SignalSource> = Arc::new(CachedSignalSource { cache: signal_cache.clone() });
        let price_source: Arc<dyn PriceSource> = Arc::new(FabricPriceSource { fabric: fabric.clone() });
        let outcome_sink: Arc<dyn OutcomeSink> = Arc::new(EngineOutcomeSink {
            validator: correlation.clone(),
            metrics: metrics.clone(),
            position_tx,
            violation_tx,
            decision_tx,
        });

        // LiveSimulator's RiskGate needs a PortfolioView over the simulator
        // itself; `Arc::new_cyclic` lets the gate hold a `Weak` back-edge
        // resolved once construction finishes, mirroring how the teacher's
        // execution/risk-guard pair resolve their own cyclic references.
        let risk_manager_for_gate = risk_manager.clone();
        let config_for_gate = config.clone();
        let simulator = Arc::new_cyclic(|weak: &Weak<crate::simulator::LiveSimulator>| {
            let portfolio_view: Arc<dyn PortfolioView> = Arc::new(WeakSimulatorPortfolioView { simulator: weak.clone() });
            let risk_gate: Arc<dyn RiskGate> = Arc::new(RiskManagerGate {
                manager: risk_manager_for_gate,
                portfolio: portfolio_view,
                config: config_for_gate,
            });
            crate::simulator::LiveSimulator::new(
                signal_source,
                risk_gate,
                price_source,
                outcome_sink.clone(),
                config.clone(),
                metrics.clone(),
                starting_cash,
                risk_manager.emergency_stop_flag(),
            )
        });

        Arc::new(Self {
            config,
            metrics,
            fabric,
            historical,
            correlation,
            risk_manager,
            simulator,
            decision_engine,
            signal_generator,
            signal_cache,
            pairs,
            running: Arc::new(AtomicBool::new(true)),
            outcome_sink,
            handles: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn unique_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.pairs.iter().flat_map(|p| {
            let (b, q) = split_pair(p);
            vec![b.to_string(), q.to_string()]
        }).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Spawns the full §5 loop set: MDF venue producers + aggregator, the SG
    /// signal-refresh loop, LS main + portfolio-snapshot loops, and RM's
    /// assessment/position-monitor/compliance loops. Synthetic venue
    /// streams stand in for the out-of-scope live exchange connectivity
    /// (§1 Non-goals); anything implementing `VenueStream` can be spawned
    /// in its place via `spawn_custom_venue`.
    pub fn start(self: &Arc<Self>) {
        let symbols = self.unique_symbols();
        for symbol in &symbols {
            let stream = Arc::new(SyntheticVenueStream::new("synthetic-1", symbol.clone(), 100.0));
            self.fabric.spawn_venue_producer(stream, vec![symbol.clone()]);
        }
        self.fabric.spawn_aggregator_loop(symbols.clone());

        self.spawn_signal_loop();
        self.spawn_simulator_main_loop();
        self.spawn_simulator_snapshot_loop();
        self.spawn_risk_assessment_loop();
        self.spawn_risk_position_monitor_loop();
        self.spawn_risk_compliance_loop();

        info!(pairs = ?self.pairs, "engine started");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.fabric.stop();
        for handle in self.handles.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Registers a venue stream beyond the synthetic defaults `start` wires
    /// in (e.g. a `ReplayVenueStream` for backtesting against recorded
    /// ticks).
    pub fn spawn_custom_venue(&self, stream: Arc<dyn VenueStream>, symbols: Vec<String>) {
        self.fabric.spawn_venue_producer(stream, symbols);
    }

    #[instrument(skip(self))]
    fn spawn_signal_loop(self: &Arc<Self>) {
        let engine = self.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(1_000));
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                engine.refresh_signals().await;
            }
        });
        self.handles.lock().unwrap().push(handle);
    }

    /// One signal-generation pass over every configured pair: builds a
    /// `PairInput` from the fabric's current aggregated views and recent
    /// tick history, runs `SignalGenerator::generate`, caches the result
    /// for LS, and separately runs `DecisionEngine::evaluate` against the
    /// simulator's live portfolio purely for the decision/rationale audit
    /// trail emitted through `OutcomeSink::record_decision` — §4.7's main
    /// cycle pulls raw signals directly (SG has no `DecisionSource`
    /// capability in §9), so DE's sizing here never gates LS's own trades.
    async fn refresh_signals(&self) {
        let cfg = self.config.load().await;
        for pair in &self.pairs {
            let (base, quote) = split_pair(pair);
            let (Some(base_view), Some(quote_view)) = (self.fabric.aggregated(base), self.fabric.aggregated(quote)) else {
                continue;
            };

            let base_ticks = self.fabric.recent_ticks(base, 200);
            let quote_ticks = self.fabric.recent_ticks(quote, 200);
            let base_closes: Vec<f64> = base_ticks.iter().map(|t| t.last).collect();
            let quote_closes: Vec<f64> = quote_ticks.iter().map(|t| t.last).collect();
            let base_volumes: Vec<f64> = base_ticks.iter().map(|t| t.volume_24h).collect();
            let ratio_history: Vec<f64> = base_closes
                .iter()
                .zip(quote_closes.iter())
                .filter(|(_, q)| **q > 0.0)
                .map(|(b, q)| b / q)
                .collect();

            let input = PairInput {
                pair: pair.clone(),
                base_view: &base_view,
                quote_view: &quote_view,
                base_closes: &base_closes,
                quote_closes: &quote_closes,
                base_volumes: &base_volumes,
                ratio_history: &ratio_history,
            };

            let regime = self.fabric.regime(base).map(|r| r.regime).unwrap_or(MarketRegime::Unknown);
            let signal = self.signal_generator.generate(&input, regime, &cfg);
            self.metrics.record_signal(signal.confidence > 0.0);
            self.signal_cache.insert(pair.clone(), signal.clone());

            let portfolio = self.simulator.snapshot_portfolio().await;
            let decision = self.decision_engine.evaluate(&signal, &portfolio, &cfg);
            self.outcome_sink.record_decision(decision).await;
        }
    }

    fn spawn_simulator_main_loop(self: &Arc<Self>) {
        let simulator = self.simulator.clone();
        let config = self.config.clone();
        let pairs = self.pairs.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let cfg = config.load().await;
                let period_ms = (1_000.0 / (2.0 * cfg.acceleration_factor.max(0.01))).max(5.0) as u64;
                tokio::time::sleep(Duration::from_millis(period_ms)).await;
                simulator.run_cycle(&pairs).await;
            }
        });
        self.handles.lock().unwrap().push(handle);
    }

    fn spawn_simulator_snapshot_loop(self: &Arc<Self>) {
        let simulator = self.simulator.clone();
        let correlation = self.correlation.clone();
        let pairs = self.pairs.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let trs_status = if let Some(first_pair) = pairs.first() {
                    let cfg_default = crate::config::EngineConfig::default();
                    correlation
                        .status(first_pair, &cfg_default)
                        .await
                        .map(|r| r.trs_status)
                        .unwrap_or(crate::domain::TrsStatus::InsufficientData)
                } else {
                    crate::domain::TrsStatus::InsufficientData
                };
                let snapshot = simulator.portfolio_snapshot(trs_status).await;
                info!(portfolio_value = snapshot.portfolio_value, open = snapshot.open_count, "portfolio snapshot");
            }
        });
        self.handles.lock().unwrap().push(handle);
    }

    fn spawn_risk_assessment_loop(self: &Arc<Self>) {
        let simulator = self.simulator.clone();
        let risk_manager = self.risk_manager.clone();
        let config = self.config.clone();
        let outcome_sink = self.outcome_sink.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let cfg = config.load().await;
                let portfolio = simulator.snapshot_portfolio().await;
                let assessment = risk_manager.assess(&portfolio.positions, portfolio.cash, &cfg);
                if assessment.level == crate::risk::RiskLevel::Red {
                    let violation = risk_manager.record_violation(
                        ViolationKind::DrawdownLimit,
                        assessment.current_drawdown,
                        cfg.max_drawdown_limit,
                        None,
                    );
                    outcome_sink.record_violation(violation).await;
                    warn!(drawdown = assessment.current_drawdown, "risk assessment triggered emergency stop");
                }
            }
        });
        self.handles.lock().unwrap().push(handle);
    }

    fn spawn_risk_position_monitor_loop(self: &Arc<Self>) {
        let simulator = self.simulator.clone();
        let risk_manager = self.risk_manager.clone();
        let config = self.config.clone();
        let outcome_sink = self.outcome_sink.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let cfg = config.load().await;
                let portfolio = simulator.snapshot_portfolio().await;
                let now = chrono::Utc::now();
                for position in &portfolio.positions {
                    if risk_manager.position_timed_out(position, now, cfg.position_timeout_secs) {
                        let violation = risk_manager.record_violation(
                            ViolationKind::PositionTimeout,
                            (now - position.opened_at).num_seconds() as f64,
                            cfg.position_timeout_secs as f64,
                            Some(position.id.clone()),
                        );
                        outcome_sink.record_violation(violation).await;
                        simulator.close_position(&position.id, "timeout", &cfg).await;
                    }
                }
            }
        });
        self.handles.lock().unwrap().push(handle);
    }

    fn spawn_risk_compliance_loop(self: &Arc<Self>) {
        let correlation = self.correlation.clone();
        let risk_manager = self.risk_manager.clone();
        let config = self.config.clone();
        let outcome_sink = self.outcome_sink.clone();
        let pairs = self.pairs.clone();
        let simulator = self.simulator.clone();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let cfg = config.load().await;
                for pair in &pairs {
                    let Some(result) = correlation.status(pair, &cfg).await else { continue };
                    if matches!(result.trs_status, crate::domain::TrsStatus::Critical | crate::domain::TrsStatus::Failed) {
                        let violation = risk_manager.record_violation(
                            ViolationKind::TRSCompliance,
                            result.coefficient,
                            cfg.trs_target_correlation,
                            None,
                        );
                        outcome_sink.record_violation(violation).await;

                        let portfolio = simulator.snapshot_portfolio().await;
                        if let Some(riskiest) = portfolio
                            .positions
                            .iter()
                            .filter(|p| p.pair == *pair)
                            .max_by(|a, b| a.max_adverse_excursion.abs().partial_cmp(&b.max_adverse_excursion.abs()).unwrap_or(std::cmp::Ordering::Equal))
                        {
                            simulator.close_position(&riskiest.id, "trs_compliance", &cfg).await;
                        }
                    }
                }
            }
        });
        self.handles.lock().unwrap().push(handle);
    }
}
