// src/risk/manager.rs
// Risk Manager (RM, SPEC_FULL §4.6): pre-trade gate, periodic assessment,
// position monitoring, and automated violation responses. Generalizes the
// teacher's RiskGuard::evaluate (a single aggregate-risk-fraction cap) into
// five named fail-fast rules, keeping the "explain why, propose the size
// that would have passed" shape.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::capabilities::{RiskGate, RiskGateResult};
use crate::config::EngineConfig;
use crate::domain::{Position, PositionState, RiskViolation, ViolationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Green,
    Yellow,
    Orange,
    Red,
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub portfolio_value: f64,
    pub total_unrealized_pnl: f64,
    pub largest_position_pct: f64,
    pub current_drawdown: f64,
    pub effective_leverage: f64,
    pub value_at_risk_1d_99: f64,
    pub level: RiskLevel,
}

pub struct RiskManager {
    emergency_stop: Arc<AtomicBool>,
    peak_value: std::sync::Mutex<f64>,
}

impl RiskManager {
    pub fn new() -> Self {
        Self { emergency_stop: Arc::new(AtomicBool::new(false)), peak_value: std::sync::Mutex::new(0.0) }
    }

    pub fn emergency_stop_flag(&self) -> Arc<AtomicBool> {
        self.emergency_stop.clone()
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stop.load(Ordering::SeqCst)
    }

    /// One-shot, idempotent: repeated calls after the first are no-ops.
    pub fn trigger_emergency_stop(&self) -> bool {
        !self.emergency_stop.swap(true, Ordering::SeqCst)
    }

    /// Requires an explicit authorization token supplied out-of-band.
    pub fn clear_emergency_stop(&self, authorization_token: &str) -> bool {
        if authorization_token.is_empty() {
            return false;
        }
        self.emergency_stop.store(false, Ordering::SeqCst);
        true
    }

    /// Pre-trade fail-fast check, SPEC_FULL §4.6 five named rules.
    pub fn evaluate(
        &self,
        open_positions: &[Position],
        total_capital: f64,
        available_capital: f64,
        qty: f64,
        price: f64,
        cfg: &EngineConfig,
    ) -> RiskGateResult {
        let position_value = qty * price;

        if self.is_emergency_stopped() {
            return RiskGateResult {
                approved: false,
                max_allowed_qty: 0.0,
                rejection_reason: Some("emergency stop active".to_string()),
                warnings: Vec::new(),
                confidence: 1.0,
            };
        }

        if total_capital > 0.0 && position_value / total_capital > cfg.max_position_size_pct {
            let max_allowed_qty = (cfg.max_position_size_pct * total_capital / price.max(1e-9)).max(0.0);
            return RiskGateResult {
                approved: false,
                max_allowed_qty,
                rejection_reason: Some("position size exceeds max_position_size_pct".to_string()),
                warnings: Vec::new(),
                confidence: 1.0,
            };
        }

        if position_value > available_capital {
            let max_allowed_qty = (available_capital / price.max(1e-9)).max(0.0);
            return RiskGateResult {
                approved: false,
                max_allowed_qty,
                rejection_reason: Some("position value exceeds available capital".to_string()),
                warnings: Vec::new(),
                confidence: 1.0,
            };
        }

        if open_positions.len() >= cfg.max_concurrent_positions {
            return RiskGateResult {
                approved: false,
                max_allowed_qty: 0.0,
                rejection_reason: Some("max concurrent positions reached".to_string()),
                warnings: Vec::new(),
                confidence: 1.0,
            };
        }

        let current_exposure: f64 = open_positions.iter().map(|p| p.value_usd).sum();
        if total_capital > 0.0 && (current_exposure + position_value) / total_capital > cfg.max_portfolio_exposure_pct {
            let remaining = (cfg.max_portfolio_exposure_pct * total_capital - current_exposure).max(0.0);
            let max_allowed_qty = remaining / price.max(1e-9);
            return RiskGateResult {
                approved: false,
                max_allowed_qty,
                rejection_reason: Some("portfolio exposure cap exceeded".to_string()),
                warnings: Vec::new(),
                confidence: 1.0,
            };
        }

        RiskGateResult { approved: true, max_allowed_qty: qty, rejection_reason: None, warnings: Vec::new(), confidence: 1.0 }
    }

    /// Periodic real-time risk assessment (every 30s, SPEC_FULL §4.6).
    pub fn assess(&self, positions: &[Position], cash: f64, cfg: &EngineConfig) -> RiskAssessment {
        let portfolio_value = cash + positions.iter().map(|p| p.value_usd).sum::<f64>();
        let total_unrealized_pnl: f64 = positions.iter().map(|p| p.unrealized_pnl).sum();
        let largest_position_pct = positions
            .iter()
            .map(|p| p.weight(portfolio_value))
            .fold(0.0_f64, f64::max);

        let mut peak = self.peak_value.lock().unwrap();
        if portfolio_value > *peak {
            *peak = portfolio_value;
        }
        let current_drawdown = if *peak > 0.0 { (*peak - portfolio_value) / *peak } else { 0.0 };
        drop(peak);

        let invested: f64 = positions.iter().map(|p| p.value_usd).sum();
        let effective_leverage = if cash > 0.0 { invested / cash } else if invested > 0.0 { f64::INFINITY } else { 0.0 };

        let value_at_risk_1d_99 = portfolio_value * cfg.portfolio_daily_vol * 2.33;

        let level = if current_drawdown > cfg.max_drawdown_limit {
            RiskLevel::Red
        } else if current_drawdown > 0.8 * cfg.max_drawdown_limit || effective_leverage > 2.0 {
            RiskLevel::Orange
        } else if current_drawdown > 0.5 * cfg.max_drawdown_limit || largest_position_pct > 0.8 * cfg.max_position_size_pct {
            RiskLevel::Yellow
        } else {
            RiskLevel::Green
        };

        RiskAssessment {
            portfolio_value,
            total_unrealized_pnl,
            largest_position_pct,
            current_drawdown,
            effective_leverage,
            value_at_risk_1d_99,
            level,
        }
    }

    /// Position monitoring (every 10s): returns positions that crossed their
    /// stop-loss/take-profit and the exit reason.
    pub fn check_exits(&self, positions: &[Position]) -> Vec<(String, &'static str)> {
        positions
            .iter()
            .filter(|p| p.state == PositionState::Open)
            .filter_map(|p| {
                use crate::domain::Direction;
                let triggered = match p.direction {
                    Direction::Long => {
                        if p.current_price <= p.stop_loss {
                            Some("stop_loss")
                        } else if p.current_price >= p.take_profit {
                            Some("take_profit")
                        } else {
                            None
                        }
                    }
                    Direction::Short => {
                        if p.current_price >= p.stop_loss {
                            Some("stop_loss")
                        } else if p.current_price <= p.take_profit {
                            Some("take_profit")
                        } else {
                            None
                        }
                    }
                };
                triggered.map(|reason| (p.id.clone(), reason))
            })
            .collect()
    }

    /// Build a violation record + automated-response decision for an
    /// observed breach (SPEC_FULL §4.6 violation table). Triggers emergency
    /// stop as a side effect for `DrawdownLimit`.
    pub fn record_violation(
        &self,
        kind: ViolationKind,
        current_value: f64,
        limit_value: f64,
        affected_position_id: Option<String>,
    ) -> RiskViolation {
        let mut automated_actions = Vec::new();
        match kind {
            ViolationKind::DrawdownLimit => {
                if self.trigger_emergency_stop() {
                    automated_actions.push("emergency stop triggered".to_string());
                }
            }
            ViolationKind::VarLimit => {
                automated_actions.push("size-down suggested".to_string());
            }
            ViolationKind::TRSCompliance => {
                automated_actions.push("closing top-quartile riskiest positions".to_string());
            }
            ViolationKind::PositionTimeout => {
                automated_actions.push("closing position: timeout".to_string());
            }
            _ => {}
        }

        RiskViolation {
            id: Uuid::new_v4(),
            detected_at: Utc::now(),
            kind,
            severity: if limit_value > 0.0 { (current_value / limit_value).min(2.0) } else { 1.0 },
            current_value,
            limit_value,
            affected_position_id,
            resolved: false,
            automated_actions,
        }
    }

    pub fn position_timed_out(&self, position: &Position, now: DateTime<Utc>, timeout_secs: i64) -> bool {
        position.state == PositionState::Open && (now - position.opened_at).num_seconds() > timeout_secs
    }
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts `RiskManager::evaluate` to the `RiskGate` capability by pulling
/// the portfolio snapshot it needs through `PortfolioView` (SPEC_FULL §9).
pub struct RiskManagerGate {
    pub manager: Arc<RiskManager>,
    pub portfolio: Arc<dyn crate::capabilities::PortfolioView>,
    pub config: crate::config::ConfigHandle,
}

#[async_trait::async_trait]
impl RiskGate for RiskManagerGate {
    async fn evaluate(&self, _symbol: &str, qty: f64, price: f64, _is_long: bool) -> RiskGateResult {
        let snapshot = self.portfolio.snapshot().await;
        let cfg = self.config.load().await;
        self.manager.evaluate(&snapshot.positions, snapshot.total_value, snapshot.cash, qty, price, &cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use uuid::Uuid as DomainUuid;

    fn position(value_usd: f64, state: PositionState) -> Position {
        Position {
            id: "p1".into(),
            pair: "BTC/ETH".into(),
            opened_at: Utc::now(),
            direction: Direction::Long,
            size: 1.0,
            entry_price: 100.0,
            executed_price: 100.0,
            current_price: 100.0,
            value_usd,
            unrealized_pnl: 0.0,
            unrealized_return_pct: 0.0,
            stop_loss: 90.0,
            take_profit: 110.0,
            max_favorable_excursion: 0.0,
            max_adverse_excursion: 0.0,
            transaction_cost: 0.0,
            slippage: 0.0,
            signal_id_origin: DomainUuid::new_v4(),
            predicted_return: 0.0,
            state,
            closed_at: None,
            exit_reason: None,
            realized_pnl: None,
            holding_period: None,
        }
    }

    #[test]
    fn rejects_position_exceeding_size_pct() {
        let rm = RiskManager::new();
        let cfg = EngineConfig::default();
        let result = rm.evaluate(&[], 100_000.0, 100_000.0, 1000.0, 100.0, &cfg);
        assert!(!result.approved);
    }

    #[test]
    fn approves_within_limits() {
        let rm = RiskManager::new();
        let cfg = EngineConfig::default();
        let result = rm.evaluate(&[], 100_000.0, 100_000.0, 5.0, 100.0, &cfg);
        assert!(result.approved);
    }

    #[test]
    fn emergency_stop_is_idempotent() {
        let rm = RiskManager::new();
        assert!(rm.trigger_emergency_stop());
        assert!(!rm.trigger_emergency_stop());
        assert!(rm.is_emergency_stopped());
    }

    #[test]
    fn long_position_triggers_stop_loss() {
        let rm = RiskManager::new();
        let mut p = position(100.0, PositionState::Open);
        p.current_price = 85.0;
        let exits = rm.check_exits(&[p]);
        assert_eq!(exits[0].1, "stop_loss");
    }

    #[test]
    fn drawdown_breach_triggers_emergency_stop_violation() {
        let rm = RiskManager::new();
        let v = rm.record_violation(ViolationKind::DrawdownLimit, 0.15, 0.10, None);
        assert!(v.automated_actions.iter().any(|a| a.contains("emergency stop")));
        assert!(rm.is_emergency_stopped());
    }
}
