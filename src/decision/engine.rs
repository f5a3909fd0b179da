// src/decision/engine.rs
// Decision Engine (DE, SPEC_FULL §4.4): Signal x PortfolioContext -> Decision,
// with per-pair throttling, risk-adjusted strength, position sizing, and
// batch-level portfolio risk management.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rayon::prelude::*;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{Action, Decision, PortfolioContext, Position, Signal};

pub struct DecisionEngine {
    last_decision_ts: Arc<DashMap<String, DateTime<Utc>>>,
}

fn split_pair(pair: &str) -> (&str, &str) {
    match pair.split_once('/') {
        Some((b, q)) => (b, q),
        None => (pair, pair),
    }
}

fn position_risk(volatility: f64, data_quality: f64, size: f64, max_size: f64, spread: f64) -> f64 {
    let size_term = if max_size > 0.0 { size / max_size } else { 0.0 };
    (0.4 * volatility / 0.3 + 0.3 * (1.0 - data_quality) + 0.2 * size_term + 0.1 * if spread > 0.005 { 1.0 } else { 0.0 })
        .min(1.0)
}

fn correlation_risk(pair: &str, positions: &[Position], portfolio_value: f64) -> f64 {
    let (base, quote) = split_pair(pair);
    positions
        .iter()
        .map(|p| {
            let (pbase, pquote) = split_pair(&p.pair);
            let sim = if pbase == base || pquote == quote {
                0.7
            } else if pbase == quote || pquote == base {
                0.5
            } else {
                0.2
            };
            sim * p.weight(portfolio_value)
        })
        .fold(0.0_f64, f64::max)
}

impl DecisionEngine {
    pub fn new() -> Self {
        Self { last_decision_ts: Arc::new(DashMap::new()) }
    }

    fn throttled(&self, pair: &str, now: DateTime<Utc>, cooldown_secs: i64) -> bool {
        if let Some(last) = self.last_decision_ts.get(pair) {
            if (now - *last).num_seconds() < cooldown_secs {
                return true;
            }
        }
        false
    }

    /// Evaluate one Signal against the current portfolio snapshot.
    pub fn evaluate(&self, signal: &Signal, portfolio: &PortfolioContext, cfg: &EngineConfig) -> Decision {
        let now = Utc::now();
        if self.throttled(&signal.pair, now, cfg.decision_cooldown_secs) {
            return Decision::no_action(signal.pair.clone(), "too soon");
        }

        if signal.confidence < cfg.min_signal_confidence || signal.strength == 0.0 {
            return Decision::no_action(signal.pair.clone(), "signal below confidence threshold");
        }

        let mut adj = signal.strength * signal.data_quality;
        let freshness = 1.0; // freshness already folded into Signal quality upstream
        adj *= freshness;

        if signal.predicted_volatility > 0.2 {
            adj *= 0.8;
        }
        let base_rsi = signal.indicator_contributions.get("base_rsi").copied().unwrap_or(50.0);
        if base_rsi > 80.0 || base_rsi < 20.0 {
            adj *= 1.1;
        }
        let macd_histogram = signal.indicator_contributions.get("macd_histogram").copied().unwrap_or(0.0);
        if macd_histogram.abs() > 0.01 {
            adj *= 1.05;
        }
        adj = adj.clamp(-1.0, 1.0);

        let threshold_scale = cfg.min_confidence.max(signal.confidence).max(0.5);
        let action = if adj >= 0.8 * threshold_scale {
            Action::StrongBuy
        } else if adj >= 0.6 * threshold_scale {
            Action::Buy
        } else if adj <= -0.8 * threshold_scale {
            Action::StrongSell
        } else if adj <= -0.6 * threshold_scale {
            Action::Sell
        } else {
            Action::Hold
        };

        let mut reasons = signal.reasons.clone();

        let spread = 0.0; // caller supplies via signal-derived quality already
        let base = adj.abs() * cfg.max_position_size;
        let risk = position_risk(signal.predicted_volatility, signal.data_quality, base, cfg.max_position_size, spread);
        let corr_risk = correlation_risk(&signal.pair, &portfolio.positions, portfolio.total_value);
        if corr_risk > cfg.correlation_threshold {
            reasons.push("correlation risk elevated".to_string());
        }

        let mut sized = base * (1.0 - risk * 0.5);
        let cash_cap = if portfolio.total_value > 0.0 { portfolio.cash / portfolio.total_value * 0.8 } else { 0.0 };
        sized = sized.min(cash_cap.max(0.0));
        if cfg.volatility_scaling {
            sized *= (2.0_f64).min(0.15 / portfolio.volatility.max(0.05));
        }
        sized = sized.min(cfg.max_position_size);
        if corr_risk > cfg.correlation_threshold {
            sized *= 1.0 - corr_risk;
        }
        sized = sized.max(0.0);

        let mut factor_contributions = HashMap::new();
        factor_contributions.insert("technical".to_string(), 0.3);
        factor_contributions.insert("momentum".to_string(), 0.25);
        factor_contributions.insert("volatility".to_string(), 0.2);
        factor_contributions.insert("risk_adjustment".to_string(), 0.25);

        let required_cash = sized * portfolio.total_value;
        let demote = signal.confidence < cfg.min_signal_confidence
            || sized > cfg.max_position_size
            || risk > 0.9
            || (action.is_buy_family() && required_cash > portfolio.cash);

        if demote {
            return Decision::no_action(signal.pair.clone(), "failed validation gate");
        }

        self.last_decision_ts.insert(signal.pair.clone(), now);

        Decision {
            id: Uuid::new_v4(),
            pair: signal.pair.clone(),
            ts: now,
            action,
            recommended_weight: sized,
            confidence: signal.confidence,
            signal_strength: signal.strength,
            risk_adjusted_strength: adj,
            position_risk: risk,
            correlation_risk: corr_risk,
            portfolio_impact: sized,
            expected_return: signal.predicted_return,
            expected_volatility: signal.predicted_volatility,
            reasons,
            factor_contributions,
            recommended_holding_period: signal.horizon.clone(),
        }
    }

    /// Batch-level scaling and sector-exposure checks over many decisions,
    /// run via rayon since per-decision validation work is independent.
    pub fn validate_batch(&self, decisions: Vec<Decision>, sectors: &HashMap<String, String>, cfg: &EngineConfig) -> BatchResult {
        let total_weight: f64 = decisions.par_iter().map(|d| d.recommended_weight).sum();
        let mut warnings = Vec::new();

        let scale = if total_weight > 0.8 { 0.8 / total_weight } else { 1.0 };
        if scale < 1.0 {
            warnings.push(format!("aggregate weight {total_weight:.3} exceeds 0.8, scaled down"));
        }

        let mut sector_totals: HashMap<String, f64> = HashMap::new();
        let scaled: Vec<Decision> = decisions
            .into_par_iter()
            .map(|mut d| {
                d.recommended_weight *= scale;
                d
            })
            .collect();

        for d in &scaled {
            if let Some(sector) = sectors.get(&d.pair) {
                *sector_totals.entry(sector.clone()).or_insert(0.0) += d.recommended_weight;
            }
        }
        for (sector, total) in &sector_totals {
            if *total > cfg.max_sector_exposure {
                warnings.push(format!("sector {sector} exposure {total:.3} exceeds cap"));
            }
        }

        let batch_approved = warnings.len() < 3;
        BatchResult { decisions: scaled, warnings, batch_approved }
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BatchResult {
    pub decisions: Vec<Decision>,
    pub warnings: Vec<String>,
    pub batch_approved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MarketRegime;
    use std::collections::HashMap as Map;

    fn signal(strength: f64, confidence: f64) -> Signal {
        let mut s = Signal::no_action("BTC/ETH", "test");
        s.strength = strength;
        s.confidence = confidence;
        s.data_quality = 0.95;
        s.predicted_volatility = 0.05;
        s.regime = MarketRegime::Normal;
        s
    }

    fn portfolio(cash: f64, total_value: f64) -> PortfolioContext {
        PortfolioContext {
            total_value,
            cash,
            positions: Vec::new(),
            volatility: 0.1,
            var: 0.0,
            correlation: 0.0,
            sector_exposures: Map::new(),
            recent_returns_7d: 0.0,
            recent_returns_30d: 0.0,
            max_drawdown: 0.0,
        }
    }

    #[test]
    fn strong_positive_signal_yields_buy_family_action() {
        let de = DecisionEngine::new();
        let cfg = EngineConfig::default();
        let sig = signal(0.9, 0.9);
        let pf = portfolio(100_000.0, 100_000.0);
        let decision = de.evaluate(&sig, &pf, &cfg);
        assert!(matches!(decision.action, Action::StrongBuy | Action::Buy));
    }

    #[test]
    fn throttle_blocks_second_decision_within_cooldown() {
        let de = DecisionEngine::new();
        let cfg = EngineConfig::default();
        let sig = signal(0.9, 0.9);
        let pf = portfolio(100_000.0, 100_000.0);
        let first = de.evaluate(&sig, &pf, &cfg);
        assert!(!matches!(first.action, Action::NoAction));
        let second = de.evaluate(&sig, &pf, &cfg);
        assert!(matches!(second.action, Action::NoAction));
        assert_eq!(second.reasons[0], "too soon");
    }

    #[test]
    fn batch_scales_down_when_total_weight_exceeds_cap() {
        let de = DecisionEngine::new();
        let cfg = EngineConfig::default();
        let decisions = vec![
            Decision { recommended_weight: 0.5, ..Decision::no_action("A/B", "x") },
            Decision { recommended_weight: 0.5, ..Decision::no_action("C/D", "x") },
        ];
        let result = de.validate_batch(decisions, &Map::new(), &cfg);
        let total: f64 = result.decisions.iter().map(|d| d.recommended_weight).sum();
        assert!(total <= 0.8 + 1e-9);
        assert!(!result.warnings.is_empty());
    }
}
