// src/signal/generator.rs
// Signal Generator (SG, SPEC_FULL §4.3): composes sub-signals from MDF's
// aggregated view and HDA's history into a single Signal per pair.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::{MarketRegime, Signal};
use crate::historical_data::Ohlcv;
use crate::market_data::AggregatedView;

use super::indicators::{bollinger_bands, macd, rsi};

/// A pair under evaluation: base and quote each carry their own aggregated
/// view plus recent close history.
pub struct PairInput<'a> {
    pub pair: String,
    pub base_view: &'a AggregatedView,
    pub quote_view: &'a AggregatedView,
    pub base_closes: &'a [f64],
    pub quote_closes: &'a [f64],
    pub base_volumes: &'a [f64],
    pub ratio_history: &'a [f64],
}

/// Closed set of sub-signal producers, dispatched via `match` (SPEC_FULL §9)
/// rather than a trait object since the set is small and fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubSignalKind {
    Technical,
    Momentum,
    MeanReversion,
}

struct SubSignal {
    strength: f64,
    confidence: f64,
    reasons: Vec<String>,
    contributions: HashMap<String, f64>,
}

pub struct SignalGenerator;

impl SignalGenerator {
    pub fn new() -> Self {
        Self
    }

    fn produce(&self, kind: SubSignalKind, input: &PairInput, cfg: &EngineConfig) -> SubSignal {
        match kind {
            SubSignalKind::Technical => self.technical(input),
            SubSignalKind::Momentum => self.momentum(input, cfg),
            SubSignalKind::MeanReversion => self.mean_reversion(input),
        }
    }

    fn technical(&self, input: &PairInput) -> SubSignal {
        let mut strength = 0.0;
        let mut confidence = 0.3;
        let mut reasons = Vec::new();
        let mut contributions = HashMap::new();

        let base_rsi = rsi(input.base_closes, 14);
        let quote_rsi = rsi(input.quote_closes, 14);
        let rsi_divergence = (base_rsi - quote_rsi) / 100.0;
        strength += rsi_divergence.clamp(-1.0, 1.0) * 0.3;
        contributions.insert("rsi_divergence".to_string(), rsi_divergence);
        contributions.insert("base_rsi".to_string(), base_rsi);
        if base_rsi > 70.0 {
            reasons.push("RSI overbought".to_string());
        } else if base_rsi < 30.0 {
            reasons.push("RSI oversold".to_string());
        }

        let base_macd = macd(input.base_closes, 12, 26, 9);
        let macd_divergence = (base_macd.histogram / base_macd.macd_line.abs().max(1e-9)).clamp(-1.0, 1.0);
        strength += macd_divergence * 0.2;
        contributions.insert("macd_histogram".to_string(), base_macd.histogram);
        if base_macd.histogram > 0.0 {
            reasons.push("MACD bullish crossover".to_string());
        } else if base_macd.histogram < 0.0 {
            reasons.push("MACD bearish crossover".to_string());
        }

        let bb = bollinger_bands(input.base_closes, 20, 2.0);
        let bb_extreme = (bb.percent_b - 0.5) * 2.0;
        strength += bb_extreme.clamp(-1.0, 1.0) * 0.25;
        contributions.insert("bollinger_percent_b".to_string(), bb.percent_b);

        let volume_mean = if input.base_volumes.is_empty() {
            0.0
        } else {
            input.base_volumes.iter().sum::<f64>() / input.base_volumes.len() as f64
        };
        if let Some(&latest_volume) = input.base_volumes.last() {
            if volume_mean > 0.0 && latest_volume / volume_mean > 1.2 {
                strength *= 1.1;
                reasons.push("volume confirmation".to_string());
            }
        }

        confidence += (strength.abs()).min(0.5);
        SubSignal { strength: strength.clamp(-1.0, 1.0), confidence: confidence.clamp(0.0, 1.0), reasons, contributions }
    }

    fn momentum(&self, input: &PairInput, cfg: &EngineConfig) -> SubSignal {
        let min_points = cfg.min_history_days.max(1) as usize;
        if input.base_closes.len() < min_points || input.quote_closes.len() < min_points {
            return SubSignal {
                strength: 0.0,
                confidence: 0.0,
                reasons: vec!["insufficient history for momentum".to_string()],
                contributions: HashMap::new(),
            };
        }

        let ret = |closes: &[f64], lookback: usize| -> f64 {
            let n = closes.len();
            if n <= lookback || closes[n - 1 - lookback] == 0.0 {
                return 0.0;
            }
            (closes[n - 1] - closes[n - 1 - lookback]) / closes[n - 1 - lookback]
        };

        let base_24h = ret(input.base_closes, 1);
        let base_7d = ret(input.base_closes, 7.min(input.base_closes.len() - 1));
        let quote_24h = ret(input.quote_closes, 1);
        let quote_7d = ret(input.quote_closes, 7.min(input.quote_closes.len() - 1));

        let relative_24h = base_24h - quote_24h;
        let relative_7d = base_7d - quote_7d;
        let strength = (relative_24h * 0.4 + relative_7d * 0.6).clamp(-1.0, 1.0);

        let mut contributions = HashMap::new();
        contributions.insert("relative_24h".to_string(), relative_24h);
        contributions.insert("relative_7d".to_string(), relative_7d);

        SubSignal {
            strength,
            confidence: (strength.abs() * 2.0).min(0.9),
            reasons: vec!["relative momentum".to_string()],
            contributions,
        }
    }

    fn mean_reversion(&self, input: &PairInput) -> SubSignal {
        if input.ratio_history.len() < 2 {
            return SubSignal { strength: 0.0, confidence: 0.1, reasons: vec![], contributions: HashMap::new() };
        }
        let mean = input.ratio_history.iter().sum::<f64>() / input.ratio_history.len() as f64;
        let variance =
            input.ratio_history.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / input.ratio_history.len() as f64;
        let sigma_ratio = variance.sqrt();
        let current = *input.ratio_history.last().unwrap();
        let deviation = if mean != 0.0 { (current - mean) / mean } else { 0.0 };

        let strength = -(5.0 * deviation).tanh();
        let confidence = (-50.0 * sigma_ratio).exp().clamp(0.1, 0.95);

        let mut contributions = HashMap::new();
        contributions.insert("ratio_deviation".to_string(), deviation);

        SubSignal {
            strength,
            confidence,
            reasons: vec!["mean reversion on price ratio".to_string()],
            contributions,
        }
    }

    fn regime_adjustment(regime: MarketRegime, strength: f64) -> (f64, f64) {
        match regime {
            MarketRegime::Bull if strength > 0.0 => (1.1, 1.0),
            MarketRegime::Bear if strength > 0.0 => (0.8, 1.0),
            MarketRegime::Volatile => (0.8, 0.9),
            MarketRegime::Illiquid => (0.7, 0.85),
            MarketRegime::Crisis => (0.3, 0.5),
            MarketRegime::Trending => (1.1, 1.05),
            _ => (1.0, 1.0),
        }
    }

    /// Compose the three sub-signals into a single emitted Signal, applying
    /// the quality filter and regime adjustment of SPEC_FULL §4.3.
    pub fn generate(&self, input: &PairInput, regime: MarketRegime, cfg: &EngineConfig) -> Signal {
        let sub_signals =
            [SubSignalKind::Technical, SubSignalKind::Momentum, SubSignalKind::MeanReversion]
                .iter()
                .map(|k| self.produce(*k, input, cfg))
                .collect::<Vec<_>>();

        let confidence_sum: f64 = sub_signals.iter().map(|s| s.confidence).sum();
        if confidence_sum <= 0.0 {
            return Signal::no_action(input.pair.clone(), "no sub-signal carried confidence");
        }

        let mut strength = sub_signals.iter().map(|s| s.strength * s.confidence).sum::<f64>() / confidence_sum;
        let mut confidence = confidence_sum / sub_signals.len() as f64;

        let mut reasons = Vec::new();
        let mut indicator_contributions = HashMap::new();
        for s in &sub_signals {
            reasons.extend(s.reasons.clone());
            indicator_contributions.extend(s.contributions.clone());
        }

        let (strength_factor, confidence_factor) = Self::regime_adjustment(regime, strength);
        strength = (strength * strength_factor).clamp(-1.0, 1.0);
        confidence = (confidence * confidence_factor).clamp(0.0, 1.0);

        let data_quality = (input.base_view.consensus_quality + input.quote_view.consensus_quality) / 2.0;
        let latency_ms = 1000.0 * (1.0 - input.base_view.freshness.min(input.quote_view.freshness));
        let participating_venues = input.base_view.participating_venues.min(input.quote_view.participating_venues);

        if data_quality < cfg.min_data_quality {
            return Signal::no_action(input.pair.clone(), "data quality below threshold");
        }
        if latency_ms > cfg.max_data_latency_ms as f64 {
            return Signal::no_action(input.pair.clone(), "data latency above threshold");
        }
        if participating_venues < cfg.min_venues {
            return Signal::no_action(input.pair.clone(), "insufficient participating venues");
        }
        if confidence < cfg.min_confidence {
            return Signal::no_action(input.pair.clone(), "confidence below threshold");
        }

        Signal {
            id: Uuid::new_v4(),
            pair: input.pair.clone(),
            ts: Utc::now(),
            strength,
            confidence,
            predicted_return: strength * 0.02,
            predicted_volatility: (input.base_closes.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>()
                / input.base_closes.len().max(1) as f64)
                / input.base_closes.last().copied().unwrap_or(1.0).max(1e-9),
            horizon: "24h".to_string(),
            risk_score: 1.0 - confidence,
            data_quality,
            regime,
            reasons,
            indicator_contributions,
            is_live: true,
        }
    }
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self { rsi_period: 14, macd_fast: 12, macd_slow: 26, macd_signal: 9 }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterEvaluation {
    pub score: f64,
    pub rsi_contribution: f64,
    pub macd_contribution: f64,
}

/// A deterministic, backtest-free scoring of a candidate indicator
/// parameterization against historical closes. The only surface retained
/// from the broader strategy-optimizer family (search strategies over this
/// contract are out of scope, §4.3); nothing in this crate calls it
/// automatically.
pub fn evaluate_parameter_set(params: &IndicatorParams, history: &[Ohlcv]) -> ParameterEvaluation {
    let closes: Vec<f64> = history.iter().map(|p| p.c).collect();
    if closes.len() < params.macd_slow + params.macd_signal {
        return ParameterEvaluation { score: 0.0, rsi_contribution: 0.0, macd_contribution: 0.0 };
    }

    let r = rsi(&closes, params.rsi_period);
    let m = macd(&closes, params.macd_fast, params.macd_slow, params.macd_signal);

    let rsi_contribution = (r - 50.0).abs() / 50.0;
    let macd_contribution = m.histogram.abs() / closes.last().copied().unwrap_or(1.0).max(1e-9);

    ParameterEvaluation { score: (rsi_contribution + macd_contribution) / 2.0, rsi_contribution, macd_contribution }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::AggregatedView;
    use chrono::Utc;
    use std::collections::HashMap as Map;

    fn view(quality: f64, freshness: f64, venues: usize) -> AggregatedView {
        AggregatedView {
            symbol: "BTC".into(),
            ts: Utc::now(),
            best_bid: 100.0,
            best_bid_venue: None,
            best_ask: 100.1,
            best_ask_venue: None,
            consolidated_price: 100.05,
            total_volume_24h: 1_000_000.0,
            volume_by_venue: Map::new(),
            participating_venues: venues,
            consensus_quality: quality,
            freshness,
            spread_across_venues: 0.001,
            arbitrage_opportunity: false,
        }
    }

    #[test]
    fn low_quality_yields_no_action() {
        let gen = SignalGenerator::new();
        let cfg = EngineConfig::default();
        let base_view = view(0.2, 1.0, 2);
        let quote_view = view(0.2, 1.0, 2);
        let closes = vec![100.0; 40];
        let input = PairInput {
            pair: "BTC/ETH".into(),
            base_view: &base_view,
            quote_view: &quote_view,
            base_closes: &closes,
            quote_closes: &closes,
            base_volumes: &closes,
            ratio_history: &closes,
        };
        let signal = gen.generate(&input, MarketRegime::Normal, &cfg);
        assert_eq!(signal.strength, 0.0);
        assert!(signal.reasons.iter().any(|r| r.contains("quality")));
    }

    #[test]
    fn crisis_regime_dampens_strength() {
        let gen = SignalGenerator::new();
        let cfg = EngineConfig::default();
        let base_view = view(0.95, 1.0, 3);
        let quote_view = view(0.95, 1.0, 3);
        let base_closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.5).collect();
        let quote_closes: Vec<f64> = vec![100.0; 40];
        let ratio: Vec<f64> = base_closes.iter().zip(&quote_closes).map(|(b, q)| b / q).collect();
        let input = PairInput {
            pair: "BTC/ETH".into(),
            base_view: &base_view,
            quote_view: &quote_view,
            base_closes: &base_closes,
            quote_closes: &quote_closes,
            base_volumes: &base_closes,
            ratio_history: &ratio,
        };
        let normal = gen.generate(&input, MarketRegime::Normal, &cfg);
        let crisis = gen.generate(&input, MarketRegime::Crisis, &cfg);
        assert!(crisis.strength.abs() <= normal.strength.abs() + 1e-9);
    }

    #[test]
    fn evaluate_parameter_set_is_deterministic() {
        let history: Vec<Ohlcv> = (0..60)
            .map(|i| Ohlcv {
                ts: Utc::now(),
                symbol: "BTC".into(),
                o: 100.0,
                h: 101.0,
                l: 99.0,
                c: 100.0 + (i as f64 * 0.2),
                volume: 1000.0,
                volume_usd: 100_000.0,
                market_cap: 0.0,
                source: "coingecko".into(),
                quality: 1.0,
                interpolated: false,
                anomaly: false,
            })
            .collect();
        let params = IndicatorParams::default();
        let a = evaluate_parameter_set(&params, &history);
        let b = evaluate_parameter_set(&params, &history);
        assert_eq!(a.score, b.score);
    }
}
