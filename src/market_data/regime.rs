// src/market_data/regime.rs
// Per-symbol regime classification over the recent tick window (SPEC_FULL
// §4.1). Distinct from the global macro regime: this only ever looks at one
// symbol's own tick history, never cross-asset correlation or dominance.

use serde::{Deserialize, Serialize};

use super::tick::Tick;
use crate::domain::MarketRegime;

const MIN_TICKS_FOR_CLASSIFICATION: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeClassification {
    pub regime: MarketRegime,
    pub confidence: f64,
}

fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Classify the regime implied by a window of recent ticks for one symbol.
pub fn classify(ticks: &[Tick]) -> RegimeClassification {
    if ticks.len() < MIN_TICKS_FOR_CLASSIFICATION {
        return RegimeClassification { regime: MarketRegime::Unknown, confidence: 0.0 };
    }

    let mids: Vec<f64> = ticks.iter().map(|t| t.mid()).collect();
    let returns: Vec<f64> = mids
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();

    let sigma = stdev(&returns);
    let first = *mids.first().unwrap();
    let last = *mids.last().unwrap();
    let trend = if first > 0.0 { (last - first).abs() / first } else { 0.0 };
    let avg_spread_bps = ticks.iter().map(|t| t.spread_bps()).sum::<f64>() / ticks.len() as f64;

    if sigma > 0.02 {
        RegimeClassification { regime: MarketRegime::Volatile, confidence: (sigma * 50.0).min(1.0) }
    } else if trend > 0.015 {
        RegimeClassification { regime: MarketRegime::Trending, confidence: (trend * 67.0).min(1.0) }
    } else if avg_spread_bps > 30.0 {
        RegimeClassification {
            regime: MarketRegime::Illiquid,
            confidence: ((avg_spread_bps - 10.0) / 40.0).clamp(0.0, 1.0),
        }
    } else if sigma < 0.005 && trend < 0.005 {
        RegimeClassification {
            regime: MarketRegime::Ranging,
            confidence: (1.0 - 200.0 * sigma.max(trend)).clamp(0.0, 1.0),
        }
    } else {
        RegimeClassification { regime: MarketRegime::Normal, confidence: 0.8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tick_with_mid(mid: f64) -> Tick {
        Tick {
            symbol: "BTC".into(),
            venue: "binance".into(),
            ts: Utc::now(),
            bid: mid - 0.01,
            ask: mid + 0.01,
            last: mid,
            bid_size: 1.0,
            ask_size: 1.0,
            volume_24h: 1000.0,
            quality: 1.0,
            latency_ms: 5.0,
            stale: false,
        }
    }

    #[test]
    fn too_few_ticks_yields_unknown() {
        let ticks: Vec<Tick> = (0..10).map(|_| tick_with_mid(100.0)).collect();
        let c = classify(&ticks);
        assert_eq!(c.regime, MarketRegime::Unknown);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn flat_prices_are_ranging() {
        let ticks: Vec<Tick> = (0..60).map(|_| tick_with_mid(100.0)).collect();
        let c = classify(&ticks);
        assert_eq!(c.regime, MarketRegime::Ranging);
    }

    #[test]
    fn strong_uptrend_is_trending() {
        let ticks: Vec<Tick> = (0..60).map(|i| tick_with_mid(100.0 + i as f64 * 0.1)).collect();
        let c = classify(&ticks);
        assert_eq!(c.regime, MarketRegime::Trending);
    }

    #[test]
    fn wide_swings_are_volatile() {
        let ticks: Vec<Tick> = (0..60)
            .map(|i| tick_with_mid(if i % 2 == 0 { 100.0 } else { 110.0 }))
            .collect();
        let c = classify(&ticks);
        assert_eq!(c.regime, MarketRegime::Volatile);
    }
}
