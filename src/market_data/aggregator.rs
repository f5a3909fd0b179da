// src/market_data/aggregator.rs
// Cross-venue aggregation cycle (SPEC_FULL §4.1), run at 10 Hz by the single
// aggregator loop. AggregatedView is the copy-on-read output readers get;
// the map itself lives behind a DashMap so the aggregator is the sole writer
// per symbol while SG/LS/RM read freely (§5 resource table).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tick::Tick;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedView {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub best_bid: f64,
    pub best_bid_venue: Option<String>,
    pub best_ask: f64,
    pub best_ask_venue: Option<String>,
    pub consolidated_price: f64,
    pub total_volume_24h: f64,
    pub volume_by_venue: HashMap<String, f64>,
    pub participating_venues: usize,
    pub consensus_quality: f64,
    pub freshness: f64,
    pub spread_across_venues: f64,
    pub arbitrage_opportunity: bool,
}

impl AggregatedView {
    /// Returned when every venue for a symbol has gone unhealthy: the last
    /// known view, marked unusable via freshness=0 (SPEC_FULL §4.1 failure
    /// semantics).
    pub fn stale_fallback(mut last_known: AggregatedView) -> AggregatedView {
        last_known.freshness = 0.0;
        last_known
    }

    fn empty(symbol: &str, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            ts: now,
            best_bid: 0.0,
            best_bid_venue: None,
            best_ask: 0.0,
            best_ask_venue: None,
            consolidated_price: 0.0,
            total_volume_24h: 0.0,
            volume_by_venue: HashMap::new(),
            participating_venues: 0,
            consensus_quality: 0.0,
            freshness: 0.0,
            spread_across_venues: 0.0,
            arbitrage_opportunity: false,
        }
    }
}

/// One aggregation cycle over the ticks currently buffered for `symbol`
/// across all healthy venues.
pub fn aggregate(symbol: &str, ticks: &[Tick], now: DateTime<Utc>) -> AggregatedView {
    let non_stale: Vec<&Tick> = ticks.iter().filter(|t| !t.stale).collect();
    if non_stale.is_empty() {
        return AggregatedView::empty(symbol, now);
    }

    let quality_bids: Vec<&Tick> = non_stale.iter().filter(|t| t.quality > 0.7).copied().collect();
    let (best_bid, best_bid_venue) = quality_bids
        .iter()
        .max_by(|a, b| a.bid.partial_cmp(&b.bid).unwrap_or(std::cmp::Ordering::Equal))
        .map(|t| (t.bid, Some(t.venue.clone())))
        .unwrap_or((0.0, None));
    let (best_ask, best_ask_venue) = quality_bids
        .iter()
        .min_by(|a, b| a.ask.partial_cmp(&b.ask).unwrap_or(std::cmp::Ordering::Equal))
        .map(|t| (t.ask, Some(t.venue.clone())))
        .unwrap_or((0.0, None));

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut volume_by_venue: HashMap<String, f64> = HashMap::new();
    let mut total_volume_24h = 0.0;
    let mut quality_sum = 0.0;
    let mut mids: Vec<f64> = Vec::with_capacity(non_stale.len());
    let mut oldest_ts = now;

    for tick in &non_stale {
        let mid = tick.mid();
        mids.push(mid);
        let w = tick.volume_24h * tick.quality;
        weighted_sum += mid * w;
        weight_total += w;
        *volume_by_venue.entry(tick.venue.clone()).or_insert(0.0) += tick.volume_24h;
        total_volume_24h += tick.volume_24h;
        quality_sum += tick.quality;
        if tick.ts < oldest_ts {
            oldest_ts = tick.ts;
        }
    }

    let consolidated_price = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        (best_bid + best_ask) / 2.0
    };

    let consensus_quality = quality_sum / non_stale.len() as f64;
    let age_ms = (now - oldest_ts).num_milliseconds().max(0) as f64;
    let freshness = (1.0 - age_ms / 5000.0).clamp(0.0, 1.0);

    let spread_across_venues = if consolidated_price > 0.0 {
        let max_mid = mids.iter().cloned().fold(f64::MIN, f64::max);
        let min_mid = mids.iter().cloned().fold(f64::MAX, f64::min);
        (max_mid - min_mid) / consolidated_price
    } else {
        0.0
    };
    let arbitrage_opportunity = spread_across_venues > 0.005;

    AggregatedView {
        symbol: symbol.to_string(),
        ts: now,
        best_bid,
        best_bid_venue,
        best_ask,
        best_ask_venue,
        consolidated_price,
        total_volume_24h,
        volume_by_venue,
        participating_venues: non_stale.iter().map(|t| t.venue.clone()).collect::<std::collections::HashSet<_>>().len(),
        consensus_quality,
        freshness,
        spread_across_venues,
        arbitrage_opportunity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(venue: &str, bid: f64, ask: f64, quality: f64, volume: f64) -> Tick {
        Tick {
            symbol: "BTC".into(),
            venue: venue.into(),
            ts: Utc::now(),
            bid,
            ask,
            last: (bid + ask) / 2.0,
            bid_size: 1.0,
            ask_size: 1.0,
            volume_24h: volume,
            quality,
            latency_ms: 10.0,
            stale: false,
        }
    }

    #[test]
    fn consolidated_price_is_volume_quality_weighted() {
        let ticks = vec![
            tick("binance", 100.0, 100.1, 1.0, 1000.0),
            tick("coinbase", 101.0, 101.1, 1.0, 3000.0),
        ];
        let view = aggregate("BTC", &ticks, Utc::now());
        // coinbase mid=101.05 weight 3000, binance mid=100.05 weight 1000
        let expected = (100.05 * 1000.0 + 101.05 * 3000.0) / 4000.0;
        assert!((view.consolidated_price - expected).abs() < 1e-9);
        assert_eq!(view.participating_venues, 2);
    }

    #[test]
    fn arbitrage_flagged_on_wide_cross_venue_spread() {
        let ticks = vec![
            tick("binance", 100.0, 100.1, 1.0, 1000.0),
            tick("coinbase", 102.0, 102.1, 1.0, 1000.0),
        ];
        let view = aggregate("BTC", &ticks, Utc::now());
        assert!(view.arbitrage_opportunity);
    }

    #[test]
    fn all_stale_yields_empty_view() {
        let mut t = tick("binance", 100.0, 100.1, 0.9, 1000.0);
        t.stale = true;
        let view = aggregate("BTC", &[t], Utc::now());
        assert_eq!(view.consensus_quality, 0.0);
        assert_eq!(view.freshness, 0.0);
    }

    #[test]
    fn aggregation_monotonicity_law() {
        let base = vec![tick("binance", 100.0, 100.1, 0.5, 1000.0)];
        let view_low = aggregate("BTC", &base, Utc::now());

        let mut higher = base.clone();
        higher.push(tick("coinbase", 100.0, 100.1, 0.95, 1000.0));
        let view_high = aggregate("BTC", &higher, Utc::now());

        assert!(view_high.consensus_quality >= view_low.consensus_quality);
    }
}
