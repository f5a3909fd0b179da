// src/historical_data/adapter.rs
// Historical Data Adapter pipeline (SPEC_FULL §4.2): per-source concurrent
// fetch, multi-source reconciliation, anomaly detection, gap interpolation,
// quality reporting, and cache eviction.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::{FuturesUnordered, StreamExt};
use governor::{Quota, RateLimiter};
use tracing::warn;

use crate::capabilities::HistoricalDataStore;
use crate::config::ConfigHandle;

use super::ohlcv::{Ohlcv, QualityReport};

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub rate_limit_ms: u64,
    pub max_retries: u32,
    pub reliability_weight: f64,
    pub is_primary: bool,
}

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

struct CachedSeries {
    series: Vec<Ohlcv>,
    newest_point: DateTime<Utc>,
}

/// Owns the per-source rate limiters and the reconciled-series cache. Stores
/// the actual sources behind `HistoricalDataStore` trait objects so the
/// adapter never depends on a concrete venue/API client.
pub struct HistoricalDataAdapter {
    store: Arc<dyn HistoricalDataStore>,
    config: ConfigHandle,
    limiters: DashMap<String, Arc<DirectRateLimiter>>,
    cache: DashMap<(String, String), CachedSeries>,
}

impl HistoricalDataAdapter {
    pub fn new(store: Arc<dyn HistoricalDataStore>, config: ConfigHandle) -> Self {
        Self {
            store,
            config,
            limiters: DashMap::new(),
            cache: DashMap::new(),
        }
    }

    fn limiter_for(&self, source: &SourceConfig) -> Arc<DirectRateLimiter> {
        self.limiters
            .entry(source.name.clone())
            .or_insert_with(|| {
                let period = Duration::from_millis(source.rate_limit_ms.max(1));
                let quota = Quota::with_period(period)
                    .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(1).unwrap()));
                Arc::new(RateLimiter::direct(quota))
            })
            .clone()
    }

    async fn fetch_source(
        &self,
        source: &SourceConfig,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: &str,
    ) -> Vec<Ohlcv> {
        let limiter = self.limiter_for(source);
        let max_retries = source.max_retries.max(self.config.load().await.max_retries);

        for attempt in 0..=max_retries {
            limiter.until_ready().await;
            match self.store.fetch(&source.name, symbol, start, end, timeframe).await {
                Ok(points) => return points,
                Err(err) => {
                    warn!(source = %source.name, attempt, %err, "historical fetch attempt failed");
                }
            }
        }
        // Retries exhausted: this source contributes nothing to the bucket
        // rather than failing the whole adapter call.
        Vec::new()
    }

    /// Run the full pipeline for one (symbol, range, timeframe) request.
    pub async fn fetch_reconciled(
        &self,
        sources: &[SourceConfig],
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: &str,
    ) -> Vec<Ohlcv> {
        let mut futs = FuturesUnordered::new();
        for source in sources {
            futs.push(async move { (source, self.fetch_source(source, symbol, start, end, timeframe).await) });
        }

        let mut buckets: HashMap<DateTime<Utc>, Vec<(&SourceConfig, Ohlcv)>> = HashMap::new();
        while let Some((source, points)) = futs.next().await {
            for point in points {
                buckets.entry(point.ts).or_default().push((source, point));
            }
        }

        let mut reconciled: Vec<Ohlcv> = buckets
            .into_iter()
            .map(|(ts, contributions)| reconcile_bucket(ts, symbol, &contributions))
            .collect();
        reconciled.sort_by_key(|p| p.ts);

        detect_anomalies(&mut reconciled);
        interpolate_gaps(&mut reconciled);

        let cache_key = (symbol.to_string(), timeframe.to_string());
        if let Some(newest) = reconciled.last().map(|p| p.ts) {
            self.cache.insert(cache_key, CachedSeries { series: reconciled.clone(), newest_point: newest });
        }

        reconciled
    }

    pub fn cached(&self, symbol: &str, timeframe: &str) -> Option<Vec<Ohlcv>> {
        self.cache.get(&(symbol.to_string(), timeframe.to_string())).map(|c| c.series.clone())
    }

    pub fn quality_report(&self, series: &[Ohlcv], expected_points: usize) -> QualityReport {
        QualityReport::compute(series, expected_points)
    }

    /// Evict cached series whose newest point is stale. Intended to run once
    /// per MDF aggregator tick (SPEC_FULL §4.2).
    pub async fn evict_stale(&self, now: DateTime<Utc>) {
        let max_age = self.config.load().await.max_cache_age_secs as i64;
        let threshold = max_age * 2;
        self.cache.retain(|_, cached| (now - cached.newest_point).num_seconds() <= threshold);
    }
}

fn reconcile_bucket(ts: DateTime<Utc>, symbol: &str, contributions: &[(&SourceConfig, Ohlcv)]) -> Ohlcv {
    let weight_total: f64 = contributions.iter().map(|(s, _)| s.reliability_weight).sum();
    let weighted = |pick: fn(&Ohlcv) -> f64| -> f64 {
        if weight_total <= 0.0 {
            return contributions.first().map(|(_, p)| pick(p)).unwrap_or(0.0);
        }
        contributions.iter().map(|(s, p)| s.reliability_weight * pick(p)).sum::<f64>() / weight_total
    };

    let quality = if weight_total > 0.0 { weight_total / contributions.len() as f64 } else { 0.0 };

    Ohlcv {
        ts,
        symbol: symbol.to_string(),
        o: weighted(|p| p.o),
        h: weighted(|p| p.h),
        l: weighted(|p| p.l),
        c: weighted(|p| p.c),
        volume: weighted(|p| p.volume),
        volume_usd: weighted(|p| p.volume_usd),
        market_cap: weighted(|p| p.market_cap),
        source: contributions
            .iter()
            .max_by(|a, b| a.0.reliability_weight.partial_cmp(&b.0.reliability_weight).unwrap())
            .map(|(s, _)| s.name.clone())
            .unwrap_or_default(),
        quality: quality.clamp(0.0, 1.0),
        interpolated: false,
        anomaly: false,
    }
}

fn detect_anomalies(series: &mut [Ohlcv]) {
    let n = series.len();
    if n < 2 {
        return;
    }
    let window = (20usize).min((n / 2).max(1));

    for i in 0..n {
        let lo = i.saturating_sub(window);
        let hi = (i + window).min(n);
        let closes: Vec<f64> = series[lo..hi].iter().map(|p| p.c).collect();
        let volumes: Vec<f64> = series[lo..hi].iter().map(|p| p.volume).collect();
        let close_mean = closes.iter().sum::<f64>() / closes.len() as f64;
        let close_var = closes.iter().map(|c| (c - close_mean).powi(2)).sum::<f64>() / closes.len() as f64;
        let close_sigma = close_var.sqrt();
        let volume_mean = volumes.iter().sum::<f64>() / volumes.len() as f64;

        let price_anomaly = close_sigma > 0.0 && (series[i].c - close_mean).abs() > 3.0 * close_sigma;
        let volume_anomaly =
            volume_mean > 0.0 && (series[i].volume > volume_mean * 5.0 || series[i].volume < volume_mean * 0.1);

        if price_anomaly {
            series[i].quality *= 0.5;
            series[i].anomaly = true;
        }
        if volume_anomaly {
            series[i].quality *= 0.7;
            series[i].anomaly = true;
        }
    }
}

fn interpolate_gaps(series: &mut [Ohlcv]) {
    let n = series.len();
    for i in 0..n {
        if series[i].quality >= 0.3 && series[i].c != 0.0 {
            continue;
        }
        let prev = (0..i).rev().find(|&j| series[j].quality >= 0.3 && series[j].c != 0.0);
        let next = (i + 1..n).find(|&j| series[j].quality >= 0.3 && series[j].c != 0.0);

        if let (Some(p), Some(q)) = (prev, next) {
            let span = (q - p) as f64;
            let t = (i - p) as f64 / span;
            let lerp = |a: f64, b: f64| a + (b - a) * t;
            let (pp, qq) = (series[p].clone(), series[q].clone());
            let point = &mut series[i];
            point.o = lerp(pp.o, qq.o);
            point.h = lerp(pp.h, qq.h);
            point.l = lerp(pp.l, qq.l);
            point.c = lerp(pp.c, qq.c);
            point.volume = lerp(pp.volume, qq.volume);
            point.interpolated = true;
            point.quality = 0.7;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(offset_hours: i64, close: f64, volume: f64) -> Ohlcv {
        let base = Utc::now();
        Ohlcv {
            ts: base + chrono::Duration::hours(offset_hours),
            symbol: "BTC".into(),
            o: close,
            h: close,
            l: close,
            c: close,
            volume,
            volume_usd: volume * close,
            market_cap: 0.0,
            source: "coingecko".into(),
            quality: 1.0,
            interpolated: false,
            anomaly: false,
        }
    }

    #[test]
    fn price_spike_is_flagged_and_downweighted() {
        let mut series: Vec<Ohlcv> = (0..40).map(|i| point(i, 100.0, 1000.0)).collect();
        series[20].c = 500.0;
        detect_anomalies(&mut series);
        assert!(series[20].anomaly);
        assert!(series[20].quality < 1.0);
    }

    #[test]
    fn zero_close_gets_interpolated() {
        let mut series: Vec<Ohlcv> = (0..10).map(|i| point(i, 100.0, 1000.0)).collect();
        series[5].c = 0.0;
        series[5].quality = 0.0;
        interpolate_gaps(&mut series);
        assert!(series[5].interpolated);
        assert!((series[5].c - 100.0).abs() < 1e-6);
        assert_eq!(series[5].quality, 0.7);
    }

    #[test]
    fn reconciliation_weights_by_reliability() {
        let high = SourceConfig { name: "a".into(), rate_limit_ms: 100, max_retries: 2, reliability_weight: 0.9, is_primary: true };
        let low = SourceConfig { name: "b".into(), rate_limit_ms: 100, max_retries: 2, reliability_weight: 0.1, is_primary: false };
        let ts = Utc::now();
        let a_point = Ohlcv { c: 100.0, ..point(0, 100.0, 1000.0) };
        let b_point = Ohlcv { c: 200.0, ..point(0, 200.0, 1000.0) };
        let reconciled = reconcile_bucket(ts, "BTC", &[(&high, a_point), (&low, b_point)]);
        let expected = (0.9 * 100.0 + 0.1 * 200.0) / 1.0;
        assert!((reconciled.c - expected).abs() < 1e-9);
    }
}
