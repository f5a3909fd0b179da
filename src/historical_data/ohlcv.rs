// src/historical_data/ohlcv.rs
// The OHLCV entity (SPEC_FULL §3.1, §4.2) plus the per-series quality
// report HDA computes after reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ohlcv {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub volume: f64,
    pub volume_usd: f64,
    pub market_cap: f64,
    pub source: String,
    pub quality: f64,
    pub interpolated: bool,
    pub anomaly: bool,
}

impl Ohlcv {
    pub fn price_gap_pct(&self, previous_close: f64) -> f64 {
        if previous_close <= 0.0 {
            0.0
        } else {
            (self.c - previous_close).abs() / previous_close
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub completeness: f64,
    pub mean_quality: f64,
    pub interpolated_ratio: f64,
    pub anomaly_ratio: f64,
    pub price_gap_count: usize,
    pub volume_anomaly_count: usize,
    pub consistency_score: f64,
}

impl QualityReport {
    /// SPEC_FULL §4.2 acceptance gate for an SG-consumable series.
    pub fn meets_minimum_standards(&self) -> bool {
        self.completeness >= 0.95
            && self.mean_quality >= 0.85
            && self.consistency_score >= 0.80
            && self.interpolated_ratio <= 0.10
            && self.anomaly_ratio <= 0.05
    }

    pub fn compute(series: &[Ohlcv], expected_points: usize) -> Self {
        if series.is_empty() {
            return QualityReport {
                completeness: 0.0,
                mean_quality: 0.0,
                interpolated_ratio: 0.0,
                anomaly_ratio: 0.0,
                price_gap_count: 0,
                volume_anomaly_count: 0,
                consistency_score: 0.0,
            };
        }

        let n = series.len() as f64;
        let completeness = if expected_points > 0 { n / expected_points as f64 } else { 1.0 };
        let mean_quality = series.iter().map(|p| p.quality).sum::<f64>() / n;
        let interpolated_ratio = series.iter().filter(|p| p.interpolated).count() as f64 / n;
        let anomaly_ratio = series.iter().filter(|p| p.anomaly).count() as f64 / n;

        let volume_mean = series.iter().map(|p| p.volume).sum::<f64>() / n;
        let volume_anomaly_count = series
            .iter()
            .filter(|p| volume_mean > 0.0 && (p.volume > volume_mean * 5.0 || p.volume < volume_mean * 0.1))
            .count();

        let mut price_gap_count = 0usize;
        for w in series.windows(2) {
            if w[1].price_gap_pct(w[0].c) > 0.20 {
                price_gap_count += 1;
            }
        }

        let consistency_score = completeness.min(1.0) * mean_quality * (1.0 - anomaly_ratio) * (1.0 - interpolated_ratio);

        QualityReport {
            completeness: completeness.min(1.0),
            mean_quality,
            interpolated_ratio,
            anomaly_ratio,
            price_gap_count,
            volume_anomaly_count,
            consistency_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts_offset: i64, close: f64, quality: f64) -> Ohlcv {
        Ohlcv {
            ts: Utc::now() + chrono::Duration::hours(ts_offset),
            symbol: "BTC".into(),
            o: close,
            h: close * 1.01,
            l: close * 0.99,
            c: close,
            volume: 1_000_000.0,
            volume_usd: 1_000_000.0 * close,
            market_cap: 0.0,
            source: "coingecko".into(),
            quality,
            interpolated: false,
            anomaly: false,
        }
    }

    #[test]
    fn full_clean_series_meets_minimum_standards() {
        let series: Vec<Ohlcv> = (0..30).map(|i| point(i, 100.0, 1.0)).collect();
        let report = QualityReport::compute(&series, 30);
        assert!(report.meets_minimum_standards());
    }

    #[test]
    fn large_price_jump_counts_as_gap() {
        // A single spike creates two oversized jumps: into it and out of it.
        let mut series: Vec<Ohlcv> = (0..10).map(|i| point(i, 100.0, 1.0)).collect();
        series[5].c = 200.0;
        let report = QualityReport::compute(&series, 10);
        assert_eq!(report.price_gap_count, 2);
    }
}
