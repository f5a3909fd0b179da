// src/correlation/validator.rs
// Correlation Validator (CV, SPEC_FULL §4.5): alignment/outlier handling,
// TRS classification, and the bounded real-time monitor per algorithm
// instance. Recomputes on every push (event-driven, §5).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::config::EngineConfig;
use crate::domain::{CorrelationMethod, CorrelationResult, PredictionOutcomePair, TrsStatus};

use super::stats::{correlation_coefficient, fisher_confidence_interval, rolling_correlation, significance};

const MONITOR_CAPACITY: usize = 1000;

fn z_scores(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let sd = var.sqrt();
    if sd <= 0.0 {
        return vec![0.0; n];
    }
    values.iter().map(|v| (v - mean) / sd).collect()
}

/// Inner-join two timestamped series on common timestamps, marking and
/// excluding per-series z-score outliers beforehand (SPEC_FULL §4.5).
fn align(
    predictions: &[(DateTime<Utc>, f64)],
    outcomes: &[(DateTime<Utc>, f64)],
    outlier_z: f64,
    remove_outliers: bool,
) -> (Vec<f64>, Vec<f64>) {
    let pred_values: Vec<f64> = predictions.iter().map(|(_, v)| *v).collect();
    let out_values: Vec<f64> = outcomes.iter().map(|(_, v)| *v).collect();
    let pred_z = z_scores(&pred_values);
    let out_z = z_scores(&out_values);

    let pred_map: HashMap<DateTime<Utc>, (f64, f64)> = predictions
        .iter()
        .zip(pred_z.iter())
        .map(|((ts, v), z)| (*ts, (*v, *z)))
        .collect();

    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for ((ts, v), z) in outcomes.iter().zip(out_z.iter()) {
        if let Some((pv, pz)) = pred_map.get(ts) {
            if remove_outliers && (pz.abs() > outlier_z || z.abs() > outlier_z) {
                continue;
            }
            xs.push(*pv);
            ys.push(*v);
        }
    }
    (xs, ys)
}

fn classify_trs(r: f64, n: usize, min_sample_size: usize) -> TrsStatus {
    if n < min_sample_size {
        return TrsStatus::InsufficientData;
    }
    if r >= 0.85 {
        TrsStatus::Compliant
    } else if r >= 0.80 {
        TrsStatus::Warning
    } else if r >= 0.75 {
        TrsStatus::Critical
    } else {
        TrsStatus::Failed
    }
}

/// Full rigorous correlation computation over two aligned, timestamped
/// series for one pair/method.
pub fn validate(
    pair_id: &str,
    method: CorrelationMethod,
    predictions: &[(DateTime<Utc>, f64)],
    outcomes: &[(DateTime<Utc>, f64)],
    cfg: &EngineConfig,
) -> CorrelationResult {
    let (xs, ys) = align(predictions, outcomes, cfg.outlier_z_threshold, cfg.remove_outliers);
    let n = xs.len();

    if n < cfg.min_sample_size {
        return CorrelationResult {
            pair_id: pair_id.to_string(),
            method,
            coefficient: 0.0,
            p_value: 1.0,
            sample_size: n,
            dof: 0,
            ci_lower: 0.0,
            ci_upper: 0.0,
            confidence_level: 0.95,
            rolling: Vec::new(),
            stability: 0.0,
            trend: 0.0,
            trs_status: TrsStatus::InsufficientData,
            trs_gap: cfg.trs_target_correlation,
        };
    }

    let r = correlation_coefficient(method, &xs, &ys);
    let (_, p_value, dof) = significance(r, n);
    let (ci_lower, ci_upper) = fisher_confidence_interval(r, n, 0.95);
    let rolling = rolling_correlation(&xs, &ys, cfg.rolling_window_size, cfg.rolling_step_size);
    let trs_status = classify_trs(r, n, cfg.min_sample_size);

    CorrelationResult {
        pair_id: pair_id.to_string(),
        method,
        coefficient: r,
        p_value,
        sample_size: n,
        dof,
        ci_lower,
        ci_upper,
        confidence_level: 0.95,
        rolling: rolling.values,
        stability: rolling.stability,
        trend: rolling.trend,
        trs_status,
        trs_gap: (cfg.trs_target_correlation - r).max(0.0),
    }
}

/// Bounded ring buffer of (prediction, outcome) pairs per algorithm
/// instance; recomputes on demand on each push.
pub struct RealtimeMonitor {
    pair_id: String,
    buffer: VecDeque<PredictionOutcomePair>,
}

impl RealtimeMonitor {
    pub fn new(pair_id: impl Into<String>) -> Self {
        Self { pair_id: pair_id.into(), buffer: VecDeque::with_capacity(MONITOR_CAPACITY) }
    }

    pub fn push(&mut self, pair: PredictionOutcomePair) {
        if self.buffer.len() == MONITOR_CAPACITY {
            self.buffer.pop_front();
        }
        self.buffer.push_back(pair);
    }

    pub fn recompute(&self, method: CorrelationMethod, cfg: &EngineConfig) -> CorrelationResult {
        let predictions: Vec<(DateTime<Utc>, f64)> =
            self.buffer.iter().map(|p| (p.ts_predicted, p.prediction)).collect();
        let outcomes: Vec<(DateTime<Utc>, f64)> =
            self.buffer.iter().map(|p| (p.ts_predicted, p.realized)).collect();
        validate(&self.pair_id, method, &predictions, &outcomes, cfg)
    }

    pub fn meets_trs(&self, min_r: f64, alpha: f64, cfg: &EngineConfig) -> bool {
        let result = self.recompute(CorrelationMethod::Pearson, cfg);
        result.coefficient >= min_r && result.p_value <= alpha && result.sample_size >= 30
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Registry of per-pair monitors, guarded the way the rest of the engine
/// guards single-writer-ish shared state (SPEC_FULL §5 CV row).
#[derive(Clone)]
pub struct CorrelationValidator {
    monitors: Arc<RwLock<HashMap<String, RealtimeMonitor>>>,
}

impl CorrelationValidator {
    pub fn new() -> Self {
        Self { monitors: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub async fn push_outcome(&self, outcome: PredictionOutcomePair) {
        let mut monitors = self.monitors.write().await;
        let pair_id = outcome.pair.clone();
        monitors.entry(pair_id.clone()).or_insert_with(|| RealtimeMonitor::new(pair_id)).push(outcome);
    }

    pub async fn status(&self, pair_id: &str, cfg: &EngineConfig) -> Option<CorrelationResult> {
        let monitors = self.monitors.read().await;
        monitors.get(pair_id).map(|m| m.recompute(CorrelationMethod::Pearson, cfg))
    }

    pub async fn meets_trs(&self, pair_id: &str, cfg: &EngineConfig) -> bool {
        let monitors = self.monitors.read().await;
        monitors.get(pair_id).map(|m| m.meets_trs(cfg.trs_target_correlation, 0.05, cfg)).unwrap_or(false)
    }
}

impl Default for CorrelationValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn series(n: usize, noise: impl Fn(usize) -> f64) -> (Vec<(DateTime<Utc>, f64)>, Vec<(DateTime<Utc>, f64)>) {
        let base = Utc::now();
        let preds: Vec<(DateTime<Utc>, f64)> = (0..n).map(|i| (base + Duration::minutes(i as i64), i as f64)).collect();
        let outs: Vec<(DateTime<Utc>, f64)> =
            (0..n).map(|i| (base + Duration::minutes(i as i64), i as f64 + noise(i))).collect();
        (preds, outs)
    }

    #[test]
    fn strong_real_correlation_is_compliant() {
        let cfg = EngineConfig::default();
        let (preds, outs) = series(40, |_| 0.0);
        let result = validate("BTC/ETH", CorrelationMethod::Pearson, &preds, &outs, &cfg);
        assert_eq!(result.trs_status, TrsStatus::Compliant);
        assert!(result.coefficient > 0.95);
    }

    #[test]
    fn below_min_sample_size_is_insufficient() {
        let cfg = EngineConfig::default();
        let (preds, outs) = series(5, |_| 0.0);
        let result = validate("BTC/ETH", CorrelationMethod::Pearson, &preds, &outs, &cfg);
        assert_eq!(result.trs_status, TrsStatus::InsufficientData);
    }

    #[tokio::test]
    async fn realtime_monitor_meets_trs_only_with_enough_strong_samples() {
        let cfg = EngineConfig::default();
        let validator = CorrelationValidator::new();
        let base = Utc::now();
        for i in 0..40u32 {
            let pair = PredictionOutcomePair {
                pair: "BTC/ETH".to_string(),
                prediction: i as f64,
                realized: i as f64,
                weight: 1.0,
                ts_predicted: base + Duration::minutes(i as i64),
                ts_realized: base + Duration::minutes(i as i64 + 1),
            };
            validator.push_outcome(pair).await;
        }
        assert!(validator.meets_trs("BTC/ETH", &cfg).await);
    }
}
