// src/config.rs
// Every recognized option from SPEC_FULL §6.3 plus the defaults named
// throughout §4. Immutable after construction; live updates go through
// ConfigHandle::swap, which atomically replaces the current reference
// (SPEC_FULL §5 — "config swap" is the only mutation path).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    // Market Data Fabric
    pub max_latency_ms: u64,
    pub reconnect_attempts: u32,

    // Historical Data Adapter
    pub max_retries: u32,
    pub max_cache_age_secs: u64,

    // Signal Generator
    pub min_confidence: f64,
    pub min_data_quality: f64,
    pub max_data_latency_ms: u64,
    pub min_history_days: u32,
    pub min_venues: usize,

    // Decision Engine
    pub max_position_size: f64,
    pub max_sector_exposure: f64,
    pub correlation_threshold: f64,
    pub min_signal_confidence: f64,
    pub volatility_scaling: bool,
    pub decision_cooldown_secs: i64,

    // Risk Manager
    pub max_position_size_pct: f64,
    pub max_portfolio_exposure_pct: f64,
    pub max_concurrent_positions: usize,
    pub max_drawdown_limit: f64,
    pub portfolio_daily_vol: f64,
    pub position_timeout_secs: i64,

    // Live Simulator
    pub transaction_cost_bps: f64,
    pub slippage_impact_factor: f64,
    pub stop_loss_percentage: f64,
    pub take_profit_percentage: f64,
    pub market_impact_coefficient: f64,
    pub acceleration_factor: f64,

    // Correlation Validator
    pub trs_target_correlation: f64,
    pub trs_warning_threshold: f64,
    pub trs_critical_threshold: f64,
    pub rolling_window_size: usize,
    pub rolling_step_size: usize,
    pub outlier_z_threshold: f64,
    pub remove_outliers: bool,
    pub min_sample_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: 2_000,
            reconnect_attempts: 5,

            max_retries: 3,
            max_cache_age_secs: 3_600,

            min_confidence: 0.3,
            min_data_quality: 0.8,
            max_data_latency_ms: 2_000,
            min_history_days: 30,
            min_venues: 1,

            max_position_size: 0.15,
            max_sector_exposure: 0.35,
            correlation_threshold: 0.6,
            min_signal_confidence: 0.3,
            volatility_scaling: true,
            decision_cooldown_secs: 3_600,

            max_position_size_pct: 0.10,
            max_portfolio_exposure_pct: 0.25,
            max_concurrent_positions: 10,
            max_drawdown_limit: 0.10,
            portfolio_daily_vol: 0.015,
            position_timeout_secs: 86_400,

            transaction_cost_bps: 10.0,
            slippage_impact_factor: 0.0005,
            stop_loss_percentage: 0.05,
            take_profit_percentage: 0.10,
            market_impact_coefficient: 0.1,
            acceleration_factor: 1.0,

            trs_target_correlation: 0.85,
            trs_warning_threshold: 0.80,
            trs_critical_threshold: 0.75,
            rolling_window_size: 30,
            rolling_step_size: 1,
            outlier_z_threshold: 3.0,
            remove_outliers: true,
            min_sample_size: 30,
        }
    }
}

/// Atomically-swappable handle to the live config. Readers call `load()` to
/// get a cheap `Arc` snapshot; writers call `swap()` once to replace it.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<EngineConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub async fn load(&self) -> Arc<EngineConfig> {
        self.inner.read().await.clone()
    }

    pub async fn swap(&self, new: EngineConfig) {
        let mut guard = self.inner.write().await;
        *guard = Arc::new(new);
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
