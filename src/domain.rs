// src/domain.rs
// Cross-cutting entities shared across subsystems (SPEC_FULL §3). Shaped
// after the teacher's plain Serialize/Deserialize data structs
// (alpha_oracle::AlphaSignal, position_sizing::PositionSizingDecision) with
// closed enums in place of string tags per SPEC_FULL §9.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    Normal,
    Volatile,
    Trending,
    Ranging,
    Illiquid,
    Disrupted,
    Bull,
    Bear,
    Sideways,
    Crisis,
    Unknown,
}

impl Default for MarketRegime {
    fn default() -> Self {
        MarketRegime::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
    NoAction,
}

impl Action {
    pub fn is_buy_family(self) -> bool {
        matches!(self, Action::StrongBuy | Action::Buy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub pair: String,
    pub ts: DateTime<Utc>,
    pub strength: f64,
    pub confidence: f64,
    pub predicted_return: f64,
    pub predicted_volatility: f64,
    pub horizon: String,
    pub risk_score: f64,
    pub data_quality: f64,
    pub regime: MarketRegime,
    pub reasons: Vec<String>,
    pub indicator_contributions: HashMap<String, f64>,
    pub is_live: bool,
}

impl Signal {
    /// A signal with no actionable content; used whenever a quality or
    /// regime gate fails (SPEC_FULL §4.3, §7).
    pub fn no_action(pair: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pair: pair.into(),
            ts: Utc::now(),
            strength: 0.0,
            confidence: 0.0,
            predicted_return: 0.0,
            predicted_volatility: 0.0,
            horizon: "none".to_string(),
            risk_score: 0.0,
            data_quality: 0.0,
            regime: MarketRegime::Unknown,
            reasons: vec![reason.into()],
            indicator_contributions: HashMap::new(),
            is_live: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub pair: String,
    pub opened_at: DateTime<Utc>,
    pub direction: Direction,
    pub size: f64,
    pub entry_price: f64,
    pub executed_price: f64,
    pub current_price: f64,
    pub value_usd: f64,
    pub unrealized_pnl: f64,
    pub unrealized_return_pct: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub max_favorable_excursion: f64,
    pub max_adverse_excursion: f64,
    pub transaction_cost: f64,
    pub slippage: f64,
    pub signal_id_origin: Uuid,
    pub predicted_return: f64,
    pub state: PositionState,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
    pub realized_pnl: Option<f64>,
    pub holding_period: Option<i64>,
}

impl Position {
    pub fn weight(&self, total_portfolio_value: f64) -> f64 {
        if total_portfolio_value <= 0.0 {
            0.0
        } else {
            self.value_usd / total_portfolio_value
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioContext {
    pub total_value: f64,
    pub cash: f64,
    pub positions: Vec<Position>,
    pub volatility: f64,
    pub var: f64,
    pub correlation: f64,
    pub sector_exposures: HashMap<String, f64>,
    pub recent_returns_7d: f64,
    pub recent_returns_30d: f64,
    pub max_drawdown: f64,
}

impl PortfolioContext {
    pub fn current_exposure(&self) -> f64 {
        self.positions.iter().map(|p| p.value_usd).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub pair: String,
    pub ts: DateTime<Utc>,
    pub action: Action,
    pub recommended_weight: f64,
    pub confidence: f64,
    pub signal_strength: f64,
    pub risk_adjusted_strength: f64,
    pub position_risk: f64,
    pub correlation_risk: f64,
    pub portfolio_impact: f64,
    pub expected_return: f64,
    pub expected_volatility: f64,
    pub reasons: Vec<String>,
    pub factor_contributions: HashMap<String, f64>,
    pub recommended_holding_period: String,
}

impl Decision {
    pub fn no_action(pair: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut factor_contributions = HashMap::new();
        factor_contributions.insert("technical".to_string(), 0.25);
        factor_contributions.insert("momentum".to_string(), 0.25);
        factor_contributions.insert("volatility".to_string(), 0.25);
        factor_contributions.insert("risk_adjustment".to_string(), 0.25);

        Self {
            id: Uuid::new_v4(),
            pair: pair.into(),
            ts: Utc::now(),
            action: Action::NoAction,
            recommended_weight: 0.0,
            confidence: 0.0,
            signal_strength: 0.0,
            risk_adjusted_strength: 0.0,
            position_risk: 0.0,
            correlation_risk: 0.0,
            portfolio_impact: 0.0,
            expected_return: 0.0,
            expected_volatility: 0.0,
            reasons: vec![reason.into()],
            factor_contributions,
            recommended_holding_period: "n/a".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionOutcomePair {
    pub pair: String,
    pub prediction: f64,
    pub realized: f64,
    pub weight: f64,
    pub ts_predicted: DateTime<Utc>,
    pub ts_realized: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
    Kendall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrsStatus {
    Compliant,
    Warning,
    Critical,
    Failed,
    InsufficientData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub pair_id: String,
    pub method: CorrelationMethod,
    pub coefficient: f64,
    pub p_value: f64,
    pub sample_size: usize,
    pub dof: i64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub confidence_level: f64,
    pub rolling: Vec<f64>,
    pub stability: f64,
    pub trend: f64,
    pub trs_status: TrsStatus,
    pub trs_gap: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    PositionLimit,
    PortfolioExposure,
    DrawdownLimit,
    VarLimit,
    Concentration,
    Leverage,
    TRSCompliance,
    DataQuality,
    PositionTimeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskViolation {
    pub id: Uuid,
    pub detected_at: DateTime<Utc>,
    pub kind: ViolationKind,
    pub severity: f64,
    pub current_value: f64,
    pub limit_value: f64,
    pub affected_position_id: Option<String>,
    pub resolved: bool,
    pub automated_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: String,
    pub pair: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub holding_period: i64,
    pub entry_price: f64,
    pub executed_price: f64,
    pub exit_price: f64,
    pub exit_reason: String,
    pub direction: Direction,
    pub position_size: f64,
    pub realized_pnl: f64,
    pub realized_return_pct: f64,
    pub transaction_cost: f64,
    pub slippage: f64,
    pub market_impact: f64,
    pub max_favorable_excursion: f64,
    pub max_adverse_excursion: f64,
    pub signal_id: Uuid,
    pub predicted_return: f64,
    pub prediction_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub ts: DateTime<Utc>,
    pub portfolio_value: f64,
    pub drawdown: f64,
    pub total_weight: f64,
    pub open_count: usize,
    pub long_count: usize,
    pub short_count: usize,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub leverage: f64,
    pub dominant_regime: MarketRegime,
    pub trs_status: TrsStatus,
}
