// src/signal/indicators.rs
// Deterministic technical indicators over a plain &[f64] of closes (and
// volumes for VWAP/OBV). SPEC_FULL §4.3: identical input windows must
// produce identical output, and arithmetic edge cases (too few points,
// zero variance) resolve to the neutral values named in §7, never NaN/Inf.

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &v in &values[1..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

pub fn ema(values: &[f64], period: usize) -> f64 {
    ema_series(values, period).last().copied().unwrap_or(0.0)
}

/// RSI(period). Neutral value 50 for too-few-points or zero-movement
/// windows (§7 "Arithmetic invariants").
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() <= period {
        return 50.0;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let recent = &deltas[deltas.len() - period..];
    let gains: f64 = recent.iter().filter(|d| **d > 0.0).sum();
    let losses: f64 = recent.iter().filter(|d| **d < 0.0).map(|d| -d).sum();
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

/// MACD(fast, slow, signal). The signal line is a proper EMA(signal_period)
/// of the MACD line series, not the `macd_line * 0.8` shortcut.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Macd {
    if closes.len() < slow + signal_period {
        return Macd { macd_line: 0.0, signal_line: 0.0, histogram: 0.0 };
    }
    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    let macd_series: Vec<f64> = fast_series.iter().zip(slow_series.iter()).map(|(f, s)| f - s).collect();
    let signal_line = ema(&macd_series, signal_period);
    let macd_line = *macd_series.last().unwrap_or(&0.0);
    Macd { macd_line, signal_line, histogram: macd_line - signal_line }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub percent_b: f64,
}

/// Bollinger Bands(period, num_std). `percent_b` is clamped neutral (0.5)
/// when the band width is zero.
pub fn bollinger_bands(closes: &[f64], period: usize, num_std: f64) -> BollingerBands {
    if closes.len() < period {
        let last = closes.last().copied().unwrap_or(0.0);
        return BollingerBands { upper: last, middle: last, lower: last, percent_b: 0.5 };
    }
    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let var = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let sd = var.sqrt();
    let upper = mean + num_std * sd;
    let lower = mean - num_std * sd;
    let last = *closes.last().unwrap();
    let width = upper - lower;
    let percent_b = if width > 0.0 { (last - lower) / width } else { 0.5 };
    BollingerBands { upper, middle: mean, lower, percent_b }
}

/// Volume-weighted average price over the full supplied window.
pub fn vwap(closes: &[f64], volumes: &[f64]) -> f64 {
    let n = closes.len().min(volumes.len());
    if n == 0 {
        return 0.0;
    }
    let total_volume: f64 = volumes[..n].iter().sum();
    if total_volume <= 0.0 {
        return closes[..n].iter().sum::<f64>() / n as f64;
    }
    closes[..n].iter().zip(&volumes[..n]).map(|(c, v)| c * v).sum::<f64>() / total_volume
}

/// On-balance volume, cumulative over the whole window.
pub fn obv(closes: &[f64], volumes: &[f64]) -> f64 {
    let n = closes.len().min(volumes.len());
    if n < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 1..n {
        if closes[i] > closes[i - 1] {
            total += volumes[i];
        } else if closes[i] < closes[i - 1] {
            total -= volumes[i];
        }
    }
    total
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

/// Stochastic oscillator(period) over closes alone (highs/lows approximated
/// by the window extrema of closes, consistent with the single-sequence
/// indicator contract of §4.3).
pub fn stochastic(closes: &[f64], period: usize) -> Stochastic {
    if closes.len() < period {
        return Stochastic { k: 50.0, d: 50.0 };
    }
    let window = &closes[closes.len() - period..];
    let hi = window.iter().cloned().fold(f64::MIN, f64::max);
    let lo = window.iter().cloned().fold(f64::MAX, f64::min);
    let last = *closes.last().unwrap();
    let range = hi - lo;
    let k = if range > 0.0 { (last - lo) / range * 100.0 } else { 50.0 };
    Stochastic { k, d: k }
}

/// Williams %R(period), neutral -50 when the window has zero range.
pub fn williams_r(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period {
        return -50.0;
    }
    let window = &closes[closes.len() - period..];
    let hi = window.iter().cloned().fold(f64::MIN, f64::max);
    let lo = window.iter().cloned().fold(f64::MAX, f64::min);
    let last = *closes.last().unwrap();
    let range = hi - lo;
    if range <= 0.0 {
        return -50.0;
    }
    (hi - last) / range * -100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_is_neutral_on_short_window() {
        assert_eq!(rsi(&[1.0, 2.0], 14), 50.0);
    }

    #[test]
    fn rsi_is_100_on_pure_uptrend() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), 100.0);
    }

    #[test]
    fn macd_on_flat_series_is_zero() {
        let closes = vec![100.0; 40];
        let m = macd(&closes, 12, 26, 9);
        assert!((m.histogram).abs() < 1e-9);
    }

    #[test]
    fn macd_signal_is_genuine_ema_not_point_eight_shortcut() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.2).collect();
        let m = macd(&closes, 12, 26, 9);
        assert_ne!(m.signal_line, m.macd_line * 0.8);
    }

    #[test]
    fn bollinger_percent_b_mid_on_flat_series() {
        let closes = vec![100.0; 25];
        let bb = bollinger_bands(&closes, 20, 2.0);
        assert_eq!(bb.percent_b, 0.5);
    }

    #[test]
    fn vwap_weights_toward_higher_volume_price() {
        let closes = vec![100.0, 110.0];
        let volumes = vec![1.0, 9.0];
        let v = vwap(&closes, &volumes);
        assert!(v > 108.0);
    }

    #[test]
    fn obv_accumulates_direction() {
        let closes = vec![100.0, 101.0, 99.0, 102.0];
        let volumes = vec![10.0, 10.0, 10.0, 10.0];
        // +10 (up), -10 (down), +10 (up) = 10
        assert_eq!(obv(&closes, &volumes), 10.0);
    }
}
