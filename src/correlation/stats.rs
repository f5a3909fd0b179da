// src/correlation/stats.rs
// Real correlation math (SPEC_FULL §4.5). Grounded on the teacher's
// utils::stats::pearson, extended with Spearman/Kendall/significance/CI —
// no randomness anywhere on this path, unlike the teacher's
// correlation_analysis.rs mock.

use crate::domain::CorrelationMethod;

pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return 0.0;
    }
    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}

fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap());

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[indices[j + 1]] == values[indices[i]] {
            j += 1;
        }
        let avg_rank = ((i + 1)..=(j + 1)).sum::<usize>() as f64 / (j - i + 1) as f64;
        for &idx in &indices[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }
    ranks
}

pub fn spearman(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let rx = average_ranks(&xs[..n]);
    let ry = average_ranks(&ys[..n]);
    pearson(&rx, &ry)
}

pub fn kendall_tau(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mut concordant = 0i64;
    let mut discordant = 0i64;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = xs[i] - xs[j];
            let dy = ys[i] - ys[j];
            let sign = dx * dy;
            if sign > 0.0 {
                concordant += 1;
            } else if sign < 0.0 {
                discordant += 1;
            }
        }
    }
    let total = (n * (n - 1) / 2) as f64;
    if total == 0.0 {
        0.0
    } else {
        (concordant - discordant) as f64 / total
    }
}

pub fn correlation_coefficient(method: CorrelationMethod, xs: &[f64], ys: &[f64]) -> f64 {
    match method {
        CorrelationMethod::Pearson => pearson(xs, ys),
        CorrelationMethod::Spearman => spearman(xs, ys),
        CorrelationMethod::Kendall => kendall_tau(xs, ys),
    }
}

/// Upper-tail standard normal probability Q(x) = 1 - Phi(x), x >= 0, via the
/// Abramowitz & Stegun 26.2.17 rational approximation (error < 7.5e-8).
/// Strictly decreasing in x and smooth everywhere — used in place of a
/// t-distribution table since dof grows quickly past a handful of samples.
fn normal_upper_tail(x: f64) -> f64 {
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.2316419 * x);
    let d = 0.3989423 * (-x * x / 2.0).exp();
    d * t * (0.3193815 + t * (-0.3565638 + t * (1.781478 + t * (-1.821256 + t * 1.330274))))
}

/// Continuous, monotonically non-increasing-in-|t| two-tailed p-value
/// approximation: must satisfy p<0.05 at |t|=1.96 and p<0.01 at |t|=2.58.
/// Built for this engine rather than ported from any step-function table.
pub fn t_test_p_value(t: f64, _dof: i64) -> f64 {
    (2.0 * normal_upper_tail(t.abs())).clamp(0.0, 1.0)
}

pub fn significance(r: f64, n: usize) -> (f64, f64, i64) {
    if n < 3 {
        return (0.0, 1.0, 0);
    }
    let dof = (n - 2) as i64;
    if (1.0 - r * r).abs() < 1e-12 {
        return (f64::INFINITY, 0.0, dof);
    }
    let t = r * ((n - 2) as f64 / (1.0 - r * r)).sqrt();
    let p = t_test_p_value(t, dof);
    (t, p, dof)
}

/// Fisher z-transform confidence interval for a Pearson r.
pub fn fisher_confidence_interval(r: f64, n: usize, confidence_level: f64) -> (f64, f64) {
    if n < 4 {
        return (r, r);
    }
    let r_clamped = r.clamp(-0.999999, 0.999999);
    let z = 0.5 * ((1.0 + r_clamped) / (1.0 - r_clamped)).ln();
    let se = 1.0 / ((n - 3) as f64).sqrt();
    let z_crit = if (confidence_level - 0.95).abs() < 1e-9 { 1.96 } else { 2.576 };
    let lo = z - z_crit * se;
    let hi = z + z_crit * se;
    let back = |zv: f64| ((2.0 * zv).exp() - 1.0) / ((2.0 * zv).exp() + 1.0);
    (back(lo), back(hi))
}

pub struct RollingCorrelation {
    pub values: Vec<f64>,
    pub stability: f64,
    pub trend: f64,
}

/// Rolling-window Pearson correlation, window `w`, step `s`.
pub fn rolling_correlation(xs: &[f64], ys: &[f64], window: usize, step: usize) -> RollingCorrelation {
    let n = xs.len().min(ys.len());
    let mut values = Vec::new();
    if window == 0 || step == 0 || n < window {
        return RollingCorrelation { values, stability: 0.0, trend: 0.0 };
    }

    let mut start = 0;
    while start + window <= n {
        values.push(pearson(&xs[start..start + window], &ys[start..start + window]));
        start += step;
    }

    if values.len() < 2 {
        return RollingCorrelation { values, stability: 0.0, trend: 0.0 };
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let stability = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt();

    // Trend = slope of rolling values against their index (simple OLS).
    let idx_mean = (values.len() as f64 - 1.0) / 2.0;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, v) in values.iter().enumerate() {
        let dx = i as f64 - idx_mean;
        num += dx * (v - mean);
        den += dx * dx;
    }
    let trend = if den > 0.0 { num / den } else { 0.0 };

    RollingCorrelation { values, stability, trend }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_perfect_positive_correlation() {
        let xs = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        assert!((pearson(&xs, &ys) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn spearman_handles_tied_ranks() {
        let xs = vec![1.0, 2.0, 2.0, 3.0];
        let ys = vec![1.0, 2.0, 2.0, 3.0];
        assert!((spearman(&xs, &ys) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn kendall_perfect_inverse() {
        let xs = vec![1.0, 2.0, 3.0, 4.0];
        let ys = vec![4.0, 3.0, 2.0, 1.0];
        assert!((kendall_tau(&xs, &ys) - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn p_value_anchors_hold() {
        assert!(t_test_p_value(1.96, 28) < 0.05);
        assert!(t_test_p_value(2.58, 28) < 0.01);
    }

    #[test]
    fn p_value_is_monotonic_non_increasing_in_abs_t() {
        let mut prev = t_test_p_value(0.0, 28);
        for i in 1..200 {
            let t = i as f64 * 0.05;
            let p = t_test_p_value(t, 28);
            assert!(p <= prev + 1e-12);
            prev = p;
        }
    }

    #[test]
    fn fisher_ci_brackets_r() {
        let (lo, hi) = fisher_confidence_interval(0.5, 50, 0.95);
        assert!(lo < 0.5 && hi > 0.5);
    }
}
