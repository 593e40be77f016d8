//! Pure indicator math over price/volume series.
//!
//! Every function here is a deterministic function of its inputs. Series that
//! are too short produce neutral defaults rather than errors; the bundle
//! builder decides whether an instrument has enough history to be scored.

pub mod bundle;

use statrs::statistics::Statistics;

pub use bundle::{build_bundle, detect_regime, MarketSeries};

/// Percentage change over `period` bars.
pub fn momentum(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return 0.0;
    }
    let last = closes[closes.len() - 1];
    let base = closes[closes.len() - 1 - period];
    if base == 0.0 {
        return 0.0;
    }
    (last - base) / base * 100.0
}

/// Rate of change of momentum: current window vs the preceding one.
pub fn momentum_acceleration(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period * 2 + 1 {
        return 0.0;
    }
    let current = momentum(closes, period);
    let previous = momentum(&closes[..closes.len() - period], period);
    current - previous
}

/// Standard deviation of one-bar returns over the trailing window, in percent.
pub fn returns_volatility(closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return 0.0;
    }
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < period {
        return 0.0;
    }
    let window = &returns[returns.len() - period..];
    window.iter().population_std_dev() * 100.0
}

/// Exponential moving average over the whole series.
pub fn ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len());
    out.push(prices[0]);
    for &price in &prices[1..] {
        let prev = *out.last().expect("seeded above");
        out.push((price - prev) * multiplier + prev);
    }
    out
}

/// Wilder-smoothed RSI series. Seeds with 50 until enough data accumulates.
pub fn rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.len() < period + 1 {
        return vec![50.0; prices.len()];
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = deltas.iter().map(|d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|d| (-d).max(0.0)).collect();

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut out = vec![50.0; period + 1];
    for i in period..gains.len() {
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i]) / period as f64;

        if avg_loss == 0.0 {
            out.push(if avg_gain > 0.0 { 100.0 } else { 50.0 });
        } else {
            let rs = avg_gain / avg_loss;
            out.push(100.0 - 100.0 / (1.0 + rs));
        }
    }
    out
}

/// MACD: (DIF, DEA). DIF = fast EMA - slow EMA; DEA = EMA of DIF.
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<f64>, Vec<f64>) {
    let ema_fast = ema(prices, fast);
    let ema_slow = ema(prices, slow);
    let dif: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let dea = ema(&dif, signal);
    (dif, dea)
}

/// Latest Bollinger band envelope: (upper, middle, lower).
pub fn bollinger_bands(prices: &[f64], period: usize, std_mult: f64) -> Option<(f64, f64, f64)> {
    if prices.len() < period {
        return None;
    }
    let window = &prices[prices.len() - period..];
    let middle = window.iter().mean();
    let std = window.iter().population_std_dev();
    Some((middle + std_mult * std, middle, middle - std_mult * std))
}

/// Average True Range over the trailing window.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let len = closes.len().min(highs.len()).min(lows.len());
    if len < 2 {
        return 0.0;
    }

    let mut true_ranges = Vec::with_capacity(len - 1);
    for i in 1..len {
        let high_low = highs[i] - lows[i];
        let high_close = (highs[i] - closes[i - 1]).abs();
        let low_close = (lows[i] - closes[i - 1]).abs();
        true_ranges.push(high_low.max(high_close).max(low_close));
    }

    if true_ranges.len() < period {
        return true_ranges.iter().mean();
    }
    true_ranges[true_ranges.len() - period..].iter().mean()
}

/// Average Directional Index: unsigned trend strength in [0, 100].
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let len = closes.len().min(highs.len()).min(lows.len());
    if len < period * 2 + 1 {
        return 0.0;
    }

    let mut plus_dm = Vec::with_capacity(len - 1);
    let mut minus_dm = Vec::with_capacity(len - 1);
    let mut true_ranges = Vec::with_capacity(len - 1);

    for i in 1..len {
        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];
        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });

        let high_low = highs[i] - lows[i];
        let high_close = (highs[i] - closes[i - 1]).abs();
        let low_close = (lows[i] - closes[i - 1]).abs();
        true_ranges.push(high_low.max(high_close).max(low_close));
    }

    // Wilder smoothing of DM and TR, then DX, then ADX
    let smooth = |values: &[f64]| -> Vec<f64> {
        let mut out = vec![values[..period].iter().sum::<f64>()];
        for &v in &values[period..] {
            let prev = *out.last().expect("seeded above");
            out.push(prev - prev / period as f64 + v);
        }
        out
    };

    let tr_s = smooth(&true_ranges);
    let plus_s = smooth(&plus_dm);
    let minus_s = smooth(&minus_dm);

    let mut dx = Vec::with_capacity(tr_s.len());
    for i in 0..tr_s.len() {
        if tr_s[i] == 0.0 {
            dx.push(0.0);
            continue;
        }
        let plus_di = 100.0 * plus_s[i] / tr_s[i];
        let minus_di = 100.0 * minus_s[i] / tr_s[i];
        let di_sum = plus_di + minus_di;
        dx.push(if di_sum > 0.0 {
            100.0 * (plus_di - minus_di).abs() / di_sum
        } else {
            0.0
        });
    }

    if dx.len() < period {
        return 0.0;
    }
    let mut adx = dx[..period].iter().mean();
    for &v in &dx[period..] {
        adx = (adx * (period as f64 - 1.0) + v) / period as f64;
    }
    adx
}

/// On-Balance Volume: cumulative signed volume flow.
pub fn obv(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let len = closes.len().min(volumes.len());
    if len == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(len);
    out.push(0.0);
    for i in 1..len {
        let prev = *out.last().expect("seeded above");
        if closes[i] > closes[i - 1] {
            out.push(prev + volumes[i]);
        } else if closes[i] < closes[i - 1] {
            out.push(prev - volumes[i]);
        } else {
            out.push(prev);
        }
    }
    out
}

/// Pearson correlation between two equal-length price series, in [-1, 1].
pub fn correlation(series_a: &[f64], series_b: &[f64]) -> f64 {
    if series_a.len() != series_b.len() || series_a.len() < 2 {
        return 0.0;
    }
    let mean_a = series_a.iter().mean();
    let mean_b = series_b.iter().mean();

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (a, b) in series_a.iter().zip(series_b) {
        let da = a - mean_a;
        let db = b - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    cov / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn momentum_percentage_change() {
        let closes = [100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 110.0];
        // 6-bar momentum: (110 - 100) / 100 * 100 = 10%
        assert!((momentum(&closes, 6) - 10.0).abs() < 1e-9);
        // Not enough data
        assert_eq!(momentum(&closes, 10), 0.0);
    }

    #[test]
    fn ema_converges_toward_constant_series() {
        let prices = vec![10.0; 50];
        let e = ema(&prices, 8);
        assert!((e.last().unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_bounds_and_direction() {
        // Strictly rising prices push RSI to 100
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let r = rsi(&rising, 14);
        assert!(*r.last().unwrap() > 95.0);

        // Strictly falling prices push RSI toward 0
        let falling: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
        let r = rsi(&falling, 14);
        assert!(*r.last().unwrap() < 5.0);

        for v in r {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn rsi_short_series_is_neutral() {
        let r = rsi(&[1.0, 2.0, 3.0], 14);
        assert_eq!(r, vec![50.0, 50.0, 50.0]);
    }

    #[test]
    fn atr_of_constant_range() {
        let highs = vec![11.0; 30];
        let lows = vec![9.0; 30];
        let closes = vec![10.0; 30];
        assert!((atr(&highs, &lows, &closes, 14) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn obv_accumulates_signed_volume() {
        let closes = [10.0, 11.0, 10.5, 10.5, 12.0];
        let volumes = [100.0, 200.0, 150.0, 50.0, 300.0];
        let o = obv(&closes, &volumes);
        assert_eq!(o, vec![0.0, 200.0, 50.0, 50.0, 350.0]);
    }

    #[test]
    fn correlation_of_identical_and_inverse_series() {
        let a: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64).sin() * 5.0 + i as f64).collect();
        let b: Vec<f64> = a.iter().map(|v| v * 2.0 + 3.0).collect();
        assert!((correlation(&a, &b) - 1.0).abs() < 1e-9);

        let c: Vec<f64> = a.iter().map(|v| -v).collect();
        assert!((correlation(&a, &c) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn bollinger_position_of_flat_series() {
        let prices = vec![10.0; 25];
        let (upper, middle, lower) = bollinger_bands(&prices, 20, 2.0).unwrap();
        assert_eq!(upper, 10.0);
        assert_eq!(middle, 10.0);
        assert_eq!(lower, 10.0);
    }

    #[test]
    fn adx_high_for_persistent_trend() {
        let highs: Vec<f64> = (0..80).map(|i| 101.0 + i as f64).collect();
        let lows: Vec<f64> = (0..80).map(|i| 99.0 + i as f64).collect();
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        assert!(adx(&highs, &lows, &closes, 14) > 25.0);
    }
}
