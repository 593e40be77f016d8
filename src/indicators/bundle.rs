//! Builds the per-instrument `IndicatorBundle` from multi-timeframe candles.

use crate::exchange::types::Candle;
use crate::models::{DivergenceKind, IndicatorBundle, MacdSignal, Regime, Trend, VolumeTrend};
use crate::trading::StrategyConfig;

use super::{
    adx, atr, bollinger_bands, ema, macd, momentum, momentum_acceleration, obv,
    returns_volatility, rsi,
};

/// Candle history for one instrument across the three analysis timeframes.
#[derive(Debug, Clone)]
pub struct MarketSeries {
    pub candles_1h: Vec<Candle>,
    pub candles_15m: Vec<Candle>,
    pub candles_4h: Vec<Candle>,
}

const MIN_CANDLES_1H: usize = 50;
const MIN_CANDLES_15M: usize = 20;
const MIN_CANDLES_4H: usize = 20;
const DIVERGENCE_LOOKBACK: usize = 10;
const OBV_PERIOD: usize = 14;

/// Build a bundle for one instrument, or `None` when there is not enough
/// history — an unscored instrument is excluded from ranking, never an error.
pub fn build_bundle(
    symbol: &str,
    series: &MarketSeries,
    cfg: &StrategyConfig,
) -> Option<IndicatorBundle> {
    if series.candles_1h.len() < MIN_CANDLES_1H
        || series.candles_15m.len() < MIN_CANDLES_15M
        || series.candles_4h.len() < MIN_CANDLES_4H
    {
        return None;
    }

    let closes_1h: Vec<f64> = series.candles_1h.iter().map(|c| c.close).collect();
    let highs_1h: Vec<f64> = series.candles_1h.iter().map(|c| c.high).collect();
    let lows_1h: Vec<f64> = series.candles_1h.iter().map(|c| c.low).collect();
    let volumes_1h: Vec<f64> = series.candles_1h.iter().map(|c| c.volume).collect();
    let closes_15m: Vec<f64> = series.candles_15m.iter().map(|c| c.close).collect();
    let closes_4h: Vec<f64> = series.candles_4h.iter().map(|c| c.close).collect();

    let price = *closes_1h.last()?;
    if price <= 0.0 {
        return None;
    }

    let momentum_short = momentum(&closes_1h, cfg.momentum_lookback_short);
    let momentum_medium = momentum(&closes_1h, cfg.momentum_lookback_medium);
    let momentum_long = momentum(&closes_1h, cfg.momentum_lookback_long);
    let momentum_accel = momentum_acceleration(&closes_1h, cfg.momentum_lookback_short);

    let mut momentum_score =
        momentum_short * 0.5 + momentum_medium * 0.3 + momentum_long * 0.2;
    if momentum_accel > 0.0 {
        momentum_score += momentum_accel * cfg.momentum_accel_weight;
    }

    let rsi_history = rsi(&closes_1h, cfg.rsi_period);
    let rsi_1h = *rsi_history.last()?;
    let rsi_15m = *rsi(&closes_15m, cfg.rsi_period).last()?;
    let rsi_4h = *rsi(&closes_4h, cfg.rsi_period).last()?;

    let ema_fast = *ema(&closes_1h, cfg.ema_fast).last()?;
    let ema_slow = *ema(&closes_1h, cfg.ema_slow).last()?;
    let ema_trend = *ema(&closes_1h, cfg.ema_trend).last()?;

    let macd_signal = macd_cross(&closes_1h);

    let bb_position = match bollinger_bands(&closes_1h, 20, 2.0) {
        Some((upper, _, lower)) if upper > lower => (price - lower) / (upper - lower),
        _ => 0.5,
    };

    let volatility = returns_volatility(&closes_1h, 20);
    let atr_1h = atr(&highs_1h, &lows_1h, &closes_1h, cfg.atr_period);
    let atr_pct = atr_1h / price * 100.0;

    let avg_volume: f64 =
        volumes_1h[volumes_1h.len().saturating_sub(21)..volumes_1h.len() - 1]
            .iter()
            .sum::<f64>()
            / 20.0;
    let volume_ratio = if avg_volume > 0.0 {
        volumes_1h[volumes_1h.len() - 1] / avg_volume
    } else {
        1.0
    };
    let volume_breakout = volume_ratio >= cfg.volume_surge_threshold;

    let adx_value = adx(&highs_1h, &lows_1h, &closes_1h, 14);

    let trend_1h = if ema_fast > ema_slow { Trend::Up } else { Trend::Down };
    let ema_4h = *ema(&closes_4h, cfg.ema_slow).last()?;
    let trend_4h = if *closes_4h.last()? > ema_4h { Trend::Up } else { Trend::Down };
    let overall_trend = if price > ema_trend { Trend::Up } else { Trend::Down };

    let (obv_trend, obv_strength) = obv_trend_reading(&closes_1h, &volumes_1h);
    let (divergence, divergence_strength) = detect_rsi_divergence(&closes_1h, &rsi_history);
    let (pullback_entry, pullback_reason) =
        detect_pullback_entry(&rsi_history, rsi_1h, overall_trend, cfg);

    Some(IndicatorBundle {
        symbol: symbol.to_string(),
        price,
        momentum_short,
        momentum_medium,
        momentum_long,
        momentum_accel,
        momentum_score,
        rsi_1h,
        rsi_15m,
        rsi_4h,
        rsi_history,
        ema_fast,
        ema_slow,
        ema_trend,
        macd_signal,
        bb_position,
        volatility,
        atr: atr_1h,
        atr_pct,
        volume_ratio,
        volume_breakout,
        adx: adx_value,
        trend_1h,
        trend_4h,
        overall_trend,
        obv_trend,
        obv_strength,
        divergence,
        divergence_strength,
        pullback_entry,
        pullback_reason,
    })
}

/// Classify the MACD line against its signal line, flagging fresh crossings.
fn macd_cross(closes: &[f64]) -> MacdSignal {
    let (dif, dea) = macd(closes, 12, 26, 9);
    if dif.len() < 2 || dea.len() < 2 {
        return MacdSignal::Flat;
    }
    let (d1, d0) = (dif[dif.len() - 1], dif[dif.len() - 2]);
    let (e1, e0) = (dea[dea.len() - 1], dea[dea.len() - 2]);

    if d1 > e1 && d0 <= e0 {
        MacdSignal::GoldenCross
    } else if d1 < e1 && d0 >= e0 {
        MacdSignal::DeathCross
    } else if d1 > e1 {
        MacdSignal::Bullish
    } else {
        MacdSignal::Bearish
    }
}

/// OBV trend: direction agrees between OBV vs its EMA and the recent slope.
fn obv_trend_reading(closes: &[f64], volumes: &[f64]) -> (VolumeTrend, f64) {
    if closes.len() < OBV_PERIOD + 1 || volumes.len() < OBV_PERIOD + 1 {
        return (VolumeTrend::Neutral, 0.0);
    }

    let obv_series = obv(closes, volumes);
    if obv_series.len() < OBV_PERIOD {
        return (VolumeTrend::Neutral, 0.0);
    }
    let obv_ema = ema(&obv_series, OBV_PERIOD);

    let recent = obv_series[obv_series.len() - 1];
    let recent_ema = obv_ema[obv_ema.len() - 1];

    let back = 5.min(obv_series.len() - 1);
    let base = obv_series[obv_series.len() - 1 - back];
    let slope = (recent - base) / base.abs().max(1.0);

    if recent > recent_ema && slope > 0.0 {
        (VolumeTrend::Up, (slope.abs() * 10.0).min(1.0))
    } else if recent < recent_ema && slope < 0.0 {
        (VolumeTrend::Down, (slope.abs() * 10.0).min(1.0))
    } else {
        (VolumeTrend::Neutral, 0.0)
    }
}

/// Compare recent vs earlier price and RSI extremes for divergence.
///
/// Bullish: price makes a lower low while RSI makes a higher low.
/// Bearish: price makes a higher high while RSI makes a lower high.
fn detect_rsi_divergence(closes: &[f64], rsi_values: &[f64]) -> (DivergenceKind, f64) {
    let lookback = DIVERGENCE_LOOKBACK;
    if closes.len() < lookback * 2 || rsi_values.len() < lookback * 2 {
        return (DivergenceKind::None, 0.0);
    }

    let recent_closes = &closes[closes.len() - lookback..];
    let recent_rsi = &rsi_values[rsi_values.len() - lookback..];
    let earlier_closes = &closes[closes.len() - lookback * 2..closes.len() - lookback];
    let earlier_rsi = &rsi_values[rsi_values.len() - lookback * 2..rsi_values.len() - lookback];

    let min_of = |s: &[f64]| s.iter().copied().fold(f64::INFINITY, f64::min);
    let max_of = |s: &[f64]| s.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let argmin = |s: &[f64]| {
        s.iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let argmax = |s: &[f64]| {
        s.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0)
    };

    // The extreme must sit in the back half of the recent window to count as
    // a fresh swing point.
    if argmin(recent_closes) > lookback / 2 {
        let current_low = min_of(recent_closes);
        let earlier_low = min_of(earlier_closes);
        let current_rsi_low = min_of(recent_rsi);
        let earlier_rsi_low = min_of(earlier_rsi);

        if current_low < earlier_low && current_rsi_low > earlier_rsi_low && earlier_low > 0.0 {
            let price_diff = (earlier_low - current_low) / earlier_low;
            let rsi_diff = current_rsi_low - earlier_rsi_low;
            let strength = ((price_diff * 100.0 + rsi_diff) / 20.0).min(1.0);
            return (DivergenceKind::Bullish, strength);
        }
    }

    if argmax(recent_closes) > lookback / 2 {
        let current_high = max_of(recent_closes);
        let earlier_high = max_of(earlier_closes);
        let current_rsi_high = max_of(recent_rsi);
        let earlier_rsi_high = max_of(earlier_rsi);

        if current_high > earlier_high && current_rsi_high < earlier_rsi_high && earlier_high > 0.0
        {
            let price_diff = (current_high - earlier_high) / earlier_high;
            let rsi_diff = earlier_rsi_high - current_rsi_high;
            let strength = ((price_diff * 100.0 + rsi_diff) / 20.0).min(1.0);
            return (DivergenceKind::Bearish, strength);
        }
    }

    (DivergenceKind::None, 0.0)
}

/// Pullback entry: RSI dipped from a recent high into the pullback zone
/// while the overall trend is still up.
fn detect_pullback_entry(
    rsi_history: &[f64],
    current_rsi: f64,
    overall_trend: Trend,
    cfg: &StrategyConfig,
) -> (bool, String) {
    if !overall_trend.is_up() || rsi_history.len() < 10 {
        return (false, String::new());
    }

    let recent_high = rsi_history[rsi_history.len() - 10..]
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let dip = recent_high - current_rsi;
    let in_zone =
        current_rsi >= cfg.rsi_pullback_zone.0 && current_rsi <= cfg.rsi_pullback_zone.1;

    if in_zone && dip >= cfg.pullback_rsi_dip {
        (
            true,
            format!("RSI pullback from {recent_high:.1} to {current_rsi:.1}"),
        )
    } else {
        (false, String::new())
    }
}

/// Detect the overall market regime from BTC 4h candles.
///
/// Trend score blends short and medium momentum with the fast/slow EMA
/// relation; thresholds split BULL / NEUTRAL / BEAR.
pub fn detect_regime(btc_candles_4h: &[Candle], cfg: &StrategyConfig) -> Regime {
    if btc_candles_4h.len() < 30 {
        return Regime::Neutral;
    }
    let closes: Vec<f64> = btc_candles_4h.iter().map(|c| c.close).collect();

    let mom_short = momentum(&closes, 6);
    let mom_medium = momentum(&closes, 18);

    let ema_fast = ema(&closes, cfg.ema_fast);
    let ema_slow = ema(&closes, cfg.ema_slow);
    let (Some(fast), Some(slow)) = (ema_fast.last(), ema_slow.last()) else {
        return Regime::Neutral;
    };

    let mut trend_score = mom_short * 0.5 + mom_medium * 0.3;
    if fast > slow {
        trend_score += 1.0;
    } else if fast < slow {
        trend_score -= 1.0;
    }

    if trend_score > cfg.regime_bull_threshold {
        Regime::Bull
    } else if trend_score < cfg.regime_bear_threshold {
        Regime::Bear
    } else {
        Regime::Neutral
    }
}
