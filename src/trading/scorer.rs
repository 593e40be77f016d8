//! Multi-factor signal scoring.
//!
//! The score is a deterministic function of the indicator bundle: additive
//! contributions from momentum, RSI posture, MACD, trend alignment, volume,
//! ADX, OBV and divergence. Every contribution also appends a human-readable
//! rationale fragment so the action log explains itself.

use crate::models::{DivergenceKind, IndicatorBundle, VolumeTrend};

use super::StrategyConfig;

/// A scored instrument, ready for ranking.
#[derive(Debug, Clone)]
pub struct ScoredSignal {
    pub symbol: String,
    pub score: f64,
    pub reasons: Vec<String>,
}

impl ScoredSignal {
    pub fn rationale(&self) -> String {
        self.reasons.join(", ")
    }
}

/// Score one instrument's indicator bundle.
pub fn score_bundle(bundle: &IndicatorBundle, cfg: &StrategyConfig) -> ScoredSignal {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    // Momentum dominates the composite
    score += bundle.momentum_score * 3.0;
    if bundle.momentum_score.abs() > 0.5 {
        reasons.push(format!("momentum {:+.2}%", bundle.momentum_score));
    }
    if bundle.momentum_accel > 0.5 {
        score += 5.0;
        reasons.push(format!("accelerating {:+.2}", bundle.momentum_accel));
    }

    // RSI posture: oversold bounce zones score best, overbought is penalized
    let rsi = bundle.rsi_1h;
    if rsi > 30.0 && rsi < 35.0 {
        score += 20.0;
        reasons.push(format!("RSI oversold bounce {rsi:.1}"));
    } else if rsi < 45.0 {
        score += 15.0;
        reasons.push(format!("RSI favorable {rsi:.1}"));
    } else if rsi > 70.0 {
        score -= 10.0;
        reasons.push(format!("RSI overbought {rsi:.1}"));
    } else {
        score += 5.0;
    }
    if bundle.rsi_15m > bundle.rsi_1h && rsi < 45.0 {
        score += 5.0;
        reasons.push("RSI turning up on 15m".to_string());
    }

    score += bundle.macd_signal.weight() * 12.0;
    if bundle.macd_signal.weight() != 0.0 {
        reasons.push(format!("MACD {:?}", bundle.macd_signal));
    }

    let mut aligned = 0;
    if bundle.trend_1h.is_up() {
        score += 5.0;
        aligned += 1;
    }
    if bundle.trend_4h.is_up() {
        score += 5.0;
        aligned += 1;
    }
    if bundle.overall_trend.is_up() {
        score += 5.0;
        aligned += 1;
    }
    if aligned > 0 {
        reasons.push(format!("{aligned}/3 trends up"));
    }

    if bundle.volume_breakout {
        score += 10.0;
        reasons.push(format!("volume breakout x{:.1}", bundle.volume_ratio));
    } else if bundle.volume_ratio > 1.5 {
        score += 7.0;
        reasons.push(format!("volume elevated x{:.1}", bundle.volume_ratio));
    } else if bundle.volume_ratio > 1.0 {
        score += 3.0;
    }

    if bundle.adx > 30.0 {
        score += 5.0;
        reasons.push(format!("ADX strong {:.0}", bundle.adx));
    } else if bundle.adx > 25.0 {
        score += 3.0;
    } else if bundle.adx < cfg.adx_floor {
        score -= 3.0;
        reasons.push(format!("ADX weak {:.0}", bundle.adx));
    }

    match bundle.obv_trend {
        VolumeTrend::Up if bundle.overall_trend.is_up() => {
            score += 5.0;
            reasons.push("OBV confirms".to_string());
        }
        VolumeTrend::Down if bundle.overall_trend.is_up() => {
            score -= 3.0;
            reasons.push("OBV diverging from trend".to_string());
        }
        _ => {}
    }

    match bundle.divergence {
        DivergenceKind::Bullish => {
            score += 5.0 * bundle.divergence_strength;
            reasons.push(format!(
                "bullish divergence {:.2}",
                bundle.divergence_strength
            ));
        }
        DivergenceKind::Bearish => {
            score -= 5.0 * bundle.divergence_strength;
            reasons.push(format!(
                "bearish divergence {:.2}",
                bundle.divergence_strength
            ));
        }
        DivergenceKind::None => {}
    }

    if bundle.pullback_entry {
        score += 5.0;
        reasons.push(bundle.pullback_reason.clone());
    }

    ScoredSignal {
        symbol: bundle.symbol.clone(),
        score,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MacdSignal, Trend};

    fn neutral_bundle(symbol: &str) -> IndicatorBundle {
        IndicatorBundle {
            symbol: symbol.to_string(),
            price: 100.0,
            momentum_short: 0.0,
            momentum_medium: 0.0,
            momentum_long: 0.0,
            momentum_accel: 0.0,
            momentum_score: 0.0,
            rsi_1h: 50.0,
            rsi_15m: 50.0,
            rsi_4h: 50.0,
            rsi_history: vec![50.0; 30],
            ema_fast: 100.0,
            ema_slow: 100.0,
            ema_trend: 100.0,
            macd_signal: MacdSignal::Flat,
            bb_position: 0.5,
            volatility: 1.0,
            atr: 2.0,
            atr_pct: 2.0,
            volume_ratio: 1.0,
            volume_breakout: false,
            adx: 20.0,
            trend_1h: Trend::Down,
            trend_4h: Trend::Down,
            overall_trend: Trend::Down,
            obv_trend: VolumeTrend::Neutral,
            obv_strength: 0.0,
            divergence: DivergenceKind::None,
            divergence_strength: 0.0,
            pullback_entry: false,
            pullback_reason: String::new(),
        }
    }

    #[test]
    fn aligned_momentum_with_pullback_scores_strongly() {
        let mut bundle = neutral_bundle("SOLUSDT");
        bundle.momentum_score = 4.0;
        bundle.momentum_accel = 1.2;
        bundle.rsi_1h = 42.0;
        bundle.rsi_15m = 47.0;
        bundle.macd_signal = MacdSignal::GoldenCross;
        bundle.trend_1h = Trend::Up;
        bundle.trend_4h = Trend::Up;
        bundle.overall_trend = Trend::Up;
        bundle.volume_ratio = 2.3;
        bundle.volume_breakout = true;
        bundle.adx = 32.0;
        bundle.obv_trend = VolumeTrend::Up;
        bundle.pullback_entry = true;
        bundle.pullback_reason = "RSI pullback from 55.0 to 42.0".to_string();

        let signal = score_bundle(&bundle, &StrategyConfig::default());

        // 12 momentum + 5 accel + 15 rsi + 5 rsi-turn + 12 macd + 15 trends
        // + 10 volume + 5 adx + 5 obv + 5 pullback = 89
        assert!((signal.score - 89.0).abs() < 1e-9);
        assert!(signal.rationale().contains("volume breakout"));
        assert!(signal.rationale().contains("RSI pullback"));
    }

    #[test]
    fn overbought_chop_scores_negative() {
        let mut bundle = neutral_bundle("DOGEUSDT");
        bundle.momentum_score = -1.0;
        bundle.rsi_1h = 74.0;
        bundle.macd_signal = MacdSignal::DeathCross;
        bundle.adx = 12.0;

        let signal = score_bundle(&bundle, &StrategyConfig::default());
        // -3 momentum - 10 rsi - 12 macd - 3 adx = -28
        assert!((signal.score + 28.0).abs() < 1e-9);
    }

    #[test]
    fn scoring_is_deterministic() {
        let mut bundle = neutral_bundle("ETHUSDT");
        bundle.momentum_score = 2.5;
        bundle.rsi_1h = 33.0;

        let cfg = StrategyConfig::default();
        let a = score_bundle(&bundle, &cfg);
        let b = score_bundle(&bundle, &cfg);
        assert_eq!(a.score, b.score);
        assert_eq!(a.reasons, b.reasons);
    }

    #[test]
    fn bearish_divergence_subtracts_scaled_by_strength() {
        let mut bundle = neutral_bundle("ETHUSDT");
        bundle.divergence = DivergenceKind::Bearish;
        bundle.divergence_strength = 0.8;

        let base = score_bundle(&neutral_bundle("ETHUSDT"), &StrategyConfig::default());
        let diverged = score_bundle(&bundle, &StrategyConfig::default());
        assert!((base.score - diverged.score - 4.0).abs() < 1e-9);
    }
}
