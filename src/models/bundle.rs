//! Immutable per-instrument indicator snapshot produced once per cycle.

use serde::{Deserialize, Serialize};

/// Direction of a moving-average trend on one timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
}

impl Trend {
    pub fn is_up(self) -> bool {
        matches!(self, Trend::Up)
    }
}

/// MACD line position relative to its signal line, including fresh crossings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacdSignal {
    /// DIF crossed above DEA this bar
    GoldenCross,
    /// DIF above DEA (no fresh cross)
    Bullish,
    /// DIF below DEA (no fresh cross)
    Bearish,
    /// DIF crossed below DEA this bar
    DeathCross,
    /// Not enough data
    Flat,
}

impl MacdSignal {
    /// Signed weight used by the scorer, mirroring the cross/side tiers.
    pub fn weight(self) -> f64 {
        match self {
            MacdSignal::GoldenCross => 1.0,
            MacdSignal::Bullish => 0.5,
            MacdSignal::Bearish => -0.5,
            MacdSignal::DeathCross => -1.0,
            MacdSignal::Flat => 0.0,
        }
    }
}

/// On-balance-volume trend direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeTrend {
    Up,
    Down,
    Neutral,
}

/// Price/RSI divergence classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceKind {
    Bullish,
    Bearish,
    None,
}

/// Coarse market-direction classification derived from the BTC proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Bull,
    Bear,
    Neutral,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Regime::Bull => "BULL",
            Regime::Bear => "BEAR",
            Regime::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

/// All indicator readings for one instrument at one evaluation cycle.
///
/// Built fresh each cycle from multi-timeframe candles and never mutated.
/// Missing data is handled upstream: the builder returns `None` instead of a
/// partially-filled bundle.
#[derive(Debug, Clone)]
pub struct IndicatorBundle {
    pub symbol: String,
    pub price: f64,

    // Momentum (percentage change over short/medium/long 1h lookbacks)
    pub momentum_short: f64,
    pub momentum_medium: f64,
    pub momentum_long: f64,
    pub momentum_accel: f64,
    /// Weighted blend of the three lookbacks plus the acceleration bonus
    pub momentum_score: f64,

    // RSI across timeframes, plus 1h history for divergence/pullback checks
    pub rsi_1h: f64,
    pub rsi_15m: f64,
    pub rsi_4h: f64,
    pub rsi_history: Vec<f64>,

    // Moving averages (1h)
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub ema_trend: f64,

    pub macd_signal: MacdSignal,

    /// Position inside the Bollinger envelope, 0 = lower band, 1 = upper
    pub bb_position: f64,

    /// Std-dev of 1h returns, in percent
    pub volatility: f64,
    pub atr: f64,
    /// ATR as a percentage of the current price
    pub atr_pct: f64,

    pub volume_ratio: f64,
    pub volume_breakout: bool,

    pub adx: f64,

    pub trend_1h: Trend,
    pub trend_4h: Trend,
    pub overall_trend: Trend,

    pub obv_trend: VolumeTrend,
    pub obv_strength: f64,

    pub divergence: DivergenceKind,
    pub divergence_strength: f64,

    pub pullback_entry: bool,
    pub pullback_reason: String,
}
