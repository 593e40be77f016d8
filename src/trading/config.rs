//! Strategy configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// All strategy tunables: signal windows, entry gates, sizing caps and the
/// position lifecycle thresholds. Percentages are expressed in points
/// (e.g. `3.5` means 3.5%); portfolio ratios are fractions of equity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Short momentum lookback in 1h bars
    pub momentum_lookback_short: usize,

    /// Medium momentum lookback in 1h bars
    pub momentum_lookback_medium: usize,

    /// Long momentum lookback in 1h bars
    pub momentum_lookback_long: usize,

    /// Weight of momentum acceleration inside the blended momentum score
    pub momentum_accel_weight: f64,

    /// RSI period on every timeframe
    pub rsi_period: usize,

    /// Fast EMA period
    pub ema_fast: usize,

    /// Slow EMA period
    pub ema_slow: usize,

    /// Trend-filter EMA period
    pub ema_trend: usize,

    /// ATR period on the 1h timeframe
    pub atr_period: usize,

    /// Volume ratio that counts as a breakout
    pub volume_surge_threshold: f64,

    /// RSI band that qualifies as a pullback entry zone
    pub rsi_pullback_zone: (f64, f64),

    /// Minimum RSI dip from its recent high for a pullback entry
    pub pullback_rsi_dip: f64,

    /// Regime trend-score threshold above which the market is BULL
    pub regime_bull_threshold: f64,

    /// Regime trend-score threshold below which the market is BEAR
    pub regime_bear_threshold: f64,

    /// Minimum composite score to open a position
    pub min_entry_score: f64,

    /// Minimum score in a BEAR regime or against a dual downtrend
    pub defensive_min_entry_score: f64,

    /// Reject entries with 1h RSI above this
    pub rsi_entry_ceiling: f64,

    /// Below this ADX the trend is too weak unless the score is strong
    pub adx_floor: f64,

    /// Reject entries correlated above this with any open position
    pub max_correlation: f64,

    /// Reject entries when bearish divergence strength exceeds this
    pub divergence_block_strength: f64,

    /// Base position size as a fraction of total equity
    pub base_position_pct: Decimal,

    /// Hard cap on a single position as a fraction of equity
    pub max_single_position_pct: Decimal,

    /// Hard cap on total exposure as a fraction of equity
    pub max_total_exposure: Decimal,

    /// Fraction of the free quote balance that may be committed
    pub free_quote_usable: Decimal,

    /// Orders below this quote amount are skipped entirely
    pub min_trade_quote: Decimal,

    /// Per-bar volatility the sizer scales positions toward, in percent
    pub target_vol_pct: f64,

    /// Stop distance as a multiple of the entry ATR%
    pub stop_atr_mult: f64,

    /// Widest stop allowed, in percent
    pub stop_cap_pct: f64,

    /// Age after which a going-nowhere position is cut, in hours
    pub stale_hours: f64,

    /// P&L at or below which a stale position counts as going nowhere
    pub stale_pnl_floor: f64,

    /// Profit ladder: (profit % threshold, fraction of remaining to sell)
    pub profit_ladder: Vec<(f64, f64)>,

    /// Peak profit % at which the trailing stop arms
    pub trail_arm_pnl: f64,

    /// Trailing retracement as a multiple of the entry ATR%
    pub trail_atr_mult: f64,

    /// Tightest the trailing retracement threshold can be capped to, in percent
    pub trail_cap_pct: f64,

    /// Outright take-profit, in percent
    pub take_profit_pct: f64,

    /// 1h RSI at which a profitable position is considered exhausted
    pub rsi_exhaustion: f64,

    /// Minimum gap between rotations, in hours
    pub rotation_cooldown_hours: f64,

    /// Candidate score must beat the weakest holding by at least this
    pub rotation_min_improvement: f64,

    /// Holdings at or above this profit % are never rotated out
    pub rotation_protect_pnl: f64,

    /// Fraction of the freed value reinvested into the replacement
    pub rotation_reinvest: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            momentum_lookback_short: 6,
            momentum_lookback_medium: 24,
            momentum_lookback_long: 72,
            momentum_accel_weight: 0.3,
            rsi_period: 14,
            ema_fast: 8,
            ema_slow: 21,
            ema_trend: 50,
            atr_period: 14,
            volume_surge_threshold: 2.0,
            rsi_pullback_zone: (35.0, 50.0),
            pullback_rsi_dip: 5.0,
            regime_bull_threshold: 0.5,
            regime_bear_threshold: -0.5,
            min_entry_score: 10.0,
            defensive_min_entry_score: 25.0,
            rsi_entry_ceiling: 75.0,
            adx_floor: 15.0,
            max_correlation: 0.85,
            divergence_block_strength: 0.5,
            base_position_pct: dec!(0.20),      // 20% of equity per entry
            max_single_position_pct: dec!(0.30),
            max_total_exposure: dec!(0.65),
            free_quote_usable: dec!(0.95),
            min_trade_quote: dec!(6.0),         // Exchange dust floor
            target_vol_pct: 2.0,
            stop_atr_mult: 2.0,
            stop_cap_pct: 3.5,
            stale_hours: 48.0,
            stale_pnl_floor: -1.0,
            profit_ladder: vec![(3.0, 0.30), (5.0, 0.35), (8.0, 0.50)],
            trail_arm_pnl: 2.0,
            trail_atr_mult: 1.5,
            trail_cap_pct: 3.0,
            take_profit_pct: 12.0,
            rsi_exhaustion: 80.0,
            rotation_cooldown_hours: 6.0,
            rotation_min_improvement: 3.0,
            rotation_protect_pnl: 1.0,
            rotation_reinvest: dec!(0.98),      // Leave room for fees
        }
    }
}
