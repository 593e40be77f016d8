//! Position lifecycle: exit evaluation and entry validation.
//!
//! Exit rules are evaluated in a fixed priority order and the first hit wins.
//! Protective exits (stop loss, stale cut) outrank profit-taking, which
//! outranks signal-quality exits. Exit evaluation runs every cycle for every
//! open position, including while the risk governor has trading halted; the
//! halt only vetoes new entries and rotation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{
    DivergenceKind, IndicatorBundle, MacdSignal, Position, Regime, Trend, VolumeTrend,
};

use super::{ScoredSignal, StrategyConfig};

/// What to do with an open position this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub reason: String,
    /// Fraction of the remaining quantity to sell; 1.0 is a full exit.
    pub portion: f64,
}

impl ExitDecision {
    fn full(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            portion: 1.0,
        }
    }

    fn partial(reason: impl Into<String>, portion: f64) -> Self {
        Self {
            reason: reason.into(),
            portion,
        }
    }

    pub fn is_full(&self) -> bool {
        self.portion >= 1.0
    }
}

/// Everything entry validation needs beyond the signal itself.
#[derive(Debug, Clone)]
pub struct EntryContext {
    /// Governor halt: vetoes every entry regardless of signal quality.
    pub halted: bool,
    pub regime: Regime,
    /// Highest pairwise return correlation against any open position.
    pub max_open_correlation: Option<(String, f64)>,
}

/// Applies the exit priority chain and the entry gates.
pub struct LifecycleManager {
    config: StrategyConfig,
}

impl LifecycleManager {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Evaluate one open position against current market data.
    ///
    /// Updates the high-water mark first, then walks the priority chain.
    /// Returns `None` to keep holding.
    pub fn evaluate_exit(
        &self,
        position: &mut Position,
        bundle: &IndicatorBundle,
        regime: Regime,
        now: DateTime<Utc>,
    ) -> Option<ExitDecision> {
        let price = Decimal::try_from(bundle.price).ok()?;
        if price <= Decimal::ZERO {
            return None;
        }

        position.observe_price(price);
        let pnl = position.pnl_pct(price);

        // 1. Volatility-scaled stop loss, capped at the widest allowed stop
        let stop_pct = (self.config.stop_atr_mult * position.entry_atr_pct)
            .min(self.config.stop_cap_pct);
        if pnl <= -stop_pct {
            return Some(ExitDecision::full(format!(
                "stop loss {pnl:.2}% (stop at -{stop_pct:.2}%)"
            )));
        }

        // 2. Stale position going nowhere
        let age = position.age_hours(now);
        if age >= self.config.stale_hours && pnl <= self.config.stale_pnl_floor {
            return Some(ExitDecision::full(format!(
                "stale after {age:.0}h at {pnl:.2}%"
            )));
        }

        // 3. Profit ladder: lowest untriggered rung that the profit reaches
        for (idx, &(threshold, portion)) in self.config.profit_ladder.iter().enumerate() {
            if pnl >= threshold && position.mark_level_triggered(idx) {
                return Some(ExitDecision::partial(
                    format!("profit ladder {threshold:.1}% hit at {pnl:.2}%"),
                    portion,
                ));
            }
        }

        // 4. Trailing stop, armed only while the profit clears the threshold;
        // the width is pinned to the volatility captured at entry
        if pnl > self.config.trail_arm_pnl {
            let trail_pct = (self.config.trail_atr_mult * position.entry_atr_pct)
                .min(self.config.trail_cap_pct);
            let retracement = position.retracement_pct(price);
            if retracement > trail_pct {
                return Some(ExitDecision::full(format!(
                    "trailing stop: {retracement:.2}% off the high (limit {trail_pct:.2}%)"
                )));
            }
        }

        // 5. Outright take-profit
        if pnl >= self.config.take_profit_pct {
            return Some(ExitDecision::full(format!("take profit at {pnl:.2}%")));
        }

        // 6. Signal-quality exits, only while profitable
        if bundle.rsi_1h >= self.config.rsi_exhaustion && pnl > 0.0 {
            return Some(ExitDecision::full(format!(
                "RSI exhaustion {:.1}",
                bundle.rsi_1h
            )));
        }
        if bundle.macd_signal == MacdSignal::DeathCross && pnl > 1.0 {
            return Some(ExitDecision::full("MACD death cross"));
        }
        if bundle.momentum_short < -3.0 && pnl > 0.0 {
            return Some(ExitDecision::full(format!(
                "momentum reversal {:.2}%",
                bundle.momentum_short
            )));
        }
        if regime == Regime::Bear
            && bundle.trend_1h == Trend::Down
            && bundle.trend_4h == Trend::Down
            && pnl > 0.0
        {
            return Some(ExitDecision::full("bear regime with dual downtrend"));
        }
        if bundle.divergence == DivergenceKind::Bearish
            && bundle.divergence_strength > 0.6
            && pnl > 2.0
        {
            return Some(ExitDecision::full(format!(
                "bearish divergence {:.2}",
                bundle.divergence_strength
            )));
        }

        None
    }

    /// Gate a candidate entry. `Err` carries the rejection reason.
    pub fn validate_entry(
        &self,
        signal: &ScoredSignal,
        bundle: &IndicatorBundle,
        ctx: &EntryContext,
    ) -> Result<(), String> {
        if ctx.halted {
            return Err("risk halt active".to_string());
        }

        if signal.score < self.config.min_entry_score {
            return Err(format!("score {:.1} below minimum", signal.score));
        }

        if ctx.regime == Regime::Bear && signal.score < self.config.defensive_min_entry_score {
            return Err(format!(
                "score {:.1} too weak for a bear regime",
                signal.score
            ));
        }

        if bundle.trend_1h == Trend::Down
            && bundle.trend_4h == Trend::Down
            && signal.score < self.config.defensive_min_entry_score
        {
            return Err("dual downtrend without an exceptional score".to_string());
        }

        if bundle.rsi_1h > self.config.rsi_entry_ceiling {
            return Err(format!("RSI {:.1} too hot to chase", bundle.rsi_1h));
        }

        if bundle.momentum_short < -1.0 {
            return Err(format!(
                "short momentum negative {:.2}%",
                bundle.momentum_short
            ));
        }

        if bundle.adx < self.config.adx_floor && signal.score < 20.0 {
            return Err(format!("trendless (ADX {:.0}) with a modest score", bundle.adx));
        }

        if let Some((symbol, corr)) = &ctx.max_open_correlation {
            if *corr > self.config.max_correlation {
                return Err(format!("correlated {corr:.2} with open {symbol}"));
            }
        }

        if bundle.obv_trend == VolumeTrend::Down && bundle.momentum_short < 1.0 {
            return Err("volume flowing out without momentum".to_string());
        }

        if bundle.divergence == DivergenceKind::Bearish
            && bundle.divergence_strength > self.config.divergence_block_strength
        {
            return Err(format!(
                "bearish divergence {:.2}",
                bundle.divergence_strength
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bundle_at(price: f64) -> IndicatorBundle {
        IndicatorBundle {
            symbol: "BTCUSDT".to_string(),
            price,
            momentum_short: 1.0,
            momentum_medium: 1.0,
            momentum_long: 1.0,
            momentum_accel: 0.0,
            momentum_score: 1.0,
            rsi_1h: 55.0,
            rsi_15m: 55.0,
            rsi_4h: 55.0,
            rsi_history: vec![50.0; 30],
            ema_fast: price,
            ema_slow: price,
            ema_trend: price,
            macd_signal: MacdSignal::Bullish,
            bb_position: 0.5,
            volatility: 1.0,
            atr: price * 0.02,
            atr_pct: 2.0,
            volume_ratio: 1.2,
            volume_breakout: false,
            adx: 25.0,
            trend_1h: Trend::Up,
            trend_4h: Trend::Up,
            overall_trend: Trend::Up,
            obv_trend: VolumeTrend::Neutral,
            obv_strength: 0.0,
            divergence: DivergenceKind::None,
            divergence_strength: 0.0,
            pullback_entry: false,
            pullback_reason: String::new(),
        }
    }

    fn open_position(entry: Decimal, entry_atr_pct: f64) -> Position {
        Position::new("BTCUSDT".to_string(), dec!(1), entry, entry_atr_pct, Utc::now())
    }

    fn manager() -> LifecycleManager {
        LifecycleManager::new(StrategyConfig::default())
    }

    fn signal(score: f64) -> ScoredSignal {
        ScoredSignal {
            symbol: "BTCUSDT".to_string(),
            score,
            reasons: Vec::new(),
        }
    }

    fn open_ctx() -> EntryContext {
        EntryContext {
            halted: false,
            regime: Regime::Bull,
            max_open_correlation: None,
        }
    }

    #[test]
    fn stop_loss_scales_with_entry_volatility() {
        let mgr = manager();
        // Calm entry: stop at 2 x 1.0% = 2.0%
        let mut calm = open_position(dec!(100), 1.0);
        let exit = mgr
            .evaluate_exit(&mut calm, &bundle_at(97.9), Regime::Bull, Utc::now())
            .unwrap();
        assert!(exit.is_full());
        assert!(exit.reason.contains("stop loss"));

        // Wilder entry: stop at min(2 x 3.0%, 3.5%) = 3.5%; -2.1% holds on
        let mut wild = open_position(dec!(100), 3.0);
        assert!(mgr
            .evaluate_exit(&mut wild, &bundle_at(97.9), Regime::Bull, Utc::now())
            .is_none());
        let exit = mgr
            .evaluate_exit(&mut wild, &bundle_at(96.4), Regime::Bull, Utc::now())
            .unwrap();
        assert!(exit.reason.contains("stop loss"));
    }

    #[test]
    fn profit_ladder_fires_each_rung_once() {
        let mgr = manager();
        let mut pos = open_position(dec!(100), 2.0);

        // First rung at +3%
        let exit = mgr
            .evaluate_exit(&mut pos, &bundle_at(103.5), Regime::Bull, Utc::now())
            .unwrap();
        assert!((exit.portion - 0.30).abs() < 1e-9);
        pos.reduce(dec!(0.3));

        // Same profit again: rung already spent, no repeat
        assert!(mgr
            .evaluate_exit(&mut pos, &bundle_at(103.5), Regime::Bull, Utc::now())
            .is_none());

        // +5.5% reaches the second rung
        let exit = mgr
            .evaluate_exit(&mut pos, &bundle_at(105.5), Regime::Bull, Utc::now())
            .unwrap();
        assert!((exit.portion - 0.35).abs() < 1e-9);
    }

    #[test]
    fn trailing_stop_arms_once_in_profit() {
        let mgr = manager();
        let mut pos = open_position(dec!(100), 2.0);
        // Spend the first two ladder rungs on the way up
        for price in [103.5, 106.0] {
            let exit = mgr
                .evaluate_exit(&mut pos, &bundle_at(price), Regime::Bull, Utc::now())
                .unwrap();
            assert!(!exit.is_full());
        }

        // Peak 106, trail threshold = min(1.5 x 2.0%, 3.0%) = 3.0%.
        // 103.5 is 2.36% off the high: holds (ladder rungs both spent).
        assert!(mgr
            .evaluate_exit(&mut pos, &bundle_at(103.5), Regime::Bull, Utc::now())
            .is_none());

        // 102.5 is 3.3% off the high: trailing stop fires as a full exit
        let exit = mgr
            .evaluate_exit(&mut pos, &bundle_at(102.5), Regime::Bull, Utc::now())
            .unwrap();
        assert!(exit.is_full());
        assert!(exit.reason.contains("trailing"));
    }

    #[test]
    fn trailing_width_is_pinned_to_entry_volatility() {
        let mgr = manager();
        let mut pos = open_position(dec!(100), 1.0);
        pos.observe_price(dec!(105));

        // ATR has since spiked to 4%, but the trail stays at
        // min(1.5 x 1.0%, 3.0%) = 1.5% from the calm entry
        let mut bundle = bundle_at(102.9);
        bundle.atr_pct = 4.0;
        let exit = mgr
            .evaluate_exit(&mut pos, &bundle, Regime::Bull, Utc::now())
            .unwrap();
        assert!(exit.is_full());
        assert!(exit.reason.contains("trailing"));
    }

    #[test]
    fn trailing_stop_never_fires_at_a_loss() {
        let mgr = manager();
        let mut pos = open_position(dec!(100), 2.0);
        pos.observe_price(dec!(104.5));

        // 4.78% off the high, but down 0.5% overall: the retracement alone
        // must not exit; only the hard stop owns losing positions
        assert!(mgr
            .evaluate_exit(&mut pos, &bundle_at(99.5), Regime::Bull, Utc::now())
            .is_none());
    }

    #[test]
    fn stop_loss_outranks_profit_ladder() {
        let mgr = manager();
        let mut pos = open_position(dec!(100), 1.0);
        pos.observe_price(dec!(104));

        // Price collapsed through the stop; ladder rungs are irrelevant now
        let exit = mgr
            .evaluate_exit(&mut pos, &bundle_at(97.5), Regime::Bull, Utc::now())
            .unwrap();
        assert!(exit.is_full());
        assert!(exit.reason.contains("stop loss"));
    }

    #[test]
    fn stale_position_is_cut_only_when_losing() {
        let mgr = manager();
        let opened = Utc::now() - chrono::Duration::hours(50);
        let mut pos = Position::new("BTCUSDT".to_string(), dec!(1), dec!(100), 2.0, opened);

        let exit = mgr
            .evaluate_exit(&mut pos, &bundle_at(98.8), Regime::Bull, Utc::now())
            .unwrap();
        assert!(exit.reason.contains("stale"));

        // Same age but flat-to-positive: stays on
        let mut winner = Position::new("ETHUSDT".to_string(), dec!(1), dec!(100), 2.0, opened);
        assert!(mgr
            .evaluate_exit(&mut winner, &bundle_at(100.5), Regime::Bull, Utc::now())
            .is_none());
    }

    #[test]
    fn take_profit_closes_the_remainder() {
        let mgr = manager();
        let mut pos = open_position(dec!(100), 2.0);
        for idx in 0..3 {
            pos.mark_level_triggered(idx);
        }

        let exit = mgr
            .evaluate_exit(&mut pos, &bundle_at(112.5), Regime::Bull, Utc::now())
            .unwrap();
        assert!(exit.is_full());
        assert!(exit.reason.contains("take profit"));
    }

    #[test]
    fn momentum_reversal_exits_only_in_profit() {
        let mgr = manager();
        let mut bundle = bundle_at(101.0);
        bundle.momentum_short = -4.0;
        bundle.momentum_score = -4.0;

        let mut winner = open_position(dec!(100), 2.0);
        let exit = mgr
            .evaluate_exit(&mut winner, &bundle, Regime::Bull, Utc::now())
            .unwrap();
        assert!(exit.reason.contains("momentum reversal"));

        // At a small loss the stop owns the decision, not the signal exit
        let mut loser = open_position(dec!(102), 2.0);
        assert!(mgr
            .evaluate_exit(&mut loser, &bundle, Regime::Bull, Utc::now())
            .is_none());
    }

    #[test]
    fn entry_rejected_while_halted_regardless_of_score() {
        let mgr = manager();
        let bundle = bundle_at(100.0);
        let ctx = EntryContext {
            halted: true,
            ..open_ctx()
        };

        let err = mgr.validate_entry(&signal(95.0), &bundle, &ctx).unwrap_err();
        assert!(err.contains("halt"));

        // Same signal with the halt lifted passes
        assert!(mgr.validate_entry(&signal(95.0), &bundle, &open_ctx()).is_ok());
    }

    #[test]
    fn bear_regime_raises_the_entry_bar() {
        let mgr = manager();
        let bundle = bundle_at(100.0);
        let ctx = EntryContext {
            regime: Regime::Bear,
            ..open_ctx()
        };

        assert!(mgr.validate_entry(&signal(18.0), &bundle, &ctx).is_err());
        assert!(mgr.validate_entry(&signal(28.0), &bundle, &ctx).is_ok());
        // The same modest score is fine in a bull regime
        assert!(mgr.validate_entry(&signal(18.0), &bundle, &open_ctx()).is_ok());
    }

    #[test]
    fn correlated_entries_are_rejected() {
        let mgr = manager();
        let bundle = bundle_at(100.0);
        let ctx = EntryContext {
            max_open_correlation: Some(("ETHUSDT".to_string(), 0.92)),
            ..open_ctx()
        };

        let err = mgr.validate_entry(&signal(40.0), &bundle, &ctx).unwrap_err();
        assert!(err.contains("ETHUSDT"));
    }

    #[test]
    fn overheated_or_fading_entries_are_rejected() {
        let mgr = manager();

        let mut hot = bundle_at(100.0);
        hot.rsi_1h = 78.0;
        assert!(mgr.validate_entry(&signal(40.0), &hot, &open_ctx()).is_err());

        let mut fading = bundle_at(100.0);
        fading.momentum_short = -1.5;
        assert!(mgr
            .validate_entry(&signal(40.0), &fading, &open_ctx())
            .is_err());

        let mut diverging = bundle_at(100.0);
        diverging.divergence = DivergenceKind::Bearish;
        diverging.divergence_strength = 0.7;
        assert!(mgr
            .validate_entry(&signal(40.0), &diverging, &open_ctx())
            .is_err());
    }
}
