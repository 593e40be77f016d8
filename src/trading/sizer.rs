//! Volatility- and conviction-scaled position sizing.

use rust_decimal::Decimal;

use crate::models::{AccountState, IndicatorBundle, Regime, Trend};

use super::{ScoredSignal, StrategyConfig};

/// Calculator for entry sizes in quote currency.
pub struct PositionSizer {
    config: StrategyConfig,
}

impl PositionSizer {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Quote amount to commit to a new entry. Zero means skip the trade.
    ///
    /// Starts from a fixed fraction of equity, blends a conviction multiplier
    /// with inverse-volatility scaling toward the target per-bar volatility,
    /// then applies regime / trend-alignment / breakout multipliers and the
    /// governor's risk multiplier before the hard caps.
    pub fn entry_quote(
        &self,
        signal: &ScoredSignal,
        bundle: &IndicatorBundle,
        account: &AccountState,
        regime: Regime,
        risk_multiplier: f64,
    ) -> Decimal {
        let base = account.total_equity * self.config.base_position_pct;

        let signal_mult = if signal.score > 30.0 {
            1.6
        } else if signal.score > 20.0 {
            1.3
        } else if signal.score > 10.0 {
            1.0
        } else {
            0.7
        };

        // 60% conviction, 40% inverse-volatility toward the target
        let blend = if bundle.atr_pct > 0.0 {
            signal_mult * 0.6 + (self.config.target_vol_pct / bundle.atr_pct) * 0.4
        } else {
            signal_mult
        };

        let mut mult = blend;
        match regime {
            Regime::Bear => mult *= 0.5,
            Regime::Neutral => mult *= 0.8,
            Regime::Bull => {}
        }
        if bundle.trend_1h == Trend::Up && bundle.trend_4h == Trend::Up {
            mult *= 1.1;
        } else if bundle.trend_1h == Trend::Down && bundle.trend_4h == Trend::Down {
            mult *= 0.5;
        }
        if bundle.volume_breakout && bundle.momentum_short > 0.0 {
            mult *= 1.15;
        }
        mult *= risk_multiplier;

        let sized = base * Decimal::try_from(mult).unwrap_or(Decimal::ZERO);
        self.apply_constraints(sized, account)
    }

    /// Hard caps: single-position limit, total-exposure limit, free balance.
    fn apply_constraints(&self, size: Decimal, account: &AccountState) -> Decimal {
        let mut final_size = size;

        let max_single = account.total_equity * self.config.max_single_position_pct;
        final_size = final_size.min(max_single);

        let max_total = account.total_equity * self.config.max_total_exposure;
        let remaining = max_total - account.held_value();
        if remaining <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        final_size = final_size.min(remaining);

        final_size = final_size.min(account.free_quote * self.config.free_quote_usable);

        if final_size < self.config.min_trade_quote {
            return Decimal::ZERO;
        }
        final_size
    }
}
