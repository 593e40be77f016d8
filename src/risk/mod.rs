//! Portfolio risk governor: drawdown and daily-loss circuit breakers.
//!
//! The governor watches an equity history it records once per cycle. Its
//! verdict gates new entries and rotation only; exit evaluation always runs,
//! halted or not, so losing positions can still be closed out.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Circuit-breaker thresholds, in percentage points of equity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Drawdown from the retained equity peak that halts trading
    pub max_drawdown_pct: f64,

    /// Loss since the start of the UTC day that halts trading
    pub daily_loss_limit_pct: f64,

    /// Equity snapshots retained for drawdown tracking
    pub equity_retention: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: 12.0,
            daily_loss_limit_pct: 5.0,
            equity_retention: 2000,
        }
    }
}

/// Graduated posture derived from how close the breakers are to tripping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Normal,
    Cautious,
    Defensive,
}

impl RiskLevel {
    /// Position-size multiplier applied by the sizer.
    pub fn multiplier(&self) -> f64 {
        match self {
            RiskLevel::Normal => 1.0,
            RiskLevel::Cautious => 0.5,
            RiskLevel::Defensive => 0.2,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Normal => "NORMAL",
            RiskLevel::Cautious => "CAUTIOUS",
            RiskLevel::Defensive => "DEFENSIVE",
        };
        write!(f, "{s}")
    }
}

/// This cycle's risk verdict.
#[derive(Debug, Clone)]
pub struct RiskState {
    pub drawdown_pct: f64,
    pub daily_pnl_pct: f64,
    pub level: RiskLevel,
    /// `Some(reason)` when a circuit breaker has tripped.
    pub halt: Option<String>,
}

impl RiskState {
    pub fn halted(&self) -> bool {
        self.halt.is_some()
    }
}

pub struct RiskGovernor {
    config: RiskConfig,
    equity_history: Vec<(DateTime<Utc>, Decimal)>,
    day_start_equity: Option<Decimal>,
    current_day: Option<NaiveDate>,
}

impl RiskGovernor {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            equity_history: Vec::new(),
            day_start_equity: None,
            current_day: None,
        }
    }

    /// Reload persisted equity snapshots after a restart, oldest first.
    /// The day baseline is rebuilt from the newest snapshot's UTC day.
    pub fn restore_history(&mut self, history: Vec<(DateTime<Utc>, Decimal)>) {
        self.equity_history = history;
        if self.equity_history.len() > self.config.equity_retention {
            let excess = self.equity_history.len() - self.config.equity_retention;
            self.equity_history.drain(..excess);
        }

        if let Some(&(last_ts, _)) = self.equity_history.last() {
            let day = last_ts.date_naive();
            self.current_day = Some(day);
            self.day_start_equity = self
                .equity_history
                .iter()
                .find(|(ts, _)| ts.date_naive() == day)
                .map(|(_, e)| *e);
        }
    }

    /// Record the cycle's equity and roll the day baseline on a UTC day change.
    pub fn record_snapshot(&mut self, now: DateTime<Utc>, equity: Decimal) {
        let day = now.date_naive();
        if self.current_day != Some(day) {
            self.current_day = Some(day);
            self.day_start_equity = Some(equity);
        }

        self.equity_history.push((now, equity));
        if self.equity_history.len() > self.config.equity_retention {
            let excess = self.equity_history.len() - self.config.equity_retention;
            self.equity_history.drain(..excess);
        }
    }

    fn peak_equity(&self) -> Option<Decimal> {
        self.equity_history.iter().map(|(_, e)| *e).max()
    }

    /// Evaluate the breakers against current equity.
    pub fn assess(&self, equity: Decimal) -> RiskState {
        let drawdown_pct = match self.peak_equity() {
            Some(peak) if peak > Decimal::ZERO && equity < peak => {
                ((peak - equity) / peak * Decimal::from(100))
                    .to_f64()
                    .unwrap_or(0.0)
            }
            _ => 0.0,
        };

        let daily_pnl_pct = match self.day_start_equity {
            Some(start) if start > Decimal::ZERO => ((equity - start) / start
                * Decimal::from(100))
            .to_f64()
            .unwrap_or(0.0),
            _ => 0.0,
        };
        let daily_loss = (-daily_pnl_pct).max(0.0);

        let halt = if drawdown_pct >= self.config.max_drawdown_pct {
            Some(format!(
                "drawdown {drawdown_pct:.1}% breached the {:.1}% limit",
                self.config.max_drawdown_pct
            ))
        } else if daily_loss >= self.config.daily_loss_limit_pct {
            Some(format!(
                "daily loss {daily_loss:.1}% breached the {:.1}% limit",
                self.config.daily_loss_limit_pct
            ))
        } else {
            None
        };

        let level = if halt.is_some()
            || drawdown_pct >= self.config.max_drawdown_pct * 0.8
        {
            RiskLevel::Defensive
        } else if drawdown_pct >= self.config.max_drawdown_pct * 0.5
            || daily_loss >= self.config.daily_loss_limit_pct * 0.5
        {
            RiskLevel::Cautious
        } else {
            RiskLevel::Normal
        };

        RiskState {
            drawdown_pct,
            daily_pnl_pct,
            level,
            halt,
        }
    }

    pub fn history(&self) -> &[(DateTime<Utc>, Decimal)] {
        &self.equity_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn governor_with_peak(peak: Decimal) -> RiskGovernor {
        let mut gov = RiskGovernor::new(RiskConfig::default());
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        gov.record_snapshot(t0, dec!(900));
        gov.record_snapshot(t0 + Duration::hours(1), peak);
        gov
    }

    #[test]
    fn drawdown_breach_halts_trading() {
        let gov = governor_with_peak(dec!(1000));

        // 15% off the peak, past the 12% breaker
        let state = gov.assess(dec!(850));
        assert!((state.drawdown_pct - 15.0).abs() < 1e-9);
        assert!(state.halted());
        assert_eq!(state.level, RiskLevel::Defensive);

        // 10% off the peak: no halt, but defensive posture (>= 80% of limit)
        let state = gov.assess(dec!(900));
        assert!(!state.halted());
        assert_eq!(state.level, RiskLevel::Defensive);
    }

    #[test]
    fn daily_loss_breach_halts_trading() {
        let mut gov = RiskGovernor::new(RiskConfig::default());
        let morning = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        gov.record_snapshot(morning, dec!(1000));

        let state = gov.assess(dec!(940));
        assert!(state.halted());
        assert!(state.halt.unwrap().contains("daily loss"));
    }

    #[test]
    fn day_boundary_resets_the_daily_baseline() {
        let mut gov = RiskGovernor::new(RiskConfig::default());
        let day1 = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        gov.record_snapshot(day1, dec!(1000));
        gov.record_snapshot(day1 + Duration::hours(2), dec!(945));

        // Down 5.5% intraday: halted
        assert!(gov.assess(dec!(945)).halted());

        // Next UTC day the baseline resets to the opening equity
        let day2 = Utc.with_ymd_and_hms(2025, 6, 2, 0, 5, 0).unwrap();
        gov.record_snapshot(day2, dec!(945));
        let state = gov.assess(dec!(940));
        assert!(!state.halted());
        assert!(state.daily_pnl_pct > -1.0);
    }

    #[test]
    fn graduated_posture_shrinks_sizing() {
        let gov = governor_with_peak(dec!(1000));

        // 7% drawdown: cautious
        let state = gov.assess(dec!(930));
        assert_eq!(state.level, RiskLevel::Cautious);
        assert_eq!(state.level.multiplier(), 0.5);

        // 2% drawdown: normal
        let state = gov.assess(dec!(980));
        assert_eq!(state.level, RiskLevel::Normal);
        assert_eq!(state.level.multiplier(), 1.0);
    }

    #[test]
    fn history_is_bounded() {
        let mut gov = RiskGovernor::new(RiskConfig {
            equity_retention: 10,
            ..Default::default()
        });
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        for i in 0..50 {
            gov.record_snapshot(t0 + Duration::minutes(i), dec!(1000));
        }
        assert_eq!(gov.history().len(), 10);
    }

    #[test]
    fn restored_history_keeps_the_drawdown_peak() {
        let mut gov = RiskGovernor::new(RiskConfig::default());
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        gov.restore_history(vec![
            (t0, dec!(950)),
            (t0 + Duration::hours(1), dec!(1000)),
            (t0 + Duration::hours(2), dec!(970)),
        ]);

        let state = gov.assess(dec!(860));
        assert!((state.drawdown_pct - 14.0).abs() < 1e-9);
        assert!(state.halted());
    }
}
