//! Capital rotation: swap the weakest holding for a clearly stronger signal.
//!
//! Rotation is considered before new entries each cycle. The swap is
//! sell-then-buy; the caller must not place the buy if the sell fails.
//! A global cooldown stops the portfolio from churning.

use chrono::{DateTime, Utc};

use super::StrategyConfig;

/// Current-cycle view of one holding, as the coordinator needs it.
#[derive(Debug, Clone)]
pub struct HeldSnapshot {
    pub symbol: String,
    /// This cycle's composite score for the held instrument.
    pub score: f64,
    pub pnl_pct: f64,
}

/// A proposed sell-then-buy swap.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationPlan {
    pub sell_symbol: String,
    pub buy_symbol: String,
    pub sell_score: f64,
    pub buy_score: f64,
}

impl RotationPlan {
    pub fn rationale(&self) -> String {
        format!(
            "rotate {} ({:.1}) into {} ({:.1})",
            self.sell_symbol, self.sell_score, self.buy_symbol, self.buy_score
        )
    }
}

pub struct RotationCoordinator {
    config: StrategyConfig,
    last_rotation: Option<DateTime<Utc>>,
}

impl RotationCoordinator {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            last_rotation: None,
        }
    }

    /// Propose a swap, or `None` when nothing qualifies.
    ///
    /// The weakest unprotected holding is compared against the best
    /// unheld candidate; the candidate must beat it by the configured
    /// margin, and the cooldown must have elapsed.
    pub fn plan(
        &self,
        held: &[HeldSnapshot],
        candidate: Option<(&str, f64)>,
        now: DateTime<Utc>,
    ) -> Option<RotationPlan> {
        let (buy_symbol, buy_score) = candidate?;

        if let Some(last) = self.last_rotation {
            let elapsed = (now - last).num_seconds() as f64 / 3600.0;
            if elapsed < self.config.rotation_cooldown_hours {
                return None;
            }
        }

        // Winners are protected; only rotate out of flat-to-losing holdings
        let weakest = held
            .iter()
            .filter(|h| h.pnl_pct < self.config.rotation_protect_pnl)
            .min_by(|a, b| a.score.total_cmp(&b.score))?;

        if buy_score - weakest.score < self.config.rotation_min_improvement {
            return None;
        }

        Some(RotationPlan {
            sell_symbol: weakest.symbol.clone(),
            buy_symbol: buy_symbol.to_string(),
            sell_score: weakest.score,
            buy_score,
        })
    }

    /// Record a completed swap, starting the cooldown.
    pub fn mark_rotated(&mut self, now: DateTime<Utc>) {
        self.last_rotation = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn held(symbol: &str, score: f64, pnl_pct: f64) -> HeldSnapshot {
        HeldSnapshot {
            symbol: symbol.to_string(),
            score,
            pnl_pct,
        }
    }

    #[test]
    fn rotates_weakest_unprotected_holding() {
        let coord = RotationCoordinator::new(StrategyConfig::default());
        let holdings = vec![
            held("BTCUSDT", 22.0, 0.5),
            held("ETHUSDT", 8.0, -0.8),
            held("SOLUSDT", 15.0, 0.2),
        ];

        let plan = coord
            .plan(&holdings, Some(("AVAXUSDT", 30.0)), Utc::now())
            .unwrap();
        assert_eq!(plan.sell_symbol, "ETHUSDT");
        assert_eq!(plan.buy_symbol, "AVAXUSDT");
    }

    #[test]
    fn winners_are_never_rotated_out() {
        let coord = RotationCoordinator::new(StrategyConfig::default());
        // Weakest score, but up 4%: protected
        let holdings = vec![held("ETHUSDT", 5.0, 4.0), held("BTCUSDT", 20.0, 0.0)];

        let plan = coord.plan(&holdings, Some(("AVAXUSDT", 40.0)), Utc::now());
        // Only BTCUSDT is eligible and 40 - 20 >= 3 clears the bar
        assert_eq!(plan.unwrap().sell_symbol, "BTCUSDT");

        let all_winners = vec![held("ETHUSDT", 5.0, 4.0), held("BTCUSDT", 20.0, 2.5)];
        assert!(coord
            .plan(&all_winners, Some(("AVAXUSDT", 40.0)), Utc::now())
            .is_none());
    }

    #[test]
    fn marginal_improvement_does_not_churn() {
        let coord = RotationCoordinator::new(StrategyConfig::default());
        let holdings = vec![held("ETHUSDT", 18.0, -0.5)];

        // 20.5 - 18.0 = 2.5, under the 3-point margin
        assert!(coord
            .plan(&holdings, Some(("AVAXUSDT", 20.5)), Utc::now())
            .is_none());
        assert!(coord
            .plan(&holdings, Some(("AVAXUSDT", 21.5)), Utc::now())
            .is_some());
    }

    #[test]
    fn cooldown_blocks_back_to_back_swaps() {
        let mut coord = RotationCoordinator::new(StrategyConfig::default());
        let holdings = vec![held("ETHUSDT", 5.0, -1.0)];
        let now = Utc::now();

        assert!(coord.plan(&holdings, Some(("AVAXUSDT", 30.0)), now).is_some());
        coord.mark_rotated(now);

        let soon = now + Duration::hours(2);
        assert!(coord.plan(&holdings, Some(("AVAXUSDT", 30.0)), soon).is_none());

        let later = now + Duration::hours(7);
        assert!(coord
            .plan(&holdings, Some(("AVAXUSDT", 30.0)), later)
            .is_some());
    }
}
