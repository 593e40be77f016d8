//! Account state derived fresh each cycle from balances and current prices.

use std::collections::HashMap;

use rust_decimal::Decimal;

/// Snapshot of the account for one cycle. Never cached across cycles.
#[derive(Debug, Clone)]
pub struct AccountState {
    /// Total equity valued in the quote currency (free quote + held value)
    pub total_equity: Decimal,
    /// Free quote-currency balance available for new entries
    pub free_quote: Decimal,
    /// Market value per held instrument
    pub position_values: HashMap<String, Decimal>,
    /// Held value / total equity
    pub exposure_ratio: Decimal,
}

impl AccountState {
    pub fn new(free_quote: Decimal, position_values: HashMap<String, Decimal>) -> Self {
        let held: Decimal = position_values.values().copied().sum();
        let total_equity = free_quote + held;
        let exposure_ratio = if total_equity > Decimal::ZERO {
            held / total_equity
        } else {
            Decimal::ZERO
        };

        Self {
            total_equity,
            free_quote,
            position_values,
            exposure_ratio,
        }
    }

    pub fn held_value(&self) -> Decimal {
        self.position_values.values().copied().sum()
    }

    /// Exposure ratio if an additional quote amount were committed.
    pub fn exposure_after(&self, additional: Decimal) -> Decimal {
        if self.total_equity.is_zero() {
            return Decimal::ZERO;
        }
        (self.held_value() + additional) / self.total_equity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn exposure_ratio_from_holdings() {
        let mut values = HashMap::new();
        values.insert("BTCUSDT".to_string(), dec!(300));
        values.insert("ETHUSDT".to_string(), dec!(200));

        let account = AccountState::new(dec!(500), values);

        assert_eq!(account.total_equity, dec!(1000));
        assert_eq!(account.exposure_ratio, dec!(0.5));
        assert_eq!(account.exposure_after(dec!(150)), dec!(0.65));
    }

    #[test]
    fn empty_account_has_zero_exposure() {
        let account = AccountState::new(Decimal::ZERO, HashMap::new());
        assert_eq!(account.exposure_ratio, Decimal::ZERO);
    }
}
