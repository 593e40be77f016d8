//! Wire types for the exchange REST API.
//!
//! The exchange quotes every numeric field as a JSON string; decimal fields
//! deserialize through `rust_decimal::serde::str`. Klines arrive as
//! heterogeneous JSON arrays and get a hand-rolled conversion.

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    /// Bar open time in epoch milliseconds
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Convert one kline row: `[openTime, open, high, low, close, volume, ...]`
    /// with prices quoted as strings.
    pub fn from_kline(row: &Value) -> Result<Self> {
        let fields = row
            .as_array()
            .ok_or_else(|| anyhow!("kline row is not an array"))?;
        if fields.len() < 6 {
            return Err(anyhow!("kline row has {} fields, expected 6+", fields.len()));
        }

        let open_time = fields[0]
            .as_i64()
            .ok_or_else(|| anyhow!("kline open time is not an integer"))?;
        let num = |idx: usize| -> Result<f64> {
            fields[idx]
                .as_str()
                .ok_or_else(|| anyhow!("kline field {idx} is not a string"))?
                .parse::<f64>()
                .map_err(|e| anyhow!("kline field {idx}: {e}"))
        };

        Ok(Self {
            open_time,
            open: num(1)?,
            high: num(2)?,
            low: num(3)?,
            close: num(4)?,
            volume: num(5)?,
        })
    }
}

/// One asset's balance from the account endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<Balance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceTicker {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// Market order acknowledgment with fill totals.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub status: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(rename = "cummulativeQuoteQty", with = "rust_decimal::serde::str")]
    pub cumulative_quote_qty: Decimal,
}

impl OrderResponse {
    /// Average fill price, if anything filled.
    pub fn avg_price(&self) -> Option<Decimal> {
        if self.executed_qty.is_zero() {
            return None;
        }
        Some(self.cumulative_quote_qty / self.executed_qty)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub filters: Vec<RawFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFilter {
    pub filter_type: String,
    pub step_size: Option<String>,
    pub min_qty: Option<String>,
    pub min_notional: Option<String>,
}

/// Order-size constraints for one symbol, distilled from the exchange filters.
#[derive(Debug, Clone)]
pub struct SymbolFilters {
    /// Quantity granularity (LOT_SIZE stepSize)
    pub step_size: Decimal,
    /// Smallest sellable quantity (LOT_SIZE minQty)
    pub min_qty: Decimal,
    /// Smallest order value in quote currency (NOTIONAL minNotional)
    pub min_notional: Decimal,
}

impl SymbolFilters {
    pub fn from_symbol_info(info: &SymbolInfo) -> Result<Self> {
        let mut step_size = Decimal::ZERO;
        let mut min_qty = Decimal::ZERO;
        let mut min_notional = Decimal::ZERO;

        for filter in &info.filters {
            match filter.filter_type.as_str() {
                "LOT_SIZE" => {
                    if let Some(s) = &filter.step_size {
                        step_size = s.parse()?;
                    }
                    if let Some(q) = &filter.min_qty {
                        min_qty = q.parse()?;
                    }
                }
                "NOTIONAL" | "MIN_NOTIONAL" => {
                    if let Some(n) = &filter.min_notional {
                        min_notional = n.parse()?;
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            step_size,
            min_qty,
            min_notional,
        })
    }

    /// Round a quantity down to the step grid.
    pub fn round_qty(&self, qty: Decimal) -> Decimal {
        if self.step_size.is_zero() {
            return qty;
        }
        (qty / self.step_size).floor() * self.step_size
    }

    /// Whether a sell of `qty` at `price` would be accepted at all.
    pub fn is_sellable(&self, qty: Decimal, price: Decimal) -> bool {
        let rounded = self.round_qty(qty);
        rounded >= self.min_qty && rounded * price >= self.min_notional
    }

    /// Quantity as a plain string for the order endpoint.
    pub fn format_qty(&self, qty: Decimal) -> String {
        self.round_qty(qty).normalize().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn kline_row_parses() {
        let row = json!([
            1625097600000i64,
            "33500.00",
            "33800.00",
            "33400.00",
            "33750.50",
            "1234.567",
            1625101199999i64,
            "41620000.0",
            8000,
            "600.0",
            "20250000.0",
            "0"
        ]);
        let candle = Candle::from_kline(&row).unwrap();
        assert_eq!(candle.open_time, 1625097600000);
        assert!((candle.close - 33750.50).abs() < 1e-9);
        assert!((candle.volume - 1234.567).abs() < 1e-9);
    }

    #[test]
    fn malformed_kline_is_an_error() {
        assert!(Candle::from_kline(&json!(["not-enough"])).is_err());
        assert!(Candle::from_kline(&json!({"open": 1.0})).is_err());
    }

    #[test]
    fn lot_size_rounding() {
        let filters = SymbolFilters {
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(5),
        };

        assert_eq!(filters.round_qty(dec!(0.123456)), dec!(0.123));
        assert_eq!(filters.format_qty(dec!(0.123456)), "0.123");
        assert!(filters.is_sellable(dec!(0.5), dec!(100)));
        // Rounds to zero: unsellable dust
        assert!(!filters.is_sellable(dec!(0.0004), dec!(100)));
        // Above min qty but below min notional
        assert!(!filters.is_sellable(dec!(0.002), dec!(100)));
    }

    #[test]
    fn order_response_average_price() {
        let resp: OrderResponse = serde_json::from_value(json!({
            "symbol": "BTCUSDT",
            "orderId": 42,
            "status": "FILLED",
            "executedQty": "0.5",
            "cummulativeQuoteQty": "16875.25"
        }))
        .unwrap();
        assert_eq!(resp.avg_price().unwrap(), dec!(33750.5));
    }
}
