//! Exchange REST integration: market data, account state and spot orders.

pub mod client;
pub mod types;

pub use client::ExchangeClient;
pub use types::{Balance, Candle, OrderResponse, SymbolFilters};
