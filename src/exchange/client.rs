//! Signed REST client for the spot exchange.
//!
//! Credentials come from the environment (`EXCHANGE_API_KEY`,
//! `EXCHANGE_API_SECRET`); `TRADING_MODE=testnet` flips the base URL to the
//! paper-trading endpoint. Signed endpoints carry an HMAC-SHA256 signature
//! of the query string, hex encoded, plus a millisecond timestamp.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{
    AccountInfo, Balance, Candle, ExchangeInfo, OrderResponse, PriceTicker, SymbolFilters,
};

type HmacSha256 = Hmac<Sha256>;

const LIVE_API_BASE: &str = "https://api.binance.com";
const TESTNET_API_BASE: &str = "https://testnet.binance.vision";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const RECV_WINDOW_MS: u32 = 5000;

pub struct ExchangeClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl ExchangeClient {
    /// Build a client from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key =
            std::env::var("EXCHANGE_API_KEY").context("EXCHANGE_API_KEY not set")?;
        let api_secret =
            std::env::var("EXCHANGE_API_SECRET").context("EXCHANGE_API_SECRET not set")?;
        let mode = std::env::var("TRADING_MODE").unwrap_or_else(|_| "testnet".to_string());

        let base_url = match mode.as_str() {
            "live" => LIVE_API_BASE.to_string(),
            _ => TESTNET_API_BASE.to_string(),
        };
        info!(mode = %mode, base_url = %base_url, "Exchange client configured");

        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
            api_secret,
        })
    }

    /// Public-endpoint-only client: no credentials, market data still works.
    /// Signed endpoints will be rejected by the exchange.
    pub fn public() -> Result<Self> {
        let mode = std::env::var("TRADING_MODE").unwrap_or_else(|_| "testnet".to_string());
        let base_url = match mode.as_str() {
            "live" => LIVE_API_BASE.to_string(),
            _ => TESTNET_API_BASE.to_string(),
        };
        Self::with_base_url(base_url, String::new(), String::new())
    }

    /// Create with a custom base URL (for testing).
    pub fn with_base_url(base_url: String, api_key: String, api_secret: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key,
            api_secret,
        })
    }

    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("HMAC key error: {e}"))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, mut params: Vec<(String, String)>) -> Result<String> {
        params.push(("recvWindow".to_string(), RECV_WINDOW_MS.to_string()));
        params.push((
            "timestamp".to_string(),
            Utc::now().timestamp_millis().to_string(),
        ));
        let query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    /// Fetch recent klines for one symbol and interval (e.g. "1h", "15m", "4h").
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval,
            limit.min(1000)
        );
        debug!(url = %url, "Fetching klines");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch klines for {symbol}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Klines request for {symbol} failed: {status} - {body}");
        }

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .context("Failed to parse klines response")?;
        rows.iter().map(Candle::from_kline).collect()
    }

    /// Latest traded price for one symbol.
    pub async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch price for {symbol}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Price request for {symbol} failed: {status} - {body}");
        }

        let ticker: PriceTicker = response
            .json()
            .await
            .context("Failed to parse price ticker")?;
        Ok(ticker.price)
    }

    /// Non-zero balances on the account.
    pub async fn get_balances(&self) -> Result<Vec<Balance>> {
        let query = self.signed_query(Vec::new())?;
        let url = format!("{}/api/v3/account?{}", self.base_url, query);

        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to fetch account")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Account request failed: {status} - {body}");
        }

        let account: AccountInfo = response
            .json()
            .await
            .context("Failed to parse account response")?;
        Ok(account
            .balances
            .into_iter()
            .filter(|b| !b.free.is_zero() || !b.locked.is_zero())
            .collect())
    }

    /// Order-size filters for one symbol.
    pub async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let url = format!(
            "{}/api/v3/exchangeInfo?symbol={}",
            self.base_url, symbol
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch exchange info for {symbol}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Exchange info request for {symbol} failed: {status} - {body}");
        }

        let info: ExchangeInfo = response
            .json()
            .await
            .context("Failed to parse exchange info")?;
        let symbol_info = info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .with_context(|| format!("Symbol {symbol} missing from exchange info"))?;
        SymbolFilters::from_symbol_info(symbol_info)
    }

    /// Market buy spending a fixed quote amount.
    pub async fn market_buy_quote(
        &self,
        symbol: &str,
        quote_amount: Decimal,
    ) -> Result<OrderResponse> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), "BUY".to_string()),
            ("type".to_string(), "MARKET".to_string()),
            (
                "quoteOrderQty".to_string(),
                quote_amount.round_dp(2).normalize().to_string(),
            ),
            (
                "newClientOrderId".to_string(),
                format!("mb-{}", Uuid::new_v4().simple()),
            ),
        ];
        info!(symbol = %symbol, quote = %quote_amount, "Placing market buy");
        self.place_order(params).await
    }

    /// Market sell of a base quantity, rounded to the symbol's lot grid.
    pub async fn market_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
        filters: &SymbolFilters,
    ) -> Result<OrderResponse> {
        let qty = filters.format_qty(quantity);
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), "SELL".to_string()),
            ("type".to_string(), "MARKET".to_string()),
            ("quantity".to_string(), qty.clone()),
            (
                "newClientOrderId".to_string(),
                format!("mb-{}", Uuid::new_v4().simple()),
            ),
        ];
        info!(symbol = %symbol, quantity = %qty, "Placing market sell");
        self.place_order(params).await
    }

    async fn place_order(&self, params: Vec<(String, String)>) -> Result<OrderResponse> {
        let query = self.signed_query(params)?;
        let url = format!("{}/api/v3/order", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(query)
            .send()
            .await
            .context("Failed to place order")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Order rejected: {status} - {body}");
        }

        response.json().await.context("Failed to parse order response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_known_vector() {
        // Reference vector from the exchange API documentation
        let client = ExchangeClient::with_base_url(
            "http://localhost".to_string(),
            "key".to_string(),
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j".to_string(),
        )
        .unwrap();

        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let sig = client.sign(query).unwrap();
        assert_eq!(
            sig,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn signed_query_appends_timestamp_and_signature() {
        let client = ExchangeClient::with_base_url(
            "http://localhost".to_string(),
            "key".to_string(),
            "secret".to_string(),
        )
        .unwrap();

        let query = client
            .signed_query(vec![("symbol".to_string(), "BTCUSDT".to_string())])
            .unwrap();
        assert!(query.starts_with("symbol=BTCUSDT&recvWindow=5000&timestamp="));
        assert!(query.contains("&signature="));
    }
}
