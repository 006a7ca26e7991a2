use anyhow::{Context, Result};
use chrono::DateTime;
use reqwest::Client;
use serde_json::Value;

use crate::models::Candle;

const DEFAULT_API_BASE: &str = "https://api.binance.com";
const MAX_RETRIES: u32 = 3;

/// REST client for historical OHLCV (Binance-style klines endpoint).
///
/// Used to seed backtests with real data; the streaming paths never go
/// through here.
#[derive(Clone)]
pub struct HistoryClient {
    client: Client,
    base_url: String,
}

impl HistoryClient {
    pub fn new() -> Self {
        Self::with_base(DEFAULT_API_BASE)
    }

    /// Custom API base URL (tests point this at a local mock server)
    pub fn with_base(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("reqwest client with static configuration");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Make an API request with retry on rate limits and server errors
    async fn make_request(&self, url: &str) -> Result<reqwest::Response> {
        for attempt in 1..=MAX_RETRIES {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let backoff_secs = 2u64.pow(attempt);
                        tracing::warn!(
                            "history API returned {}, retrying in {}s (attempt {}/{})",
                            status,
                            backoff_secs,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                        continue;
                    }

                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    anyhow::bail!("history API error ({}): {}", status, error_text);
                }
                Err(e) if attempt < MAX_RETRIES => {
                    let backoff_secs = 2u64.pow(attempt);
                    tracing::warn!(
                        "network error: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                }
                Err(e) => anyhow::bail!("network error after {} retries: {}", MAX_RETRIES, e),
            }
        }

        anyhow::bail!("failed after {} retries", MAX_RETRIES)
    }

    /// Fetch up to `limit` historical candles for a symbol and interval
    pub async fn fetch_ohlcv(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let api_symbol = symbol.replace('/', "").to_uppercase();
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, api_symbol, interval, limit
        );

        tracing::debug!(symbol = %api_symbol, interval, limit, "fetching historical klines");

        let response = self.make_request(&url).await?;
        let rows: Vec<Vec<Value>> = response.json().await.context("Failed to parse klines")?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(Self::parse_kline_row(&row)?);
        }

        tracing::debug!("fetched {} candles for {}", candles.len(), api_symbol);
        Ok(candles)
    }

    fn parse_kline_row(row: &[Value]) -> Result<Candle> {
        if row.len() < 6 {
            anyhow::bail!("kline row too short: {} fields", row.len());
        }

        let open_time_ms = row[0]
            .as_i64()
            .context("kline open time is not an integer")?;
        let timestamp = DateTime::from_timestamp_millis(open_time_ms)
            .context("kline open time out of range")?;

        let field = |i: usize, name: &str| -> Result<f64> {
            row[i]
                .as_str()
                .with_context(|| format!("kline {} is not a string", name))?
                .parse::<f64>()
                .with_context(|| format!("kline {} is not numeric", name))
        };

        Ok(Candle {
            timestamp,
            open: field(1, "open")?,
            high: field(2, "high")?,
            low: field(3, "low")?,
            close: field(4, "close")?,
            volume: field(5, "volume")?,
        })
    }
}

impl Default for HistoryClient {
    fn default() -> Self {
        Self::new()
    }
}
