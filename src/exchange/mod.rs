// Exchange capability: streaming market data sources
pub mod binance;
pub mod sim;

use async_trait::async_trait;

use crate::models::{Candle, OrderBookSnapshot, TradeTick};
use crate::Result;

pub use binance::BinanceStream;
pub use sim::SimExchange;

/// Streaming market-data capability of an exchange.
///
/// Each method suspends until the exchange delivers new data and returns an
/// error on connectivity failure. Callers (the collector loops) own retry and
/// backoff; implementations only need to surface the failure.
#[async_trait]
pub trait ExchangeStream: Send + Sync {
    /// Next batch of executed trades, in exchange arrival order
    async fn watch_trades(&self, symbol: &str) -> Result<Vec<TradeTick>>;

    /// Next order book snapshot
    async fn watch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot>;

    /// Next closed candle for the given timeframe
    async fn watch_ohlcv(&self, symbol: &str, timeframe: &str) -> Result<Candle>;
}
