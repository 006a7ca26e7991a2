use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::exchange::ExchangeStream;
use crate::models::MarketEnvelope;
use crate::publisher::{EventPublisher, Topics};

/// Backoff applied after a transient streaming failure before retrying
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Per (exchange, symbol) market-data collector.
///
/// `start` runs three independent streaming loops (trades, order book,
/// OHLCV) until `stop` is called. Each loop blocks on the exchange watch
/// call, wraps the payload in an envelope and publishes it to the topic for
/// that data kind. Failures are logged and retried after a fixed backoff;
/// only `stop` ends the loops. The loops share no state, so a stall in one
/// stream never delays the others.
pub struct MarketDataCollector {
    exchange: Arc<dyn ExchangeStream>,
    exchange_name: String,
    symbol: String,
    timeframe: String,
    publisher: Arc<dyn EventPublisher>,
    topics: Topics,
    running: AtomicBool,
}

impl MarketDataCollector {
    pub fn new(
        exchange: Arc<dyn ExchangeStream>,
        exchange_name: &str,
        symbol: &str,
        timeframe: &str,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let topics = Topics::for_market(exchange_name, symbol);
        Self {
            exchange,
            exchange_name: exchange_name.to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            publisher,
            topics,
            running: AtomicBool::new(false),
        }
    }

    /// Run all three streaming loops until `stop` is called.
    ///
    /// The loops are joined on the caller's task; cancellation is
    /// cooperative, checked at every iteration boundary.
    pub async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            exchange = %self.exchange_name,
            symbol = %self.symbol,
            "starting market data collector"
        );

        tokio::join!(
            self.collect_trades(),
            self.collect_orderbook(),
            self.collect_ohlcv(),
        );

        tracing::info!(
            exchange = %self.exchange_name,
            symbol = %self.symbol,
            "market data collector stopped"
        );
    }

    /// Request a cooperative stop; each loop exits at its next iteration
    /// boundary. In-flight watch calls complete naturally.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn collect_trades(&self) {
        while self.is_running() {
            match self.exchange.watch_trades(&self.symbol).await {
                Ok(trades) => {
                    // Trades arrive as a batch; publish one envelope per
                    // element, preserving arrival order.
                    for tick in trades {
                        self.publisher.send(
                            &self.topics.trade,
                            MarketEnvelope::trade(&self.exchange_name, &self.symbol, tick),
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        exchange = %self.exchange_name,
                        symbol = %self.symbol,
                        "error watching trades: {}",
                        e
                    );
                    sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    async fn collect_orderbook(&self) {
        while self.is_running() {
            match self.exchange.watch_order_book(&self.symbol).await {
                Ok(book) => {
                    self.publisher.send(
                        &self.topics.orderbook,
                        MarketEnvelope::orderbook(&self.exchange_name, &self.symbol, book),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        exchange = %self.exchange_name,
                        symbol = %self.symbol,
                        "error watching orderbook: {}",
                        e
                    );
                    sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    async fn collect_ohlcv(&self) {
        while self.is_running() {
            match self
                .exchange
                .watch_ohlcv(&self.symbol, &self.timeframe)
                .await
            {
                Ok(candle) => {
                    self.publisher.send(
                        &self.topics.ohlcv,
                        MarketEnvelope::ohlcv(&self.exchange_name, &self.symbol, candle),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        exchange = %self.exchange_name,
                        symbol = %self.symbol,
                        "error watching OHLCV: {}",
                        e
                    );
                    sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }
}
