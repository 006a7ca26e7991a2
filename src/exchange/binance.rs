use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::ExchangeStream;
use crate::models::{Candle, OrderBookSnapshot, PriceLevel, TradeSide, TradeTick};
use crate::Result;

const DEFAULT_WS_BASE: &str = "wss://stream.binance.com:9443/ws";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket-backed Binance market-data stream.
///
/// One socket per data kind so a stalled kline stream cannot delay trade or
/// depth delivery. Sockets connect lazily on the first watch call; a read
/// error drops the socket and surfaces the failure so the collector's
/// backoff-and-retry reconnects on the next call.
pub struct BinanceStream {
    ws_base: String,
    trades: Mutex<Option<WsStream>>,
    books: Mutex<Option<WsStream>>,
    klines: Mutex<Option<WsStream>>,
}

#[derive(Debug, Deserialize)]
struct WsTrade {
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    amount: String,
    #[serde(rename = "T")]
    trade_time_ms: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct WsDepth {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct WsKlineEvent {
    k: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time_ms: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    closed: bool,
}

impl BinanceStream {
    pub fn new() -> Self {
        Self::with_base(DEFAULT_WS_BASE)
    }

    /// Custom websocket base URL (testnet: `wss://testnet.binance.vision/ws`)
    pub fn with_base(ws_base: &str) -> Self {
        Self {
            ws_base: ws_base.trim_end_matches('/').to_string(),
            trades: Mutex::new(None),
            books: Mutex::new(None),
            klines: Mutex::new(None),
        }
    }

    /// `BTC/USDT` -> `btcusdt`
    fn stream_symbol(symbol: &str) -> String {
        symbol.replace('/', "").to_lowercase()
    }

    /// Read the next text frame from the socket in `slot`, connecting first
    /// if needed. On read failure the socket is dropped so the next call
    /// reconnects.
    async fn next_text(&self, slot: &Mutex<Option<WsStream>>, topic: &str) -> Result<String> {
        let mut guard = slot.lock().await;

        if guard.is_none() {
            let raw = format!("{}/{}", self.ws_base, topic);
            let url = Url::parse(&raw)?;
            tracing::info!(url = %url, "connecting market data stream");
            let (ws, _resp) = connect_async(url.as_str()).await?;
            *guard = Some(ws);
        }

        let ws = guard.as_mut().ok_or("stream not connected")?;
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(txt))) => return Ok(txt),
                Some(Ok(_)) => continue, // ping/pong/binary frames
                Some(Err(e)) => {
                    *guard = None;
                    return Err(e.into());
                }
                None => {
                    *guard = None;
                    return Err("stream closed by exchange".into());
                }
            }
        }
    }

    fn parse_trade(payload: &str) -> Result<TradeTick> {
        let raw: WsTrade = serde_json::from_str(payload)?;
        let timestamp = DateTime::from_timestamp_millis(raw.trade_time_ms)
            .ok_or("trade timestamp out of range")?;

        Ok(TradeTick {
            price: raw.price.parse()?,
            amount: raw.amount.parse()?,
            // Buyer being the maker means the aggressor sold
            side: if raw.buyer_is_maker {
                TradeSide::Sell
            } else {
                TradeSide::Buy
            },
            timestamp,
        })
    }

    fn parse_depth(payload: &str) -> Result<OrderBookSnapshot> {
        let raw: WsDepth = serde_json::from_str(payload)?;

        let parse_side = |levels: Vec<[String; 2]>| -> Result<Vec<PriceLevel>> {
            levels
                .into_iter()
                .map(|[price, amount]| {
                    Ok(PriceLevel {
                        price: price.parse()?,
                        amount: amount.parse()?,
                    })
                })
                .collect()
        };

        Ok(OrderBookSnapshot {
            bids: parse_side(raw.bids)?,
            asks: parse_side(raw.asks)?,
            timestamp: Utc::now(),
        })
    }

    fn parse_kline(payload: &str) -> Result<Option<Candle>> {
        let raw: WsKlineEvent = serde_json::from_str(payload)?;
        if !raw.k.closed {
            return Ok(None);
        }

        let timestamp = DateTime::from_timestamp_millis(raw.k.open_time_ms)
            .ok_or("kline timestamp out of range")?;

        Ok(Some(Candle {
            timestamp,
            open: raw.k.open.parse()?,
            high: raw.k.high.parse()?,
            low: raw.k.low.parse()?,
            close: raw.k.close.parse()?,
            volume: raw.k.volume.parse()?,
        }))
    }
}

impl Default for BinanceStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeStream for BinanceStream {
    async fn watch_trades(&self, symbol: &str) -> Result<Vec<TradeTick>> {
        let topic = format!("{}@trade", Self::stream_symbol(symbol));
        let payload = self.next_text(&self.trades, &topic).await?;
        Ok(vec![Self::parse_trade(&payload)?])
    }

    async fn watch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot> {
        let topic = format!("{}@depth20@100ms", Self::stream_symbol(symbol));
        let payload = self.next_text(&self.books, &topic).await?;
        Self::parse_depth(&payload)
    }

    async fn watch_ohlcv(&self, symbol: &str, timeframe: &str) -> Result<Candle> {
        let topic = format!("{}@kline_{}", Self::stream_symbol(symbol), timeframe);

        // Intermediate kline updates are skipped; only closed candles are
        // delivered downstream.
        loop {
            let payload = self.next_text(&self.klines, &topic).await?;
            if let Some(candle) = Self::parse_kline(&payload)? {
                return Ok(candle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_symbol() {
        assert_eq!(BinanceStream::stream_symbol("BTC/USDT"), "btcusdt");
        assert_eq!(BinanceStream::stream_symbol("ethusdt"), "ethusdt");
    }

    #[test]
    fn test_parse_trade() {
        let payload = r#"{"e":"trade","E":1700000000123,"s":"BTCUSDT","t":12345,
            "p":"42001.50","q":"0.250","T":1700000000100,"m":false,"M":true}"#;

        let tick = BinanceStream::parse_trade(payload).unwrap();
        assert_eq!(tick.price, 42001.50);
        assert_eq!(tick.amount, 0.250);
        assert_eq!(tick.side, TradeSide::Buy);
        assert_eq!(tick.timestamp.timestamp_millis(), 1700000000100);
    }

    #[test]
    fn test_parse_trade_maker_buyer_means_sell() {
        let payload = r#"{"p":"100.0","q":"1.0","T":1700000000100,"m":true}"#;
        let tick = BinanceStream::parse_trade(payload).unwrap();
        assert_eq!(tick.side, TradeSide::Sell);
    }

    #[test]
    fn test_parse_depth() {
        let payload = r#"{"lastUpdateId":160,
            "bids":[["41999.00","2.5"],["41998.50","1.0"]],
            "asks":[["42000.00","0.7"]]}"#;

        let book = BinanceStream::parse_depth(payload).unwrap();
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks.len(), 1);
        assert_eq!(book.best_bid(), Some(41999.00));
        assert_eq!(book.best_ask(), Some(42000.00));
    }

    #[test]
    fn test_parse_kline_skips_open_candle() {
        let open = r#"{"e":"kline","k":{"t":1700000000000,"o":"100","h":"105",
            "l":"99","c":"104","v":"1000","x":false}}"#;
        assert!(BinanceStream::parse_kline(open).unwrap().is_none());

        let closed = r#"{"e":"kline","k":{"t":1700000000000,"o":"100","h":"105",
            "l":"99","c":"104","v":"1000","x":true}}"#;
        let candle = BinanceStream::parse_kline(closed).unwrap().unwrap();
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.close, 104.0);
    }

    #[test]
    fn test_parse_trade_rejects_garbage() {
        assert!(BinanceStream::parse_trade("not json").is_err());
        assert!(BinanceStream::parse_trade(r#"{"p":"abc","q":"1","T":1,"m":false}"#).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires network access to Binance
    async fn test_watch_trades_live() {
        let stream = BinanceStream::new();
        let trades = stream.watch_trades("BTC/USDT").await.unwrap();

        assert!(!trades.is_empty());
        assert!(trades[0].price > 0.0);
    }
}
