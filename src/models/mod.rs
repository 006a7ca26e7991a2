use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Static configuration of a trading bot.
///
/// Created once at provisioning and immutable while the engine runs. One bot
/// maps to one live engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: Uuid,
    pub name: String,
    pub dry_run: bool,
    pub leverage: f64,
    pub hedge_mode: bool,
    pub exclusive_mode: bool,
    pub timeframe: String,
    pub symbol: String,
    pub exchange: String,
    pub cash: f64,
    pub commission: f64,
    pub strategy_name: String,
}

impl Bot {
    /// Example bot matching the default provisioning values
    pub fn example() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "example".to_string(),
            dry_run: true,
            leverage: 1.0,
            hedge_mode: true,
            exclusive_mode: true,
            timeframe: "1m".to_string(),
            symbol: "BTC/USDT".to_string(),
            exchange: "binance".to_string(),
            cash: 1_000_000.0,
            commission: 0.001,
            strategy_name: "sma_cross".to_string(),
        }
    }
}

/// A single executed trade reported by the exchange stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeTick {
    pub price: f64,
    pub amount: f64,
    pub side: TradeSide,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One price level of an order book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub amount: f64,
}

/// Top-of-book snapshot delivered by the order book stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: DateTime<Utc>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price, if both sides are present
    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Market data kind, doubling as the envelope type tag
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Trade,
    Orderbook,
    Ohlcv,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Trade => "trade",
            DataKind::Orderbook => "orderbook",
            DataKind::Ohlcv => "ohlcv",
        }
    }
}

/// Kind-specific envelope payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarketPayload {
    Trade(TradeTick),
    Orderbook(OrderBookSnapshot),
    Ohlcv(Candle),
}

/// Normalized message published by the collector:
/// `{exchange, symbol, type, data}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEnvelope {
    pub exchange: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: DataKind,
    pub data: MarketPayload,
}

impl MarketEnvelope {
    pub fn trade(exchange: &str, symbol: &str, tick: TradeTick) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            kind: DataKind::Trade,
            data: MarketPayload::Trade(tick),
        }
    }

    pub fn orderbook(exchange: &str, symbol: &str, book: OrderBookSnapshot) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            kind: DataKind::Orderbook,
            data: MarketPayload::Orderbook(book),
        }
    }

    pub fn ohlcv(exchange: &str, symbol: &str, candle: Candle) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            kind: DataKind::Ohlcv,
            data: MarketPayload::Ohlcv(candle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_bot() {
        let bot = Bot::example();
        assert!(bot.dry_run);
        assert!(bot.hedge_mode);
        assert!(bot.exclusive_mode);
        assert_eq!(bot.symbol, "BTC/USDT");
        assert_eq!(bot.cash, 1_000_000.0);
        assert_eq!(bot.commission, 0.001);
    }

    #[test]
    fn test_orderbook_mid() {
        let book = OrderBookSnapshot {
            bids: vec![PriceLevel { price: 99.0, amount: 1.0 }],
            asks: vec![PriceLevel { price: 101.0, amount: 2.0 }],
            timestamp: Utc::now(),
        };

        assert_eq!(book.best_bid(), Some(99.0));
        assert_eq!(book.best_ask(), Some(101.0));
        assert_eq!(book.mid(), Some(100.0));
    }

    #[test]
    fn test_orderbook_mid_missing_side() {
        let book = OrderBookSnapshot {
            bids: vec![],
            asks: vec![PriceLevel { price: 101.0, amount: 2.0 }],
            timestamp: Utc::now(),
        };

        assert_eq!(book.mid(), None);
    }

    #[test]
    fn test_envelope_wire_format() {
        let tick = TradeTick {
            price: 50_000.0,
            amount: 0.25,
            side: TradeSide::Buy,
            timestamp: Utc::now(),
        };

        let envelope = MarketEnvelope::trade("binance", "BTC/USDT", tick);
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["exchange"], "binance");
        assert_eq!(json["symbol"], "BTC/USDT");
        assert_eq!(json["type"], "trade");
        assert_eq!(json["data"]["price"], 50_000.0);
        assert_eq!(json["data"]["side"], "buy");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let candle = Candle {
            timestamp: Utc::now(),
            open: 100.0,
            high: 105.0,
            low: 99.0,
            close: 104.0,
            volume: 1234.0,
        };

        let envelope = MarketEnvelope::ohlcv("binance", "BTC/USDT", candle);
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: MarketEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.kind, DataKind::Ohlcv);
        match parsed.data {
            MarketPayload::Ohlcv(c) => assert_eq!(c.close, 104.0),
            other => panic!("wrong payload kind: {:?}", other),
        }
    }
}
