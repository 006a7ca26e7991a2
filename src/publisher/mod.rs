use tokio::sync::mpsc;

use crate::models::{DataKind, MarketEnvelope};

/// Topic names for one (exchange, symbol) market, keyed by data kind
#[derive(Debug, Clone)]
pub struct Topics {
    pub trade: String,
    pub orderbook: String,
    pub ohlcv: String,
}

impl Topics {
    /// Resolve topic names for a market, e.g. `md.binance.BTC/USDT.trade`
    pub fn for_market(exchange: &str, symbol: &str) -> Self {
        Self {
            trade: format!("md.{}.{}.trade", exchange, symbol),
            orderbook: format!("md.{}.{}.orderbook", exchange, symbol),
            ohlcv: format!("md.{}.{}.ohlcv", exchange, symbol),
        }
    }

    pub fn for_kind(&self, kind: DataKind) -> &str {
        match kind {
            DataKind::Trade => &self.trade,
            DataKind::Orderbook => &self.orderbook,
            DataKind::Ohlcv => &self.ohlcv,
        }
    }
}

/// Send-only message channel used by the collector.
///
/// `send` is fire-and-forget: it must not block the calling loop and must not
/// fail for transient conditions - delivery problems are the publisher's own
/// concern, not the collector's.
pub trait EventPublisher: Send + Sync {
    fn send(&self, topic: &str, envelope: MarketEnvelope);
}

/// Publisher backed by an unbounded in-process channel.
///
/// Feeds the trading engine directly; the receiving end sees `(topic,
/// envelope)` pairs in publish order per topic.
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<(String, MarketEnvelope)>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiver the engine will consume from
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, MarketEnvelope)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelPublisher {
    fn send(&self, topic: &str, envelope: MarketEnvelope) {
        // A closed receiver means the engine is shutting down; dropping the
        // message is the correct fire-and-forget behavior.
        if self.tx.send((topic.to_string(), envelope)).is_err() {
            tracing::debug!(topic, "dropping envelope, consumer gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TradeSide, TradeTick};
    use chrono::Utc;

    fn tick(price: f64) -> TradeTick {
        TradeTick {
            price,
            amount: 1.0,
            side: TradeSide::Buy,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_topic_resolution() {
        let topics = Topics::for_market("binance", "BTC/USDT");

        assert_eq!(topics.trade, "md.binance.BTC/USDT.trade");
        assert_eq!(topics.orderbook, "md.binance.BTC/USDT.orderbook");
        assert_eq!(topics.ohlcv, "md.binance.BTC/USDT.ohlcv");
        assert_eq!(topics.for_kind(DataKind::Trade), topics.trade);
    }

    #[tokio::test]
    async fn test_send_delivers_in_order() {
        let (publisher, mut rx) = ChannelPublisher::new();
        let topics = Topics::for_market("binance", "BTC/USDT");

        for price in [100.0, 101.0, 102.0] {
            publisher.send(
                &topics.trade,
                MarketEnvelope::trade("binance", "BTC/USDT", tick(price)),
            );
        }

        for expected in [100.0, 101.0, 102.0] {
            let (topic, envelope) = rx.recv().await.unwrap();
            assert_eq!(topic, topics.trade);
            match envelope.data {
                crate::models::MarketPayload::Trade(t) => assert_eq!(t.price, expected),
                other => panic!("wrong payload: {:?}", other),
            }
        }
    }

    #[test]
    fn test_send_after_receiver_dropped_does_not_panic() {
        let (publisher, rx) = ChannelPublisher::new();
        drop(rx);

        publisher.send(
            "md.binance.BTC/USDT.trade",
            MarketEnvelope::trade("binance", "BTC/USDT", tick(100.0)),
        );
    }
}
