use super::{OrderIntent, Strategy};
use crate::execution::BrokerSnapshot;
use crate::models::Candle;
use crate::Result;

/// Buy-and-hold baseline strategy.
///
/// Opens one long position on the first candle and never exits. Used as a
/// baseline to compare active strategies against.
#[derive(Debug, Clone)]
pub struct BuyAndHoldStrategy {
    size: f64,
}

impl BuyAndHoldStrategy {
    pub fn new(size: f64) -> Self {
        Self { size }
    }
}

impl Default for BuyAndHoldStrategy {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn decide(&self, candles: &[Candle], snapshot: &BrokerSnapshot) -> Result<Vec<OrderIntent>> {
        if candles.is_empty() {
            return Err("No candles provided".into());
        }

        // Enter once; afterwards there is always an open trade or a working
        // order, so nothing more to do.
        let already_in = !snapshot.open_trades.is_empty() || !snapshot.open_orders.is_empty();
        if already_in {
            return Ok(Vec::new());
        }

        Ok(vec![OrderIntent::market(self.size)])
    }

    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn min_candles(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::BrokerState;
    use chrono::Utc;

    fn candle(close: f64) -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    fn empty_snapshot() -> BrokerSnapshot {
        BrokerState::new(10_000.0, 0.0, true).snapshot(Vec::new())
    }

    #[test]
    fn test_buys_once() {
        let strategy = BuyAndHoldStrategy::default();
        let candles = vec![candle(100.0)];

        let intents = strategy.decide(&candles, &empty_snapshot()).unwrap();
        assert_eq!(intents, vec![OrderIntent::market(1.0)]);
    }

    #[test]
    fn test_holds_after_entry() {
        let strategy = BuyAndHoldStrategy::default();
        let candles = vec![candle(100.0)];

        let mut broker = BrokerState::new(10_000.0, 0.0, true);
        let order = crate::execution::Order {
            id: 1,
            size: 1.0,
            limit_price: None,
            stop_price: None,
            sl_price: None,
            tp_price: None,
            status: crate::execution::OrderStatus::Open,
            parent_id: None,
            trade_id: None,
            is_contingent: false,
            created_at: Utc::now(),
        };
        broker.apply_fill(&order, 100.0, Utc::now()).unwrap();

        let intents = strategy.decide(&candles, &broker.snapshot(Vec::new())).unwrap();
        assert!(intents.is_empty());
    }

    #[test]
    fn test_empty_candles_returns_error() {
        let strategy = BuyAndHoldStrategy::default();
        let result = strategy.decide(&[], &empty_snapshot());

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("No candles"));
    }
}
