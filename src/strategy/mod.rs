// Trading strategy module
pub mod buy_and_hold;
pub mod sma_cross;

use crate::execution::{BrokerSnapshot, OrderRequest};
use crate::models::Candle;
use crate::Result;

pub use buy_and_hold::BuyAndHoldStrategy;
pub use sma_cross::SmaCrossStrategy;

/// An order the strategy wants placed. Translated into a real order by the
/// engine; the strategy never touches the broker directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderIntent {
    pub size: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
}

impl OrderIntent {
    pub fn market(size: f64) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn with_sl(mut self, sl_price: f64) -> Self {
        self.sl_price = Some(sl_price);
        self
    }

    pub fn with_tp(mut self, tp_price: f64) -> Self {
        self.tp_price = Some(tp_price);
        self
    }
}

impl From<OrderIntent> for OrderRequest {
    fn from(intent: OrderIntent) -> Self {
        OrderRequest {
            size: intent.size,
            limit_price: intent.limit_price,
            stop_price: intent.stop_price,
            sl_price: intent.sl_price,
            tp_price: intent.tp_price,
        }
    }
}

/// Base trait for all trading strategies.
///
/// A strategy is a pure decision function: given the recent candle window
/// and the current broker snapshot it returns zero or more order intents.
/// Model-driven strategies plug in behind the same boundary.
pub trait Strategy: Send + Sync {
    /// Decide on new order intents for the latest market state
    fn decide(&self, candles: &[Candle], snapshot: &BrokerSnapshot) -> Result<Vec<OrderIntent>>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required before this strategy can decide
    fn min_candles(&self) -> usize;
}
