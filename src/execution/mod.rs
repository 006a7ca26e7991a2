// Order lifecycle and broker ledger module
pub mod broker;
pub mod orders;

pub use broker::{BrokerSnapshot, BrokerState, EquityPoint, FillOutcome, MarkOutcome, Trade, TradeStats};
pub use orders::{FillEvent, Order, OrderLifecycleManager, OrderRequest, OrderStatus};
