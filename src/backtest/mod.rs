pub mod record;
pub mod runner;
pub mod synthetic;

use crate::models::Candle;
use crate::strategy::Strategy;
use crate::Result;

pub use record::BacktestRecord;
pub use runner::BacktestRunner;
pub use synthetic::{MarketScenario, SyntheticDataGenerator};

/// Backtest capability: given a historical OHLCV table and a strategy,
/// produce a fixed-shape statistics record.
///
/// The built-in [`BacktestRunner`] implements this by replaying the series
/// through the same broker funnel the live engine uses; a third-party
/// engine can stand behind the same boundary.
pub trait BacktestEngine {
    fn run(&self, strategy: &dyn Strategy, candles: &[Candle]) -> Result<BacktestRecord>;
}
