use crate::backtest::record::BacktestRecord;
use crate::backtest::BacktestEngine;
use crate::engine::{CandleWindow, WINDOW_CAPACITY};
use crate::execution::{BrokerState, OrderLifecycleManager};
use crate::models::{Bot, Candle};
use crate::strategy::Strategy;
use crate::Result;

/// Replays a historical candle series through the same broker funnel the
/// live engine drives.
///
/// Per candle the sequence matches the live path exactly: extend the
/// lookback window, evaluate pending orders at the close, mark to market,
/// then ask the strategy for new intents. This is what makes live and
/// backtest accounting comparable.
pub struct BacktestRunner {
    initial_cash: f64,
    commission: f64,
    hedge_mode: bool,
    exclusive_mode: bool,
}

impl BacktestRunner {
    pub fn new(initial_cash: f64, commission: f64) -> Self {
        Self {
            initial_cash,
            commission,
            hedge_mode: true,
            exclusive_mode: true,
        }
    }

    pub fn for_bot(bot: &Bot) -> Self {
        Self {
            initial_cash: bot.cash,
            commission: bot.commission,
            hedge_mode: bot.hedge_mode,
            exclusive_mode: bot.exclusive_mode,
        }
    }

    pub fn with_modes(mut self, hedge_mode: bool, exclusive_mode: bool) -> Self {
        self.hedge_mode = hedge_mode;
        self.exclusive_mode = exclusive_mode;
        self
    }
}

impl BacktestEngine for BacktestRunner {
    fn run(&self, strategy: &dyn Strategy, candles: &[Candle]) -> Result<BacktestRecord> {
        if candles.is_empty() {
            return Err("No candles to backtest".into());
        }

        tracing::info!(
            strategy = strategy.name(),
            candles = candles.len(),
            "starting backtest"
        );

        let mut broker = BrokerState::new(self.initial_cash, self.commission, self.hedge_mode);
        let mut orders = OrderLifecycleManager::new(self.hedge_mode, self.exclusive_mode);
        let mut window = CandleWindow::new(WINDOW_CAPACITY);

        for candle in candles {
            window.push(candle.clone());

            orders.on_price(&mut broker, candle.close, candle.timestamp)?;
            let mark = broker.mark_to_market(candle.close, candle.timestamp);
            if mark.liquidated_now {
                tracing::warn!(equity = mark.equity, "backtest hit liquidation");
                break;
            }

            if window.len() < strategy.min_candles() {
                continue;
            }

            let snapshot = broker.snapshot(orders.open_orders());
            let intents = match strategy.decide(&window.to_vec(), &snapshot) {
                Ok(intents) => intents,
                Err(e) => {
                    tracing::warn!(strategy = strategy.name(), "strategy error: {}", e);
                    continue;
                }
            };

            for intent in intents {
                if let Err(e) = orders.submit(&broker, intent.into()) {
                    tracing::warn!(strategy = strategy.name(), "order rejected: {}", e);
                }
            }
        }

        let final_equity = broker.equity_at(broker.last_price());
        let record = BacktestRecord::from_results(
            strategy.name(),
            candles.first().expect("non-empty").timestamp,
            candles.last().expect("non-empty").timestamp,
            self.initial_cash,
            final_equity,
            broker.closed_trades(),
            broker.equity_curve(),
        )?;

        tracing::info!(
            trades = record.total_trades,
            return_pct = record.total_return_pct,
            "backtest complete"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::synthetic::{MarketScenario, SyntheticDataGenerator};
    use crate::strategy::{BuyAndHoldStrategy, SmaCrossStrategy};

    #[test]
    fn test_empty_series_is_an_error() {
        let runner = BacktestRunner::new(10_000.0, 0.001);
        let result = runner.run(&SmaCrossStrategy::default(), &[]);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("No candles"));
    }

    #[test]
    fn test_buy_and_hold_tracks_market() {
        let mut gen = SyntheticDataGenerator::new(42, 100.0);
        let candles = gen.generate(MarketScenario::Uptrend, 300, 5);

        let runner = BacktestRunner::new(10_000.0, 0.0);
        let record = runner.run(&BuyAndHoldStrategy::new(10.0), &candles).unwrap();

        // One entry on the second candle (intent fills one candle later),
        // never closed
        assert_eq!(record.total_trades, 0);

        // In an uptrend the held position must end above water
        assert!(record.final_equity > record.initial_capital);
    }

    #[test]
    fn test_sma_cross_produces_closed_trades() {
        let mut gen = SyntheticDataGenerator::new(7, 100.0);
        let candles = gen.generate(MarketScenario::Volatile, 600, 5);

        let runner = BacktestRunner::new(10_000.0, 0.001);
        let record = runner
            .run(&SmaCrossStrategy::new(5, 20), &candles)
            .unwrap();

        // A volatile series must generate at least one round trip
        assert!(record.total_trades > 0);
        assert!(record.final_equity > 0.0);
        assert!(record.max_drawdown_pct >= 0.0);

        // Equity curve has one point per processed candle
        let curve: Vec<crate::execution::EquityPoint> =
            serde_json::from_str(&record.equity_curve).unwrap();
        assert_eq!(curve.len(), candles.len());
    }

    #[test]
    fn test_deterministic_replay() {
        let mut gen = SyntheticDataGenerator::new(11, 100.0);
        let candles = gen.generate(MarketScenario::Sideways, 400, 5);

        let runner = BacktestRunner::new(10_000.0, 0.001);
        let a = runner.run(&SmaCrossStrategy::new(5, 20), &candles).unwrap();
        let b = runner.run(&SmaCrossStrategy::new(5, 20), &candles).unwrap();

        assert_eq!(a.final_equity, b.final_equity);
        assert_eq!(a.total_trades, b.total_trades);
        assert_eq!(a.trades, b.trades);
    }
}
