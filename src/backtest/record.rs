use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{EquityPoint, Trade};
use crate::Result;

/// Write-once summary of a backtest run.
///
/// Produced at the end of a run and never mutated; mirrors the statistics
/// record of the backtest capability field-for-field so it can be persisted
/// as-is. Trades and equity curve are carried as serialized JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub id: Uuid,
    pub strategy_name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub win_rate_pct: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub trades: String,
    pub equity_curve: String,
}

impl BacktestRecord {
    /// Build the record from the broker's final state
    pub fn from_results(
        strategy_name: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        initial_capital: f64,
        final_equity: f64,
        closed_trades: &[Trade],
        equity_curve: &[EquityPoint],
    ) -> Result<Self> {
        let pnls: Vec<f64> = closed_trades.iter().filter_map(|t| t.pnl()).collect();
        let total_trades = pnls.len();
        let wins = pnls.iter().filter(|p| **p > 0.0).count();

        let win_rate_pct = if total_trades > 0 {
            wins as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let total_wins: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
        let total_losses: f64 = pnls.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let total_return_pct = (final_equity - initial_capital) / initial_capital * 100.0;

        Ok(Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.to_string(),
            start_date,
            end_date,
            initial_capital,
            final_equity,
            total_return_pct,
            max_drawdown_pct: max_drawdown_pct(equity_curve),
            win_rate_pct,
            profit_factor,
            total_trades,
            trades: serde_json::to_string(closed_trades)?,
            equity_curve: serde_json::to_string(equity_curve)?,
        })
    }

    /// Print a short report to stdout
    pub fn print_report(&self) {
        println!("\nBacktest: {}", self.strategy_name);
        println!("  Period:        {} .. {}", self.start_date, self.end_date);
        println!("  Capital:       {:.2} -> {:.2}", self.initial_capital, self.final_equity);
        println!("  Return:        {:.2}%", self.total_return_pct);
        println!("  Max drawdown:  {:.2}%", self.max_drawdown_pct);
        println!("  Trades:        {} (win rate {:.1}%)", self.total_trades, self.win_rate_pct);
        println!("  Profit factor: {:.2}", self.profit_factor);
    }
}

/// Largest peak-to-trough equity decline, as a percentage of the peak
fn max_drawdown_pct(curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0f64;

    for point in curve {
        peak = peak.max(point.equity);
        if peak > 0.0 {
            let dd = (peak - point.equity) / peak * 100.0;
            max_dd = max_dd.max(dd);
        }
    }

    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(equity: f64) -> EquityPoint {
        EquityPoint {
            timestamp: Utc::now(),
            equity,
            cash: equity,
        }
    }

    fn closed_trade(id: u64, entry: f64, exit: f64, size: f64) -> Trade {
        Trade {
            id,
            size,
            entry_price: entry,
            entry_time: Utc::now(),
            exit_price: Some(exit),
            exit_time: Some(Utc::now()),
            order_ids: vec![id],
        }
    }

    #[test]
    fn test_max_drawdown() {
        let curve = vec![
            point(1000.0),
            point(1200.0),
            point(900.0),
            point(1100.0),
            point(1050.0),
        ];

        // Peak 1200 -> trough 900 = 25%
        assert!((max_drawdown_pct(&curve) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_drawdown_monotonic_curve_is_zero() {
        let curve = vec![point(1000.0), point(1100.0), point(1200.0)];
        assert_eq!(max_drawdown_pct(&curve), 0.0);
    }

    #[test]
    fn test_record_statistics() {
        let trades = vec![
            closed_trade(1, 100.0, 110.0, 1.0), // +10
            closed_trade(2, 100.0, 95.0, 1.0),  // -5
            closed_trade(3, 100.0, 108.0, 2.0), // +16
        ];
        let curve = vec![point(1000.0), point(1010.0), point(1005.0), point(1021.0)];

        let record = BacktestRecord::from_results(
            "sma_cross",
            Utc::now(),
            Utc::now(),
            1000.0,
            1021.0,
            &trades,
            &curve,
        )
        .unwrap();

        assert_eq!(record.total_trades, 3);
        assert!((record.win_rate_pct - 66.66666666666667).abs() < 1e-9);
        assert!((record.total_return_pct - 2.1).abs() < 1e-9);
        assert!((record.profit_factor - 26.0 / 5.0).abs() < 1e-9);

        // Serialized series round-trip
        let trades_back: Vec<Trade> = serde_json::from_str(&record.trades).unwrap();
        assert_eq!(trades_back.len(), 3);
        let curve_back: Vec<EquityPoint> = serde_json::from_str(&record.equity_curve).unwrap();
        assert_eq!(curve_back.len(), 4);
    }

    #[test]
    fn test_record_with_no_trades() {
        let record = BacktestRecord::from_results(
            "idle",
            Utc::now(),
            Utc::now(),
            1000.0,
            1000.0,
            &[],
            &[point(1000.0)],
        )
        .unwrap();

        assert_eq!(record.total_trades, 0);
        assert_eq!(record.win_rate_pct, 0.0);
        assert_eq!(record.profit_factor, 0.0);
        assert_eq!(record.total_return_pct, 0.0);
    }
}
