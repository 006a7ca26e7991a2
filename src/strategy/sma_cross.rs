use super::{OrderIntent, Strategy};
use crate::execution::BrokerSnapshot;
use crate::models::Candle;
use crate::Result;

/// Moving-average crossover strategy.
///
/// Long-only: a fast SMA crossing above the slow SMA opens a long with an
/// attached stop-loss/take-profit pair; crossing back below flattens the
/// position. Stands in for the opaque model-driven strategies behind the
/// same trait.
#[derive(Debug, Clone)]
pub struct SmaCrossStrategy {
    fast: usize,
    slow: usize,
    /// Fraction of current equity committed per entry
    position_fraction: f64,
    /// Stop-loss distance from entry, e.g. 0.05 = -5%
    sl_pct: f64,
    /// Take-profit distance from entry
    tp_pct: f64,
}

impl SmaCrossStrategy {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self {
            fast,
            slow,
            position_fraction: 0.2,
            sl_pct: 0.05,
            tp_pct: 0.10,
        }
    }

    pub fn with_risk(mut self, position_fraction: f64, sl_pct: f64, tp_pct: f64) -> Self {
        self.position_fraction = position_fraction;
        self.sl_pct = sl_pct;
        self.tp_pct = tp_pct;
        self
    }

    fn sma(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    /// Fast and slow SMA over the window ending at `end` (exclusive)
    fn smas_at(&self, closes: &[f64], end: usize) -> (f64, f64) {
        let fast = Self::sma(&closes[end - self.fast..end]);
        let slow = Self::sma(&closes[end - self.slow..end]);
        (fast, slow)
    }
}

impl Default for SmaCrossStrategy {
    fn default() -> Self {
        Self::new(5, 20)
    }
}

impl Strategy for SmaCrossStrategy {
    fn decide(&self, candles: &[Candle], snapshot: &BrokerSnapshot) -> Result<Vec<OrderIntent>> {
        if candles.len() < self.min_candles() {
            return Err(format!(
                "Insufficient data: {} candles, need {}",
                candles.len(),
                self.min_candles()
            )
            .into());
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let price = *closes.last().expect("non-empty");

        let (fast_now, slow_now) = self.smas_at(&closes, closes.len());
        let (fast_prev, slow_prev) = self.smas_at(&closes, closes.len() - 1);

        let crossed_up = fast_prev <= slow_prev && fast_now > slow_now;
        let crossed_down = fast_prev >= slow_prev && fast_now < slow_now;

        let net: f64 = snapshot.open_trades.iter().map(|t| t.size).sum();

        if crossed_up && net <= 0.0 {
            let size = snapshot.equity * self.position_fraction / price;
            if size <= 0.0 {
                return Ok(Vec::new());
            }
            return Ok(vec![OrderIntent::market(size)
                .with_sl(price * (1.0 - self.sl_pct))
                .with_tp(price * (1.0 + self.tp_pct))]);
        }

        if crossed_down && net > 0.0 {
            // Flatten only; never reverses into a short
            return Ok(vec![OrderIntent::market(-net)]);
        }

        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "sma_cross"
    }

    fn min_candles(&self) -> usize {
        self.slow + 1
    }
}
