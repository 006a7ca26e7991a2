use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::Candle;

/// Market scenario shapes for synthetic data generation
#[derive(Debug, Clone, Copy)]
pub enum MarketScenario {
    /// Steady drift up, low noise
    Uptrend,
    /// Steady drift down, low noise
    Downtrend,
    /// No drift, low noise
    Sideways,
    /// No drift, large swings
    Volatile,
    /// Flat first half, then a sustained collapse
    Crash,
}

impl MarketScenario {
    /// (daily drift, per-candle noise) for the scenario
    fn params(&self) -> (f64, f64) {
        match self {
            MarketScenario::Uptrend => (0.02, 0.0002),
            MarketScenario::Downtrend => (-0.02, 0.0002),
            MarketScenario::Sideways => (0.0, 0.002),
            MarketScenario::Volatile => (0.0, 0.01),
            MarketScenario::Crash => (0.0, 0.002),
        }
    }
}

/// Seeded generator of synthetic candle series for backtests and sims
pub struct SyntheticDataGenerator {
    rng: StdRng,
    base_price: f64,
}

impl SyntheticDataGenerator {
    pub fn new(seed: u64, base_price: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price,
        }
    }

    /// Generate `num_candles` candles spaced `interval_minutes` apart,
    /// ending near the current time.
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        num_candles: usize,
        interval_minutes: i64,
    ) -> Vec<Candle> {
        let (daily_drift, noise) = scenario.params();
        let drift_per_candle = daily_drift / (24.0 * 60.0 / interval_minutes as f64);
        let start_time = Utc::now() - Duration::minutes(num_candles as i64 * interval_minutes);

        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;

        for i in 0..num_candles {
            // Crash: switch to a hard downward drift at the midpoint
            let drift = match scenario {
                MarketScenario::Crash if i >= num_candles / 2 => -0.01,
                _ => drift_per_candle,
            };

            let open = price;
            let step = drift + self.rng.gen_range(-noise..noise);
            price = (price * (1.0 + step)).max(0.01);
            let close = price;

            let wiggle = self.rng.gen_range(0.0..noise.max(0.0005));
            let high = open.max(close) * (1.0 + wiggle);
            let low = open.min(close) * (1.0 - wiggle);
            let volume = self.rng.gen_range(10_000.0..1_000_000.0);

            candles.push(Candle {
                timestamp: start_time + Duration::minutes(i as i64 * interval_minutes),
                open,
                high,
                low,
                close,
                volume,
            });
        }

        candles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_for_seed() {
        let mut a = SyntheticDataGenerator::new(42, 100.0);
        let mut b = SyntheticDataGenerator::new(42, 100.0);

        let ca = a.generate(MarketScenario::Sideways, 50, 5);
        let cb = b.generate(MarketScenario::Sideways, 50, 5);

        for (x, y) in ca.iter().zip(&cb) {
            assert_eq!(x.close, y.close);
        }
    }

    #[test]
    fn test_uptrend_drifts_up() {
        let mut gen = SyntheticDataGenerator::new(1, 100.0);
        let candles = gen.generate(MarketScenario::Uptrend, 1000, 5);

        assert!(candles.last().unwrap().close > candles.first().unwrap().close);
    }

    #[test]
    fn test_crash_collapses_in_second_half() {
        let mut gen = SyntheticDataGenerator::new(1, 100.0);
        let candles = gen.generate(MarketScenario::Crash, 400, 5);

        let mid = candles[200].close;
        let end = candles.last().unwrap().close;
        assert!(end < mid * 0.5);
    }

    #[test]
    fn test_candle_shape_is_valid() {
        let mut gen = SyntheticDataGenerator::new(3, 100.0);
        for candle in gen.generate(MarketScenario::Volatile, 200, 5) {
            assert!(candle.high >= candle.open.max(candle.close));
            assert!(candle.low <= candle.open.min(candle.close));
            assert!(candle.low > 0.0);
            assert!(candle.volume > 0.0);
        }
    }
}
