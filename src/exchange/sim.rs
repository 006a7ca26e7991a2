use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

use super::ExchangeStream;
use crate::models::{Candle, OrderBookSnapshot, PriceLevel, TradeSide, TradeTick};
use crate::Result;

/// Seeded random-walk exchange for dry runs and tests.
///
/// Produces a consistent price path across the three streams: trades step the
/// walk, the order book straddles the current price, and candles aggregate a
/// fixed number of steps. Deterministic for a given seed.
pub struct SimExchange {
    state: Mutex<WalkState>,
    tick_interval: Duration,
    candle_interval: Duration,
}

struct WalkState {
    rng: StdRng,
    price: f64,
}

impl SimExchange {
    pub fn new(seed: u64, start_price: f64) -> Self {
        Self {
            state: Mutex::new(WalkState {
                rng: StdRng::seed_from_u64(seed),
                price: start_price,
            }),
            tick_interval: Duration::from_millis(200),
            candle_interval: Duration::from_secs(60),
        }
    }

    /// Override stream pacing (tests use short intervals)
    pub fn with_intervals(mut self, tick: Duration, candle: Duration) -> Self {
        self.tick_interval = tick;
        self.candle_interval = candle;
        self
    }

    fn step(state: &mut WalkState) -> f64 {
        let pct = state.rng.gen_range(-0.0005..0.0005);
        state.price = (state.price * (1.0 + pct)).max(0.01);
        state.price
    }
}

#[async_trait]
impl ExchangeStream for SimExchange {
    async fn watch_trades(&self, _symbol: &str) -> Result<Vec<TradeTick>> {
        sleep(self.tick_interval).await;

        let mut state = self.state.lock().map_err(|e| e.to_string())?;
        let batch_size = state.rng.gen_range(1..=3);

        let mut trades = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            let price = Self::step(&mut state);
            let amount = state.rng.gen_range(0.01..1.0);
            let side = if state.rng.gen_bool(0.5) {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            };
            trades.push(TradeTick {
                price,
                amount,
                side,
                timestamp: Utc::now(),
            });
        }

        Ok(trades)
    }

    async fn watch_order_book(&self, _symbol: &str) -> Result<OrderBookSnapshot> {
        sleep(self.tick_interval).await;

        let mut state = self.state.lock().map_err(|e| e.to_string())?;
        let mid = state.price;
        let spread = mid * 0.0002;
        let bid_amount = state.rng.gen_range(0.1..5.0);
        let ask_amount = state.rng.gen_range(0.1..5.0);

        Ok(OrderBookSnapshot {
            bids: vec![PriceLevel {
                price: mid - spread / 2.0,
                amount: bid_amount,
            }],
            asks: vec![PriceLevel {
                price: mid + spread / 2.0,
                amount: ask_amount,
            }],
            timestamp: Utc::now(),
        })
    }

    async fn watch_ohlcv(&self, _symbol: &str, _timeframe: &str) -> Result<Candle> {
        sleep(self.candle_interval).await;

        let mut state = self.state.lock().map_err(|e| e.to_string())?;
        let open = state.price;
        let mut high = open;
        let mut low = open;

        // Walk a fixed number of steps so the candle shape follows the
        // same path the trade stream would have taken.
        for _ in 0..12 {
            let p = Self::step(&mut state);
            high = high.max(p);
            low = low.min(p);
        }
        let close = state.price;
        let volume = state.rng.gen_range(100.0..10_000.0);

        Ok(Candle {
            timestamp: Utc::now(),
            open,
            high,
            low,
            close,
            volume,
        })
    }
}
