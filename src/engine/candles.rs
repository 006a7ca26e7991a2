use std::collections::VecDeque;

use crate::models::Candle;

/// Rolling window of the most recent candles fed to the strategy.
///
/// Oldest candles fall off the back once the window is full.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    max_candles: usize,
}

impl CandleWindow {
    pub fn new(max_candles: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(max_candles),
            max_candles,
        }
    }

    pub fn push(&mut self, candle: Candle) {
        self.candles.push_back(candle);
        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Window contents, oldest first
    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(close: f64) -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_rolls_oldest_out() {
        let mut window = CandleWindow::new(3);
        for price in [1.0, 2.0, 3.0, 4.0] {
            window.push(candle(price));
        }

        assert_eq!(window.len(), 3);
        let closes: Vec<f64> = window.to_vec().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_empty_window() {
        let window = CandleWindow::new(3);
        assert!(window.is_empty());
        assert!(window.to_vec().is_empty());
    }
}
