// Trading engine: orchestrates market data, orders, broker and strategy
pub mod candles;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::BrokerError;
use crate::execution::{
    BrokerSnapshot, BrokerState, FillEvent, OrderLifecycleManager, OrderRequest,
};
use crate::models::{Bot, DataKind, MarketEnvelope, MarketPayload};
use crate::strategy::Strategy;
use crate::Result;

pub use candles::CandleWindow;

/// Candles retained for strategy lookback
pub const WINDOW_CAPACITY: usize = 500;

const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

/// Events the engine reports to the outside world
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Fill(FillEvent),
    Snapshot(BrokerSnapshot),
    Liquidated { equity: f64, time: DateTime<Utc> },
}

struct EngineCore {
    broker: BrokerState,
    orders: OrderLifecycleManager,
    window: CandleWindow,
}

/// Per-bot trading engine.
///
/// Consumes market-data envelopes from the publisher channel: every price
/// tick updates the broker's last price and is evaluated against pending
/// orders; every closed candle additionally asks the strategy for new
/// intents. Broker and order table live behind a single mutex, so a fill and
/// its sibling cancellation are atomic with respect to snapshot readers.
///
/// When mark-to-market equity reaches zero the engine emits exactly one
/// `Liquidated` event and ends its session; explicit `stop()` is the only
/// other exit path.
pub struct TradingEngine {
    bot: Bot,
    strategy: Arc<dyn Strategy>,
    core: Arc<Mutex<EngineCore>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    running: AtomicBool,
    snapshot_interval: Duration,
}

impl TradingEngine {
    pub fn new(
        bot: Bot,
        strategy: Arc<dyn Strategy>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();

        if !bot.dry_run {
            tracing::warn!(
                bot = %bot.name,
                "live order routing is not wired, running the internal fill simulator"
            );
        }

        let core = EngineCore {
            broker: BrokerState::for_bot(&bot),
            orders: OrderLifecycleManager::new(bot.hedge_mode, bot.exclusive_mode),
            window: CandleWindow::new(WINDOW_CAPACITY),
        };

        (
            Self {
                bot,
                strategy,
                core: Arc::new(Mutex::new(core)),
                events,
                running: AtomicBool::new(false),
                snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            },
            events_rx,
        )
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Request a cooperative stop; the run loop exits at its next
    /// iteration boundary.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Place an order on behalf of an external caller.
    ///
    /// Invalid transitions (reversing with hedge mode off, trading after
    /// liquidation) are surfaced as typed errors and no order is created.
    pub fn submit(&self, request: OrderRequest) -> std::result::Result<u64, BrokerError> {
        let mut core = self.core.lock().map_err(|_| BrokerError::NotReady)?;
        let EngineCore { broker, orders, .. } = &mut *core;
        orders.submit(broker, request)
    }

    /// Immutable view of the ledger plus working orders
    pub fn snapshot(&self) -> std::result::Result<BrokerSnapshot, BrokerError> {
        let core = self.core.lock().map_err(|_| BrokerError::NotReady)?;
        Ok(core.broker.snapshot(core.orders.open_orders()))
    }

    /// Consume envelopes until the channel closes, `stop()` is called or
    /// the broker liquidates. Periodically emits a reporting snapshot.
    pub async fn run(
        &self,
        mut rx: mpsc::UnboundedReceiver<(String, MarketEnvelope)>,
    ) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(bot = %self.bot.name, symbol = %self.bot.symbol, "trading engine started");

        let mut report = tokio::time::interval(self.snapshot_interval);
        report.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        report.tick().await; // first tick completes immediately

        while self.is_running() {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some((_topic, envelope)) => {
                            if self.process_envelope(envelope)? {
                                break;
                            }
                        }
                        None => {
                            tracing::info!(bot = %self.bot.name, "market data channel closed");
                            break;
                        }
                    }
                }
                _ = report.tick() => {
                    if let Ok(snapshot) = self.snapshot() {
                        let _ = self.events.send(EngineEvent::Snapshot(snapshot));
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!(bot = %self.bot.name, "trading engine stopped");
        Ok(())
    }

    /// Handle one envelope. Returns true when the session must end
    /// (liquidation).
    fn process_envelope(&self, envelope: MarketEnvelope) -> Result<bool> {
        if envelope.symbol != self.bot.symbol || envelope.exchange != self.bot.exchange {
            tracing::debug!(
                symbol = %envelope.symbol,
                exchange = %envelope.exchange,
                "ignoring envelope for foreign market"
            );
            return Ok(false);
        }

        match (envelope.kind, envelope.data) {
            (DataKind::Trade, MarketPayload::Trade(tick)) => {
                self.on_tick(tick.price, tick.timestamp)
            }
            (DataKind::Orderbook, MarketPayload::Orderbook(book)) => match book.mid() {
                Some(mid) => self.on_tick(mid, book.timestamp),
                None => {
                    tracing::warn!("dropping orderbook envelope with an empty side");
                    Ok(false)
                }
            },
            (DataKind::Ohlcv, MarketPayload::Ohlcv(candle)) => self.on_candle(candle),
            (kind, _) => {
                tracing::warn!(?kind, "dropping envelope with mismatched payload");
                Ok(false)
            }
        }
    }

    /// Price update: evaluate pending orders, then mark to market
    fn on_tick(&self, price: f64, time: DateTime<Utc>) -> Result<bool> {
        if !price.is_finite() || price <= 0.0 {
            tracing::warn!(price, "dropping inconsistent price");
            return Ok(false);
        }

        let mut core = self.core.lock().map_err(|e| e.to_string())?;
        let EngineCore { broker, orders, .. } = &mut *core;

        let fills = orders.on_price(broker, price, time)?;
        let mark = broker.mark_to_market(price, time);
        drop(core);

        for fill in fills {
            let _ = self.events.send(EngineEvent::Fill(fill));
        }

        if mark.liquidated_now {
            tracing::warn!(
                bot = %self.bot.name,
                equity = mark.equity,
                "equity exhausted, session liquidated"
            );
            let _ = self
                .events
                .send(EngineEvent::Liquidated {
                    equity: mark.equity,
                    time,
                });
            self.running.store(false, Ordering::SeqCst);
            return Ok(true);
        }

        Ok(false)
    }

    /// Closed candle: regular tick processing plus a strategy decision
    fn on_candle(&self, candle: crate::models::Candle) -> Result<bool> {
        let close = candle.close;
        let time = candle.timestamp;

        {
            let mut core = self.core.lock().map_err(|e| e.to_string())?;
            core.window.push(candle);
        }

        if self.on_tick(close, time)? {
            return Ok(true);
        }

        let (candles, snapshot) = {
            let core = self.core.lock().map_err(|e| e.to_string())?;
            if core.window.len() < self.strategy.min_candles() {
                return Ok(false);
            }
            (
                core.window.to_vec(),
                core.broker.snapshot(core.orders.open_orders()),
            )
        };

        let intents = match self.strategy.decide(&candles, &snapshot) {
            Ok(intents) => intents,
            Err(e) => {
                tracing::warn!(strategy = %self.strategy.name(), "strategy error: {}", e);
                return Ok(false);
            }
        };

        for intent in intents {
            match self.submit(intent.into()) {
                Ok(order_id) => {
                    tracing::debug!(order_id, "strategy order accepted");
                }
                Err(e) => {
                    tracing::warn!(strategy = %self.strategy.name(), "order rejected: {}", e);
                }
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candle, OrderBookSnapshot, PriceLevel, TradeSide, TradeTick};
    use crate::strategy::OrderIntent;

    /// Strategy that emits a fixed intent once, then stays quiet
    struct OneShotStrategy {
        intent: OrderIntent,
        fired: Mutex<bool>,
    }

    impl OneShotStrategy {
        fn new(intent: OrderIntent) -> Self {
            Self {
                intent,
                fired: Mutex::new(false),
            }
        }
    }

    impl Strategy for OneShotStrategy {
        fn decide(
            &self,
            _candles: &[Candle],
            _snapshot: &BrokerSnapshot,
        ) -> Result<Vec<OrderIntent>> {
            let mut fired = self.fired.lock().unwrap();
            if *fired {
                return Ok(Vec::new());
            }
            *fired = true;
            Ok(vec![self.intent.clone()])
        }

        fn name(&self) -> &str {
            "one_shot"
        }

        fn min_candles(&self) -> usize {
            1
        }
    }

    /// Strategy that never trades
    struct IdleStrategy;

    impl Strategy for IdleStrategy {
        fn decide(
            &self,
            _candles: &[Candle],
            _snapshot: &BrokerSnapshot,
        ) -> Result<Vec<OrderIntent>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "idle"
        }

        fn min_candles(&self) -> usize {
            1
        }
    }

    fn test_bot() -> Bot {
        let mut bot = Bot::example();
        bot.cash = 1_000.0;
        bot.commission = 0.0;
        bot
    }

    fn candle_envelope(bot: &Bot, close: f64) -> MarketEnvelope {
        MarketEnvelope::ohlcv(
            &bot.exchange,
            &bot.symbol,
            Candle {
                timestamp: Utc::now(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 10.0,
            },
        )
    }

    fn trade_envelope(bot: &Bot, price: f64) -> MarketEnvelope {
        MarketEnvelope::trade(
            &bot.exchange,
            &bot.symbol,
            TradeTick {
                price,
                amount: 1.0,
                side: TradeSide::Buy,
                timestamp: Utc::now(),
            },
        )
    }

    async fn drive(
        engine: &TradingEngine,
        envelopes: Vec<MarketEnvelope>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        for envelope in envelopes {
            tx.send(("test".to_string(), envelope)).unwrap();
        }
        drop(tx); // engine stops when the channel drains

        engine.run(rx).await.unwrap();
    }

    #[tokio::test]
    async fn test_canonical_bracket_scenario_through_engine() {
        let bot = test_bot();
        let (engine, mut events) = TradingEngine::new(bot.clone(), Arc::new(IdleStrategy));

        // Long 1 @ market with SL 95 / TP 105, then prices 100, 105, 95
        engine
            .submit(OrderRequest::market(1.0).with_sl(95.0).with_tp(105.0))
            .unwrap();

        drive(
            &engine,
            vec![
                candle_envelope(&bot, 100.0),
                candle_envelope(&bot, 105.0),
                candle_envelope(&bot, 95.0),
            ],
        )
        .await;

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.closed_trades.len(), 1);
        assert_eq!(snapshot.closed_trades[0].pnl(), Some(5.0));
        assert!(snapshot.open_trades.is_empty());
        assert!(snapshot.open_orders.is_empty());
        assert!((snapshot.cash - 1_005.0).abs() < 1e-9);

        // Two fills: entry at 100 and take-profit at 105
        let mut fill_prices = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::Fill(fill) = event {
                fill_prices.push(fill.price);
            }
        }
        assert_eq!(fill_prices, vec![100.0, 105.0]);
    }

    #[tokio::test]
    async fn test_strategy_intent_translated_into_order() {
        let bot = test_bot();
        let strategy = Arc::new(OneShotStrategy::new(OrderIntent::market(2.0)));
        let (engine, _events) = TradingEngine::new(bot.clone(), strategy);

        drive(
            &engine,
            vec![candle_envelope(&bot, 100.0), candle_envelope(&bot, 101.0)],
        )
        .await;

        // Intent placed after the first candle, filled on the second
        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.open_trades.len(), 1);
        assert_eq!(snapshot.open_trades[0].size, 2.0);
        assert_eq!(snapshot.open_trades[0].entry_price, 101.0);
    }

    #[tokio::test]
    async fn test_orderbook_mid_drives_fills() {
        let bot = test_bot();
        let (engine, _events) = TradingEngine::new(bot.clone(), Arc::new(IdleStrategy));

        engine.submit(OrderRequest::market(1.0)).unwrap();

        let book = MarketEnvelope::orderbook(
            &bot.exchange,
            &bot.symbol,
            OrderBookSnapshot {
                bids: vec![PriceLevel { price: 99.0, amount: 1.0 }],
                asks: vec![PriceLevel { price: 101.0, amount: 1.0 }],
                timestamp: Utc::now(),
            },
        );
        drive(&engine, vec![book]).await;

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.open_trades.len(), 1);
        assert_eq!(snapshot.open_trades[0].entry_price, 100.0);
    }

    #[tokio::test]
    async fn test_foreign_market_envelopes_ignored() {
        let bot = test_bot();
        let (engine, _events) = TradingEngine::new(bot.clone(), Arc::new(IdleStrategy));

        engine.submit(OrderRequest::market(1.0)).unwrap();

        let mut foreign = trade_envelope(&bot, 100.0);
        foreign.symbol = "ETH/USDT".to_string();
        drive(&engine, vec![foreign]).await;

        // Nothing filled
        let snapshot = engine.snapshot().unwrap();
        assert!(snapshot.open_trades.is_empty());
        assert_eq!(snapshot.open_orders.len(), 1);
    }

    #[tokio::test]
    async fn test_liquidation_emits_one_event_and_ends_session() {
        let mut bot = test_bot();
        bot.cash = 10.0;
        let (engine, mut events) = TradingEngine::new(bot.clone(), Arc::new(IdleStrategy));

        engine.submit(OrderRequest::market(-1.0)).unwrap();

        drive(
            &engine,
            vec![
                trade_envelope(&bot, 100.0), // short opens
                trade_envelope(&bot, 250.0), // equity wiped out
                trade_envelope(&bot, 50.0),  // must not be processed
            ],
        )
        .await;

        assert!(!engine.is_running());
        let snapshot = engine.snapshot().unwrap();
        assert!(snapshot.liquidated);
        assert!(snapshot.open_trades.is_empty());

        let mut liquidations = 0;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::Liquidated { equity, .. } = event {
                assert!(equity <= 0.0);
                liquidations += 1;
            }
        }
        assert_eq!(liquidations, 1);

        // Post-liquidation submissions are rejected
        assert_eq!(
            engine.submit(OrderRequest::market(1.0)).unwrap_err(),
            BrokerError::Liquidated
        );
    }

    #[tokio::test]
    async fn test_malformed_price_dropped_loop_continues() {
        let bot = test_bot();
        let (engine, _events) = TradingEngine::new(bot.clone(), Arc::new(IdleStrategy));

        engine.submit(OrderRequest::market(1.0)).unwrap();

        drive(
            &engine,
            vec![
                trade_envelope(&bot, f64::NAN),
                trade_envelope(&bot, -1.0),
                trade_envelope(&bot, 100.0),
            ],
        )
        .await;

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.open_trades.len(), 1);
        assert_eq!(snapshot.open_trades[0].entry_price, 100.0);
    }
}
