use std::sync::Arc;
use std::time::Duration;

use tradebot::collector::MarketDataCollector;
use tradebot::db::PostgresPersistence;
use tradebot::engine::{EngineEvent, TradingEngine};
use tradebot::exchange::{BinanceStream, ExchangeStream, SimExchange};
use tradebot::models::Bot;
use tradebot::publisher::ChannelPublisher;
use tradebot::strategy::{BuyAndHoldStrategy, SmaCrossStrategy, Strategy};
use tradebot::Result;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let bot = bot_from_env();
    tracing::info!("Starting trading bot");
    tracing::info!("  Name:       {}", bot.name);
    tracing::info!("  Market:     {} on {}", bot.symbol, bot.exchange);
    tracing::info!("  Timeframe:  {}", bot.timeframe);
    tracing::info!("  Cash:       {:.2}", bot.cash);
    tracing::info!("  Commission: {:.4}", bot.commission);
    tracing::info!("  Strategy:   {}", bot.strategy_name);
    tracing::info!(
        "  Modes:      dry_run={} hedge={} exclusive={}",
        bot.dry_run,
        bot.hedge_mode,
        bot.exclusive_mode
    );

    // Optional persistence
    let db = match std::env::var("DATABASE_URL") {
        Ok(url) => match PostgresPersistence::new(&url).await {
            Ok(db) => {
                db.save_bot(&bot).await?;
                Some(Arc::new(db))
            }
            Err(e) => {
                tracing::warn!("Postgres unavailable, running without persistence: {}", e);
                None
            }
        },
        Err(_) => None,
    };

    let exchange = build_exchange(&bot)?;
    let strategy = build_strategy(&bot.strategy_name);

    // Wire collector -> publisher channel -> engine
    let (publisher, envelope_rx) = ChannelPublisher::new();
    let collector = Arc::new(MarketDataCollector::new(
        exchange,
        &bot.exchange,
        &bot.symbol,
        &bot.timeframe,
        Arc::new(publisher),
    ));

    let (engine, events_rx) = TradingEngine::new(bot.clone(), strategy);
    let engine = Arc::new(engine);

    let collector_task = {
        let collector = collector.clone();
        tokio::spawn(async move { collector.start().await })
    };

    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(envelope_rx).await })
    };

    let events_task = {
        let bot_id = bot.id;
        tokio::spawn(async move { handle_events(events_rx, db, bot_id).await })
    };

    tracing::info!("All tasks spawned, press Ctrl+C to stop...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        result = engine_task => {
            tracing::warn!("Engine exited: {:?}", result);
        }
    }

    collector.stop();
    engine.stop();
    let _ = tokio::time::timeout(Duration::from_secs(10), collector_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), events_task).await;

    tracing::info!("Trading bot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradebot=info".into()),
        )
        .init();
}

/// Bot configuration: provisioning defaults overridable via environment
fn bot_from_env() -> Bot {
    let mut bot = Bot::example();

    if let Ok(name) = std::env::var("BOT_NAME") {
        bot.name = name;
    }
    if let Ok(symbol) = std::env::var("BOT_SYMBOL") {
        bot.symbol = symbol;
    }
    if let Ok(exchange) = std::env::var("BOT_EXCHANGE") {
        bot.exchange = exchange;
    }
    if let Ok(timeframe) = std::env::var("BOT_TIMEFRAME") {
        bot.timeframe = timeframe;
    }
    if let Ok(cash) = std::env::var("BOT_CASH") {
        if let Ok(cash) = cash.parse() {
            bot.cash = cash;
        }
    }
    if let Ok(commission) = std::env::var("BOT_COMMISSION") {
        if let Ok(commission) = commission.parse() {
            bot.commission = commission;
        }
    }
    if let Ok(strategy) = std::env::var("BOT_STRATEGY") {
        bot.strategy_name = strategy;
    }

    bot
}

/// Select the market-data source: the real exchange stream, or the seeded
/// sim for offline runs (EXCHANGE_MODE=sim)
fn build_exchange(bot: &Bot) -> Result<Arc<dyn ExchangeStream>> {
    let mode = std::env::var("EXCHANGE_MODE").unwrap_or_else(|_| "binance".to_string());

    match mode.as_str() {
        "binance" => Ok(Arc::new(BinanceStream::new())),
        "sim" => Ok(Arc::new(SimExchange::new(42, 50_000.0))),
        other => Err(format!("unknown EXCHANGE_MODE: {}", other).into()),
    }
}

fn build_strategy(name: &str) -> Arc<dyn Strategy> {
    match name {
        "buy_and_hold" => Arc::new(BuyAndHoldStrategy::default()),
        "sma_cross" => Arc::new(SmaCrossStrategy::default()),
        other => {
            tracing::warn!("unknown strategy '{}', falling back to sma_cross", other);
            Arc::new(SmaCrossStrategy::default())
        }
    }
}

/// Consume engine events: log fills and liquidation, persist snapshots
async fn handle_events(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<EngineEvent>,
    db: Option<Arc<PostgresPersistence>>,
    bot_id: uuid::Uuid,
) {
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Fill(fill) => {
                tracing::info!(
                    order_id = fill.order_id,
                    trade_id = ?fill.trade_id,
                    price = fill.price,
                    "order filled"
                );
            }
            EngineEvent::Snapshot(snapshot) => {
                tracing::info!(
                    equity = snapshot.equity,
                    cash = snapshot.cash,
                    open_trades = snapshot.open_trades.len(),
                    closed_trades = snapshot.closed_trades.len(),
                    "periodic snapshot"
                );

                if let Some(db) = &db {
                    if let Some(point) = snapshot.equity_curve.last() {
                        if let Err(e) = db.save_equity_point(bot_id, point).await {
                            tracing::warn!("failed to persist equity point: {}", e);
                        }
                    }
                    for trade in &snapshot.closed_trades {
                        if let Err(e) = db.save_trade(bot_id, trade).await {
                            tracing::warn!("failed to persist trade: {}", e);
                        }
                    }
                }
            }
            EngineEvent::Liquidated { equity, time } => {
                tracing::error!(equity, %time, "session liquidated");
            }
        }
    }
}
