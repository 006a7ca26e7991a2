use clap::Parser;
use std::sync::Arc;

use tradebot::api::HistoryClient;
use tradebot::backtest::{BacktestEngine, BacktestRunner, MarketScenario, SyntheticDataGenerator};
use tradebot::db::PostgresPersistence;
use tradebot::models::Candle;
use tradebot::strategy::{BuyAndHoldStrategy, SmaCrossStrategy, Strategy};
use tradebot::Result;

/// Replay a strategy over historical or synthetic candles
#[derive(Parser, Debug)]
#[command(name = "backtest")]
struct Args {
    /// Strategy name (sma_cross, buy_and_hold)
    #[arg(long, default_value = "sma_cross")]
    strategy: String,

    /// Synthetic scenario (uptrend, downtrend, sideways, volatile, crash)
    #[arg(long, default_value = "volatile")]
    scenario: String,

    /// Fetch real klines for this symbol instead of synthetic data
    #[arg(long)]
    symbol: Option<String>,

    /// Candle interval for fetched data
    #[arg(long, default_value = "1m")]
    interval: String,

    /// Number of candles
    #[arg(long, default_value_t = 1000)]
    candles: usize,

    /// Initial capital
    #[arg(long, default_value_t = 10_000.0)]
    cash: f64,

    /// Commission as a fraction of notional
    #[arg(long, default_value_t = 0.001)]
    commission: f64,

    /// Seed for synthetic data
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradebot=info".into()),
        )
        .init();

    let args = Args::parse();

    let candles = load_candles(&args).await?;
    tracing::info!("loaded {} candles", candles.len());

    let strategy = build_strategy(&args.strategy);
    let runner = BacktestRunner::new(args.cash, args.commission);
    let record = runner.run(strategy.as_ref(), &candles)?;

    record.print_report();

    if let Ok(url) = std::env::var("DATABASE_URL") {
        let db = PostgresPersistence::new(&url).await?;
        db.save_backtest(&record).await?;
        tracing::info!(id = %record.id, "backtest record saved");
    }

    Ok(())
}

async fn load_candles(args: &Args) -> Result<Vec<Candle>> {
    if let Some(symbol) = &args.symbol {
        let client = HistoryClient::new();
        let candles = client
            .fetch_ohlcv(symbol, &args.interval, args.candles as u32)
            .await?;
        return Ok(candles);
    }

    let scenario = match args.scenario.as_str() {
        "uptrend" => MarketScenario::Uptrend,
        "downtrend" => MarketScenario::Downtrend,
        "sideways" => MarketScenario::Sideways,
        "volatile" => MarketScenario::Volatile,
        "crash" => MarketScenario::Crash,
        other => return Err(format!("unknown scenario: {}", other).into()),
    };

    let mut gen = SyntheticDataGenerator::new(args.seed, 100.0);
    Ok(gen.generate(scenario, args.candles, 5))
}

fn build_strategy(name: &str) -> Arc<dyn Strategy> {
    match name {
        "buy_and_hold" => Arc::new(BuyAndHoldStrategy::default()),
        _ => Arc::new(SmaCrossStrategy::default()),
    }
}
