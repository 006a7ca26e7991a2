use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::backtest::BacktestRecord;
use crate::execution::{EquityPoint, Trade};
use crate::models::Bot;
use crate::Result;

/// Postgres persistence for bots, closed trades, equity snapshots and
/// backtest records
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Connect to Postgres and run schema migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    /// Insert or update a bot's configuration
    pub async fn save_bot(&self, bot: &Bot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bots (
                id, name, dry_run, leverage, hedge_mode, exclusive_mode,
                timeframe, symbol, exchange, cash, commission, strategy_name
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                dry_run = EXCLUDED.dry_run,
                cash = EXCLUDED.cash,
                strategy_name = EXCLUDED.strategy_name,
                updated_at = NOW()
            "#,
        )
        .bind(bot.id)
        .bind(&bot.name)
        .bind(bot.dry_run)
        .bind(bot.leverage)
        .bind(bot.hedge_mode)
        .bind(bot.exclusive_mode)
        .bind(&bot.timeframe)
        .bind(&bot.symbol)
        .bind(&bot.exchange)
        .bind(bot.cash)
        .bind(bot.commission)
        .bind(&bot.strategy_name)
        .execute(&self.pool)
        .await?;

        tracing::debug!(bot = %bot.name, "saved bot to Postgres");
        Ok(())
    }

    /// Save a closed trade
    pub async fn save_trade(&self, bot_id: Uuid, trade: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                bot_id, trade_id, size, entry_price, entry_time, exit_price, exit_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (bot_id, trade_id) DO UPDATE SET
                size = EXCLUDED.size,
                exit_price = EXCLUDED.exit_price,
                exit_time = EXCLUDED.exit_time
            "#,
        )
        .bind(bot_id)
        .bind(trade.id as i64)
        .bind(trade.size)
        .bind(trade.entry_price)
        .bind(trade.entry_time)
        .bind(trade.exit_price)
        .bind(trade.exit_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append one equity snapshot
    pub async fn save_equity_point(&self, bot_id: Uuid, point: &EquityPoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO equity_snapshots (bot_id, ts, equity, cash)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(bot_id)
        .bind(point.timestamp)
        .bind(point.equity)
        .bind(point.cash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a write-once backtest record
    pub async fn save_backtest(&self, record: &BacktestRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backtests (
                id, strategy_name, start_date, end_date, initial_capital,
                final_equity, total_return, max_drawdown, win_rate,
                profit_factor, total_trades, trades, equity_curve
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id)
        .bind(&record.strategy_name)
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(record.initial_capital)
        .bind(record.final_equity)
        .bind(record.total_return_pct)
        .bind(record.max_drawdown_pct)
        .bind(record.win_rate_pct)
        .bind(record.profit_factor)
        .bind(record.total_trades as i64)
        .bind(&record.trades)
        .bind(&record.equity_curve)
        .execute(&self.pool)
        .await?;

        tracing::debug!(id = %record.id, "saved backtest record to Postgres");
        Ok(())
    }

    /// Most recent backtest summaries (without serialized series)
    pub async fn list_backtests(&self, limit: i64) -> Result<Vec<(Uuid, String, f64, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT id, strategy_name, total_return, total_trades
            FROM backtests
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get("id"),
                    row.get("strategy_name"),
                    row.get("total_return"),
                    row.get("total_trades"),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::BrokerState;
    use crate::models::Bot;
    use chrono::Utc;

    fn test_database_url() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_save_and_list_backtests() {
        let url = test_database_url().expect("DATABASE_URL not set");
        let db = PostgresPersistence::new(&url).await.unwrap();

        let record = BacktestRecord::from_results(
            "sma_cross",
            Utc::now(),
            Utc::now(),
            10_000.0,
            10_500.0,
            &[],
            &[],
        )
        .unwrap();

        db.save_backtest(&record).await.unwrap();

        let listed = db.list_backtests(10).await.unwrap();
        assert!(listed.iter().any(|(id, _, _, _)| *id == record.id));
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_save_bot_and_trade() {
        let url = test_database_url().expect("DATABASE_URL not set");
        let db = PostgresPersistence::new(&url).await.unwrap();

        let bot = Bot::example();
        db.save_bot(&bot).await.unwrap();

        let mut broker = BrokerState::new(1_000.0, 0.0, true);
        let order = crate::execution::Order {
            id: 1,
            size: 1.0,
            limit_price: None,
            stop_price: None,
            sl_price: None,
            tp_price: None,
            status: crate::execution::OrderStatus::Open,
            parent_id: None,
            trade_id: None,
            is_contingent: false,
            created_at: Utc::now(),
        };
        broker.apply_fill(&order, 100.0, Utc::now()).unwrap();

        for trade in broker.open_trades() {
            db.save_trade(bot.id, trade).await.unwrap();
        }
    }
}
