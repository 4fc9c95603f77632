use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use uuid::Uuid;

use crate::models::{ExitReason, Trade, TradeSide, TradeStatus};
use crate::store::TradeStore;
use crate::{Error, Result};

/// Postgres-backed trade store
pub struct PostgresTradeStore {
    pool: PgPool,
}

impl PostgresTradeStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::StorageWriteFailed(e.to_string()))?;

        tracing::info!("Connected to Postgres at {}", database_url);
        Ok(Self { pool })
    }

    async fn upsert(&self, trade: &Trade) -> Result<()> {
        let side_str = match trade.side {
            TradeSide::Buy => "Buy",
            TradeSide::Sell => "Sell",
        };
        let status_str = match trade.status {
            TradeStatus::Open => "Open",
            TradeStatus::Closed => "Closed",
        };
        let exit_reason_str = trade.exit_reason.map(exit_reason_to_str);

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, symbol, side, entry_price, quantity, entry_time,
                stop_loss, target_pl, status, exit_price, exit_reason, exit_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                stop_loss = EXCLUDED.stop_loss,
                status = EXCLUDED.status,
                exit_price = EXCLUDED.exit_price,
                exit_reason = EXCLUDED.exit_reason,
                exit_time = EXCLUDED.exit_time,
                updated_at = NOW()
            "#,
        )
        .bind(trade.id)
        .bind(&trade.symbol)
        .bind(side_str)
        .bind(trade.entry_price)
        .bind(trade.quantity)
        .bind(trade.entry_time)
        .bind(trade.stop_loss)
        .bind(trade.target_pl)
        .bind(status_str)
        .bind(trade.exit_price)
        .bind(exit_reason_str)
        .bind(trade.exit_time)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageWriteFailed(e.to_string()))?;

        tracing::debug!("Saved trade {} for {}", trade.id, trade.symbol);
        Ok(())
    }
}

#[async_trait]
impl TradeStore for PostgresTradeStore {
    async fn load_open_trades(&self, symbol: &str) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, side, entry_price, quantity, entry_time,
                   stop_loss, target_pl, status, exit_price, exit_reason, exit_time
            FROM trades
            WHERE symbol = $1 AND status = 'Open'
            ORDER BY entry_time ASC
            "#,
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        let mut trades = Vec::new();
        for row in rows {
            let id: Uuid = row.get("id");
            let symbol: String = row.get("symbol");
            let side_str: String = row.get("side");
            let entry_price: f64 = row.get("entry_price");
            let quantity: f64 = row.get("quantity");
            let entry_time: DateTime<Utc> = row.get("entry_time");
            let stop_loss: f64 = row.get("stop_loss");
            let target_pl: f64 = row.get("target_pl");
            let status_str: String = row.get("status");
            let exit_price: Option<f64> = row.get("exit_price");
            let exit_reason_str: Option<String> = row.get("exit_reason");
            let exit_time: Option<DateTime<Utc>> = row.get("exit_time");

            let side = match side_str.as_str() {
                "Buy" => TradeSide::Buy,
                _ => TradeSide::Sell,
            };
            let status = match status_str.as_str() {
                "Closed" => TradeStatus::Closed,
                _ => TradeStatus::Open,
            };
            let exit_reason = exit_reason_str.as_deref().and_then(exit_reason_from_str);

            trades.push(Trade {
                id,
                symbol,
                side,
                entry_price,
                quantity,
                stop_loss,
                target_pl,
                entry_time,
                status,
                exit_price,
                exit_reason,
                exit_time,
            });
        }

        tracing::info!("Loaded {} open trades from Postgres", trades.len());
        Ok(trades)
    }

    async fn update_trade(&self, trade: &Trade) -> Result<()> {
        self.upsert(trade).await
    }

    async fn archive_trade(&self, trade: &Trade) -> Result<()> {
        self.upsert(trade).await
    }
}

fn exit_reason_to_str(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::FastTrend => "FastTrend",
        ExitReason::Target => "Target",
        ExitReason::CandleClose => "CandleClose",
        ExitReason::StopLoss => "StopLoss",
        ExitReason::TrailingStop => "TrailingStop",
        ExitReason::Manual => "Manual",
    }
}

fn exit_reason_from_str(s: &str) -> Option<ExitReason> {
    match s {
        "FastTrend" => Some(ExitReason::FastTrend),
        "Target" => Some(ExitReason::Target),
        "CandleClose" => Some(ExitReason::CandleClose),
        "StopLoss" => Some(ExitReason::StopLoss),
        "TrailingStop" => Some(ExitReason::TrailingStop),
        "Manual" => Some(ExitReason::Manual),
        _ => None,
    }
}
