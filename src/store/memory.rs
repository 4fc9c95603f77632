use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::Result;
use crate::models::{Trade, TradeStatus};
use crate::store::TradeStore;

/// In-memory trade store, used when no database is configured and in tests.
/// Last write per trade id wins, matching the Postgres store's semantics.
#[derive(Default)]
pub struct MemoryTradeStore {
    trades: Mutex<HashMap<Uuid, Trade>>,
    archive: Mutex<Vec<Trade>>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a trade as if it had been placed externally
    pub fn seed(&self, trade: Trade) {
        self.trades.lock().unwrap().insert(trade.id, trade);
    }

    pub fn archived(&self) -> Vec<Trade> {
        self.archive.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn load_open_trades(&self, symbol: &str) -> Result<Vec<Trade>> {
        let trades = self.trades.lock().unwrap();
        let mut open: Vec<Trade> = trades
            .values()
            .filter(|t| t.symbol == symbol && t.status == TradeStatus::Open)
            .cloned()
            .collect();
        open.sort_by_key(|t| t.entry_time);
        Ok(open)
    }

    async fn update_trade(&self, trade: &Trade) -> Result<()> {
        self.trades.lock().unwrap().insert(trade.id, trade.clone());
        Ok(())
    }

    async fn archive_trade(&self, trade: &Trade) -> Result<()> {
        self.trades.lock().unwrap().insert(trade.id, trade.clone());
        self.archive.lock().unwrap().push(trade.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeSide;
    use chrono::{TimeZone, Utc};

    fn trade(symbol: &str) -> Trade {
        Trade::new(
            symbol.into(),
            TradeSide::Buy,
            24900.0,
            1.0,
            24885.0,
            50.0,
            Utc.with_ymd_and_hms(2025, 7, 14, 4, 35, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_load_open_filters_symbol_and_status() {
        let store = MemoryTradeStore::new();
        store.seed(trade("NIFTY"));
        store.seed(trade("BANKNIFTY"));

        let mut closed = trade("NIFTY");
        closed.status = TradeStatus::Closed;
        store.seed(closed);

        let open = store.load_open_trades("NIFTY").await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "NIFTY");
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = MemoryTradeStore::new();
        let mut t = trade("NIFTY");
        store.update_trade(&t).await.unwrap();

        t.stop_loss = 24900.0;
        store.update_trade(&t).await.unwrap();

        let open = store.load_open_trades("NIFTY").await.unwrap();
        assert_eq!(open[0].stop_loss, 24900.0);
    }

    #[tokio::test]
    async fn test_archive_keeps_closed_copy() {
        let store = MemoryTradeStore::new();
        let mut t = trade("NIFTY");
        t.status = TradeStatus::Closed;
        store.archive_trade(&t).await.unwrap();

        assert_eq!(store.archived().len(), 1);
        assert!(store.load_open_trades("NIFTY").await.unwrap().is_empty());
    }
}
