pub mod memory;
pub mod postgres;

pub use memory::MemoryTradeStore;
pub use postgres::PostgresTradeStore;

use async_trait::async_trait;

use crate::Result;
use crate::models::Trade;

/// Opaque trade store: load open trades at startup, persist every mutation,
/// archive closures. Concurrent writers are last-write-wins per trade id.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn load_open_trades(&self, symbol: &str) -> Result<Vec<Trade>>;

    /// Persist the current state of a trade (open or closed)
    async fn update_trade(&self, trade: &Trade) -> Result<()>;

    /// Record a closed trade in the archive
    async fn archive_trade(&self, trade: &Trade) -> Result<()>;
}
