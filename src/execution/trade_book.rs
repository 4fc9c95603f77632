use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::Settings;
use crate::execution::exit_rules::{TickContext, evaluate_exit_rules};
use crate::models::{ExitReason, Trade, TradeStatus};

/// In-memory set of trades for one session.
///
/// Trades are created externally (manual or automatic placement) and handed
/// to the book; the exit engine mutates them every tick and closed trades are
/// archived by the caller.
pub struct TradeBook {
    trades: Vec<Trade>,
    /// Most favorable P&L (points) seen per trade, for the trailing stop
    best_points: HashMap<Uuid, f64>,
}

impl TradeBook {
    pub fn new() -> Self {
        Self {
            trades: Vec::new(),
            best_points: HashMap::new(),
        }
    }

    /// Restore a book from externally loaded trades
    pub fn with_trades(trades: Vec<Trade>) -> Self {
        let open = trades.iter().filter(|t| t.status == TradeStatus::Open).count();
        tracing::info!("Restored {} trades ({} open)", trades.len(), open);
        Self {
            trades,
            best_points: HashMap::new(),
        }
    }

    pub fn insert(&mut self, trade: Trade) -> anyhow::Result<Uuid> {
        if self.trades.iter().any(|t| t.id == trade.id) {
            anyhow::bail!("Trade {} already tracked", trade.id);
        }
        let id = trade.id;
        self.trades.push(trade);
        Ok(id)
    }

    pub fn open_trades(&self) -> Vec<&Trade> {
        self.trades
            .iter()
            .filter(|t| t.status == TradeStatus::Open)
            .collect()
    }

    pub fn has_open_trades(&self) -> bool {
        self.trades.iter().any(|t| t.status == TradeStatus::Open)
    }

    pub fn all_trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn get(&self, id: Uuid) -> Option<&Trade> {
        self.trades.iter().find(|t| t.id == id)
    }

    /// Run the exit scenario engine over every open trade for one tick.
    /// Returns the trades closed this tick, in evaluation order.
    pub fn evaluate_tick(&mut self, ctx: &TickContext, settings: &Settings) -> Vec<Trade> {
        let open_ids: Vec<Uuid> = self
            .trades
            .iter()
            .filter(|t| t.status == TradeStatus::Open)
            .map(|t| t.id)
            .collect();

        let mut closed = Vec::new();
        for id in open_ids {
            let Some(trade) = self.trades.iter_mut().find(|t| t.id == id) else {
                continue;
            };

            let points = trade.pnl_points(ctx.price);
            let best = self
                .best_points
                .entry(id)
                .and_modify(|b| *b = b.max(points))
                .or_insert(points);
            let outcome = evaluate_exit_rules(trade, *best, ctx, settings);

            if outcome.move_stop_to_entry {
                tracing::info!(
                    trade = %id,
                    stop = trade.entry_price,
                    "Risk-free rule: stop moved to breakeven"
                );
                trade.stop_loss = trade.entry_price;
            }

            if let Some(reason) = outcome.close {
                trade.status = TradeStatus::Closed;
                trade.exit_price = Some(ctx.price);
                trade.exit_reason = Some(reason);
                trade.exit_time = Some(ctx.now);
                self.best_points.remove(&id);
                tracing::info!(
                    trade = %id,
                    reason = reason.label(),
                    price = ctx.price,
                    "Trade closed"
                );
                closed.push(trade.clone());
            }
        }
        closed
    }

    /// Close a single trade outside the rule engine (ops/manual path)
    pub fn close_trade(
        &mut self,
        id: Uuid,
        exit_price: f64,
        reason: ExitReason,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Trade> {
        let trade = self
            .trades
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow::anyhow!("Trade not found"))?;
        if trade.status == TradeStatus::Closed {
            anyhow::bail!("Trade already closed");
        }
        trade.status = TradeStatus::Closed;
        trade.exit_price = Some(exit_price);
        trade.exit_reason = Some(reason);
        trade.exit_time = Some(at);
        self.best_points.remove(&id);
        Ok(trade.clone())
    }
}

impl Default for TradeBook {
    fn default() -> Self {
        Self::new()
    }
}
