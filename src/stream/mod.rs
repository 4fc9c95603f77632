//! Live tick loop: one session per symbol per trading day.
//!
//! Each tick fetches a quote, maintains the in-progress candle, feeds the
//! breakout validator, runs the exit rules over the trade book, and publishes
//! a full snapshot on the event bus. The loop runs at 700ms while the 6th
//! candle is being watched and 500ms otherwise.

pub mod events;

pub use events::{EngineEvent, EventBus};

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration as TokioDuration, Instant, MissedTickBehavior, interval_at};
use uuid::Uuid;

use crate::analysis::{Authorization, BreakoutValidator};
use crate::api::MarketData;
use crate::config::Settings;
use crate::execution::{TickContext, TradeBook};
use crate::models::{Candle, Trade, TrendType};
use crate::progression::{EngineStatus, ProgressionManager, ProgressionState};
use crate::store::TradeStore;
use crate::Result;

pub struct Session {
    settings: Settings,
    market_data: Arc<dyn MarketData>,
    store: Arc<dyn TradeStore>,
    events: EventBus,
    manager: ProgressionManager,
    validator: BreakoutValidator,
    book: TradeBook,
    live_candle: Option<Candle>,
    last_price: Option<f64>,
}

impl Session {
    /// Build a session, recovering any open trades left in the store
    pub async fn open(
        symbol: String,
        session_date: NaiveDate,
        timeframe_minutes: u32,
        settings: Settings,
        market_data: Arc<dyn MarketData>,
        store: Arc<dyn TradeStore>,
        events: EventBus,
    ) -> Result<Self> {
        let recovered = store.load_open_trades(&symbol).await?;
        if !recovered.is_empty() {
            tracing::info!(symbol = %symbol, count = recovered.len(), "Recovered open trades");
        }
        let validator = BreakoutValidator::new(settings.invalidation_minutes);
        let manager = ProgressionManager::start(
            symbol,
            session_date,
            timeframe_minutes,
            settings.clone(),
            market_data.clone(),
            events.clone(),
        );
        Ok(Self {
            settings,
            market_data,
            store,
            events,
            manager,
            validator,
            book: TradeBook::with_trades(recovered),
            live_candle: None,
            last_price: None,
        })
    }

    pub fn status(&self) -> EngineStatus {
        self.manager.status()
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn stop(&mut self) {
        self.manager.stop();
        self.validator.clear();
    }

    pub async fn trigger_fifth(&mut self, now: DateTime<Utc>) {
        self.manager.trigger_fifth(now).await;
    }

    pub async fn trigger_sixth(&mut self, now: DateTime<Utc>) {
        self.manager.trigger_sixth(now).await;
    }

    /// Register an externally placed trade and persist it
    pub async fn submit_trade(&mut self, trade: Trade) -> anyhow::Result<Uuid> {
        self.store.update_trade(&trade).await?;
        self.book.insert(trade)
    }

    pub fn tick_period(&self) -> TokioDuration {
        let ms = match self.manager.state() {
            ProgressionState::WatchingSixth => self.settings.sixth_candle_tick_ms,
            _ => self.settings.default_tick_ms,
        };
        TokioDuration::from_millis(ms)
    }

    /// One pass of the loop; returns false once the session should wind down
    pub async fn tick(&mut self, now: DateTime<Utc>) -> bool {
        self.manager.check_completion(now).await;
        if !self.manager.is_active() {
            return false;
        }

        let price = match self.market_data.get_quote(self.manager.symbol()).await {
            Ok(p) => {
                self.last_price = Some(p);
                p
            }
            Err(e) => match self.last_price {
                Some(p) => {
                    tracing::warn!(error = %e, "quote failed, using last close");
                    p
                }
                None => {
                    tracing::warn!(error = %e, "quote failed with no prior close, skipping tick");
                    return true;
                }
            },
        };

        let (candle_start, candle_end) = self.manager.candle_span_at(now);
        self.update_live_candle(price, candle_start, candle_end);

        let (uptrend_auth, downtrend_auth) = self.authorize_trends(price, now);

        let ctx = TickContext {
            price,
            now,
            candle_start,
            candle_end,
            local_time: self.settings.local_time(now),
        };
        self.run_exit_rules(&ctx).await;

        self.events.publish(EngineEvent::Cycle3LiveUpdate {
            symbol: self.manager.symbol().to_string(),
            timeframe_minutes: self.manager.timeframe_minutes(),
            at: now,
            price,
            state: self.manager.state(),
            live_candle: self.live_candle.clone(),
            open_trades: self.book.open_trades().len(),
            uptrend: uptrend_auth,
            downtrend: downtrend_auth,
        });

        !(self.manager.session_complete() && !self.book.has_open_trades())
    }

    fn update_live_candle(&mut self, price: f64, start: DateTime<Utc>, end: DateTime<Utc>) {
        match &mut self.live_candle {
            Some(candle) if candle.start_time == start => candle.apply_price(price),
            _ => {
                self.live_candle = Some(Candle {
                    symbol: self.manager.symbol().to_string(),
                    start_time: start,
                    end_time: end,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: 0.0,
                });
            }
        }
    }

    /// Feed the live price to the invalidation registry and evaluate both
    /// timing rules for each trend direction with a current analysis
    fn authorize_trends(
        &mut self,
        price: f64,
        now: DateTime<Utc>,
    ) -> (Option<Authorization>, Option<Authorization>) {
        let mut out = (None, None);
        for trend in [TrendType::Uptrend, TrendType::Downtrend] {
            let Some(snapshot) = self.manager.analysis().for_trend(trend).cloned() else {
                continue;
            };
            let key = self.manager.pattern_key(&snapshot.result);
            let timeframe = self.manager.timeframe_minutes();
            if let Some(record) = self.validator.observe_price(
                &snapshot.result,
                &snapshot.level,
                &key,
                price,
                now,
                timeframe,
            ) {
                tracing::warn!(
                    pattern = snapshot.result.pattern.label(),
                    trend = ?trend,
                    at = %record.broke_early_at,
                    "breakout level crossed before timing rules hold, pattern invalidated"
                );
            }
            let auth = self.validator.authorize(&snapshot.result, timeframe, &key, now);
            match trend {
                TrendType::Uptrend => out.0 = Some(auth),
                TrendType::Downtrend => out.1 = Some(auth),
            }
        }
        out
    }

    async fn run_exit_rules(&mut self, ctx: &TickContext) {
        let stops_before: HashMap<Uuid, f64> = self
            .book
            .open_trades()
            .iter()
            .map(|t| (t.id, t.stop_loss))
            .collect();

        let closed = self.book.evaluate_tick(ctx, &self.settings);
        for trade in closed {
            if let Err(e) = self.store.archive_trade(&trade).await {
                tracing::error!(trade_id = %trade.id, error = %e, "failed to archive closed trade");
            }
            self.events.publish(EngineEvent::TradeClosed { trade });
        }

        // Persist stop-loss moves (Rule E) so a restart keeps the breakeven stop
        let moved: Vec<Trade> = self
            .book
            .open_trades()
            .iter()
            .filter(|t| stops_before.get(&t.id).is_some_and(|s| *s != t.stop_loss))
            .map(|t| (*t).clone())
            .collect();
        for trade in moved {
            if let Err(e) = self.store.update_trade(&trade).await {
                tracing::error!(trade_id = %trade.id, error = %e, "failed to persist stop move");
            }
        }
    }
}

/// Owns the spawned tick loop; all control goes through the shared session
pub struct SessionHandle {
    session: Arc<Mutex<Session>>,
    events: EventBus,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn spawn(session: Session) -> Self {
        let events = session.events();
        let session = Arc::new(Mutex::new(session));
        let task = tokio::spawn(run_loop(session.clone()));
        Self {
            session,
            events,
            task,
        }
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub async fn status(&self) -> EngineStatus {
        self.session.lock().await.status()
    }

    pub async fn stop(&self) {
        self.session.lock().await.stop();
    }

    pub async fn trigger_fifth(&self, now: DateTime<Utc>) {
        self.session.lock().await.trigger_fifth(now).await;
    }

    pub async fn trigger_sixth(&self, now: DateTime<Utc>) {
        self.session.lock().await.trigger_sixth(now).await;
    }

    pub async fn submit_trade(&self, trade: Trade) -> anyhow::Result<Uuid> {
        self.session.lock().await.submit_trade(trade).await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "session task panicked");
        }
    }
}

async fn run_loop(session: Arc<Mutex<Session>>) {
    let mut period = session.lock().await.tick_period();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let mut guard = session.lock().await;
        if guard.events.subscriber_count() == 0 {
            tracing::info!("No event subscribers left, stopping session loop");
            break;
        }
        if !guard.tick(Utc::now()).await {
            tracing::info!("Session loop finished");
            break;
        }
        let wanted = guard.tick_period();
        drop(guard);
        // Watching the 6th candle runs on a faster clock
        if wanted != period {
            period = wanted;
            ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }
    }
}
