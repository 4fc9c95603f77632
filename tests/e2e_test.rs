//! End-to-end session flow against an in-memory store and a scripted feed:
//! block analysis after the 4th candle, breakout authorization, exit rules
//! over a submitted trade, and timeframe doubling through to completion.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;

use trendblock::api::MarketData;
use trendblock::store::{MemoryTradeStore, TradeStore};
use trendblock::stream::{EngineEvent, EventBus, Session};
use trendblock::{
    Candle, Error, ExitReason, PatternName, Result, Settings, Trade, TradeSide, TradeStatus,
};

struct ScriptedFeed {
    minutes: Vec<Candle>,
    quote: std::sync::Mutex<f64>,
}

#[async_trait]
impl MarketData for ScriptedFeed {
    async fn get_candles(
        &self,
        _symbol: &str,
        _resolution_minutes: u32,
        _from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        Ok(self
            .minutes
            .iter()
            .filter(|c| c.start_time < to)
            .cloned()
            .collect())
    }

    async fn get_quote(&self, _symbol: &str) -> Result<f64> {
        Ok(*self.quote.lock().map_err(|_| Error::QuoteFetchFailed {
            symbol: "NIFTY".into(),
            reason: "poisoned".into(),
        })?)
    }
}

fn t(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 14, h, m, 0).unwrap()
}

/// Forty 1-minute candles from 09:15, shaped so the dominant uptrend pattern
/// is 1-3: Point A low 24907.6 at 09:22, Point B high 24978.75 at 09:38.
fn session_minutes() -> Vec<Candle> {
    let open = t(9, 15);
    let mut candles: Vec<Candle> = (0..40)
        .map(|i| Candle {
            symbol: "NIFTY".into(),
            start_time: open + Duration::minutes(i),
            end_time: open + Duration::minutes(i + 1),
            open: 24950.0,
            high: 24951.0,
            low: 24949.0,
            close: 24950.0,
            volume: 1000.0,
        })
        .collect();
    candles[0].high = 24994.85;
    candles[7].low = 24907.6;
    candles[11].low = 24940.0;
    candles[23].high = 24978.75;
    candles[25].low = 24945.0;
    candles[34].low = 24912.7;
    candles
}

async fn open_session(
    feed: Arc<ScriptedFeed>,
    store: Arc<MemoryTradeStore>,
    events: EventBus,
) -> Session {
    // The scripted feed runs on UTC wall-clock, so no exchange offset
    let settings = Settings {
        utc_offset_minutes: 0,
        ..Settings::default()
    };
    Session::open(
        "NIFTY".into(),
        NaiveDate::from_ymd_opt(2025, 7, 14).unwrap(),
        10,
        settings,
        feed,
        store,
        events,
    )
    .await
    .unwrap()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[tokio::test]
async fn test_full_session_flow() {
    let feed = Arc::new(ScriptedFeed {
        minutes: session_minutes(),
        quote: std::sync::Mutex::new(24950.0),
    });
    let store = Arc::new(MemoryTradeStore::new());
    let events = EventBus::new(512);
    let mut rx = events.subscribe();
    let mut session = open_session(feed.clone(), store.clone(), events).await;

    // First tick past 09:55 completes the 4th 10-minute candle and runs the
    // Point A/B analysis over the fresh minute data.
    assert!(session.tick(t(9, 56)).await);
    let batch = drain(&mut rx);
    assert!(batch
        .iter()
        .any(|e| matches!(e, EngineEvent::FifthCandleStarted { timeframe_minutes: 10, .. })));
    let analysis = batch
        .iter()
        .find_map(|e| match e {
            EngineEvent::PointAbAnalysisUpdate { analysis, .. } => Some(analysis.clone()),
            _ => None,
        })
        .expect("analysis update");
    let up = analysis.uptrend.expect("dominant uptrend");
    assert_eq!(up.result.pattern, PatternName::OneThree);
    assert_eq!(up.result.point_a.price, 24907.6);
    assert_eq!(up.level.price, 24978.75);
    assert!((up.result.slope - 4.446875).abs() < 1e-9);

    // Both timing rules held long ago by 09:56, so the uptrend is authorized
    let live = batch
        .iter()
        .rev()
        .find_map(|e| match e {
            EngineEvent::Cycle3LiveUpdate { uptrend, .. } => uptrend.clone(),
            _ => None,
        })
        .expect("uptrend authorization");
    assert!(live.rule1);
    assert!(live.rule2);
    assert!(live.authorized);

    // A long from 24920 with a 30-point target: the 24950 quote sits at
    // +30 points, beyond the 20-point fast-trend threshold, so Rule A closes
    // it on the next tick and the store archives it.
    let trade = Trade::new(
        "NIFTY".into(),
        TradeSide::Buy,
        24920.0,
        50.0,
        24900.0,
        30.0,
        t(9, 56),
    );
    session.submit_trade(trade).await.unwrap();
    assert!(session.tick(t(9, 57)).await);
    let closed = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            EngineEvent::TradeClosed { trade } => Some(trade),
            _ => None,
        })
        .expect("trade_closed");
    assert_eq!(closed.status, TradeStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::FastTrend));
    assert_eq!(closed.pnl(24950.0), 30.0 * 50.0);
    assert_eq!(store.archived().len(), 1);
    assert!(store.load_open_trades("NIFTY").await.unwrap().is_empty());

    // Jump past the 6th candle of every cycle: 10 -> 20 -> 40 -> 80, then the
    // session completes and the loop winds down with no open trades left.
    let done = session.tick(t(9, 15) + Duration::minutes(80 * 6)).await;
    assert!(!done);
    let tail = drain(&mut rx);
    let doublings: Vec<(u32, u32)> = tail
        .iter()
        .filter_map(|e| match e {
            EngineEvent::TimeframeDoubling { from_minutes, to_minutes, .. } => {
                Some((*from_minutes, *to_minutes))
            }
            _ => None,
        })
        .collect();
    assert_eq!(doublings, vec![(10, 20), (20, 40), (40, 80)]);
    assert!(tail.iter().any(|e| matches!(
        e,
        EngineEvent::AnalysisComplete { final_timeframe_minutes: 80, .. }
    )));
}

#[tokio::test]
async fn test_late_session_cutoff_closes_open_trade() {
    let feed = Arc::new(ScriptedFeed {
        minutes: session_minutes(),
        quote: std::sync::Mutex::new(24950.0),
    });
    let store = Arc::new(MemoryTradeStore::new());
    let events = EventBus::new(512);
    let mut rx = events.subscribe();
    let mut session = open_session(feed.clone(), store.clone(), events).await;

    // Short from 24952 stays open: -2 points triggers nothing at first
    let trade = Trade::new(
        "NIFTY".into(),
        TradeSide::Sell,
        24952.0,
        50.0,
        24990.0,
        40.0,
        t(9, 56),
    );
    session.submit_trade(trade).await.unwrap();

    // Completion at open + 480 min is 17:15 local, past the 15:25 cutoff, so
    // Rule C closes the trade on the same tick and the session can end.
    let done = session.tick(t(9, 15) + Duration::minutes(80 * 6)).await;
    assert!(!done);
    let closed = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            EngineEvent::TradeClosed { trade } => Some(trade),
            _ => None,
        })
        .expect("late-session close");
    assert_eq!(closed.exit_reason, Some(ExitReason::CandleClose));
}

#[tokio::test]
async fn test_restart_recovers_open_trades() {
    let feed = Arc::new(ScriptedFeed {
        minutes: session_minutes(),
        quote: std::sync::Mutex::new(24950.0),
    });
    let store = Arc::new(MemoryTradeStore::new());
    let trade = Trade::new(
        "NIFTY".into(),
        TradeSide::Buy,
        24948.0,
        50.0,
        24930.0,
        40.0,
        t(9, 56),
    );
    store.seed(trade.clone());

    let events = EventBus::new(64);
    let mut session = open_session(feed, store, events.clone()).await;
    let mut rx = events.subscribe();

    // The recovered trade shows up in the live snapshot immediately
    assert!(session.tick(t(9, 56)).await);
    let open_counts: Vec<usize> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::Cycle3LiveUpdate { open_trades, .. } => Some(open_trades),
            _ => None,
        })
        .collect();
    assert_eq!(open_counts, vec![1]);
}
