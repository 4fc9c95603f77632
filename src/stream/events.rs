use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::analysis::Authorization;
use crate::models::{Candle, ProgressionTrigger, Trade};
use crate::progression::{AnalysisSnapshot, ProgressionState};

/// Events broadcast to the display layer and any other subscriber.
///
/// Serialized tags are the engine's wire contract: `fifth_candle_started`,
/// `fifth_to_sixth_progression`, `sixth_candle_complete`,
/// `point_ab_analysis_update`, `timeframe_doubling`, `analysis_complete`,
/// `trade_closed`, `cycle3_live_update`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    FifthCandleStarted {
        symbol: String,
        timeframe_minutes: u32,
        at: DateTime<Utc>,
    },
    FifthToSixthProgression {
        symbol: String,
        timeframe_minutes: u32,
        trigger: ProgressionTrigger,
    },
    SixthCandleComplete {
        symbol: String,
        timeframe_minutes: u32,
        at: DateTime<Utc>,
    },
    PointAbAnalysisUpdate {
        symbol: String,
        timeframe_minutes: u32,
        analysis: AnalysisSnapshot,
    },
    TimeframeDoubling {
        symbol: String,
        from_minutes: u32,
        to_minutes: u32,
    },
    AnalysisComplete {
        symbol: String,
        final_timeframe_minutes: u32,
    },
    TradeClosed {
        trade: Trade,
    },
    /// Periodic full snapshot emitted every tick
    Cycle3LiveUpdate {
        symbol: String,
        timeframe_minutes: u32,
        at: DateTime<Utc>,
        price: f64,
        state: ProgressionState,
        live_candle: Option<Candle>,
        open_trades: usize,
        uptrend: Option<Authorization>,
        downtrend: Option<Authorization>,
    },
}

/// Best-effort fan-out to all current subscribers; lagging receivers drop
/// messages rather than exerting backpressure.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send to whoever is listening; a channel with no receivers is not an
    /// error, the event is simply dropped
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
