//! Candle progression state machine.
//!
//! Advances the monitoring window candle-by-candle (4th -> 5th -> 6th),
//! doubling the timeframe when the 6th candle completes without ending the
//! session. Transitions re-fetch fresh minute data and re-run the slope and
//! breakout analysis; a failed fetch degrades to stale analysis rather than
//! blocking the transition.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::analysis::{breakout_level, detect_slopes};
use crate::api::MarketData;
use crate::blocks::{BlockLayout, build_blocks};
use crate::config::Settings;
use crate::models::{
    BreakoutLevel, Candle, PatternKey, ProgressionTrigger, SlopeResult, TrendType,
};
use crate::stream::events::{EngineEvent, EventBus};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionState {
    Idle,
    WatchingFifth,
    WatchingSixth,
    Done,
}

/// Dominant slope plus its breakout level for one trend direction
#[derive(Debug, Clone, Serialize)]
pub struct TrendSnapshot {
    pub result: SlopeResult,
    pub level: BreakoutLevel,
}

/// Latest analysis for both trend directions
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisSnapshot {
    pub uptrend: Option<TrendSnapshot>,
    pub downtrend: Option<TrendSnapshot>,
}

impl AnalysisSnapshot {
    pub fn for_trend(&self, trend: TrendType) -> Option<&TrendSnapshot> {
        match trend {
            TrendType::Uptrend => self.uptrend.as_ref(),
            TrendType::Downtrend => self.downtrend.as_ref(),
        }
    }
}

/// Result of one completion check
#[derive(Debug, Clone, Serialize)]
pub struct CompletionStatus {
    pub state: ProgressionState,
    pub transitioned: bool,
    pub session_complete: bool,
    pub next_deadline: Option<DateTime<Utc>>,
}

/// Control-surface status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub is_active: bool,
    pub current_timeframe: u32,
    pub triggers_fired: Vec<ProgressionTrigger>,
}

pub struct ProgressionManager {
    symbol: String,
    session_date: NaiveDate,
    timeframe_minutes: u32,
    state: ProgressionState,
    active: bool,
    session_complete: bool,
    /// Idempotency set keyed by (timeframe, from, to)
    fired: HashSet<(u32, u8, u8)>,
    triggers: Vec<ProgressionTrigger>,
    analysis: AnalysisSnapshot,
    minute_candles: Vec<Candle>,
    settings: Settings,
    market_data: Arc<dyn MarketData>,
    events: EventBus,
}

impl ProgressionManager {
    pub fn start(
        symbol: String,
        session_date: NaiveDate,
        timeframe_minutes: u32,
        settings: Settings,
        market_data: Arc<dyn MarketData>,
        events: EventBus,
    ) -> Self {
        tracing::info!(
            symbol = %symbol,
            timeframe = timeframe_minutes,
            "Progression session started"
        );
        Self {
            symbol,
            session_date,
            timeframe_minutes,
            state: ProgressionState::Idle,
            active: true,
            session_complete: false,
            fired: HashSet::new(),
            triggers: Vec::new(),
            analysis: AnalysisSnapshot::default(),
            minute_candles: Vec::new(),
            settings,
            market_data,
            events,
        }
    }

    pub fn state(&self) -> ProgressionState {
        self.state
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe_minutes(&self) -> u32 {
        self.timeframe_minutes
    }

    pub fn session_complete(&self) -> bool {
        self.session_complete
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn analysis(&self) -> &AnalysisSnapshot {
        &self.analysis
    }

    pub fn minute_candles(&self) -> &[Candle] {
        &self.minute_candles
    }

    pub fn market_open(&self) -> DateTime<Utc> {
        self.settings.market_open_utc(self.session_date)
    }

    /// Completion instant of the n-th timeframe candle
    pub fn candle_end(&self, n: u8) -> DateTime<Utc> {
        self.market_open() + Duration::minutes(self.timeframe_minutes as i64 * n as i64)
    }

    /// Span of the candle in progress at `now`, clamped to the 1st candle
    pub fn candle_span_at(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let timeframe = Duration::minutes(self.timeframe_minutes as i64);
        let open = self.market_open();
        let elapsed = (now - open).num_minutes().max(0);
        let index = elapsed / self.timeframe_minutes as i64;
        let start = open + timeframe * index as i32;
        (start, start + timeframe)
    }

    pub fn pattern_key(&self, result: &SlopeResult) -> PatternKey {
        PatternKey {
            symbol: self.symbol.clone(),
            date: self.session_date,
            timeframe_minutes: self.timeframe_minutes,
            trend: result.trend,
            pattern: result.pattern,
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            is_active: self.active && !self.session_complete,
            current_timeframe: self.timeframe_minutes,
            triggers_fired: self.triggers.clone(),
        }
    }

    /// Any state -> Idle; clears all trigger records
    pub fn stop(&mut self) {
        tracing::info!(symbol = %self.symbol, "Progression session stopped");
        self.state = ProgressionState::Idle;
        self.active = false;
        self.fired.clear();
        self.triggers.clear();
    }

    /// Drive all transitions due at `now`. Safe to call on every tick;
    /// repeated checks inside a window are no-ops.
    pub async fn check_completion(&mut self, now: DateTime<Utc>) -> CompletionStatus {
        let mut transitioned = false;
        while self.active {
            let advanced = match self.state {
                ProgressionState::Idle if !self.session_complete && now >= self.candle_end(4) => {
                    self.enter_watching_fifth(now).await;
                    true
                }
                ProgressionState::WatchingFifth if now >= self.candle_end(5) => {
                    self.complete_fifth(now).await;
                    true
                }
                ProgressionState::WatchingSixth if now >= self.candle_end(6) => {
                    self.complete_sixth(now).await;
                    true
                }
                _ => false,
            };
            if !advanced {
                break;
            }
            transitioned = true;
        }

        CompletionStatus {
            state: self.state,
            transitioned,
            session_complete: self.session_complete,
            next_deadline: self.next_deadline(),
        }
    }

    /// Manual 4th -> 5th progression (ops/test path)
    pub async fn trigger_fifth(&mut self, now: DateTime<Utc>) {
        if self.active && self.state == ProgressionState::Idle && !self.session_complete {
            self.enter_watching_fifth(now).await;
        } else {
            tracing::debug!(state = ?self.state, active = self.active, "trigger_fifth ignored");
        }
    }

    /// Manual 5th -> 6th progression (ops/test path)
    pub async fn trigger_sixth(&mut self, now: DateTime<Utc>) {
        if self.active && self.state == ProgressionState::WatchingFifth {
            self.complete_fifth(now).await;
        } else {
            tracing::debug!(state = ?self.state, active = self.active, "trigger_sixth ignored");
        }
    }

    fn next_deadline(&self) -> Option<DateTime<Utc>> {
        match self.state {
            ProgressionState::Idle if !self.session_complete => Some(self.candle_end(4)),
            ProgressionState::WatchingFifth => Some(self.candle_end(5)),
            ProgressionState::WatchingSixth => Some(self.candle_end(6)),
            _ => None,
        }
    }

    async fn enter_watching_fifth(&mut self, now: DateTime<Utc>) {
        tracing::info!(
            symbol = %self.symbol,
            timeframe = self.timeframe_minutes,
            "4th candle complete, watching the 5th"
        );
        self.state = ProgressionState::WatchingFifth;
        self.events.publish(EngineEvent::FifthCandleStarted {
            symbol: self.symbol.clone(),
            timeframe_minutes: self.timeframe_minutes,
            at: now,
        });
        self.refresh_analysis(now).await;
    }

    async fn complete_fifth(&mut self, now: DateTime<Utc>) {
        if let Some(trigger) = self.record_trigger(4, 5, now) {
            self.events.publish(EngineEvent::FifthToSixthProgression {
                symbol: self.symbol.clone(),
                timeframe_minutes: self.timeframe_minutes,
                trigger,
            });
        }
        self.state = ProgressionState::WatchingSixth;
        self.refresh_analysis(now).await;
    }

    async fn complete_sixth(&mut self, now: DateTime<Utc>) {
        self.record_trigger(5, 6, now);
        self.events.publish(EngineEvent::SixthCandleComplete {
            symbol: self.symbol.clone(),
            timeframe_minutes: self.timeframe_minutes,
            at: now,
        });
        self.refresh_analysis(now).await;

        let doubled = self.timeframe_minutes * 2;
        if doubled <= self.settings.max_timeframe_minutes {
            tracing::info!(
                symbol = %self.symbol,
                from = self.timeframe_minutes,
                to = doubled,
                "6th candle complete, doubling timeframe"
            );
            self.events.publish(EngineEvent::TimeframeDoubling {
                symbol: self.symbol.clone(),
                from_minutes: self.timeframe_minutes,
                to_minutes: doubled,
            });
            self.timeframe_minutes = doubled;
            self.state = ProgressionState::Idle;
        } else {
            tracing::info!(
                symbol = %self.symbol,
                final_timeframe = self.timeframe_minutes,
                "Session fully complete"
            );
            self.session_complete = true;
            self.state = ProgressionState::Done;
            self.events.publish(EngineEvent::AnalysisComplete {
                symbol: self.symbol.clone(),
                final_timeframe_minutes: self.timeframe_minutes,
            });
        }
    }

    /// Record a progression trigger once; duplicates are silently ignored
    fn record_trigger(&mut self, from: u8, to: u8, now: DateTime<Utc>) -> Option<ProgressionTrigger> {
        if !self.fired.insert((self.timeframe_minutes, from, to)) {
            tracing::debug!(from, to, "duplicate progression trigger ignored");
            return None;
        }
        let trigger = ProgressionTrigger {
            from_candle: from,
            to_candle: to,
            fired_at: now,
        };
        self.triggers.push(trigger.clone());
        Some(trigger)
    }

    /// Re-fetch fresh minute data and re-run the slope/breakout analysis.
    /// A failed fetch is logged and the caller's transition still completes
    /// on the stale analysis.
    pub async fn refresh_analysis(&mut self, now: DateTime<Utc>) {
        match self
            .market_data
            .get_candles(&self.symbol, 1, self.market_open(), now)
            .await
        {
            Ok(candles) if !candles.is_empty() => self.minute_candles = candles,
            Ok(_) => tracing::warn!(symbol = %self.symbol, "minute fetch returned no candles"),
            Err(e) => tracing::warn!(
                symbol = %self.symbol,
                error = %e,
                "minute fetch failed, continuing on stale analysis"
            ),
        }

        match self.rebuild_snapshot() {
            Ok(snapshot) => {
                self.analysis = snapshot;
                self.events.publish(EngineEvent::PointAbAnalysisUpdate {
                    symbol: self.symbol.clone(),
                    timeframe_minutes: self.timeframe_minutes,
                    analysis: self.analysis.clone(),
                });
            }
            Err(Error::DataIncomplete { needed, got }) => {
                tracing::debug!(needed, got, "not enough data for blocks yet, retrying later");
            }
            Err(e) => tracing::warn!(error = %e, "analysis refresh failed"),
        }
    }

    fn rebuild_snapshot(&self) -> Result<AnalysisSnapshot> {
        let blocks = build_blocks(
            &self.minute_candles,
            self.timeframe_minutes,
            BlockLayout::default(),
        )?;
        let slopes = detect_slopes(&blocks, &self.minute_candles)?;
        let to_snapshot = |result: SlopeResult| {
            let level = breakout_level(&result, &blocks);
            TrendSnapshot { result, level }
        };
        Ok(AnalysisSnapshot {
            uptrend: slopes.uptrend.map(to_snapshot),
            downtrend: slopes.downtrend.map(to_snapshot),
        })
    }
}
