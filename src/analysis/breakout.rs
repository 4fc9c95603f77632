//! Breakout level and dual timing rules.
//!
//! Single source of truth for the timing arithmetic: both the progression
//! manager and the live streamer call into these functions, so the two
//! historical formulations of Rule 1 (duration-from-Point-A vs.
//! wait-time-from-Point-B) collapse into one deadline.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::models::{
    BreakoutLevel, Candle, CandleBlock, InvalidationRecord, PatternKey, PatternName, SlopeResult,
    TrendType,
};

/// Fraction of the total block span Point A -> Point B must cover (Rule 1)
const RULE1_SPAN_FRACTION: f64 = 0.5;
/// Fraction of the A->B duration that must elapse after Point B (Rule 2)
const RULE2_WAIT_FRACTION: f64 = 0.34;
/// Exit price sits at 80% of the projected move past the breakout
const EXIT_FRACTION: f64 = 0.8;

/// Breakout price for a slope result.
///
/// Pattern 2-3 is the one deliberate mismatch: its slope runs to the 3rd
/// candle's extreme, but the breakout reference price comes from the 4th
/// underlying candle (C2B).
pub fn breakout_level(result: &SlopeResult, blocks: &[CandleBlock]) -> BreakoutLevel {
    if result.pattern == PatternName::TwoThree {
        if let Some(fourth) = crate::blocks::underlying_candles(blocks).get(3) {
            let price = match result.trend {
                TrendType::Uptrend => fourth.high,
                TrendType::Downtrend => fourth.low,
            };
            return BreakoutLevel {
                price,
                timestamp: result.point_b.timestamp,
                source_candle: 4,
            };
        }
    }
    BreakoutLevel {
        price: result.point_b.price,
        timestamp: result.point_b.timestamp,
        source_candle: result.pattern.b_index(),
    }
}

/// Point A -> Point B duration in minutes
pub fn ab_duration_minutes(result: &SlopeResult) -> f64 {
    (result.point_b.timestamp - result.point_a.timestamp).num_seconds() as f64 / 60.0
}

/// Rule 1 deadline: the instant the 50% span requirement is covered, either
/// by the A->B duration itself or by wall-clock waiting after Point B.
pub fn rule1_deadline(result: &SlopeResult, timeframe_minutes: u32) -> DateTime<Utc> {
    let required = RULE1_SPAN_FRACTION * 4.0 * timeframe_minutes as f64;
    let duration = ab_duration_minutes(result);
    if duration >= required {
        result.point_b.timestamp
    } else {
        result.point_b.timestamp + minutes_f64(required - duration)
    }
}

pub fn rule1_holds(result: &SlopeResult, timeframe_minutes: u32, now: DateTime<Utc>) -> bool {
    now >= rule1_deadline(result, timeframe_minutes)
}

pub fn rule2_holds(result: &SlopeResult, now: DateTime<Utc>) -> bool {
    now >= result.point_b.timestamp + minutes_f64(RULE2_WAIT_FRACTION * ab_duration_minutes(result))
}

/// Earliest instant both timing rules hold
pub fn rules_first_hold_at(result: &SlopeResult, timeframe_minutes: u32) -> DateTime<Utc> {
    let rule2_at =
        result.point_b.timestamp + minutes_f64(RULE2_WAIT_FRACTION * ab_duration_minutes(result));
    rule1_deadline(result, timeframe_minutes).max(rule2_at)
}

/// Projected target for a monitoring candle triggered at `trigger_time`
pub fn target_price(
    level: &BreakoutLevel,
    result: &SlopeResult,
    trigger_time: DateTime<Utc>,
) -> f64 {
    let minutes = (trigger_time - result.point_b.timestamp).num_seconds() as f64 / 60.0;
    level.price + result.slope * minutes
}

/// Exit price: 80% of the way from the breakout level to the target
pub fn exit_price(level: &BreakoutLevel, target: f64) -> f64 {
    level.price + EXIT_FRACTION * (target - level.price)
}

/// Stop loss = the direction-dependent extreme of the candle immediately
/// preceding the triggering one
pub fn stop_loss_level(preceding: &Candle, trend: TrendType) -> f64 {
    match trend {
        TrendType::Uptrend => preceding.low,
        TrendType::Downtrend => preceding.high,
    }
}

fn minutes_f64(minutes: f64) -> Duration {
    Duration::seconds((minutes * 60.0).round() as i64)
}

/// Timing rule evaluation for one pattern occurrence
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Authorization {
    pub rule1: bool,
    pub rule2: bool,
    pub invalidated: bool,
    pub authorized: bool,
}

/// One-shot early-breakout records, keyed by pattern occurrence.
///
/// A record blocks authorization for exactly the configured window from its
/// `broke_early_at` timestamp, regardless of later rule states.
#[derive(Debug, Default)]
pub struct InvalidationRegistry {
    records: HashMap<PatternKey, DateTime<Utc>>,
}

impl InvalidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an early break; returns None when the key was already flagged
    pub fn record(&mut self, key: PatternKey, at: DateTime<Utc>) -> Option<InvalidationRecord> {
        if self.records.contains_key(&key) {
            return None;
        }
        self.records.insert(key.clone(), at);
        Some(InvalidationRecord {
            pattern_key: key,
            broke_early_at: at,
        })
    }

    pub fn is_invalidated(
        &self,
        key: &PatternKey,
        now: DateTime<Utc>,
        window_minutes: i64,
    ) -> bool {
        match self.records.get(key) {
            Some(&t0) => now >= t0 && now < t0 + Duration::minutes(window_minutes),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Stateful wrapper combining the timing rules with the invalidation
/// registry. One per session.
#[derive(Debug, Default)]
pub struct BreakoutValidator {
    registry: InvalidationRegistry,
    window_minutes: i64,
}

impl BreakoutValidator {
    pub fn new(window_minutes: i64) -> Self {
        Self {
            registry: InvalidationRegistry::new(),
            window_minutes,
        }
    }

    /// Evaluate both timing rules plus the invalidation window
    pub fn authorize(
        &self,
        result: &SlopeResult,
        timeframe_minutes: u32,
        key: &PatternKey,
        now: DateTime<Utc>,
    ) -> Authorization {
        let rule1 = rule1_holds(result, timeframe_minutes, now);
        let rule2 = rule2_holds(result, now);
        let invalidated = self.registry.is_invalidated(key, now, self.window_minutes);
        Authorization {
            rule1,
            rule2,
            invalidated,
            authorized: rule1 && rule2 && !invalidated,
        }
    }

    /// Feed a live price; flags the pattern when the breakout level is
    /// crossed before both timing rules first hold
    pub fn observe_price(
        &mut self,
        result: &SlopeResult,
        level: &BreakoutLevel,
        key: &PatternKey,
        price: f64,
        now: DateTime<Utc>,
        timeframe_minutes: u32,
    ) -> Option<InvalidationRecord> {
        if now >= rules_first_hold_at(result, timeframe_minutes) {
            return None;
        }
        let crossed = match result.trend {
            TrendType::Uptrend => price > level.price,
            TrendType::Downtrend => price < level.price,
        };
        if !crossed {
            return None;
        }
        self.registry.record(key.clone(), now)
    }

    pub fn clear(&mut self) {
        self.registry.clear();
    }
}
