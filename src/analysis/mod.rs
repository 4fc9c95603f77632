// Pattern analysis: pure, side-effect-free modules shared by the progression
// manager and the live streamer so timing arithmetic has a single home.
pub mod breakout;
pub mod slope;

pub use breakout::{
    Authorization, BreakoutValidator, InvalidationRegistry, breakout_level, exit_price,
    rules_first_hold_at, stop_loss_level, target_price,
};
pub use slope::{SlopeAnalysis, detect_slopes};
