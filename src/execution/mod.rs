// Trade tracking and the six-rule exit scenario engine.
pub mod exit_rules;
pub mod trade_book;

pub use exit_rules::{RuleOutcome, TickContext, evaluate_exit_rules};
pub use trade_book::TradeBook;
