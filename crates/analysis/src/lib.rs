//! Derived race state and the callout rule engine.

mod analyzer;
mod callouts;

pub use analyzer::{Analyzer, LapEvent, RECENT_LAPS_CAP};
pub use callouts::{CalloutEngine, Rule, LAP_RULES, PERIODIC_RULES};

/// Wall clock in epoch milliseconds. The `_at` entry points take this as a
/// parameter so the fuel checkpoints, cooldowns and tyre windows stay
/// deterministic under test.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
