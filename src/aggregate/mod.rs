// =============================================================================
// Bar aggregation — tick-to-minute and minute-to-window state machines
// =============================================================================

pub mod minute;
pub mod window;

pub use minute::{MinuteAggregator, OpenRevision};
pub use window::{WindowAggregator, WindowRule};
