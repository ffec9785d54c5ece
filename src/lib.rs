//! KlineForge: session-aware OHLCV bar aggregation for Chinese futures.
//!
//! Synthesizes 1-minute bars from raw ticks and re-aggregates them into
//! larger windows (3m..30m, 1h, 2/4/6h) under the irregular CTP trading
//! calendar: night sessions crossing midnight, per-commodity-group close
//! times and the mid-morning break.  The aggregators are synchronous
//! per-instrument state machines; [`pipeline::InstrumentPipeline`] wires
//! them to a tick channel and owns the silence-flush timer.

pub mod aggregate;
pub mod calendar;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod series;
pub mod types;

pub use aggregate::{MinuteAggregator, OpenRevision, WindowAggregator, WindowRule};
pub use calendar::{ProductClass, SessionCalendar};
pub use config::{CalendarConfig, EngineConfig};
pub use error::AggregateError;
pub use pipeline::InstrumentPipeline;
pub use series::BarSeries;
pub use types::{BarData, BarKey, Exchange, Interval, TickData};
