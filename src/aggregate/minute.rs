// =============================================================================
// Minute Aggregator — Synthesizing 1-minute bars from raw ticks
// =============================================================================
//
// Streaming state machine, one instance per instrument.  Ticks carry the
// cumulative day volume, so the aggregator derives per-tick deltas itself;
// a decreasing counter (day rollover) contributes zero, never a negative.
//
// Some exchanges emit a placeholder/settlement print right after a session
// reopens, before real trading resumes.  For commodity instruments the bar's
// open may therefore be revised until the first real trade arrives; the
// `OpenRevision` state machine below captures the exact rules.

use std::sync::Arc;

use chrono::Timelike;
use tracing::debug;

use crate::calendar::SessionCalendar;
use crate::error::AggregateError;
use crate::types::{BarData, Interval, TickData};

/// Open-price revision state for the in-progress bar.
///
/// Transitions:
///   - bar created at a session-open minute, or for a non-commodity
///     instrument: straight to `Locked` (the first print stands as open)
///   - bar created elsewhere for a commodity instrument: `Revisable`
///   - `Revisable` + tick with a positive volume delta: `Locked`
///   - bar emitted or flushed: back to `AwaitingFirstPrint`
///
/// While `Revisable`, every tick rewrites open/high/low/close to its own
/// price: no trade has happened yet, so the provisional print is replaced
/// wholesale rather than folded into high/low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenRevision {
    AwaitingFirstPrint,
    Revisable,
    Locked,
}

/// Aggregates a non-decreasing tick stream into completed 1-minute bars.
pub struct MinuteAggregator {
    calendar: Arc<SessionCalendar>,
    bar: Option<BarData>,
    last_tick: Option<TickData>,
    revision: OpenRevision,
}

impl MinuteAggregator {
    pub fn new(calendar: Arc<SessionCalendar>) -> Self {
        Self {
            calendar,
            bar: None,
            last_tick: None,
            revision: OpenRevision::AwaitingFirstPrint,
        }
    }

    /// Feed one tick.  Returns the completed bar when this tick closes the
    /// previous minute, `None` otherwise.
    ///
    /// Ticks must arrive in non-decreasing timestamp order.  A non-positive
    /// last price is a data-quality artifact and is discarded before any
    /// state mutation; invalid classification, out-of-session timestamps and
    /// out-of-order input fail without mutating state, so an open bar is
    /// never lost to a bad sample.
    pub fn observe(&mut self, tick: &TickData) -> Result<Option<BarData>, AggregateError> {
        if tick.last_price <= 0.0 {
            debug!(symbol = %tick.symbol, datetime = %tick.datetime, "discarding zero-price tick");
            return Ok(None);
        }
        if let Some(last) = &self.last_tick {
            if tick.datetime < last.datetime {
                return Err(AggregateError::OutOfOrderInput {
                    symbol: tick.symbol.clone(),
                    last: last.datetime,
                    current: tick.datetime,
                });
            }
        }
        let class = self.calendar.classify(&tick.symbol)?;
        if !self.calendar.in_session(&tick.symbol, tick.datetime)? {
            return Err(AggregateError::OutOfSession {
                symbol: tick.symbol.clone(),
                datetime: tick.datetime,
            });
        }

        let crosses_boundary = match &self.bar {
            None => true,
            Some(bar) => {
                bar.start.minute() != tick.datetime.minute() || tick.datetime >= bar.end
            }
        };

        let mut completed = None;
        if crosses_boundary {
            let (start, end) =
                self.calendar
                    .session_window(&tick.symbol, tick.datetime, Interval::Min1)?;
            completed = self.bar.take();

            self.revision = if class.is_commodity()
                && !self.calendar.is_session_open_minute(tick.datetime)
            {
                OpenRevision::Revisable
            } else {
                OpenRevision::Locked
            };

            self.bar = Some(BarData {
                symbol: tick.symbol.clone(),
                exchange: tick.exchange,
                interval: Interval::Min1,
                start,
                end,
                open: tick.last_price,
                high: tick.last_price,
                low: tick.last_price,
                close: tick.last_price,
                volume: 0.0,
                open_interest: tick.open_interest,
            });
        } else if let Some(bar) = self.bar.as_mut() {
            bar.high = bar.high.max(tick.last_price);
            bar.low = bar.low.min(tick.last_price);
            bar.close = tick.last_price;
            bar.open_interest = tick.open_interest;
        }

        if let (Some(bar), Some(last)) = (self.bar.as_mut(), self.last_tick.as_ref()) {
            let delta = (tick.volume - last.volume).max(0.0);
            bar.volume += delta;

            if self.revision == OpenRevision::Revisable {
                bar.open = tick.last_price;
                bar.high = tick.last_price;
                bar.low = tick.last_price;
                bar.close = tick.last_price;
                if delta > 0.0 {
                    self.revision = OpenRevision::Locked;
                }
            }
        }

        if let Some(bar) = &self.bar {
            debug_assert!(bar.low <= bar.open && bar.open <= bar.high, "open outside range");
            debug_assert!(bar.low <= bar.close && bar.close <= bar.high, "close outside range");
            debug_assert!(bar.end > bar.start, "bar end must follow its start");
        }

        self.last_tick = Some(tick.clone());
        Ok(completed)
    }

    /// Close and return the in-progress bar without waiting for a
    /// boundary-crossing tick.  Used by the pipeline when the feed has gone
    /// silent so a session's final bar is not lost.  Idempotent: a second
    /// call with no intervening tick returns `None`.
    ///
    /// The previous tick is retained so volume deltas stay correct when the
    /// feed resumes.
    pub fn flush(&mut self) -> Option<BarData> {
        self.revision = OpenRevision::AwaitingFirstPrint;
        self.bar.take()
    }

    /// Current revision state, mostly useful to tests and diagnostics.
    pub fn revision(&self) -> OpenRevision {
        self.revision
    }
}
