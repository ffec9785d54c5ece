// =============================================================================
// Typed error conditions for the aggregation core
// =============================================================================
//
// Data-quality events (zero-price ticks, decreasing volume counters) are NOT
// errors; they are filtered or floored silently per the aggregation rules.
// Everything here is a condition the caller must decide about: drop the
// sample, escalate, or fix the calendar configuration.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::types::Interval;

/// All errors surfaced by the aggregators and the session calendar.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregateError {
    /// The instrument's product code appears in no configured commodity
    /// group or finance list, so no session table applies.
    #[error("unrecognized instrument: {symbol} (product code in no configured group)")]
    UnrecognizedInstrument { symbol: String },

    /// The timestamp falls inside no configured trading session for the
    /// instrument, e.g. the mid-morning break or after the night close.
    #[error("{symbol}: {datetime} is outside every configured trading session")]
    OutOfSession {
        symbol: String,
        datetime: NaiveDateTime,
    },

    /// Input arrived with a timestamp earlier than the previous one. The
    /// core never reorders or buffers; equal timestamps are accepted.
    #[error("{symbol}: out-of-order input, {current} arrived after {last}")]
    OutOfOrderInput {
        symbol: String,
        last: NaiveDateTime,
        current: NaiveDateTime,
    },

    /// A window aggregator was fed a bar of the wrong granularity.
    #[error("window {window} expects {expected} input bars, got {input}")]
    MismatchedInterval {
        window: Interval,
        expected: Interval,
        input: Interval,
    },
}
