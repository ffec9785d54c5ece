// =============================================================================
// Session Calendar — Trading-session classification for futures instruments
// =============================================================================
//
// Answers, for an instrument and an exchange-local timestamp: which trading
// session is this, and what are the `[start, end)` boundaries of the bar
// window that contains it.  Chinese futures sessions are irregular:
//
//   - commodity day:   09:00-10:15, 10:30-11:30 (break between), 13:30-15:00
//   - finance day:     09:30-11:30, 13:00-15:00 (no break)
//   - commodity night: 21:00 until a per-group close (23:00 / 23:30 / 01:00 /
//                      02:30, the last two crossing midnight)
//
// Window boundaries are session-aware: a naive `+N minutes` would invent
// trading time that does not exist.  Every exception (the 10:15 cut of the
// 30-minute window, the half-hour 11:00 slot, the 13:30 afternoon start, the
// shortened night hours) falls out of clamping the naive window against the
// session table, so the table stays data and the code stays generic.
//
// Every query is a pure function of (instrument, timestamp, interval); the
// calendar is immutable after construction and safe to share via `Arc`.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};

use crate::config::{CalendarConfig, SessionSpan};
use crate::error::AggregateError;
use crate::types::{product_code, Interval};

/// Instrument classification derived from the product code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProductClass {
    /// Commodity futures: standard commodity day schedule, optional night
    /// session ending at `night_close`, open-price revision applies.
    Commodity { night_close: Option<NaiveTime> },
    /// Financial futures: index/treasury schedule, no night session, no
    /// open-price revision.
    Finance,
}

impl ProductClass {
    pub fn is_commodity(&self) -> bool {
        matches!(self, Self::Commodity { .. })
    }
}

/// Immutable session classifier built from a [`CalendarConfig`].
pub struct SessionCalendar {
    day_only: HashSet<String>,
    night_close: HashMap<String, NaiveTime>,
    finance: HashSet<String>,
    commodity_day: Vec<SessionSpan>,
    finance_day: Vec<SessionSpan>,
    morning_break: SessionSpan,
    night_open: NaiveTime,
    open_lock_minutes: Vec<NaiveTime>,
}

impl SessionCalendar {
    pub fn new(config: &CalendarConfig) -> Self {
        let mut night_close = HashMap::new();
        for group in &config.night_groups {
            for product in &group.products {
                night_close.insert(product.clone(), group.close);
            }
        }

        Self {
            day_only: config.day_only_products.iter().cloned().collect(),
            night_close,
            finance: config.finance_products.iter().cloned().collect(),
            commodity_day: config.commodity_day_sessions.clone(),
            finance_day: config.finance_day_sessions.clone(),
            morning_break: config.morning_break,
            night_open: config.night_open,
            open_lock_minutes: config.open_lock_minutes.clone(),
        }
    }

    /// Classify a contract symbol by its product code.
    pub fn classify(&self, symbol: &str) -> Result<ProductClass, AggregateError> {
        let code = product_code(symbol);
        if self.finance.contains(&code) {
            return Ok(ProductClass::Finance);
        }
        if self.day_only.contains(&code) {
            return Ok(ProductClass::Commodity { night_close: None });
        }
        if let Some(close) = self.night_close.get(&code) {
            return Ok(ProductClass::Commodity {
                night_close: Some(*close),
            });
        }
        Err(AggregateError::UnrecognizedInstrument {
            symbol: symbol.to_string(),
        })
    }

    /// Whether `datetime` falls inside a trading session of `symbol`.
    ///
    /// The commodity mid-morning break counts as closed time even though it
    /// sits inside the morning session span.
    pub fn in_session(
        &self,
        symbol: &str,
        datetime: NaiveDateTime,
    ) -> Result<bool, AggregateError> {
        let class = self.classify(symbol)?;
        Ok(self.in_session_class(&class, datetime))
    }

    /// Whether `datetime`'s minute is a configured session-open minute, at
    /// which the first print locks the open price.
    pub fn is_session_open_minute(&self, datetime: NaiveDateTime) -> bool {
        self.open_lock_minutes
            .iter()
            .any(|t| t.hour() == datetime.hour() && t.minute() == datetime.minute())
    }

    /// The half-open `[start, end)` window of the given interval that
    /// contains `datetime`, session-aware.
    ///
    /// Fails with `UnrecognizedInstrument` for an unknown product code and
    /// with `OutOfSession` for a timestamp inside no trading session.
    pub fn session_window(
        &self,
        symbol: &str,
        datetime: NaiveDateTime,
        interval: Interval,
    ) -> Result<(NaiveDateTime, NaiveDateTime), AggregateError> {
        let class = self.classify(symbol)?;
        if !self.in_session_class(&class, datetime) {
            return Err(AggregateError::OutOfSession {
                symbol: symbol.to_string(),
                datetime,
            });
        }
        let Some((sess_start, sess_end)) = self.containing_session(&class, datetime) else {
            return Err(AggregateError::OutOfSession {
                symbol: symbol.to_string(),
                datetime,
            });
        };

        let window = match interval {
            Interval::Min1 => {
                let start = minute_floor(datetime);
                (start, start + Duration::minutes(1))
            }
            Interval::Min3 | Interval::Min5 | Interval::Min15 | Interval::Min30 => {
                let w = i64::from(interval.minutes());
                let slot = i64::from(datetime.minute()) / w * w;
                let start = hour_floor(datetime) + Duration::minutes(slot);
                let mut end = start + Duration::minutes(w);
                if end > sess_end {
                    end = sess_end;
                }
                // The 30-minute slot opening at 10:00 must not reach across
                // the commodity break: it ends at 10:15.
                if class.is_commodity() {
                    let break_start = start.date().and_time(self.morning_break.start);
                    if start < break_start && break_start < end {
                        end = break_start;
                    }
                }
                (start, end)
            }
            Interval::Hour1 => {
                let mut start = hour_floor(datetime);
                let mut end = start + Duration::hours(1);
                if start < sess_start {
                    start = sess_start;
                }
                if end > sess_end {
                    end = sess_end;
                }
                (start, end)
            }
            Interval::Hour2 | Interval::Hour4 | Interval::Hour6 => {
                let h = i64::from(interval.minutes() / 60);
                let slot = i64::from(datetime.hour()) % h;
                let start = hour_floor(datetime) - Duration::hours(slot);
                (start, start + Duration::hours(h))
            }
        };

        debug_assert!(window.1 > window.0, "window end must follow its start");
        Ok(window)
    }

    fn in_session_class(&self, class: &ProductClass, datetime: NaiveDateTime) -> bool {
        let t = datetime.time();
        match class {
            ProductClass::Finance => self.finance_day.iter().any(|s| s.contains(t)),
            ProductClass::Commodity { night_close } => {
                if self.morning_break.contains(t) {
                    return false;
                }
                if self.commodity_day.iter().any(|s| s.contains(t)) {
                    return true;
                }
                match night_close {
                    Some(close) => in_night(t, self.night_open, *close),
                    None => false,
                }
            }
        }
    }

    /// The contiguous session containing `datetime`, as datetime bounds.
    /// The commodity break does not split the morning session here; it is a
    /// halt inside it, relevant to tick validity but not to window clamping.
    fn containing_session(
        &self,
        class: &ProductClass,
        datetime: NaiveDateTime,
    ) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let t = datetime.time();
        let date = datetime.date();

        let day_spans = match class {
            ProductClass::Finance => &self.finance_day,
            ProductClass::Commodity { .. } => &self.commodity_day,
        };
        for span in day_spans {
            if span.contains(t) {
                return Some((date.and_time(span.start), date.and_time(span.end)));
            }
        }

        if let ProductClass::Commodity {
            night_close: Some(close),
        } = class
        {
            if t >= self.night_open {
                let end = if *close <= self.night_open {
                    (date + Duration::days(1)).and_time(*close)
                } else {
                    date.and_time(*close)
                };
                return Some((date.and_time(self.night_open), end));
            }
            if *close <= self.night_open && t < *close {
                let start = (date - Duration::days(1)).and_time(self.night_open);
                return Some((start, date.and_time(*close)));
            }
        }

        None
    }
}

/// Truncate to the start of the minute.
fn minute_floor(dt: NaiveDateTime) -> NaiveDateTime {
    dt - Duration::seconds(i64::from(dt.second())) - Duration::nanoseconds(i64::from(dt.nanosecond()))
}

/// Truncate to the start of the hour.
fn hour_floor(dt: NaiveDateTime) -> NaiveDateTime {
    minute_floor(dt) - Duration::minutes(i64::from(dt.minute()))
}

/// Night session membership, handling closes past midnight.
fn in_night(t: NaiveTime, open: NaiveTime, close: NaiveTime) -> bool {
    if close > open {
        open <= t && t < close
    } else {
        t >= open || t < close
    }
}
