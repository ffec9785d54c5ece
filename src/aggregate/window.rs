// =============================================================================
// Window Aggregator — Re-aggregating 1-minute bars into larger windows
// =============================================================================
//
// One parametrized state machine for every window size, selected by a
// `WindowRule` variant instead of per-size code paths.  Sub-hour and 1-hour
// windows consume 1-minute bars; multi-hour windows consume 1-hour bars.
//
// Completion is decided two ways that must agree with the session calendar:
// a modular test on the input bar's minute (the fast path for aligned
// windows) and an end-boundary test (the correct path for session-shortened
// windows such as the 10:00 commodity slot that ends 10:15).

use std::sync::Arc;

use chrono::{Duration, Timelike};

use crate::calendar::SessionCalendar;
use crate::error::AggregateError;
use crate::types::{BarData, Interval};

/// How a window's boundaries and completion are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRule {
    /// 3/5/15/30-minute windows inside a clock hour, fed 1-minute bars.
    SubHour { minutes: u32 },
    /// 60-minute windows, fed 1-minute bars.
    Hour,
    /// 2/4/6-hour windows, fed 1-hour bars.
    MultiHour { hours: u32 },
}

impl WindowRule {
    /// The rule for a window interval; `None` for `Min1`, which is not a
    /// window but the base interval.
    pub fn for_interval(interval: Interval) -> Option<Self> {
        match interval {
            Interval::Min1 => None,
            Interval::Min3 | Interval::Min5 | Interval::Min15 | Interval::Min30 => {
                Some(Self::SubHour {
                    minutes: interval.minutes(),
                })
            }
            Interval::Hour1 => Some(Self::Hour),
            Interval::Hour2 | Interval::Hour4 | Interval::Hour6 => Some(Self::MultiHour {
                hours: interval.minutes() / 60,
            }),
        }
    }

    /// The input granularity this rule consumes.
    pub fn expected_input(&self) -> Interval {
        match self {
            Self::SubHour { .. } | Self::Hour => Interval::Min1,
            Self::MultiHour { .. } => Interval::Hour1,
        }
    }
}

/// Aggregates a stream of completed finer bars into completed window bars.
pub struct WindowAggregator {
    calendar: Arc<SessionCalendar>,
    window: Interval,
    rule: WindowRule,
    bar: Option<BarData>,
    last_input_start: Option<chrono::NaiveDateTime>,
}

impl WindowAggregator {
    /// Build an aggregator for `window`.  Returns `None` for `Min1`.
    pub fn new(calendar: Arc<SessionCalendar>, window: Interval) -> Option<Self> {
        let rule = WindowRule::for_interval(window)?;
        Some(Self {
            calendar,
            window,
            rule,
            bar: None,
            last_input_start: None,
        })
    }

    pub fn window(&self) -> Interval {
        self.window
    }

    /// The input granularity this aggregator consumes.
    pub fn expected_input(&self) -> Interval {
        self.rule.expected_input()
    }

    /// Feed one completed input bar.  Returns the window bars completed by
    /// it: usually zero or one, two when a data gap forces a stale window
    /// closed and the same input also completes its own window.
    pub fn observe(&mut self, input: &BarData) -> Result<Vec<BarData>, AggregateError> {
        if input.interval != self.rule.expected_input() {
            return Err(AggregateError::MismatchedInterval {
                window: self.window,
                expected: self.rule.expected_input(),
                input: input.interval,
            });
        }
        if let Some(last) = self.last_input_start {
            if input.start < last {
                return Err(AggregateError::OutOfOrderInput {
                    symbol: input.symbol.clone(),
                    last,
                    current: input.start,
                });
            }
        }

        let (start, end) =
            self.calendar
                .session_window(&input.symbol, input.start, self.window)?;

        let mut completed = Vec::new();

        // A gap: the input belongs past the open window's end.  Emit the
        // stale window as-is before folding the input into a fresh one, so
        // stale state never bleeds into the next window's OHLC.
        if self.bar.as_ref().is_some_and(|wb| input.start >= wb.end) {
            if let Some(stale) = self.bar.take() {
                completed.push(stale);
            }
        }

        let wb = self.bar.get_or_insert_with(|| BarData {
            symbol: input.symbol.clone(),
            exchange: input.exchange,
            interval: self.window,
            start,
            end,
            open: input.open,
            high: input.high,
            low: input.low,
            close: input.close,
            volume: 0.0,
            open_interest: input.open_interest,
        });

        wb.high = wb.high.max(input.high);
        wb.low = wb.low.min(input.low);
        wb.close = input.close;
        wb.volume += input.volume;
        // open_interest stays as captured at creation; it is a level, not a
        // flow, and the window reports the value at its open.

        debug_assert!(wb.low <= wb.open && wb.open <= wb.high, "open outside range");
        debug_assert!(wb.low <= wb.close && wb.close <= wb.high, "close outside range");

        let finished = match self.rule {
            WindowRule::SubHour { minutes } => {
                (input.start.minute() + 1) % minutes == 0
                    || input.start + Duration::minutes(1) >= wb.end
            }
            WindowRule::Hour => {
                (input.start.minute() + 1) % 60 == 0
                    || input.start + Duration::minutes(1) >= wb.end
            }
            WindowRule::MultiHour { hours } => {
                (input.start.hour() + 1) % hours == 0
                    || input.start + Duration::hours(1) >= wb.end
            }
        };

        if finished {
            if let Some(done) = self.bar.take() {
                completed.push(done);
            }
        }

        self.last_input_start = Some(input.start);
        Ok(completed)
    }

    /// Emit and clear the in-progress window bar, e.g. at session close.
    /// Idempotent: a second call with no intervening input returns `None`.
    pub fn flush(&mut self) -> Option<BarData> {
        self.bar.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalendarConfig;
    use crate::types::Exchange;
    use chrono::{NaiveDate, NaiveDateTime};

    fn calendar() -> Arc<SessionCalendar> {
        Arc::new(SessionCalendar::new(&CalendarConfig::default()))
    }

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, 6)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn minute_bar(symbol: &str, start: NaiveDateTime, close: f64, volume: f64) -> BarData {
        BarData {
            symbol: symbol.into(),
            exchange: Exchange::SHFE,
            interval: Interval::Min1,
            start,
            end: start + Duration::minutes(1),
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
            volume,
            open_interest: 1000.0,
        }
    }

    fn hour_bar(symbol: &str, start: NaiveDateTime, close: f64, volume: f64) -> BarData {
        BarData {
            symbol: symbol.into(),
            exchange: Exchange::SHFE,
            interval: Interval::Hour1,
            start,
            end: start + Duration::hours(1),
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
            volume,
            open_interest: 1000.0,
        }
    }

    #[test]
    fn five_minute_window_closes_on_fifth_input() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Min5).unwrap();

        let mut emitted = Vec::new();
        for m in 0..5 {
            let out = agg
                .observe(&minute_bar("rb2105", dt(9, m), 100.0 + m as f64, 10.0))
                .unwrap();
            emitted.extend(out);
        }
        assert_eq!(emitted.len(), 1);

        let bar = &emitted[0];
        assert_eq!(bar.interval, Interval::Min5);
        assert_eq!(bar.start, dt(9, 0));
        assert_eq!(bar.end, dt(9, 5));
        // Open from minute 0's open, close from minute 4's close.
        assert!((bar.open - 99.0).abs() < f64::EPSILON);
        assert!((bar.close - 104.0).abs() < f64::EPSILON);
        assert!((bar.volume - 50.0).abs() < f64::EPSILON);

        // Minute 5 starts the next window; nothing completes yet.
        let out = agg
            .observe(&minute_bar("rb2105", dt(9, 5), 105.0, 10.0))
            .unwrap();
        assert!(out.is_empty());
        let open = agg.flush().unwrap();
        assert_eq!(open.start, dt(9, 5));
    }

    #[test]
    fn thirty_minute_window_truncated_at_the_break() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Min30).unwrap();

        let mut emitted = Vec::new();
        for m in 0..15 {
            let out = agg
                .observe(&minute_bar("rb2105", dt(10, m), 3000.0, 1.0))
                .unwrap();
            emitted.extend(out);
        }
        // The 10:00 slot ends 10:15, not 10:30: the boundary test fires at
        // the 10:14 input even though (14 + 1) % 30 != 0.
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].start, dt(10, 0));
        assert_eq!(emitted[0].end, dt(10, 15));
        assert!((emitted[0].volume - 15.0).abs() < f64::EPSILON);

        // After the break the next window opens at 10:30.
        let out = agg
            .observe(&minute_bar("rb2105", dt(10, 30), 3001.0, 1.0))
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(agg.flush().unwrap().start, dt(10, 30));
    }

    #[test]
    fn hour_window_at_eleven_closes_at_half_past() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Hour1).unwrap();

        let mut emitted = Vec::new();
        for m in 0..30 {
            let out = agg
                .observe(&minute_bar("rb2105", dt(11, m), 3000.0, 1.0))
                .unwrap();
            emitted.extend(out);
        }
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].start, dt(11, 0));
        assert_eq!(emitted[0].end, dt(11, 30));
    }

    #[test]
    fn gap_emits_stale_window_before_folding_new_input() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Min5).unwrap();

        agg.observe(&minute_bar("rb2105", dt(9, 0), 100.0, 10.0)).unwrap();
        agg.observe(&minute_bar("rb2105", dt(9, 1), 101.0, 10.0)).unwrap();

        // Feed jumps over 09:02..09:08; the input at 09:09 both closes the
        // stale [09:00, 09:05) window and completes its own [09:05, 09:10).
        let out = agg
            .observe(&minute_bar("rb2105", dt(9, 9), 102.0, 10.0))
            .unwrap();
        assert_eq!(out.len(), 2);

        assert_eq!(out[0].start, dt(9, 0));
        assert_eq!(out[0].end, dt(9, 5));
        assert!((out[0].close - 101.0).abs() < f64::EPSILON);
        assert!((out[0].volume - 20.0).abs() < f64::EPSILON);

        assert_eq!(out[1].start, dt(9, 5));
        assert_eq!(out[1].end, dt(9, 10));
        assert!((out[1].volume - 10.0).abs() < f64::EPSILON);
        assert!(agg.flush().is_none());
    }

    #[test]
    fn window_open_is_first_input_open() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Min15).unwrap();

        agg.observe(&minute_bar("rb2105", dt(9, 30), 100.0, 1.0)).unwrap();
        agg.observe(&minute_bar("rb2105", dt(9, 31), 120.0, 1.0)).unwrap();

        let wb = agg.flush().unwrap();
        assert!((wb.open - 99.0).abs() < f64::EPSILON);
        assert!((wb.high - 122.0).abs() < f64::EPSILON);
        assert!((wb.low - 98.0).abs() < f64::EPSILON);
        assert!((wb.close - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn open_interest_is_carried_from_the_first_input() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Min5).unwrap();

        let mut first = minute_bar("rb2105", dt(9, 0), 100.0, 1.0);
        first.open_interest = 7000.0;
        let mut second = minute_bar("rb2105", dt(9, 1), 101.0, 1.0);
        second.open_interest = 7500.0;

        agg.observe(&first).unwrap();
        agg.observe(&second).unwrap();
        let wb = agg.flush().unwrap();
        assert!((wb.open_interest - 7000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn two_hour_window_from_hour_bars() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Hour2).unwrap();

        // The 21:00 night hour completes the [20:00, 22:00) slot by the
        // modular test.
        let out = agg
            .observe(&hour_bar("rb2105", dt(21, 0), 3000.0, 100.0))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].interval, Interval::Hour2);
        assert_eq!(out[0].start, dt(20, 0));
        assert_eq!(out[0].end, dt(22, 0));

        // 22:00 opens the next slot and stays in progress.
        let out = agg
            .observe(&hour_bar("rb2105", dt(22, 0), 3001.0, 100.0))
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(agg.flush().unwrap().start, dt(22, 0));
    }

    #[test]
    fn multi_hour_rejects_minute_input() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Hour2).unwrap();
        let err = agg
            .observe(&minute_bar("rb2105", dt(9, 0), 100.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, AggregateError::MismatchedInterval { .. }));
    }

    #[test]
    fn sub_hour_rejects_hour_input() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Min5).unwrap();
        let err = agg
            .observe(&hour_bar("rb2105", dt(9, 0), 100.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, AggregateError::MismatchedInterval { .. }));
    }

    #[test]
    fn out_of_order_input_is_rejected() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Min5).unwrap();
        agg.observe(&minute_bar("rb2105", dt(9, 1), 100.0, 1.0)).unwrap();
        let err = agg
            .observe(&minute_bar("rb2105", dt(9, 0), 100.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, AggregateError::OutOfOrderInput { .. }));
    }

    #[test]
    fn min1_is_not_a_window() {
        assert!(WindowAggregator::new(calendar(), Interval::Min1).is_none());
    }

    #[test]
    fn flush_is_idempotent() {
        let mut agg = WindowAggregator::new(calendar(), Interval::Min5).unwrap();
        agg.observe(&minute_bar("rb2105", dt(9, 0), 100.0, 1.0)).unwrap();
        assert!(agg.flush().is_some());
        assert!(agg.flush().is_none());
    }
}
