// =============================================================================
// Instrument Pipeline — per-instrument aggregation worker and flush driver
// =============================================================================
//
// Owns the whole aggregation chain for one instrument:
//
//   tick -> MinuteAggregator -> 1m bar -> sub-hour / hour windows
//                                           -> 1h bar -> multi-hour windows
//
// Completed bars land in the shared `BarSeries` and go to an optional
// registered handler.  All calls for one instrument are serialized here; the
// aggregators themselves stay synchronous and timer-free.  The async `run`
// loop consumes a tick channel and force-flushes the in-progress minute bar
// once the feed has been silent past the configured timeout, so a session's
// final bar is not lost when the exchange simply stops ticking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::aggregate::{MinuteAggregator, WindowAggregator};
use crate::calendar::SessionCalendar;
use crate::error::AggregateError;
use crate::series::BarSeries;
use crate::types::{BarData, Interval, TickData};

/// Callback invoked with every completed bar of every interval.
pub type BarHandler = Box<dyn FnMut(&BarData) + Send>;

/// Per-instrument aggregation worker.
pub struct InstrumentPipeline {
    symbol: String,
    minute: MinuteAggregator,
    /// Windows fed by 1-minute bars (sub-hour and 1-hour).
    minute_fed: Vec<WindowAggregator>,
    /// Windows fed by 1-hour bars (2/4/6-hour).
    hour_fed: Vec<WindowAggregator>,
    series: Arc<BarSeries>,
    handler: Option<BarHandler>,
    last_tick_at: Option<Instant>,
}

impl InstrumentPipeline {
    /// Build the pipeline for `symbol` with the requested window sizes.
    ///
    /// Multi-hour windows are composed from 1-hour bars, so a 1-hour
    /// aggregator is added implicitly when multi-hour windows are requested
    /// without one.
    pub fn new(
        symbol: impl Into<String>,
        windows: &[Interval],
        calendar: Arc<SessionCalendar>,
        series: Arc<BarSeries>,
    ) -> Self {
        let symbol = symbol.into();

        let mut minute_fed = Vec::new();
        let mut hour_fed = Vec::new();
        for window in windows {
            match WindowAggregator::new(calendar.clone(), *window) {
                Some(agg) if agg.expected_input() == Interval::Min1 => minute_fed.push(agg),
                Some(agg) => hour_fed.push(agg),
                None => {} // Min1 is always produced; nothing to add.
            }
        }

        if !hour_fed.is_empty() && !minute_fed.iter().any(|a| a.window() == Interval::Hour1) {
            info!(symbol = %symbol, "adding implicit 1h window to feed multi-hour windows");
            if let Some(agg) = WindowAggregator::new(calendar.clone(), Interval::Hour1) {
                minute_fed.push(agg);
            }
        }

        Self {
            symbol,
            minute: MinuteAggregator::new(calendar),
            minute_fed,
            hour_fed,
            series,
            handler: None,
            last_tick_at: None,
        }
    }

    /// Register a handler called with every completed bar.
    pub fn set_handler(&mut self, handler: BarHandler) {
        self.handler = Some(handler);
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Feed one tick through the whole chain.
    pub fn handle_tick(&mut self, tick: &TickData) -> Result<(), AggregateError> {
        if let Some(bar) = self.minute.observe(tick)? {
            self.emit_minute(bar)?;
        }
        self.last_tick_at = Some(Instant::now());
        Ok(())
    }

    /// Force-flush the in-progress minute bar when the feed has been silent
    /// for at least `timeout`.  Returns whether a bar was flushed.
    pub fn flush_if_silent(&mut self, timeout: Duration) -> Result<bool, AggregateError> {
        let silent = self
            .last_tick_at
            .is_some_and(|at| at.elapsed() >= timeout);
        if !silent {
            return Ok(false);
        }
        match self.minute.flush() {
            Some(bar) => {
                debug!(symbol = %self.symbol, start = %bar.start, "silence flush of minute bar");
                self.emit_minute(bar)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Flush everything in progress, e.g. at session close or end of replay:
    /// first the minute bar (which still flows into the windows), then every
    /// window bar.
    pub fn flush_all(&mut self) -> Result<(), AggregateError> {
        if let Some(bar) = self.minute.flush() {
            self.emit_minute(bar)?;
        }
        for i in 0..self.minute_fed.len() {
            if let Some(bar) = self.minute_fed[i].flush() {
                self.emit_window(bar)?;
            }
        }
        for agg in &mut self.hour_fed {
            if let Some(bar) = agg.flush() {
                if let Some(handler) = self.handler.as_mut() {
                    handler(&bar);
                }
                self.series.push(bar);
            }
        }
        Ok(())
    }

    /// Consume ticks from `rx` until the channel closes, force-flushing on
    /// feed silence.  The timer lives here, not in the aggregators.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<TickData>,
        flush_timeout: Duration,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_secs(5).min(flush_timeout));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_tick = rx.recv() => match maybe_tick {
                    Some(tick) => {
                        if let Err(e) = self.handle_tick(&tick) {
                            warn!(symbol = %self.symbol, error = %e, "tick rejected");
                        }
                    }
                    None => {
                        if let Err(e) = self.flush_all() {
                            warn!(symbol = %self.symbol, error = %e, "final flush failed");
                        }
                        info!(symbol = %self.symbol, "tick channel closed, pipeline stopped");
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.flush_if_silent(flush_timeout) {
                        warn!(symbol = %self.symbol, error = %e, "silence flush failed");
                    }
                }
            }
        }
    }

    fn emit_minute(&mut self, bar: BarData) -> Result<(), AggregateError> {
        if let Some(handler) = self.handler.as_mut() {
            handler(&bar);
        }

        let mut hour_bars = Vec::new();
        for agg in &mut self.minute_fed {
            for completed in agg.observe(&bar)? {
                if completed.interval == Interval::Hour1 {
                    hour_bars.push(completed.clone());
                }
                if let Some(handler) = self.handler.as_mut() {
                    handler(&completed);
                }
                self.series.push(completed);
            }
        }
        self.series.push(bar);

        for hour_bar in hour_bars {
            self.emit_hour(&hour_bar)?;
        }
        Ok(())
    }

    fn emit_window(&mut self, bar: BarData) -> Result<(), AggregateError> {
        if let Some(handler) = self.handler.as_mut() {
            handler(&bar);
        }
        let is_hour = bar.interval == Interval::Hour1;
        let clone_for_hour = if is_hour { Some(bar.clone()) } else { None };
        self.series.push(bar);
        if let Some(hour_bar) = clone_for_hour {
            self.emit_hour(&hour_bar)?;
        }
        Ok(())
    }

    fn emit_hour(&mut self, hour_bar: &BarData) -> Result<(), AggregateError> {
        for agg in &mut self.hour_fed {
            for completed in agg.observe(hour_bar)? {
                if let Some(handler) = self.handler.as_mut() {
                    handler(&completed);
                }
                self.series.push(completed);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalendarConfig;
    use crate::types::{BarKey, Exchange};
    use chrono::{NaiveDate, NaiveDateTime};
    use parking_lot::Mutex;

    fn dt(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, 6)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn tick(datetime: NaiveDateTime, price: f64, volume: f64) -> TickData {
        TickData {
            symbol: "rb2105".into(),
            exchange: Exchange::SHFE,
            datetime,
            last_price: price,
            volume,
            open_interest: 1000.0,
        }
    }

    fn pipeline(windows: &[Interval], series: Arc<BarSeries>) -> InstrumentPipeline {
        let calendar = Arc::new(SessionCalendar::new(&CalendarConfig::default()));
        InstrumentPipeline::new("rb2105", windows, calendar, series)
    }

    fn key(interval: Interval) -> BarKey {
        BarKey {
            symbol: "rb2105".into(),
            interval,
        }
    }

    #[test]
    fn minute_bars_reach_series_and_handler() {
        let series = Arc::new(BarSeries::new(100));
        let mut pipe = pipeline(&[Interval::Min5], series.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = seen.clone();
        pipe.set_handler(Box::new(move |bar| {
            seen_in_handler.lock().push(bar.key());
        }));

        pipe.handle_tick(&tick(dt(9, 0, 1), 100.0, 10.0)).unwrap();
        pipe.handle_tick(&tick(dt(9, 0, 30), 101.0, 12.0)).unwrap();
        pipe.handle_tick(&tick(dt(9, 1, 0), 102.0, 14.0)).unwrap();

        assert_eq!(series.len(&key(Interval::Min1)), 1);
        assert_eq!(series.last_close(&key(Interval::Min1)), Some(101.0));
        assert_eq!(seen.lock().as_slice(), &[key(Interval::Min1)]);
    }

    #[test]
    fn five_minute_window_completes_through_the_pipeline() {
        let series = Arc::new(BarSeries::new(100));
        let mut pipe = pipeline(&[Interval::Min5], series.clone());

        // One tick per minute for 09:00..09:05; the 09:05 tick closes the
        // 09:04 minute bar, which completes the [09:00, 09:05) window.
        for m in 0..=5 {
            pipe.handle_tick(&tick(dt(9, m, 0), 100.0 + m as f64, 10.0 + m as f64))
                .unwrap();
        }

        assert_eq!(series.len(&key(Interval::Min5)), 1);
        let wb = &series.recent(&key(Interval::Min5), 1)[0];
        assert_eq!(wb.start, dt(9, 0, 0));
        assert_eq!(wb.end, dt(9, 5, 0));
        assert!((wb.open - 100.0).abs() < f64::EPSILON);
        assert!((wb.close - 104.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hour_bars_cascade_into_multi_hour_windows() {
        let series = Arc::new(BarSeries::new(100));
        let mut pipe = pipeline(&[Interval::Hour1, Interval::Hour2], series.clone());

        // One tick per minute across the whole 21:00 night hour.  The 22:00
        // tick closes minute 21:59, completing the 21:00 hour bar, which in
        // turn completes the [20:00, 22:00) two-hour window.
        for m in 0..60 {
            pipe.handle_tick(&tick(dt(21, m, 0), 4000.0, m as f64)).unwrap();
        }
        pipe.handle_tick(&tick(dt(22, 0, 0), 4001.0, 60.0)).unwrap();

        assert_eq!(series.len(&key(Interval::Hour1)), 1);
        assert_eq!(series.len(&key(Interval::Hour2)), 1);
        let h2 = &series.recent(&key(Interval::Hour2), 1)[0];
        assert_eq!(h2.start, dt(20, 0, 0));
        assert_eq!(h2.end, dt(22, 0, 0));
    }

    #[test]
    fn implicit_hour_window_feeds_multi_hour() {
        let series = Arc::new(BarSeries::new(100));
        // Only 2h requested: the 1h feeder is added implicitly.
        let mut pipe = pipeline(&[Interval::Hour2], series.clone());

        for m in 0..60 {
            pipe.handle_tick(&tick(dt(21, m, 0), 4000.0, m as f64)).unwrap();
        }
        pipe.handle_tick(&tick(dt(22, 0, 0), 4001.0, 60.0)).unwrap();

        assert_eq!(series.len(&key(Interval::Hour2)), 1);
    }

    #[test]
    fn rejected_tick_does_not_reach_series() {
        let series = Arc::new(BarSeries::new(100));
        let mut pipe = pipeline(&[], series.clone());

        let err = pipe.handle_tick(&tick(dt(12, 0, 0), 100.0, 10.0)).unwrap_err();
        assert!(matches!(err, AggregateError::OutOfSession { .. }));
        assert!(series.is_empty(&key(Interval::Min1)));
    }

    #[test]
    fn flush_all_drains_minute_and_window_bars() {
        let series = Arc::new(BarSeries::new(100));
        let mut pipe = pipeline(&[Interval::Min5], series.clone());

        pipe.handle_tick(&tick(dt(14, 58, 0), 100.0, 10.0)).unwrap();
        pipe.handle_tick(&tick(dt(14, 59, 0), 101.0, 12.0)).unwrap();
        pipe.flush_all().unwrap();

        // Both minute bars and the partial [14:55, 15:00) window came out.
        assert_eq!(series.len(&key(Interval::Min1)), 2);
        assert_eq!(series.len(&key(Interval::Min5)), 1);
        // Idempotent: nothing left to drain.
        pipe.flush_all().unwrap();
        assert_eq!(series.len(&key(Interval::Min1)), 2);
    }

    #[test]
    fn silence_flush_emits_after_timeout() {
        let series = Arc::new(BarSeries::new(100));
        let mut pipe = pipeline(&[], series.clone());

        pipe.handle_tick(&tick(dt(14, 59, 30), 100.0, 10.0)).unwrap();
        // Not silent yet with a generous timeout.
        assert!(!pipe.flush_if_silent(Duration::from_secs(60)).unwrap());

        std::thread::sleep(Duration::from_millis(15));
        assert!(pipe.flush_if_silent(Duration::from_millis(5)).unwrap());
        assert_eq!(series.len(&key(Interval::Min1)), 1);
        // Nothing further to flush.
        assert!(!pipe.flush_if_silent(Duration::from_millis(5)).unwrap());
    }
}
