// =============================================================================
// Configuration — Session calendar tables and engine settings
// =============================================================================
//
// The session tables are data, not logic: which products trade a night
// session, when each night group closes, where the day-session breaks sit.
// They ship as compiled-in defaults (the standard CTP schedule) and can be
// overridden from a JSON file so a schedule change never needs a rebuild.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Interval;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("static session time")
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Day-session-only commodities (close 15:00, no night session):
/// wire rod, egg, ferrosilicon, manganese silicon, apple, jujube.
fn default_day_only_products() -> Vec<String> {
    strings(&["wr", "jd", "sf", "sm", "ap", "cj"])
}

fn default_night_groups() -> Vec<NightGroup> {
    vec![
        // Plastics, ferrous chain, soft oils, coke/coking coal/iron ore.
        NightGroup {
            close: hm(23, 0),
            products: strings(&[
                "l", "v", "eg", "pp", "rb", "hc", "fu", "bu", "ru", "sp", "m", "y", "a", "b", "p",
                "c", "cs", "j", "jm", "i",
            ]),
        },
        // Zhengzhou softs and chemicals.
        NightGroup {
            close: hm(23, 30),
            products: strings(&["sr", "cf", "cy", "zc", "fg", "ta", "ma", "oi", "rm"]),
        },
        // Base metals.
        NightGroup {
            close: hm(1, 0),
            products: strings(&["cu", "al", "zn", "pb", "ni", "sn"]),
        },
        // Crude oil, gold, silver.
        NightGroup {
            close: hm(2, 30),
            products: strings(&["sc", "au", "ag"]),
        },
    ]
}

fn default_finance_products() -> Vec<String> {
    strings(&["if", "ih", "ic", "t", "ts", "tf"])
}

fn default_commodity_day_sessions() -> Vec<SessionSpan> {
    vec![
        SessionSpan {
            start: hm(9, 0),
            end: hm(11, 30),
        },
        SessionSpan {
            start: hm(13, 30),
            end: hm(15, 0),
        },
    ]
}

fn default_finance_day_sessions() -> Vec<SessionSpan> {
    vec![
        SessionSpan {
            start: hm(9, 30),
            end: hm(11, 30),
        },
        SessionSpan {
            start: hm(13, 0),
            end: hm(15, 0),
        },
    ]
}

fn default_morning_break() -> SessionSpan {
    SessionSpan {
        start: hm(10, 15),
        end: hm(10, 30),
    }
}

fn default_night_open() -> NaiveTime {
    hm(21, 0)
}

/// Minutes at which a session (re)opens and the first print therefore locks
/// the open price: morning open, post-break, afternoon open, night open.
fn default_open_lock_minutes() -> Vec<NaiveTime> {
    vec![hm(9, 0), hm(10, 30), hm(13, 30), hm(21, 0)]
}

fn default_windows() -> Vec<Interval> {
    vec![
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Hour1,
    ]
}

fn default_flush_timeout_secs() -> u64 {
    60
}

fn default_series_capacity() -> usize {
    500
}

// =============================================================================
// Calendar configuration
// =============================================================================

/// Half-open daily time span `[start, end)`, exchange-local.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSpan {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SessionSpan {
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// A set of commodity products sharing one night-session close time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightGroup {
    /// Night close, possibly past midnight (e.g. 01:00 for base metals).
    pub close: NaiveTime,
    /// Product codes in the group.
    pub products: Vec<String>,
}

/// Data table behind the session calendar.  Defaults encode the standard
/// CTP schedule; every field can be overridden from JSON, so a schedule
/// change (an exchange moving a night close, a new product listing) rolls
/// out as an updated file, not a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Commodities with a day session only.
    #[serde(default = "default_day_only_products")]
    pub day_only_products: Vec<String>,

    /// Commodities with a night session, grouped by close time.
    #[serde(default = "default_night_groups")]
    pub night_groups: Vec<NightGroup>,

    /// Financial futures (index and treasury), distinct day schedule and
    /// never subject to open-price revision.
    #[serde(default = "default_finance_products")]
    pub finance_products: Vec<String>,

    /// Commodity day sessions (morning including the break, afternoon).
    #[serde(default = "default_commodity_day_sessions")]
    pub commodity_day_sessions: Vec<SessionSpan>,

    /// Finance day sessions.
    #[serde(default = "default_finance_day_sessions")]
    pub finance_day_sessions: Vec<SessionSpan>,

    /// Mid-morning trading halt for commodities.  Ticks inside it are
    /// rejected and the 30-minute window starting just before it is cut
    /// short at its start.
    #[serde(default = "default_morning_break")]
    pub morning_break: SessionSpan,

    /// Night session open time for all night groups.
    #[serde(default = "default_night_open")]
    pub night_open: NaiveTime,

    /// Session-start minutes at which open-price revision is disabled.
    #[serde(default = "default_open_lock_minutes")]
    pub open_lock_minutes: Vec<NaiveTime>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            day_only_products: default_day_only_products(),
            night_groups: default_night_groups(),
            finance_products: default_finance_products(),
            commodity_day_sessions: default_commodity_day_sessions(),
            finance_day_sessions: default_finance_day_sessions(),
            morning_break: default_morning_break(),
            night_open: default_night_open(),
            open_lock_minutes: default_open_lock_minutes(),
        }
    }
}

// =============================================================================
// Engine configuration
// =============================================================================

/// Top-level settings for the aggregation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Instruments to aggregate.  Empty means every instrument seen on the
    /// feed.
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Window sizes to aggregate for every instrument, on top of the
    /// always-produced 1-minute bars.
    #[serde(default = "default_windows")]
    pub windows: Vec<Interval>,

    /// Seconds of feed silence after which an in-progress minute bar is
    /// force-flushed so a session's final bar is not lost.
    #[serde(default = "default_flush_timeout_secs")]
    pub flush_timeout_secs: u64,

    /// Completed bars retained per (symbol, interval) series.
    #[serde(default = "default_series_capacity")]
    pub series_capacity: usize,

    /// Session tables.
    #[serde(default)]
    pub calendar: CalendarConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            windows: default_windows(),
            flush_timeout_secs: default_flush_timeout_secs(),
            series_capacity: default_series_capacity(),
            calendar: CalendarConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            windows = ?config.windows.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
            flush_timeout_secs = config.flush_timeout_secs,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to rename {} into place", tmp.display()))?;

        Ok(())
    }
}
