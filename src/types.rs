// =============================================================================
// Shared market-data types for the KlineForge aggregation engine
// =============================================================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Futures exchanges covered by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// Shanghai Futures Exchange
    SHFE,
    /// Dalian Commodity Exchange
    DCE,
    /// Zhengzhou Commodity Exchange
    CZCE,
    /// China Financial Futures Exchange
    CFFEX,
    /// Shanghai International Energy Exchange
    INE,
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SHFE => "SHFE",
            Self::DCE => "DCE",
            Self::CZCE => "CZCE",
            Self::CFFEX => "CFFEX",
            Self::INE => "INE",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SHFE" => Ok(Self::SHFE),
            "DCE" => Ok(Self::DCE),
            "CZCE" => Ok(Self::CZCE),
            "CFFEX" => Ok(Self::CFFEX),
            "INE" => Ok(Self::INE),
            other => Err(format!("unknown exchange: {other}")),
        }
    }
}

/// Bar granularity. `Min1` is the base interval synthesized from ticks; all
/// the others are windows re-aggregated from finer bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "3m")]
    Min3,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "2h")]
    Hour2,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "6h")]
    Hour6,
}

impl Interval {
    /// Width of the interval in minutes.
    pub fn minutes(&self) -> u32 {
        match self {
            Self::Min1 => 1,
            Self::Min3 => 3,
            Self::Min5 => 5,
            Self::Min15 => 15,
            Self::Min30 => 30,
            Self::Hour1 => 60,
            Self::Hour2 => 120,
            Self::Hour4 => 240,
            Self::Hour6 => 360,
        }
    }

    /// True for the multi-hour intervals that are composed from 1-hour bars
    /// rather than from 1-minute bars.
    pub fn is_multi_hour(&self) -> bool {
        matches!(self, Self::Hour2 | Self::Hour4 | Self::Hour6)
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Min1 => "1m",
            Self::Min3 => "3m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour2 => "2h",
            Self::Hour4 => "4h",
            Self::Hour6 => "6h",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Ok(Self::Min1),
            "3m" => Ok(Self::Min3),
            "5m" => Ok(Self::Min5),
            "15m" => Ok(Self::Min15),
            "30m" => Ok(Self::Min30),
            "1h" | "60m" => Ok(Self::Hour1),
            "2h" => Ok(Self::Hour2),
            "4h" => Ok(Self::Hour4),
            "6h" => Ok(Self::Hour6),
            other => Err(format!("unknown interval: {other}")),
        }
    }
}

/// A single market-data update for one instrument.
///
/// `volume` is the cumulative traded volume since day start as reported by
/// the feed, NOT a per-tick quantity; the aggregator derives deltas itself.
/// `datetime` is exchange-local wall-clock time with millisecond (or better)
/// resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickData {
    pub symbol: String,
    pub exchange: Exchange,
    pub datetime: NaiveDateTime,
    pub last_price: f64,
    pub volume: f64,
    pub open_interest: f64,
}

/// A fixed-interval OHLCV summary covering `[start, end)`.
///
/// `volume` is the sum of per-tick volume deltas observed inside the
/// interval; `open_interest` is the last value observed, never accumulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarData {
    pub symbol: String,
    pub exchange: Exchange,
    pub interval: Interval,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_interest: f64,
}

impl BarData {
    /// Series key for this bar.
    pub fn key(&self) -> BarKey {
        BarKey {
            symbol: self.symbol.clone(),
            interval: self.interval,
        }
    }
}

/// Composite key that identifies a unique bar series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct BarKey {
    pub symbol: String,
    pub interval: Interval,
}

impl std::fmt::Display for BarKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// Extract the product code from a contract symbol by stripping the expiry
/// digits: "rb2101" -> "rb", "SC2106" -> "sc".
pub fn product_code(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !c.is_ascii_digit())
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_token_round_trip() {
        for iv in [
            Interval::Min1,
            Interval::Min3,
            Interval::Min5,
            Interval::Min15,
            Interval::Min30,
            Interval::Hour1,
            Interval::Hour2,
            Interval::Hour4,
            Interval::Hour6,
        ] {
            let parsed: Interval = iv.to_string().parse().expect("token should parse back");
            assert_eq!(parsed, iv);
        }
    }

    #[test]
    fn interval_minutes() {
        assert_eq!(Interval::Min1.minutes(), 1);
        assert_eq!(Interval::Min30.minutes(), 30);
        assert_eq!(Interval::Hour1.minutes(), 60);
        assert_eq!(Interval::Hour6.minutes(), 360);
    }

    #[test]
    fn sixty_minutes_is_an_hour() {
        assert_eq!("60m".parse::<Interval>(), Ok(Interval::Hour1));
    }

    #[test]
    fn product_code_strips_expiry() {
        assert_eq!(product_code("rb2101"), "rb");
        assert_eq!(product_code("SC2106"), "sc");
        assert_eq!(product_code("jm2105"), "jm");
        assert_eq!(product_code("IF2012"), "if");
    }

    #[test]
    fn bar_key_display() {
        let key = BarKey {
            symbol: "rb2101".into(),
            interval: Interval::Min5,
        };
        assert_eq!(key.to_string(), "rb2101@5m");
    }
}
