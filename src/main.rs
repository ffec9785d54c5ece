// =============================================================================
// KlineForge — Historical tick replay
// =============================================================================
//
// Replays a tick CSV file through the aggregation pipeline and reports the
// completed bars per interval.  Expected columns:
//
//   datetime,symbol,exchange,last_price,volume,open_interest
//   2021/01/06 09:00:00.500,rb2105,SHFE,4310.0,132.0,180542.0
//
// `volume` is the cumulative day volume as delivered by the feed.  Rows must
// be grouped per instrument in non-decreasing time order; rejected rows are
// logged and skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use klineforge::{
    BarKey, BarSeries, EngineConfig, Exchange, InstrumentPipeline, SessionCalendar, TickData,
};

/// Raw CSV row before datetime/exchange parsing.
#[derive(Debug, Deserialize)]
struct TickRow {
    datetime: String,
    symbol: String,
    exchange: String,
    last_price: f64,
    volume: f64,
    open_interest: f64,
}

/// Accepted datetime layouts, with and without fractional seconds, plus the
/// minute-resolution layout used by TradeBlazer exports.
const DATETIME_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
];

fn parse_tick_row(row: &TickRow) -> Result<TickData> {
    let datetime = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&row.datetime, fmt).ok())
        .with_context(|| format!("unparseable datetime: {}", row.datetime))?;

    let exchange: Exchange = row
        .exchange
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    Ok(TickData {
        symbol: row.symbol.clone(),
        exchange,
        datetime,
        last_price: row.last_price,
        volume: row.volume,
        open_interest: row.open_interest,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let csv_path = std::env::var("KLINEFORGE_CSV")
        .context("KLINEFORGE_CSV must point at the tick CSV file to replay")?;

    let mut config = match std::env::var("KLINEFORGE_CONFIG") {
        Ok(path) => EngineConfig::load(&path).unwrap_or_else(|e| {
            warn!(error = %e, "failed to load config, using defaults");
            EngineConfig::default()
        }),
        Err(_) => EngineConfig::default(),
    };

    // Override the symbol filter from env if available.
    if let Ok(syms) = std::env::var("KLINEFORGE_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    info!(
        csv = %csv_path,
        symbols = ?config.symbols,
        windows = ?config.windows.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
        "starting replay"
    );

    let calendar = Arc::new(SessionCalendar::new(&config.calendar));
    let series = Arc::new(BarSeries::new(config.series_capacity));
    let flush_timeout = Duration::from_secs(config.flush_timeout_secs);

    // One pipeline task and one channel per instrument; ticks for the same
    // instrument stay serialized on a single worker.
    let mut senders: HashMap<String, mpsc::Sender<TickData>> = HashMap::new();
    let mut workers = Vec::new();
    let mut keys: Vec<BarKey> = Vec::new();

    let mut reader = csv::Reader::from_path(&csv_path)
        .with_context(|| format!("failed to open {csv_path}"))?;

    let mut total_rows = 0_u64;
    let mut bad_rows = 0_u64;
    for record in reader.deserialize::<TickRow>() {
        total_rows += 1;
        let row = match record {
            Ok(row) => row,
            Err(e) => {
                bad_rows += 1;
                warn!(error = %e, "skipping malformed CSV record");
                continue;
            }
        };
        let tick = match parse_tick_row(&row) {
            Ok(tick) => tick,
            Err(e) => {
                bad_rows += 1;
                warn!(error = %e, "skipping unparseable row");
                continue;
            }
        };

        if !config.symbols.is_empty() && !config.symbols.contains(&tick.symbol) {
            continue;
        }

        if !senders.contains_key(&tick.symbol) {
            let mut pipe = InstrumentPipeline::new(
                tick.symbol.clone(),
                &config.windows,
                calendar.clone(),
                series.clone(),
            );
            pipe.set_handler(Box::new(|bar| {
                info!(
                    key = %bar.key(),
                    start = %bar.start,
                    open = bar.open,
                    high = bar.high,
                    low = bar.low,
                    close = bar.close,
                    volume = bar.volume,
                    "bar completed"
                );
            }));

            keys.push(BarKey {
                symbol: tick.symbol.clone(),
                interval: klineforge::Interval::Min1,
            });
            for window in &config.windows {
                if *window == klineforge::Interval::Min1 {
                    continue;
                }
                keys.push(BarKey {
                    symbol: tick.symbol.clone(),
                    interval: *window,
                });
            }

            let (tx, rx) = mpsc::channel(1024);
            workers.push(tokio::spawn(pipe.run(rx, flush_timeout)));
            senders.insert(tick.symbol.clone(), tx);
        }

        if let Some(sender) = senders.get(&tick.symbol) {
            sender
                .send(tick)
                .await
                .context("pipeline worker dropped its receiver")?;
        }
    }

    // Closing the senders lets every worker drain, flush and stop.
    drop(senders);
    for worker in workers {
        let _ = worker.await;
    }

    info!(total_rows, bad_rows, "replay finished");
    let out_dir = std::env::var("KLINEFORGE_OUT_DIR").ok();
    for key in &keys {
        let count = series.len(key);
        if count == 0 {
            continue;
        }
        info!(
            key = %key,
            bars = count,
            last_close = ?series.last_close(key),
            "series summary"
        );
        if let Some(dir) = &out_dir {
            let path = std::path::Path::new(dir).join(format!("{}_{}.csv", key.symbol, key.interval));
            if let Err(e) = export_series(&series, key, &path) {
                warn!(key = %key, error = %e, "failed to export series");
            }
        }
    }

    Ok(())
}

/// Write a completed bar series out as CSV, oldest bar first.
fn export_series(series: &BarSeries, key: &BarKey, path: &std::path::Path) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("failed to create {}", path.display()))?;
    for bar in series.recent(key, usize::MAX) {
        writer.serialize(&bar)?;
    }
    writer.flush()?;
    info!(key = %key, path = %path.display(), "series exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_row_with_milliseconds() {
        let row = TickRow {
            datetime: "2021/01/06 09:00:00.500".into(),
            symbol: "rb2105".into(),
            exchange: "SHFE".into(),
            last_price: 4310.0,
            volume: 132.0,
            open_interest: 180542.0,
        };
        let tick = parse_tick_row(&row).expect("row should parse");
        assert_eq!(tick.symbol, "rb2105");
        assert_eq!(tick.exchange, Exchange::SHFE);
        assert_eq!(tick.datetime.format("%H:%M:%S%.3f").to_string(), "09:00:00.500");
    }

    #[test]
    fn parse_row_minute_resolution() {
        let row = TickRow {
            datetime: "2021/01/06 09:01".into(),
            symbol: "m2105".into(),
            exchange: "DCE".into(),
            last_price: 3000.0,
            volume: 10.0,
            open_interest: 100.0,
        };
        let tick = parse_tick_row(&row).expect("row should parse");
        assert_eq!(tick.exchange, Exchange::DCE);
    }

    #[test]
    fn parse_row_rejects_garbage_datetime() {
        let row = TickRow {
            datetime: "yesterday".into(),
            symbol: "rb2105".into(),
            exchange: "SHFE".into(),
            last_price: 1.0,
            volume: 1.0,
            open_interest: 1.0,
        };
        assert!(parse_tick_row(&row).is_err());
    }
}
