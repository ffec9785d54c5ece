// =============================================================================
// BarSeries -- thread-safe ring buffer of completed bars per (symbol, interval)
// =============================================================================
//
// The hand-off surface between the aggregation pipeline and its consumers
// (indicator libraries, persistence).  Only completed bars enter the store;
// in-progress bars live inside the aggregators until they are frozen.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::types::{BarData, BarKey};

/// Thread-safe ring-buffer that stores the most recent completed bars per
/// `(symbol, interval)` pair.  The ring is trimmed to `max_bars` on push.
pub struct BarSeries {
    buffers: RwLock<HashMap<BarKey, VecDeque<BarData>>>,
    max_bars: usize,
}

impl BarSeries {
    /// Create a new store that retains at most `max_bars` completed bars
    /// per key.
    pub fn new(max_bars: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_bars,
        }
    }

    /// Append a completed bar to its series, trimming the oldest entries to
    /// stay within budget.
    pub fn push(&self, bar: BarData) {
        let key = bar.key();
        let mut map = self.buffers.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_bars + 1));

        ring.push_back(bar);
        while ring.len() > self.max_bars {
            ring.pop_front();
        }
    }

    /// Return the most recent `count` bars (oldest-first order).
    pub fn recent(&self, key: &BarKey, count: usize) -> Vec<BarData> {
        let map = self.buffers.read();
        match map.get(key) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Return the most recent `count` close prices (oldest-first order).
    pub fn closes(&self, key: &BarKey, count: usize) -> Vec<f64> {
        self.recent(key, count).iter().map(|b| b.close).collect()
    }

    /// Return the close price of the most recent bar, if any.
    pub fn last_close(&self, key: &BarKey) -> Option<f64> {
        let map = self.buffers.read();
        map.get(key).and_then(|ring| ring.back().map(|b| b.close))
    }

    /// Number of bars stored for a key.
    pub fn len(&self, key: &BarKey) -> usize {
        let map = self.buffers.read();
        map.get(key).map_or(0, VecDeque::len)
    }

    /// True when no bars are stored for a key.
    pub fn is_empty(&self, key: &BarKey) -> bool {
        self.len(key) == 0
    }
}
