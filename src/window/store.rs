//! Rolling per-symbol tick windows

use crate::feed::Tick;
use chrono::Duration;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Minimum spacing between ingestion log lines for one symbol
const LOG_THROTTLE_MS: i64 = 5_000;

/// Window store shared between ingestion, flush, detection and queries
pub type SharedWindowStore = Arc<RwLock<WindowStore>>;

/// Retained ticks for one symbol
///
/// Ticks are strictly ascending and unique by timestamp. `latest_close` is
/// the close of the most recently applied tick, which is not necessarily the
/// last tick in order when a late correction lands on an older slot.
#[derive(Debug, Clone, Default)]
pub struct SymbolWindow {
    ticks: Vec<Tick>,
    latest_close: Option<Decimal>,
    watermark: Option<i64>,
    last_logged_ms: Option<i64>,
}

impl SymbolWindow {
    /// Retained ticks in ascending timestamp order
    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    pub fn latest_close(&self) -> Option<Decimal> {
        self.latest_close
    }

    /// Highest timestamp confirmed durable
    pub fn watermark(&self) -> Option<i64> {
        self.watermark
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// Ticks strictly newer than the watermark
    fn unflushed(&self) -> &[Tick] {
        match self.watermark {
            Some(wm) => {
                let start = self.ticks.partition_point(|t| t.timestamp <= wm);
                &self.ticks[start..]
            }
            None => &self.ticks,
        }
    }
}

/// What a single `add_point` did to the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// An existing slot with the same timestamp was overwritten
    pub replaced: bool,
    /// Entries removed from the head by the retention trim
    pub trimmed: usize,
    /// Trimmed entries that had not been flushed yet
    pub trimmed_unflushed: usize,
}

/// Owns one rolling window and flush watermark per symbol
#[derive(Debug)]
pub struct WindowStore {
    retention: Duration,
    windows: BTreeMap<String, SymbolWindow>,
}

impl WindowStore {
    /// Create an empty store with the given retention horizon
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            windows: BTreeMap::new(),
        }
    }

    /// Create a shareable store
    pub fn shared(retention: Duration) -> SharedWindowStore {
        Arc::new(RwLock::new(Self::new(retention)))
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Upsert a tick into its symbol's window and trim expired entries
    pub fn add_point(&mut self, tick: Tick, now_ms: i64) -> AddOutcome {
        let cutoff = now_ms - self.retention.num_milliseconds();
        let symbol = tick.symbol.clone();
        let window = self.windows.entry(symbol.clone()).or_default();
        let mut outcome = AddOutcome::default();

        window.latest_close = Some(tick.close);
        let timestamp = tick.timestamp;
        match window
            .ticks
            .binary_search_by_key(&timestamp, |t| t.timestamp)
        {
            Ok(idx) => {
                window.ticks[idx] = tick;
                outcome.replaced = true;
            }
            Err(idx) => window.ticks.insert(idx, tick),
        }

        let expired = window.ticks.partition_point(|t| t.timestamp < cutoff);
        if expired > 0 {
            outcome.trimmed_unflushed = window.ticks[..expired]
                .iter()
                .filter(|t| window.watermark.map_or(true, |wm| t.timestamp > wm))
                .count();
            window.ticks.drain(..expired);
            outcome.trimmed = expired;
        }

        let should_log = window
            .last_logged_ms
            .map_or(true, |last| now_ms - last >= LOG_THROTTLE_MS);
        if should_log {
            window.last_logged_ms = Some(now_ms);
            tracing::debug!(
                symbol = %symbol,
                window_len = window.ticks.len(),
                latest_close = ?window.latest_close,
                "Window updated"
            );
        }
        if outcome.trimmed_unflushed > 0 {
            tracing::warn!(
                symbol = %symbol,
                count = outcome.trimmed_unflushed,
                timestamp,
                "Retention trim evicted ticks that were never flushed"
            );
        }

        outcome
    }

    /// Create empty state for a symbol if it has none
    pub fn ensure_symbol(&mut self, symbol: &str) {
        self.windows.entry(symbol.to_string()).or_default();
    }

    /// Drop all state for a symbol. Returns false if it had none.
    pub fn remove_symbol(&mut self, symbol: &str) -> bool {
        self.windows.remove(symbol).is_some()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.windows.contains_key(symbol)
    }

    pub fn window(&self, symbol: &str) -> Option<&SymbolWindow> {
        self.windows.get(symbol)
    }

    pub fn latest_close(&self, symbol: &str) -> Option<Decimal> {
        self.windows.get(symbol).and_then(|w| w.latest_close)
    }

    pub fn watermark(&self, symbol: &str) -> Option<i64> {
        self.windows.get(symbol).and_then(|w| w.watermark)
    }

    /// Symbols with state, in lexical order
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.windows.keys().map(String::as_str)
    }

    /// Iterate over all windows
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SymbolWindow)> {
        self.windows.iter().map(|(s, w)| (s.as_str(), w))
    }

    pub fn symbol_count(&self) -> usize {
        self.windows.len()
    }

    /// Snapshot every tick newer than its symbol's watermark
    ///
    /// Taken under the caller's lock, so the copy is a consistent view even
    /// while ingestion keeps writing into the live windows afterwards.
    pub(crate) fn flush_candidates(&self) -> Vec<Tick> {
        self.windows
            .values()
            .flat_map(|w| w.unflushed().iter().cloned())
            .collect()
    }

    /// Move a symbol's watermark forward. Never moves it backwards and never
    /// recreates state for a symbol removed in the meantime.
    pub(crate) fn advance_watermark(&mut self, symbol: &str, timestamp: i64) -> bool {
        match self.windows.get_mut(symbol) {
            Some(window) if window.watermark.map_or(true, |wm| timestamp > wm) => {
                window.watermark = Some(timestamp);
                true
            }
            _ => false,
        }
    }
}
