//! Interval percentage change over the rolling window

use crate::window::{SymbolWindow, WindowStore};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const MINUTE_MS: i64 = 60_000;

/// Result of a change computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PctChange {
    /// Percentage change rounded to two decimal places
    Value(Decimal),
    /// Not enough points in the interval (or a zero reference price)
    Insufficient,
}

impl PctChange {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            PctChange::Value(v) => Some(*v),
            PctChange::Insufficient => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, PctChange::Insufficient)
    }
}

/// Start of the last fully completed minute before `now_ms`
pub fn last_completed_minute(now_ms: i64) -> i64 {
    now_ms.div_euclid(MINUTE_MS) * MINUTE_MS - MINUTE_MS
}

/// Change over `interval_minutes` for a symbol held in the store
///
/// Unknown symbols yield [`PctChange::Insufficient`].
pub fn compute_change(
    store: &WindowStore,
    symbol: &str,
    interval_minutes: u32,
    now_ms: i64,
) -> PctChange {
    match store.window(symbol) {
        Some(window) => compute_window_change(window, interval_minutes, now_ms),
        None => PctChange::Insufficient,
    }
}

/// Change over `interval_minutes` anchored at the last completed minute
///
/// The interval covers `[last - (k-1) min, last]` and needs at least `k`
/// points. The result compares the earliest point's open with the latest
/// point's close, so repeated calls within one minute agree.
pub fn compute_window_change(
    window: &SymbolWindow,
    interval_minutes: u32,
    now_ms: i64,
) -> PctChange {
    if interval_minutes == 0 {
        return PctChange::Insufficient;
    }

    let end = last_completed_minute(now_ms);
    let start = end - (i64::from(interval_minutes) - 1) * MINUTE_MS;

    let ticks = window.ticks();
    let lo = ticks.partition_point(|t| t.timestamp < start);
    let hi = ticks.partition_point(|t| t.timestamp <= end);
    let in_range = &ticks[lo..hi.max(lo)];

    if in_range.len() < interval_minutes as usize {
        return PctChange::Insufficient;
    }

    let (first, last) = match (in_range.first(), in_range.last()) {
        (Some(first), Some(last)) => (first.open, last.close),
        _ => return PctChange::Insufficient,
    };
    if first.is_zero() {
        return PctChange::Insufficient;
    }

    (last - first)
        .checked_div(first)
        .and_then(|ratio| ratio.checked_mul(dec!(100)))
        .map(|pct| {
            PctChange::Value(pct.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        })
        .unwrap_or(PctChange::Insufficient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Tick;
    use chrono::Duration;

    const MINUTE: i64 = MINUTE_MS;

    fn tick(timestamp: i64, open: Decimal, close: Decimal) -> Tick {
        Tick {
            symbol: "X".to_string(),
            timestamp,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            current_price: close,
        }
    }

    fn store_with(ticks: Vec<Tick>, now: i64) -> WindowStore {
        let mut store = WindowStore::new(Duration::minutes(10));
        for t in ticks {
            store.add_point(t, now);
        }
        store
    }

    #[test]
    fn test_last_completed_minute() {
        assert_eq!(last_completed_minute(180_000), 120_000);
        assert_eq!(last_completed_minute(239_999), 120_000);
        assert_eq!(last_completed_minute(240_000), 180_000);
    }

    #[test]
    fn test_empty_window_is_insufficient() {
        let store = WindowStore::new(Duration::minutes(5));
        assert_eq!(compute_change(&store, "X", 1, 180_000), PctChange::Insufficient);
    }

    #[test]
    fn test_two_point_scenario() {
        let now = 3 * MINUTE;
        let mut store = store_with(vec![tick(MINUTE, dec!(100), dec!(100))], now);

        // Last completed minute is 120000 and holds nothing yet
        assert_eq!(compute_change(&store, "X", 1, now), PctChange::Insufficient);

        store.add_point(tick(2 * MINUTE, dec!(100), dec!(102)), now);
        assert_eq!(compute_change(&store, "X", 1, now), PctChange::Value(dec!(2.00)));
    }

    #[test]
    fn test_interval_needs_k_points() {
        let now = 4 * MINUTE;
        let store = store_with(
            vec![
                tick(2 * MINUTE, dec!(100), dec!(101)),
                tick(3 * MINUTE, dec!(101), dec!(103)),
            ],
            now,
        );

        assert_eq!(compute_change(&store, "X", 2, now), PctChange::Value(dec!(3.00)));
        assert_eq!(compute_change(&store, "X", 3, now), PctChange::Insufficient);
    }

    #[test]
    fn test_current_minute_is_excluded() {
        let now = 4 * MINUTE + 30_000;
        let store = store_with(
            vec![
                tick(3 * MINUTE, dec!(100), dec!(100)),
                tick(4 * MINUTE, dec!(100), dec!(150)),
            ],
            now,
        );

        assert_eq!(compute_change(&store, "X", 1, now), PctChange::Value(dec!(0)));
    }

    #[test]
    fn test_uses_first_open_and_last_close() {
        let now = 6 * MINUTE;
        let store = store_with(
            vec![
                tick(MINUTE, dec!(1), dec!(1)),
                tick(3 * MINUTE, dec!(200), dec!(210)),
                tick(4 * MINUTE, dec!(210), dec!(190)),
                tick(5 * MINUTE, dec!(190), dec!(180)),
            ],
            now,
        );

        // (180 - 200) / 200 = -10%
        assert_eq!(compute_change(&store, "X", 3, now), PctChange::Value(dec!(-10.00)));
    }

    #[test]
    fn test_rounds_to_two_places() {
        let now = 2 * MINUTE;
        let store = store_with(vec![tick(MINUTE, dec!(3), dec!(3.0001))], now);

        // 0.0001 / 3 * 100 = 0.00333...
        assert_eq!(compute_change(&store, "X", 1, now), PctChange::Value(dec!(0.00)));

        let store = store_with(vec![tick(MINUTE, dec!(8), dec!(8.0004))], now);
        // 0.005% rounds away from zero
        assert_eq!(compute_change(&store, "X", 1, now), PctChange::Value(dec!(0.01)));
    }

    #[test]
    fn test_zero_open_is_insufficient() {
        let now = 2 * MINUTE;
        let store = store_with(vec![tick(MINUTE, dec!(0), dec!(5))], now);
        assert_eq!(compute_change(&store, "X", 1, now), PctChange::Insufficient);
    }

    #[test]
    fn test_zero_interval_is_insufficient() {
        let now = 2 * MINUTE;
        let store = store_with(vec![tick(MINUTE, dec!(1), dec!(2))], now);
        assert_eq!(compute_change(&store, "X", 0, now), PctChange::Insufficient);
    }

    #[test]
    fn test_stable_within_same_minute() {
        let base = 5 * MINUTE;
        let store = store_with(
            vec![
                tick(3 * MINUTE, dec!(50), dec!(51)),
                tick(4 * MINUTE, dec!(51), dec!(52)),
            ],
            base,
        );

        let first = compute_change(&store, "X", 2, base + 1_000);
        let second = compute_change(&store, "X", 2, base + 59_000);
        assert_eq!(first, second);
        assert_eq!(first, PctChange::Value(dec!(4.00)));
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(PctChange::Value(dec!(1.5)).value(), Some(dec!(1.5)));
        assert!(PctChange::Insufficient.is_insufficient());
        assert!(PctChange::Insufficient.value().is_none());
    }
}
