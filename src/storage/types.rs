//! Durable storage types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Durable storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// A read or write against the database failed; safe to retry next cycle
    #[error("transient storage error: {0}")]
    Transient(#[from] sqlx::Error),
    /// A stored row could not be mapped back into a domain value
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Trailing percent change for one `(symbol, interval, bucket)` slot
///
/// Rows are overwritten while the wall clock stays inside the bucket, so a
/// reader sees the most recent trailing snapshot, not a settled bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub symbol: String,
    pub interval_minutes: u32,
    /// Bucket start, epoch milliseconds
    pub bucket_start: i64,
    /// `None` when the first close in the window was zero
    pub pct_change: Option<Decimal>,
}

impl AggregateBucket {
    /// Bucket that `now_ms` falls into for the given interval
    pub fn bucket_for(now_ms: i64, interval_minutes: u32) -> i64 {
        let width = i64::from(interval_minutes.max(1)) * 60_000;
        now_ms - now_ms.rem_euclid(width)
    }
}

/// Rows removed when a subscription is dropped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub ticks_removed: u64,
    pub aggregates_removed: u64,
}
