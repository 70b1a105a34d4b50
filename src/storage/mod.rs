//! Durable storage module
//!
//! Persistence contracts for deduplicated ticks, trailing aggregates and
//! subscriptions, plus the SQLite implementation.

mod schema;
mod sqlite;
mod types;

pub use schema::migrate;
pub use sqlite::SqliteStore;
pub use types::{AggregateBucket, PurgeReport, StorageError};

use crate::feed::{Tick, TickKey};
use async_trait::async_trait;
use std::collections::HashSet;

/// Tick and aggregate persistence
#[async_trait]
pub trait TickStore: Send + Sync {
    /// Bulk insert-or-ignore keyed by `(symbol, timestamp)`, all or nothing.
    /// Returns the number of rows actually inserted.
    async fn insert_ticks(&self, ticks: &[Tick]) -> Result<u64, StorageError>;

    /// Subset of `keys` already present in storage
    async fn existing_keys(&self, keys: &[TickKey]) -> Result<HashSet<TickKey>, StorageError>;

    /// Recompute the trailing `[now - interval, now]` first/last close change
    /// for every symbol and upsert it into the bucket containing `now`.
    /// Returns the number of buckets written.
    async fn refresh_trailing_aggregate(
        &self,
        interval_minutes: u32,
        now_ms: i64,
    ) -> Result<u64, StorageError>;

    /// Most recent bucket for a symbol and interval
    async fn latest_aggregate(
        &self,
        symbol: &str,
        interval_minutes: u32,
    ) -> Result<Option<AggregateBucket>, StorageError>;

    /// One specific bucket
    async fn aggregate_at(
        &self,
        symbol: &str,
        interval_minutes: u32,
        bucket_start: i64,
    ) -> Result<Option<AggregateBucket>, StorageError>;

    /// Newest persisted tick for a symbol
    async fn latest_tick(&self, symbol: &str) -> Result<Option<Tick>, StorageError>;
}

/// Subscription bookkeeping
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Record a subscription. Returns false if it already existed.
    async fn add_subscription(&self, symbol: &str, subscribed_at_ms: i64)
        -> Result<bool, StorageError>;

    /// Drop a subscription and, when `purge` is set, the symbol's ticks and
    /// aggregates in the same transaction. Returns `None` if the symbol was
    /// not subscribed.
    async fn remove_subscription(
        &self,
        symbol: &str,
        purge: bool,
    ) -> Result<Option<PurgeReport>, StorageError>;

    /// All subscribed symbols in lexical order
    async fn list_subscriptions(&self) -> Result<Vec<String>, StorageError>;
}
