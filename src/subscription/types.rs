//! Subscription types

use async_trait::async_trait;
use thiserror::Error;

use crate::feed::RawTick;
use crate::storage::{PurgeReport, StorageError};

/// Subscription lifecycle errors
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("{0} is already subscribed")]
    DuplicateSubscription(String),
    #[error("{0} is not subscribed")]
    UnknownSymbol(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Source of historical ticks used to warm a new subscription
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Raw history for `symbol`, any order
    async fn fetch_history(&self, symbol: &str) -> anyhow::Result<Vec<RawTick>>;
}

/// Provider that has no history
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackfill;

#[async_trait]
impl HistoryProvider for NoBackfill {
    async fn fetch_history(&self, _symbol: &str) -> anyhow::Result<Vec<RawTick>> {
        Ok(Vec::new())
    }
}

/// What a subscribe call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeReport {
    pub symbol: String,
    /// History ticks applied to the window
    pub window_ticks: usize,
    /// Older history rows newly inserted into storage
    pub stored_ticks: u64,
    /// History records dropped as malformed or for another symbol
    pub rejected: usize,
}

/// What an unsubscribe call removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnsubscribeReport {
    pub symbol: String,
    /// The symbol had in-memory window state
    pub window_removed: bool,
    /// Durable rows purged alongside the subscription row
    pub purged: PurgeReport,
}
