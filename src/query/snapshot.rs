//! Symbol snapshots and top movers

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::change::{compute_change, PctChange};
use crate::storage::{StorageError, TickStore};
use crate::window::SharedWindowStore;

/// Ranking direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// Latest close and per-interval change for one symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub latest_close: Option<Decimal>,
    /// Change keyed by interval in minutes
    pub changes: BTreeMap<u32, PctChange>,
}

impl SymbolSnapshot {
    /// Change at `interval_minutes`, `Insufficient` when not computed
    pub fn change(&self, interval_minutes: u32) -> PctChange {
        self.changes
            .get(&interval_minutes)
            .copied()
            .unwrap_or(PctChange::Insufficient)
    }
}

/// Builds snapshots from the windows and the durable store
pub struct QueryService<S: ?Sized> {
    store: Arc<S>,
    windows: SharedWindowStore,
    memory_intervals: Vec<u32>,
    aggregate_intervals: Vec<u32>,
}

impl<S: TickStore + ?Sized> QueryService<S> {
    /// Intervals listed in both sets are served from memory
    pub fn new(
        store: Arc<S>,
        windows: SharedWindowStore,
        memory_intervals: Vec<u32>,
        aggregate_intervals: Vec<u32>,
    ) -> Self {
        let aggregate_intervals = aggregate_intervals
            .into_iter()
            .filter(|i| !memory_intervals.contains(i))
            .collect();
        Self {
            store,
            windows,
            memory_intervals,
            aggregate_intervals,
        }
    }

    /// Every interval a snapshot reports, ascending
    pub fn intervals(&self) -> Vec<u32> {
        let mut all: Vec<u32> = self
            .memory_intervals
            .iter()
            .chain(self.aggregate_intervals.iter())
            .copied()
            .collect();
        all.sort_unstable();
        all.dedup();
        all
    }

    pub async fn snapshot(&self, symbol: &str, now_ms: i64) -> Result<SymbolSnapshot, StorageError> {
        let (mut latest_close, mut changes) = {
            let windows = self.windows.read();
            let changes: BTreeMap<u32, PctChange> = self
                .memory_intervals
                .iter()
                .map(|&k| (k, compute_change(&windows, symbol, k, now_ms)))
                .collect();
            (windows.latest_close(symbol), changes)
        };

        for &interval in &self.aggregate_intervals {
            let change = match self.store.latest_aggregate(symbol, interval).await? {
                Some(bucket) => bucket
                    .pct_change
                    .map_or(PctChange::Insufficient, PctChange::Value),
                None => PctChange::Insufficient,
            };
            changes.insert(interval, change);
        }

        if latest_close.is_none() {
            latest_close = self.store.latest_tick(symbol).await?.map(|t| t.close);
        }

        Ok(SymbolSnapshot {
            symbol: symbol.to_string(),
            latest_close,
            changes,
        })
    }

    /// Snapshots for `symbols`, ranked by the change at `sort_interval`
    pub async fn top_movers(
        &self,
        symbols: &[String],
        sort_interval: u32,
        order: SortOrder,
        limit: usize,
        now_ms: i64,
    ) -> Result<Vec<SymbolSnapshot>, StorageError> {
        let mut snapshots = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            snapshots.push(self.snapshot(symbol, now_ms).await?);
        }
        Ok(rank_movers(snapshots, sort_interval, order, limit))
    }
}

/// Sort by change at `sort_interval`; `Insufficient` always last, ties by
/// symbol
pub fn rank_movers(
    mut snapshots: Vec<SymbolSnapshot>,
    sort_interval: u32,
    order: SortOrder,
    limit: usize,
) -> Vec<SymbolSnapshot> {
    snapshots.sort_by(|a, b| {
        let by_change = match (a.change(sort_interval).value(), b.change(sort_interval).value()) {
            (Some(x), Some(y)) => match order {
                SortOrder::Asc => x.cmp(&y),
                SortOrder::Desc => y.cmp(&x),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_change.then_with(|| a.symbol.cmp(&b.symbol))
    });
    snapshots.truncate(limit);
    snapshots
}
