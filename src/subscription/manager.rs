//! Subscribe, unsubscribe and restore

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

use super::types::{
    HistoryProvider, SubscribeReport, SubscriptionError, UnsubscribeReport,
};
use crate::clock;
use crate::feed::{RawTick, Tick};
use crate::flush::FlushPipeline;
use crate::notify::SharedNotificationEngine;
use crate::storage::{SubscriptionStore, TickStore};
use crate::telemetry::{set_gauge, GaugeMetric};
use crate::window::SharedWindowStore;

/// Owns the subscribed-symbol set and keeps memory and storage in step
pub struct SubscriptionManager<S: ?Sized> {
    store: Arc<S>,
    windows: SharedWindowStore,
    notifier: SharedNotificationEngine,
    flush: Arc<FlushPipeline<S>>,
    history: Arc<dyn HistoryProvider>,
    purge_on_unsubscribe: bool,
    subscribed: RwLock<BTreeSet<String>>,
}

impl<S> SubscriptionManager<S>
where
    S: TickStore + SubscriptionStore + ?Sized,
{
    pub fn new(
        store: Arc<S>,
        windows: SharedWindowStore,
        notifier: SharedNotificationEngine,
        flush: Arc<FlushPipeline<S>>,
        history: Arc<dyn HistoryProvider>,
        purge_on_unsubscribe: bool,
    ) -> Self {
        Self {
            store,
            windows,
            notifier,
            flush,
            history,
            purge_on_unsubscribe,
            subscribed: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.subscribed.read().contains(symbol)
    }

    /// Subscribed symbols in lexical order
    pub fn symbols(&self) -> Vec<String> {
        self.subscribed.read().iter().cloned().collect()
    }

    /// Record a subscription, create its window and backfill history
    pub async fn subscribe(&self, symbol: &str) -> Result<SubscribeReport, SubscriptionError> {
        let now = clock::now_ms();
        if !self.store.add_subscription(symbol, now).await? {
            return Err(SubscriptionError::DuplicateSubscription(symbol.to_string()));
        }

        let report = self.activate(symbol, now).await;
        tracing::info!(
            symbol,
            window_ticks = report.window_ticks,
            stored_ticks = report.stored_ticks,
            rejected = report.rejected,
            "Subscribed"
        );
        Ok(report)
    }

    /// Bring persisted subscriptions back into memory. Returns the symbols
    /// restored.
    pub async fn restore(&self) -> Result<Vec<String>, SubscriptionError> {
        let symbols = self.store.list_subscriptions().await?;
        let now = clock::now_ms();
        for symbol in &symbols {
            self.activate(symbol, now).await;
        }
        if !symbols.is_empty() {
            tracing::info!(count = symbols.len(), "Restored subscriptions");
        }
        Ok(symbols)
    }

    /// Remove the subscription and every piece of state for the symbol
    ///
    /// In-memory state is dropped even when no subscription row existed, in
    /// which case the call reports [`SubscriptionError::UnknownSymbol`].
    ///
    /// Runs with flushing held off, so a cycle that already snapshotted the
    /// symbol's ticks lands before the purge and the next one no longer sees
    /// them.
    pub async fn unsubscribe(&self, symbol: &str) -> Result<UnsubscribeReport, SubscriptionError> {
        let _flush = self.flush.exclusive().await;
        let removed = self
            .store
            .remove_subscription(symbol, self.purge_on_unsubscribe)
            .await?;

        self.subscribed.write().remove(symbol);
        let window_removed = {
            let mut windows = self.windows.write();
            let removed = windows.remove_symbol(symbol);
            set_gauge(GaugeMetric::TrackedSymbols, windows.symbol_count() as f64);
            removed
        };
        self.notifier.lock().remove_symbol(symbol);

        match removed {
            Some(purged) => {
                tracing::info!(
                    symbol,
                    ticks_removed = purged.ticks_removed,
                    aggregates_removed = purged.aggregates_removed,
                    "Unsubscribed"
                );
                Ok(UnsubscribeReport {
                    symbol: symbol.to_string(),
                    window_removed,
                    purged,
                })
            }
            None => Err(SubscriptionError::UnknownSymbol(symbol.to_string())),
        }
    }

    async fn activate(&self, symbol: &str, now_ms: i64) -> SubscribeReport {
        self.subscribed.write().insert(symbol.to_string());
        self.windows.write().ensure_symbol(symbol);
        self.backfill(symbol, now_ms).await
    }

    /// Recent history goes into the window, older history straight to storage
    async fn backfill(&self, symbol: &str, now_ms: i64) -> SubscribeReport {
        let mut report = SubscribeReport {
            symbol: symbol.to_string(),
            ..SubscribeReport::default()
        };

        let history = match self.history.fetch_history(symbol).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(symbol, error = %e, "History fetch failed, starting empty");
                return report;
            }
        };

        let mut recent = Vec::new();
        let mut older = Vec::new();
        let cutoff = now_ms - self.windows.read().retention().num_milliseconds();
        for raw in history {
            match validate_history(symbol, raw) {
                Some(tick) if tick.timestamp >= cutoff => recent.push(tick),
                Some(tick) => older.push(tick),
                None => report.rejected += 1,
            }
        }

        if !recent.is_empty() {
            let mut windows = self.windows.write();
            for tick in recent {
                windows.add_point(tick, now_ms);
                report.window_ticks += 1;
            }
            set_gauge(GaugeMetric::TrackedSymbols, windows.symbol_count() as f64);
        }

        if !older.is_empty() {
            match self.store.insert_ticks(&older).await {
                Ok(n) => report.stored_ticks = n,
                Err(e) => tracing::warn!(symbol, error = %e, "Storing older history failed"),
            }
        }

        report
    }
}

/// History records may omit the symbol; records for another symbol are dropped
fn validate_history(symbol: &str, mut raw: RawTick) -> Option<Tick> {
    if raw.symbol.is_none() {
        raw.symbol = Some(symbol.to_string());
    }
    match Tick::try_from(raw) {
        Ok(tick) if tick.symbol == symbol => Some(tick),
        Ok(tick) => {
            tracing::warn!(symbol, got = %tick.symbol, "History record for another symbol");
            None
        }
        Err(e) => {
            tracing::warn!(symbol, error = %e, "Dropping malformed history record");
            None
        }
    }
}
