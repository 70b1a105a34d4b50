//! Tick engine service

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{AggregationReport, AggregationScheduler};
use crate::change::{compute_change, PctChange};
use crate::clock;
use crate::config::Config;
use crate::feed::{RawTick, Tick, TickError};
use crate::flush::{FlushPipeline, FlushReport};
use crate::notify::{open_session, NotificationEngine, PushSession, SessionTimers, SharedNotificationEngine};
use crate::query::{QueryService, SortOrder, SymbolSnapshot};
use crate::storage::{AggregateBucket, StorageError, SubscriptionStore, TickStore};
use crate::subscription::{
    HistoryProvider, NoBackfill, SubscribeReport, SubscriptionError, SubscriptionManager,
    UnsubscribeReport,
};
use crate::telemetry::{increment_counter, set_gauge, CounterMetric, GaugeMetric};
use crate::window::{AddOutcome, SharedWindowStore, WindowStore};

/// Records seen by one ingestion task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected: u64,
}

/// Owns all process-wide tables and the recurring tasks that work on them
pub struct TickEngine<S: ?Sized> {
    config: Config,
    windows: SharedWindowStore,
    store: Arc<S>,
    notifier: SharedNotificationEngine,
    flush: Arc<FlushPipeline<S>>,
    aggregation: Arc<AggregationScheduler<S>>,
    subscriptions: SubscriptionManager<S>,
    queries: QueryService<S>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S> TickEngine<S>
where
    S: TickStore + SubscriptionStore + 'static,
{
    /// Engine without a history source
    pub fn new(config: Config, store: Arc<S>) -> Self {
        Self::with_history(config, store, Arc::new(NoBackfill))
    }

    pub fn with_history(config: Config, store: Arc<S>, history: Arc<dyn HistoryProvider>) -> Self {
        let windows = WindowStore::shared(config.window.retention());
        let notifier = NotificationEngine::new(
            config.notify.thresholds.clone(),
            config.notify.cooldown(),
            config.notify.max_queue_len,
        )
        .shared();

        let flush = Arc::new(FlushPipeline::new(windows.clone(), store.clone()));
        let aggregation = Arc::new(AggregationScheduler::new(
            store.clone(),
            config.aggregation.intervals_minutes.clone(),
        ));
        let subscriptions = SubscriptionManager::new(
            store.clone(),
            windows.clone(),
            notifier.clone(),
            flush.clone(),
            history,
            config.storage.purge_on_unsubscribe,
        );
        let queries = QueryService::new(
            store.clone(),
            windows.clone(),
            config.query.memory_intervals.clone(),
            config.aggregation.intervals_minutes.clone(),
        );

        Self {
            config,
            windows,
            store,
            notifier,
            flush,
            aggregation,
            subscriptions,
            queries,
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn windows(&self) -> &SharedWindowStore {
        &self.windows
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Restore persisted subscriptions and spawn the flush and aggregation
    /// loops. Returns the restored symbols.
    pub async fn start(&self) -> Result<Vec<String>, SubscriptionError> {
        let restored = self.subscriptions.restore().await?;

        let mut handles = vec![Arc::clone(&self.flush)
            .spawn(self.config.flush.interval(), self.token.child_token())];
        handles.extend(
            Arc::clone(&self.aggregation)
                .spawn(self.config.aggregation.cadence(), self.token.child_token()),
        );
        self.tasks.lock().extend(handles);

        tracing::info!(
            restored = restored.len(),
            flush_secs = self.config.flush.interval_secs,
            aggregation_intervals = ?self.aggregation.intervals(),
            "Engine started"
        );
        Ok(restored)
    }

    /// Validate and apply one record at the current wall-clock time
    pub fn ingest(&self, raw: RawTick) -> Result<AddOutcome, TickError> {
        apply(&self.windows, raw, clock::now_ms())
    }

    /// Validate and apply one record as of `now_ms`
    pub fn ingest_at(&self, raw: RawTick, now_ms: i64) -> Result<AddOutcome, TickError> {
        apply(&self.windows, raw, now_ms)
    }

    /// Drain a feed receiver into the windows until it closes or the engine
    /// shuts down
    pub fn spawn_ingestion(&self, mut rx: mpsc::Receiver<RawTick>) -> JoinHandle<IngestStats> {
        let windows = self.windows.clone();
        let token = self.token.child_token();

        tokio::spawn(async move {
            let mut stats = IngestStats::default();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(raw) => match apply(&windows, raw, clock::now_ms()) {
                            Ok(_) => stats.accepted += 1,
                            Err(_) => stats.rejected += 1,
                        },
                        None => break,
                    },
                }
            }
            tracing::info!(
                accepted = stats.accepted,
                rejected = stats.rejected,
                "Ingestion stopped"
            );
            stats
        })
    }

    /// Attach a push-stream consumer
    pub fn connect(&self) -> PushSession {
        let timers = SessionTimers {
            detection_interval: self.config.notify.detection_interval(),
            dispatch_interval: self.config.notify.dispatch_interval(),
            max_batch: self.config.notify.max_batch,
        };
        open_session(
            self.notifier.clone(),
            self.windows.clone(),
            timers,
            &self.token,
        )
    }

    pub async fn subscribe(&self, symbol: &str) -> Result<SubscribeReport, SubscriptionError> {
        self.subscriptions.subscribe(symbol).await
    }

    pub async fn unsubscribe(&self, symbol: &str) -> Result<UnsubscribeReport, SubscriptionError> {
        self.subscriptions.unsubscribe(symbol).await
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.subscriptions.symbols()
    }

    /// Window change for one symbol at the current time
    pub fn change(&self, symbol: &str, interval_minutes: u32) -> PctChange {
        compute_change(&self.windows.read(), symbol, interval_minutes, clock::now_ms())
    }

    /// Latest close and changes for a subscribed symbol
    pub async fn snapshot(&self, symbol: &str) -> Result<SymbolSnapshot, SubscriptionError> {
        if !self.subscriptions.is_subscribed(symbol) {
            return Err(SubscriptionError::UnknownSymbol(symbol.to_string()));
        }
        Ok(self.queries.snapshot(symbol, clock::now_ms()).await?)
    }

    /// Subscribed symbols ranked by change; defaults come from `[query]`
    pub async fn top_movers(
        &self,
        sort_interval: Option<u32>,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<SymbolSnapshot>, StorageError> {
        let symbols = self.subscriptions.symbols();
        self.queries
            .top_movers(
                &symbols,
                sort_interval.unwrap_or(self.config.query.default_sort_minutes),
                order,
                limit.unwrap_or(self.config.query.top_limit),
                clock::now_ms(),
            )
            .await
    }

    pub async fn aggregate_at(
        &self,
        symbol: &str,
        interval_minutes: u32,
        bucket_start: i64,
    ) -> Result<Option<AggregateBucket>, StorageError> {
        self.store
            .aggregate_at(symbol, interval_minutes, bucket_start)
            .await
    }

    /// Run a flush cycle now
    pub async fn flush_now(&self) -> Result<FlushReport, StorageError> {
        self.flush.run_cycle().await
    }

    /// Run one aggregation pass over every configured interval
    pub async fn aggregate_now(&self, now_ms: i64) -> AggregationReport {
        self.aggregation.run_all(now_ms).await
    }

    /// Stop every task and session, then flush what is left
    pub async fn shutdown(&self) -> Result<FlushReport, StorageError> {
        self.token.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        let report = self.flush.run_cycle().await?;
        tracing::info!(written = report.written, "Engine stopped after final flush");
        Ok(report)
    }
}

fn apply(windows: &SharedWindowStore, raw: RawTick, now_ms: i64) -> Result<AddOutcome, TickError> {
    let tick = match Tick::try_from(raw) {
        Ok(tick) => tick,
        Err(e) => {
            increment_counter(CounterMetric::TicksRejected, 1);
            tracing::warn!(error = %e, "Dropping malformed tick");
            return Err(e);
        }
    };

    let mut windows = windows.write();
    let before = windows.symbol_count();
    let outcome = windows.add_point(tick, now_ms);
    if windows.symbol_count() != before {
        set_gauge(GaugeMetric::TrackedSymbols, windows.symbol_count() as f64);
    }
    increment_counter(CounterMetric::TicksIngested, 1);

    Ok(outcome)
}
