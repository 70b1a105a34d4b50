//! Dedup-aware flush of window ticks into durable storage

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::feed::{Tick, TickKey};
use crate::storage::{StorageError, TickStore};
use crate::telemetry::{increment_counter, record_latency, CounterMetric, LatencyMetric};
use crate::window::SharedWindowStore;

/// Outcome of one flush cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Ticks newer than their symbol's watermark
    pub candidates: usize,
    /// Candidates dropped as repeats of an earlier `(symbol, timestamp)`
    pub intra_batch_duplicates: usize,
    /// Candidates storage already held
    pub already_persisted: usize,
    /// Rows the bulk insert actually added
    pub written: u64,
    /// Symbols whose watermark moved
    pub watermarks_advanced: usize,
}

/// Moves unflushed window ticks into a [`TickStore`]
///
/// Cycles are serialized: a cycle started while another is in flight waits
/// for it, so a candidate set is always consumed before the next is taken.
pub struct FlushPipeline<S: ?Sized> {
    windows: SharedWindowStore,
    store: Arc<S>,
    cycle: Mutex<()>,
}

impl<S: TickStore + ?Sized> FlushPipeline<S> {
    pub fn new(windows: SharedWindowStore, store: Arc<S>) -> Self {
        Self {
            windows,
            store,
            cycle: Mutex::new(()),
        }
    }

    /// Wait for any in-flight cycle and hold off new ones until the guard
    /// is dropped
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.cycle.lock().await
    }

    /// Run one flush cycle
    ///
    /// On error no watermark moves; the same candidates are retried next cycle.
    pub async fn run_cycle(&self) -> Result<FlushReport, StorageError> {
        let _cycle = self.cycle.lock().await;
        let started = Instant::now();

        let result = self.flush_once().await;
        record_latency(LatencyMetric::FlushCycle, started.elapsed());

        match &result {
            Ok(report) => {
                increment_counter(CounterMetric::TicksFlushed, report.written);
                increment_counter(
                    CounterMetric::TicksAlreadyPersisted,
                    report.already_persisted as u64,
                );
                if report.candidates > 0 {
                    tracing::debug!(
                        candidates = report.candidates,
                        duplicates = report.intra_batch_duplicates,
                        already_persisted = report.already_persisted,
                        written = report.written,
                        "Flush cycle complete"
                    );
                }
            }
            Err(e) => {
                increment_counter(CounterMetric::FlushFailures, 1);
                tracing::warn!(error = %e, "Flush cycle failed, watermarks unchanged");
            }
        }

        result
    }

    async fn flush_once(&self) -> Result<FlushReport, StorageError> {
        // Consistent copy taken under the read lock; ingestion keeps going
        let candidates = self.windows.read().flush_candidates();
        let mut report = FlushReport {
            candidates: candidates.len(),
            ..FlushReport::default()
        };
        if candidates.is_empty() {
            return Ok(report);
        }

        let (batch, duplicates) = dedup_candidates(candidates);
        report.intra_batch_duplicates = duplicates;

        let keys: Vec<TickKey> = batch.iter().map(Tick::key).collect();
        let present = self.store.existing_keys(&keys).await?;
        let (already, fresh): (Vec<Tick>, Vec<Tick>) = batch
            .into_iter()
            .partition(|tick| present.contains(&tick.key()));
        report.already_persisted = already.len();

        if !fresh.is_empty() {
            report.written = self.store.insert_ticks(&fresh).await?;
        }

        // Everything in `fresh` and `already` is now confirmed durable
        let mut highest: BTreeMap<&str, i64> = BTreeMap::new();
        for tick in fresh.iter().chain(already.iter()) {
            let entry = highest.entry(tick.symbol.as_str()).or_insert(tick.timestamp);
            *entry = (*entry).max(tick.timestamp);
        }

        let mut windows = self.windows.write();
        for (symbol, timestamp) in highest {
            if windows.advance_watermark(symbol, timestamp) {
                report.watermarks_advanced += 1;
            }
        }

        Ok(report)
    }
}

/// Drop repeated `(symbol, timestamp)` pairs, keeping the first occurrence.
/// Returns the surviving ticks and the number dropped.
fn dedup_candidates(candidates: Vec<Tick>) -> (Vec<Tick>, usize) {
    let mut seen = HashSet::with_capacity(candidates.len());
    let mut batch = Vec::with_capacity(candidates.len());
    let mut duplicates = 0;
    for tick in candidates {
        if seen.insert(tick.key()) {
            batch.push(tick);
        } else {
            duplicates += 1;
        }
    }
    (batch, duplicates)
}

impl<S: TickStore + ?Sized + 'static> FlushPipeline<S> {
    /// Run a cycle every `every` until `token` is cancelled
    pub fn spawn(self: Arc<Self>, every: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Flush loop stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        // Errors are logged and counted inside run_cycle
                        let _ = self.run_cycle().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AggregateBucket, SqliteStore};
    use crate::window::WindowStore;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const MINUTE: i64 = 60_000;

    fn tick(symbol: &str, timestamp: i64, close: Decimal) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            current_price: close,
        }
    }

    fn windows_with(ticks: Vec<Tick>, now: i64) -> SharedWindowStore {
        let windows = WindowStore::shared(chrono::Duration::minutes(10));
        {
            let mut w = windows.write();
            for t in ticks {
                w.add_point(t, now);
            }
        }
        windows
    }

    /// Store whose writes always fail
    struct FailingStore;

    #[async_trait]
    impl TickStore for FailingStore {
        async fn insert_ticks(&self, _ticks: &[Tick]) -> Result<u64, StorageError> {
            Err(StorageError::Transient(sqlx::Error::PoolTimedOut))
        }

        async fn existing_keys(
            &self,
            _keys: &[TickKey],
        ) -> Result<HashSet<TickKey>, StorageError> {
            Ok(HashSet::new())
        }

        async fn refresh_trailing_aggregate(
            &self,
            _interval_minutes: u32,
            _now_ms: i64,
        ) -> Result<u64, StorageError> {
            Ok(0)
        }

        async fn latest_aggregate(
            &self,
            _symbol: &str,
            _interval_minutes: u32,
        ) -> Result<Option<AggregateBucket>, StorageError> {
            Ok(None)
        }

        async fn aggregate_at(
            &self,
            _symbol: &str,
            _interval_minutes: u32,
            _bucket_start: i64,
        ) -> Result<Option<AggregateBucket>, StorageError> {
            Ok(None)
        }

        async fn latest_tick(&self, _symbol: &str) -> Result<Option<Tick>, StorageError> {
            Ok(None)
        }
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let (batch, duplicates) = dedup_candidates(vec![
            tick("X", MINUTE, dec!(1)),
            tick("Y", MINUTE, dec!(5)),
            tick("X", MINUTE, dec!(2)),
            tick("X", 2 * MINUTE, dec!(3)),
            tick("X", MINUTE, dec!(4)),
        ]);

        assert_eq!(duplicates, 2);
        let kept: Vec<(&str, i64, Decimal)> = batch
            .iter()
            .map(|t| (t.symbol.as_str(), t.timestamp, t.close))
            .collect();
        assert_eq!(
            kept,
            vec![
                ("X", MINUTE, dec!(1)),
                ("Y", MINUTE, dec!(5)),
                ("X", 2 * MINUTE, dec!(3)),
            ]
        );
    }

    #[test]
    fn test_dedup_without_repeats() {
        let (batch, duplicates) =
            dedup_candidates(vec![tick("X", MINUTE, dec!(1)), tick("X", 2 * MINUTE, dec!(2))]);
        assert_eq!(duplicates, 0);
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_only_ticks_above_watermark_are_written() {
        let windows = windows_with(
            vec![tick("X", MINUTE, dec!(100)), tick("X", 2 * MINUTE, dec!(102))],
            3 * MINUTE,
        );
        windows.write().advance_watermark("X", MINUTE);

        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let pipeline = FlushPipeline::new(windows.clone(), store.clone());
        let report = pipeline.run_cycle().await.unwrap();

        assert_eq!(report.candidates, 1);
        assert_eq!(report.written, 1);
        assert_eq!(windows.read().watermark("X"), Some(2 * MINUTE));
        assert!(store.latest_tick("X").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_already_persisted_still_advances_watermark() {
        let windows = windows_with(vec![tick("X", 2 * MINUTE, dec!(102))], 3 * MINUTE);
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        store
            .insert_ticks(&[tick("X", 2 * MINUTE, dec!(102))])
            .await
            .unwrap();

        let pipeline = FlushPipeline::new(windows.clone(), store);
        let report = pipeline.run_cycle().await.unwrap();

        assert_eq!(report.written, 0);
        assert_eq!(report.already_persisted, 1);
        assert_eq!(windows.read().watermark("X"), Some(2 * MINUTE));
    }

    #[tokio::test]
    async fn test_second_run_writes_nothing() {
        let windows = windows_with(
            vec![
                tick("A", MINUTE, dec!(1)),
                tick("A", 2 * MINUTE, dec!(2)),
                tick("B", MINUTE, dec!(3)),
            ],
            3 * MINUTE,
        );
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let pipeline = FlushPipeline::new(windows.clone(), store);

        let first = pipeline.run_cycle().await.unwrap();
        assert_eq!(first.written, 3);
        assert_eq!(first.watermarks_advanced, 2);

        let second = pipeline.run_cycle().await.unwrap();
        assert_eq!(second, FlushReport::default());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_watermark() {
        let windows = windows_with(vec![tick("X", MINUTE, dec!(1))], 2 * MINUTE);
        let pipeline = FlushPipeline::new(windows.clone(), Arc::new(FailingStore));

        assert!(pipeline.run_cycle().await.is_err());
        assert!(windows.read().watermark("X").is_none());

        // Retried with the same candidates next cycle
        assert!(pipeline.run_cycle().await.is_err());
        assert_eq!(windows.read().flush_candidates().len(), 1);
    }

    #[tokio::test]
    async fn test_correction_below_watermark_not_refetched() {
        let windows = windows_with(vec![tick("X", MINUTE, dec!(1))], 2 * MINUTE);
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let pipeline = FlushPipeline::new(windows.clone(), store.clone());
        pipeline.run_cycle().await.unwrap();

        windows.write().add_point(tick("X", MINUTE, dec!(9)), 2 * MINUTE);
        let report = pipeline.run_cycle().await.unwrap();

        assert_eq!(report.candidates, 0);
        let stored = store.latest_tick("X").await.unwrap().unwrap();
        assert_eq!(stored.close, dec!(1));
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_cancel() {
        let windows = windows_with(vec![tick("X", MINUTE, dec!(1))], 2 * MINUTE);
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let pipeline = Arc::new(FlushPipeline::new(windows.clone(), store));
        let token = CancellationToken::new();

        let handle = pipeline.spawn(Duration::from_millis(20), token.clone());
        for _ in 0..100 {
            if windows.read().watermark("X").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        token.cancel();
        handle.await.unwrap();
        assert_eq!(windows.read().watermark("X"), Some(MINUTE));
    }
}
