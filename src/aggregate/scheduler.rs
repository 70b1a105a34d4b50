//! Per-interval trailing aggregation loops

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock;
use crate::storage::{AggregateBucket, StorageError, TickStore};
use crate::telemetry::{increment_counter, record_latency, CounterMetric, LatencyMetric};

/// Result of one pass over every configured interval
#[derive(Debug, Default)]
pub struct AggregationReport {
    /// `(interval_minutes, buckets written)` for intervals that succeeded
    pub upserted: Vec<(u32, u64)>,
    /// `(interval_minutes, error)` for intervals that failed
    pub failed: Vec<(u32, StorageError)>,
}

impl AggregationReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Issues trailing aggregate refreshes against a [`TickStore`]
pub struct AggregationScheduler<S: ?Sized> {
    store: Arc<S>,
    intervals: Vec<u32>,
}

impl<S: TickStore + ?Sized> AggregationScheduler<S> {
    pub fn new(store: Arc<S>, intervals: Vec<u32>) -> Self {
        let mut intervals = intervals;
        intervals.retain(|&i| i > 0);
        intervals.sort_unstable();
        intervals.dedup();
        Self { store, intervals }
    }

    /// Configured intervals, ascending
    pub fn intervals(&self) -> &[u32] {
        &self.intervals
    }

    /// Refresh the bucket containing `now_ms` for one interval
    pub async fn run_interval(
        &self,
        interval_minutes: u32,
        now_ms: i64,
    ) -> Result<u64, StorageError> {
        let started = Instant::now();
        let result = self
            .store
            .refresh_trailing_aggregate(interval_minutes, now_ms)
            .await;
        record_latency(LatencyMetric::AggregationCycle, started.elapsed());

        match &result {
            Ok(upserted) => {
                increment_counter(CounterMetric::AggregatesUpserted, *upserted);
                tracing::debug!(
                    interval_minutes,
                    bucket_start = AggregateBucket::bucket_for(now_ms, interval_minutes),
                    upserted,
                    "Aggregation pass complete"
                );
            }
            Err(e) => {
                increment_counter(CounterMetric::AggregationFailures, 1);
                tracing::warn!(interval_minutes, error = %e, "Aggregation pass failed");
            }
        }

        result
    }

    /// Refresh every configured interval; one failure does not stop the rest
    pub async fn run_all(&self, now_ms: i64) -> AggregationReport {
        let mut report = AggregationReport::default();
        for &interval in &self.intervals {
            match self.run_interval(interval, now_ms).await {
                Ok(n) => report.upserted.push((interval, n)),
                Err(e) => report.failed.push((interval, e)),
            }
        }
        report
    }
}

impl<S: TickStore + ?Sized + 'static> AggregationScheduler<S> {
    /// Spawn one independently scheduled loop per interval
    pub fn spawn(
        self: Arc<Self>,
        cadence: Duration,
        token: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        self.intervals
            .iter()
            .map(|&interval| {
                let scheduler = Arc::clone(&self);
                let token = token.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(cadence);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker.tick().await;

                    loop {
                        tokio::select! {
                            _ = token.cancelled() => {
                                tracing::debug!(interval_minutes = interval, "Aggregation loop stopped");
                                return;
                            }
                            _ = ticker.tick() => {
                                let _ = scheduler.run_interval(interval, clock::now_ms()).await;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
