//! Prometheus metrics

use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// One flush cycle, snapshot to watermark advance
    FlushCycle,
    /// One aggregation pass for a single interval
    AggregationCycle,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Symbols with window state
    TrackedSymbols,
    /// Attached push-stream consumers
    AttachedConsumers,
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Valid ticks applied to the window
    TicksIngested,
    /// Records rejected at the ingestion boundary
    TicksRejected,
    /// Rows written by the flush pipeline
    TicksFlushed,
    /// Candidates skipped because storage already had them
    TicksAlreadyPersisted,
    /// Flush cycles whose bulk write failed
    FlushFailures,
    /// Aggregate buckets inserted or overwritten
    AggregatesUpserted,
    /// Aggregation passes that failed
    AggregationFailures,
    /// Notification events fired by detection
    NotificationsFired,
    /// Queued events dropped on queue overflow
    NotificationsDropped,
    /// Events delivered to consumers
    NotificationsDispatched,
}

impl LatencyMetric {
    fn name(self) -> &'static str {
        match self {
            LatencyMetric::FlushCycle => "tickwatch_flush_cycle_latency_ms",
            LatencyMetric::AggregationCycle => "tickwatch_aggregation_cycle_latency_ms",
        }
    }
}

impl GaugeMetric {
    fn name(self) -> &'static str {
        match self {
            GaugeMetric::TrackedSymbols => "tickwatch_tracked_symbols",
            GaugeMetric::AttachedConsumers => "tickwatch_attached_consumers",
        }
    }
}

impl CounterMetric {
    fn name(self) -> &'static str {
        match self {
            CounterMetric::TicksIngested => "tickwatch_ticks_ingested_total",
            CounterMetric::TicksRejected => "tickwatch_ticks_rejected_total",
            CounterMetric::TicksFlushed => "tickwatch_ticks_flushed_total",
            CounterMetric::TicksAlreadyPersisted => "tickwatch_ticks_already_persisted_total",
            CounterMetric::FlushFailures => "tickwatch_flush_failures_total",
            CounterMetric::AggregatesUpserted => "tickwatch_aggregates_upserted_total",
            CounterMetric::AggregationFailures => "tickwatch_aggregation_failures_total",
            CounterMetric::NotificationsFired => "tickwatch_notifications_fired_total",
            CounterMetric::NotificationsDropped => "tickwatch_notifications_dropped_total",
            CounterMetric::NotificationsDispatched => "tickwatch_notifications_dispatched_total",
        }
    }
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    metrics::histogram!(metric.name()).record(duration.as_secs_f64() * 1_000.0);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}

/// Add to a counter
pub fn increment_counter(metric: CounterMetric, value: u64) {
    if value > 0 {
        metrics::counter!(metric.name()).increment(value);
    }
}
