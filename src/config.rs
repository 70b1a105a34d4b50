//! Configuration types for tickwatch

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::notify::Threshold;
use crate::telemetry::LogFormat;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Rolling window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// How long ticks stay in memory (seconds)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_retention_secs() -> u64 {
    360
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { retention_secs: 360 }
    }
}

impl WindowConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.retention_secs).unwrap_or(i64::MAX / 1_000))
    }
}

/// Flush pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    /// Seconds between flush cycles
    #[serde(default = "default_flush_interval_secs")]
    pub interval_secs: u64,

    /// Rows per multi-row INSERT statement
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_flush_interval_secs() -> u64 {
    6
}
fn default_batch_size() -> usize {
    500
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: 6,
            batch_size: 500,
        }
    }
}

impl FlushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Trailing aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Longer intervals computed against storage (minutes)
    #[serde(default = "default_aggregation_intervals")]
    pub intervals_minutes: Vec<u32>,

    /// Seconds between aggregation passes
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
}

fn default_aggregation_intervals() -> Vec<u32> {
    vec![10, 15, 30]
}
fn default_cadence_secs() -> u64 {
    60
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            intervals_minutes: vec![10, 15, 30],
            cadence_secs: 60,
        }
    }
}

impl AggregationConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs)
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Seconds between threshold evaluations
    #[serde(default = "default_detection_interval_secs")]
    pub detection_interval_secs: u64,

    /// Seconds between queue drains
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,

    /// Events dispatched per session per drain
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// Queued events per session before the oldest is dropped
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,

    /// Seconds a symbol stays silent after it fires
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Breach table, scanned in ascending interval order
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<Threshold>,
}

fn default_detection_interval_secs() -> u64 {
    5
}
fn default_dispatch_interval_secs() -> u64 {
    1
}
fn default_max_batch() -> usize {
    10
}
fn default_max_queue_len() -> usize {
    1024
}
fn default_cooldown_secs() -> u64 {
    300
}
fn default_thresholds() -> Vec<Threshold> {
    vec![
        Threshold {
            interval_minutes: 1,
            threshold_pct: Decimal::new(10, 1), // 1.0%
        },
        Threshold {
            interval_minutes: 2,
            threshold_pct: Decimal::new(15, 1), // 1.5%
        },
        Threshold {
            interval_minutes: 3,
            threshold_pct: Decimal::new(20, 1), // 2.0%
        },
        Threshold {
            interval_minutes: 5,
            threshold_pct: Decimal::new(25, 1), // 2.5%
        },
    ]
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            detection_interval_secs: 5,
            dispatch_interval_secs: 1,
            max_batch: 10,
            max_queue_len: 1024,
            cooldown_secs: 300,
            thresholds: default_thresholds(),
        }
    }
}

impl NotifyConfig {
    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(self.detection_interval_secs)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Durable storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite URL, e.g. `sqlite://tickwatch.db`
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Delete a symbol's ticks and aggregates when it is unsubscribed
    #[serde(default = "default_true")]
    pub purge_on_unsubscribe: bool,
}

fn default_database_url() -> String {
    "sqlite://tickwatch.db".to_string()
}
fn default_max_connections() -> u32 {
    4
}
fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: 4,
            purge_on_unsubscribe: true,
        }
    }
}

/// Read-side query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Intervals computed from the in-memory window (minutes)
    #[serde(default = "default_memory_intervals")]
    pub memory_intervals: Vec<u32>,

    /// Default number of top movers returned
    #[serde(default = "default_top_limit")]
    pub top_limit: usize,

    /// Interval top movers are sorted by when none is given
    #[serde(default = "default_sort_minutes")]
    pub default_sort_minutes: u32,
}

fn default_memory_intervals() -> Vec<u32> {
    vec![1, 2, 3, 5]
}
fn default_top_limit() -> usize {
    20
}
fn default_sort_minutes() -> u32 {
    10
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            memory_intervals: vec![1, 2, 3, 5],
            top_limit: 20,
            default_sort_minutes: 10,
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this port when set
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window.retention_secs == 0 {
            anyhow::bail!("window.retention_secs must be positive");
        }
        if self.flush.interval_secs == 0 || self.flush.batch_size == 0 {
            anyhow::bail!("flush.interval_secs and flush.batch_size must be positive");
        }
        if self.aggregation.intervals_minutes.is_empty()
            || self.aggregation.intervals_minutes.contains(&0)
        {
            anyhow::bail!("aggregation.intervals_minutes must be non-empty and positive");
        }
        if self.aggregation.cadence_secs == 0 {
            anyhow::bail!("aggregation.cadence_secs must be positive");
        }

        let notify = &self.notify;
        if notify.detection_interval_secs == 0 || notify.dispatch_interval_secs == 0 {
            anyhow::bail!("notify detection and dispatch intervals must be positive");
        }
        if notify.max_batch == 0 || notify.max_queue_len == 0 {
            anyhow::bail!("notify.max_batch and notify.max_queue_len must be positive");
        }
        for threshold in &notify.thresholds {
            if threshold.interval_minutes == 0 {
                anyhow::bail!("notify threshold interval must be positive");
            }
            if threshold.threshold_pct.is_sign_negative() {
                anyhow::bail!(
                    "notify threshold for {} min is negative",
                    threshold.interval_minutes
                );
            }
            if !self.fits_retention(threshold.interval_minutes) {
                anyhow::bail!(
                    "notify threshold interval {} min exceeds the {} s window",
                    threshold.interval_minutes,
                    self.window.retention_secs
                );
            }
        }

        if let Some(&bad) = self
            .query
            .memory_intervals
            .iter()
            .find(|&&k| k == 0 || !self.fits_retention(k))
        {
            anyhow::bail!("query memory interval {} min does not fit the window", bad);
        }
        if self.query.top_limit == 0 {
            anyhow::bail!("query.top_limit must be positive");
        }
        if self.storage.max_connections == 0 {
            anyhow::bail!("storage.max_connections must be positive");
        }

        Ok(())
    }

    /// The oldest point an interval reads starts `k` minutes before the
    /// current minute, so mid-minute the window must reach one minute further
    fn fits_retention(&self, interval_minutes: u32) -> bool {
        (u64::from(interval_minutes) + 1) * 60 <= self.window.retention_secs
    }
}
