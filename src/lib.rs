//! tickwatch: real-time price change tracking and alerting
//!
//! This library provides the core components for:
//! - Rolling per-symbol tick windows with retention trimming
//! - Interval percent change anchored at the last completed minute
//! - Dedup-aware flushing of ticks into SQLite
//! - Trailing aggregates for longer intervals, upserted per time bucket
//! - Threshold notifications with cooldown and connection-scoped push sessions
//! - Subscription lifecycle with history backfill and purge
//! - Structured logging and Prometheus metrics

pub mod aggregate;
pub mod change;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod feed;
pub mod flush;
pub mod notify;
pub mod query;
pub mod storage;
pub mod subscription;
pub mod telemetry;
pub mod window;
