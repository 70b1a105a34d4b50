//! Aggregation module
//!
//! Periodic trailing-window change aggregates computed inside durable storage

mod scheduler;

pub use scheduler::{AggregationReport, AggregationScheduler};
