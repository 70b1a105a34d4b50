//! Tick feed module
//!
//! Normalized tick records, validation at the ingestion boundary, and the
//! feed trait implemented by transport adapters.

mod ndjson;
mod types;

pub use ndjson::NdjsonFeed;
pub use types::{RawTick, Tick, TickError, TickKey};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for tick feed implementations
#[async_trait]
pub trait TickFeed: Send + Sync {
    /// Subscribe to normalized tick records
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<RawTick>>;
}
