//! Subscription lifecycle module
//!
//! Durable subscriptions, history backfill on subscribe and full state
//! removal on unsubscribe.

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    HistoryProvider, NoBackfill, SubscribeReport, SubscriptionError, UnsubscribeReport,
};
