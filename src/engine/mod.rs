//! Engine module
//!
//! The single service object that owns the window store, storage handle,
//! notification engine and every recurring task.

mod service;

pub use service::{IngestStats, TickEngine};
