//! Change calculation module
//!
//! Stateless percentage-change computation over the in-memory window.

mod calculator;

pub use calculator::{compute_change, compute_window_change, last_completed_minute, PctChange};
