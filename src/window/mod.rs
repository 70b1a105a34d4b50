//! Window store module
//!
//! One rolling, time-bounded, timestamp-ordered tick sequence per symbol,
//! together with the cached latest close and the flush watermark.

mod store;

pub use store::{AddOutcome, SharedWindowStore, SymbolWindow, WindowStore};
