//! Flush pipeline module
//!
//! Reconciles the in-memory windows with durable storage: snapshot what is
//! newer than each watermark, drop what storage already holds, bulk-write
//! the rest, then advance watermarks.

mod pipeline;

pub use pipeline::{FlushPipeline, FlushReport};
