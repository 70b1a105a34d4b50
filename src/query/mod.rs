//! Read-side query module
//!
//! Per-symbol snapshots that combine window changes for short intervals with
//! stored aggregates for long ones, and top-mover rankings over them.

mod snapshot;

pub use snapshot::{rank_movers, QueryService, SortOrder, SymbolSnapshot};
