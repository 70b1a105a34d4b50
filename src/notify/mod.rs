//! Notification module
//!
//! Threshold detection over the rolling windows, per-symbol cooldown,
//! capped per-session FIFO queues and connection-scoped push sessions.

mod engine;
mod session;
mod types;

pub use engine::{NotificationEngine, SharedNotificationEngine};
pub use session::{open_session, PushSession, SessionTimers};
pub use types::{Direction, NotificationEvent, SessionId, Threshold};
