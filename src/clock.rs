//! Wall clock in epoch milliseconds

use chrono::Utc;

/// Current wall-clock time, epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
