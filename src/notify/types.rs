//! Notification types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one attached push-stream consumer
pub type SessionId = Uuid;

/// One row of the threshold table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub interval_minutes: u32,
    /// Absolute percent change that counts as a breach
    pub threshold_pct: Decimal,
}

/// Direction of the move that fired an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn from_change(pct_change: Decimal) -> Self {
        if pct_change.is_sign_negative() {
            Direction::Down
        } else {
            Direction::Up
        }
    }
}

/// A fired threshold breach, queued then dispatched, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub symbol: String,
    pub interval_minutes: u32,
    pub pct_change: Decimal,
    pub direction: Direction,
    pub message: String,
    pub fired_at_ms: i64,
}

impl NotificationEvent {
    pub fn new(symbol: &str, interval_minutes: u32, pct_change: Decimal, fired_at_ms: i64) -> Self {
        let direction = Direction::from_change(pct_change);
        let verb = match direction {
            Direction::Up => "increased",
            Direction::Down => "decreased",
        };
        let message = format!(
            "{} price {} by {}% over {} min",
            symbol,
            verb,
            pct_change.abs().round_dp(2),
            interval_minutes
        );

        Self {
            symbol: symbol.to_string(),
            interval_minutes,
            pct_change,
            direction,
            message,
            fired_at_ms,
        }
    }

    /// Server-sent-events frame carrying this event as JSON
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
