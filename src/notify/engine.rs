//! Threshold detection, cooldown and per-session queues

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use super::types::{NotificationEvent, SessionId, Threshold};
use crate::change::{compute_window_change, PctChange};
use crate::telemetry::{increment_counter, CounterMetric};
use crate::window::WindowStore;

/// Notification engine shared by every push session
pub type SharedNotificationEngine = Arc<Mutex<NotificationEngine>>;

/// Owns the cooldown table and one FIFO queue per attached session
///
/// Detection scans thresholds in ascending interval order and fires at most
/// one event per symbol per pass (first breach wins). A symbol that fired is
/// skipped until its cooldown elapses.
#[derive(Debug)]
pub struct NotificationEngine {
    thresholds: Vec<Threshold>,
    cooldown_ms: i64,
    max_queue_len: usize,
    cooldowns: HashMap<String, i64>,
    sessions: HashMap<SessionId, VecDeque<NotificationEvent>>,
}

impl NotificationEngine {
    pub fn new(thresholds: Vec<Threshold>, cooldown: Duration, max_queue_len: usize) -> Self {
        let mut thresholds = thresholds;
        thresholds.sort_by_key(|t| t.interval_minutes);

        Self {
            thresholds,
            cooldown_ms: i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX),
            max_queue_len: max_queue_len.max(1),
            cooldowns: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    pub fn shared(self) -> SharedNotificationEngine {
        Arc::new(Mutex::new(self))
    }

    /// Threshold table, ascending by interval
    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    /// True while `symbol` may not fire again
    pub fn in_cooldown(&self, symbol: &str, now_ms: i64) -> bool {
        self.cooldowns
            .get(symbol)
            .is_some_and(|&fired| now_ms < fired.saturating_add(self.cooldown_ms))
    }

    /// Evaluate every symbol and record cooldowns for those that fire
    pub fn evaluate(&mut self, windows: &WindowStore, now_ms: i64) -> Vec<NotificationEvent> {
        let mut events = Vec::new();

        for (symbol, window) in windows.iter() {
            if window.is_empty() || window.latest_close().is_none() {
                continue;
            }
            if self.in_cooldown(symbol, now_ms) {
                continue;
            }

            for threshold in &self.thresholds {
                let pct = match compute_window_change(window, threshold.interval_minutes, now_ms) {
                    PctChange::Value(pct) => pct,
                    PctChange::Insufficient => continue,
                };

                if pct.abs() >= threshold.threshold_pct {
                    events.push(NotificationEvent::new(
                        symbol,
                        threshold.interval_minutes,
                        pct,
                        now_ms,
                    ));
                    self.cooldowns.insert(symbol.to_string(), now_ms);
                    break;
                }
            }
        }

        increment_counter(CounterMetric::NotificationsFired, events.len() as u64);
        events
    }

    /// Append events to every session queue. Returns how many queued events
    /// were dropped to stay within the cap.
    pub fn enqueue(&mut self, events: &[NotificationEvent]) -> usize {
        let mut dropped = 0;
        for queue in self.sessions.values_mut() {
            for event in events {
                if queue.len() >= self.max_queue_len {
                    queue.pop_front();
                    dropped += 1;
                }
                queue.push_back(event.clone());
            }
        }

        if dropped > 0 {
            increment_counter(CounterMetric::NotificationsDropped, dropped as u64);
            tracing::warn!(dropped, "Notification queue full, dropped oldest events");
        }
        dropped
    }

    /// One detection pass: evaluate, then fan out to all sessions
    pub fn detect(&mut self, windows: &WindowStore, now_ms: i64) -> usize {
        let events = self.evaluate(windows, now_ms);
        for event in &events {
            tracing::info!(
                symbol = %event.symbol,
                interval_minutes = event.interval_minutes,
                pct_change = %event.pct_change,
                "Threshold breached"
            );
        }
        self.enqueue(&events);
        events.len()
    }

    /// Attach a new session with an empty queue
    pub fn register_session(&mut self) -> SessionId {
        let id = Uuid::new_v4();
        self.sessions.insert(id, VecDeque::new());
        id
    }

    /// Detach a session. Returns the number of buffered events released.
    pub fn deregister_session(&mut self, id: SessionId) -> usize {
        self.sessions.remove(&id).map_or(0, |queue| queue.len())
    }

    /// Pop up to `max` events from a session's queue in FIFO order
    pub fn drain(&mut self, id: SessionId, max: usize) -> Vec<NotificationEvent> {
        match self.sessions.get_mut(&id) {
            Some(queue) => {
                let n = max.min(queue.len());
                queue.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn queued(&self, id: SessionId) -> usize {
        self.sessions.get(&id).map_or(0, VecDeque::len)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Forget a symbol's cooldown
    pub fn remove_symbol(&mut self, symbol: &str) -> bool {
        self.cooldowns.remove(symbol).is_some()
    }
}
