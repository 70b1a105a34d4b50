//! Connection-scoped push sessions

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::engine::SharedNotificationEngine;
use super::types::{NotificationEvent, SessionId};
use crate::clock;
use crate::telemetry::{increment_counter, set_gauge, CounterMetric, GaugeMetric};
use crate::window::SharedWindowStore;

/// Timers owned by one push session
#[derive(Debug, Clone, Copy)]
pub struct SessionTimers {
    pub detection_interval: Duration,
    pub dispatch_interval: Duration,
    /// Most events handed to the consumer per dispatch tick
    pub max_batch: usize,
}

/// One attached push-stream consumer
///
/// Dropping the session (or calling [`PushSession::close`]) cancels its
/// detection and dispatch timers and releases its queued events.
pub struct PushSession {
    id: SessionId,
    events: mpsc::Receiver<NotificationEvent>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl PushSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Next dispatched event, or `None` once the session has ended
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        self.events.recv().await
    }

    /// Token cancelled when this session ends for any reason
    pub fn cancelled_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn close(self) {}
}

/// Register a session and spawn its timer task under `parent`
pub fn open_session(
    notifier: SharedNotificationEngine,
    windows: SharedWindowStore,
    timers: SessionTimers,
    parent: &CancellationToken,
) -> PushSession {
    let max_batch = timers.max_batch.max(1);
    let id = {
        let mut engine = notifier.lock();
        let id = engine.register_session();
        set_gauge(GaugeMetric::AttachedConsumers, engine.session_count() as f64);
        id
    };

    let token = parent.child_token();
    let (tx, rx) = mpsc::channel(max_batch);
    let task_token = token.clone();

    tokio::spawn(async move {
        let mut detect = tokio::time::interval(timers.detection_interval);
        detect.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut dispatch = tokio::time::interval(timers.dispatch_interval);
        dispatch.set_missed_tick_behavior(MissedTickBehavior::Delay);
        detect.tick().await;
        dispatch.tick().await;

        tracing::debug!(session = %id, "Push session opened");

        loop {
            tokio::select! {
                _ = task_token.cancelled() => break,
                _ = tx.closed() => break,
                _ = detect.tick() => {
                    let now = clock::now_ms();
                    let guard = windows.read();
                    notifier.lock().detect(&guard, now);
                }
                _ = dispatch.tick() => {
                    // Only take what the channel can hold; the rest stays queued
                    let budget = max_batch.min(tx.capacity());
                    let batch = notifier.lock().drain(id, budget);
                    let mut sent = 0;
                    for event in batch {
                        if tx.try_send(event).is_err() {
                            break;
                        }
                        sent += 1;
                    }
                    increment_counter(CounterMetric::NotificationsDispatched, sent);
                }
            }
        }

        // Covers every exit path: cancel, drop, receiver gone
        task_token.cancel();
        let released = {
            let mut engine = notifier.lock();
            let released = engine.deregister_session(id);
            set_gauge(GaugeMetric::AttachedConsumers, engine.session_count() as f64);
            released
        };
        tracing::debug!(session = %id, released, "Push session closed");
    });

    PushSession {
        id,
        events: rx,
        _guard: token.clone().drop_guard(),
        token,
    }
}
