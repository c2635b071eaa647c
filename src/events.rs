//! Typed session events delivered over a channel instead of callbacks.
//! The channel is bounded. Per-frame `Score` updates are dropped when it is
//! full; lifecycle events wait briefly for a slot. A dropped receiver is
//! tolerated.

use std::time::Duration;

use crossbeam_channel as cb;
use serde::Serialize;
use tracing::{trace, warn};

use crate::model::HealthStatus;
use crate::smart_start::Phase;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseChanged { from: Phase, to: Phase },
    /// A frame crossed the adaptive threshold while waiting.
    RecordingStarted { rms: f32, threshold: f32 },
    /// No frame crossed the threshold within the maximum wait.
    SignalTimeout { waited_ms: u64 },
    Score(ScoreUpdate),
    /// Samples were overwritten because the consumer fell behind.
    Overrun { dropped_samples: u64 },
}

/// Per-frame scoring output after smoothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreUpdate {
    pub raw_score: f64,
    pub filtered_score: f64,
    pub status: HealthStatus,
    pub raw_cosine: f64,
    /// Smoothed detected state in multiclass mode.
    pub label: Option<String>,
}

pub type EventReceiver = cb::Receiver<SessionEvent>;

/// Sending side of the event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: cb::Sender<SessionEvent>,
}

/// Events queued before a slow consumer starts losing score updates.
pub const EVENT_CAPACITY: usize = 1024;

/// How long a lifecycle event waits for a slot in a full channel.
const LIFECYCLE_SEND_TIMEOUT: Duration = Duration::from_millis(100);

impl EventSender {
    /// Never blocks for `Score`; other events block for at most
    /// `LIFECYCLE_SEND_TIMEOUT`.
    pub fn emit(&self, event: SessionEvent) {
        if matches!(event, SessionEvent::Score(_)) {
            if let Err(cb::TrySendError::Full(_)) = self.tx.try_send(event) {
                trace!("event channel full, score update dropped");
            }
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(cb::TrySendError::Full(event)) => {
                if let Err(cb::SendTimeoutError::Timeout(event)) =
                    self.tx.send_timeout(event, LIFECYCLE_SEND_TIMEOUT)
                {
                    warn!(?event, "event channel full, lifecycle event dropped");
                }
            }
            // Receiver may be gone after the caller stopped listening.
            Err(cb::TrySendError::Disconnected(_)) => {}
        }
    }
}

pub fn channel() -> (EventSender, EventReceiver) {
    with_capacity(EVENT_CAPACITY)
}

pub fn with_capacity(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = cb::bounded(capacity);
    (EventSender { tx }, rx)
}

/// Collect everything currently queued without blocking.
pub fn drain(rx: &EventReceiver) -> Vec<SessionEvent> {
    rx.try_iter().collect()
}

/// Wait up to `timeout` for the next event.
pub fn next_within(rx: &EventReceiver, timeout: Duration) -> Option<SessionEvent> {
    rx.recv_timeout(timeout).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(raw: f64) -> SessionEvent {
        SessionEvent::Score(ScoreUpdate {
            raw_score: raw,
            filtered_score: raw,
            status: HealthStatus::Healthy,
            raw_cosine: 0.99,
            label: None,
        })
    }

    #[test]
    fn undrained_receiver_caps_score_updates() {
        let (tx, rx) = with_capacity(8);
        for i in 0..100 {
            tx.emit(score(i as f64));
        }
        let events = drain(&rx);
        assert_eq!(events.len(), 8);
        // Oldest updates are kept; later ones are dropped.
        assert_eq!(events[0], score(0.0));
        assert_eq!(events[7], score(7.0));
    }

    #[test]
    fn lifecycle_event_waits_for_a_slot() {
        let (tx, rx) = with_capacity(2);
        tx.emit(score(1.0));
        tx.emit(score(2.0));
        let reader = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let first = rx.recv().unwrap();
            let rest: Vec<_> = (0..2).map(|_| rx.recv().unwrap()).collect();
            (first, rest)
        });
        tx.emit(SessionEvent::SignalTimeout { waited_ms: 30_000 });
        let (first, rest) = reader.join().unwrap();
        assert_eq!(first, score(1.0));
        assert_eq!(rest[1], SessionEvent::SignalTimeout { waited_ms: 30_000 });
    }

    #[test]
    fn emit_after_receiver_dropped_is_harmless() {
        let (tx, rx) = channel();
        drop(rx);
        tx.emit(score(50.0));
        tx.emit(SessionEvent::Overrun { dropped_samples: 4 });
    }
}
