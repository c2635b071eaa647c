//! Smart Start: Idle → Warmup → Waiting → Recording, with Waiting → Idle on timeout.
//! Warm-up lets upstream audio filters settle and learns the ambient RMS;
//! Waiting holds off until a frame crosses the adaptive threshold.
//! All timing is wall-clock so irregular frame delivery does not skew it.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::audio::level::compute_rms;
use crate::config::SmartStartConfig;
use crate::events::{EventSender, SessionEvent};
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Warmup,
    Waiting,
    Recording,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Warmup => write!(f, "Warmup"),
            Phase::Waiting => write!(f, "Waiting"),
            Phase::Recording => write!(f, "Recording"),
        }
    }
}

impl Phase {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Idle, Phase::Warmup)
                | (Phase::Warmup, Phase::Waiting)
                | (Phase::Waiting, Phase::Recording)
                | (Phase::Waiting, Phase::Idle) // timeout
                // reset from anywhere
                | (_, Phase::Idle)
                // operator-forced capture
                | (_, Phase::Recording)
        )
    }
}

/// Snapshot of the state machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmartStartState {
    pub phase: Phase,
    pub remaining_warmup: Duration,
    pub signal_detected: bool,
    pub adaptive_threshold: Option<f32>,
}

/// Signal-presence gate. Owned by the consumer; observers use `subscribe()`
/// or the event channel.
pub struct SmartStart {
    config: SmartStartConfig,
    phase: Phase,
    phase_started: Instant,
    learned_rms: Vec<f64>,
    adaptive_threshold: Option<f32>,
    signal_detected: bool,
    events: EventSender,
    phase_tx: watch::Sender<Phase>,
}

impl SmartStart {
    pub fn new(config: SmartStartConfig, events: EventSender) -> Self {
        let (phase_tx, _) = watch::channel(Phase::Idle);
        Self {
            config,
            phase: Phase::Idle,
            phase_started: Instant::now(),
            learned_rms: Vec::with_capacity(256),
            adaptive_threshold: None,
            signal_detected: false,
            events,
            phase_tx,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Subscribe to phase changes.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    pub fn adaptive_threshold(&self) -> Option<f32> {
        self.adaptive_threshold
    }

    pub fn state(&self) -> SmartStartState {
        self.state_at(Instant::now())
    }

    pub fn state_at(&self, now: Instant) -> SmartStartState {
        let remaining_warmup = match self.phase {
            Phase::Warmup => self
                .config
                .warmup_duration
                .saturating_sub(now.saturating_duration_since(self.phase_started)),
            Phase::Idle => self.config.warmup_duration,
            _ => Duration::ZERO,
        };
        SmartStartState {
            phase: self.phase,
            remaining_warmup,
            signal_detected: self.signal_detected,
            adaptive_threshold: self.adaptive_threshold,
        }
    }

    /// Begin a new warm-up. Restarts from scratch if already running.
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub fn start_at(&mut self, now: Instant) {
        if self.phase != Phase::Idle {
            self.reset();
        }
        self.transition(Phase::Warmup, now);
    }

    /// Return to Idle and forget everything learned.
    pub fn reset(&mut self) {
        self.learned_rms.clear();
        self.adaptive_threshold = None;
        self.signal_detected = false;
        if self.phase != Phase::Idle {
            self.transition(Phase::Idle, Instant::now());
        }
    }

    /// Operator-forced capture: skip warm-up and waiting.
    pub fn skip_to_recording(&mut self) {
        self.signal_detected = true;
        if self.phase != Phase::Recording {
            info!(from = %self.phase, "skip_to_recording");
            self.transition(Phase::Recording, Instant::now());
        }
    }

    /// Feed one block of samples. Returns whether the block belongs to the recording.
    pub fn process_audio(&mut self, samples: &[f32]) -> bool {
        self.process_audio_at(samples, Instant::now())
    }

    pub fn process_audio_at(&mut self, samples: &[f32], now: Instant) -> bool {
        match self.phase {
            Phase::Idle => false,
            Phase::Warmup => {
                let elapsed = now.saturating_duration_since(self.phase_started);
                if elapsed < self.config.adaptive_learning_period {
                    self.learned_rms.push(compute_rms(samples) as f64);
                }
                self.advance_warmup(now);
                false
            }
            Phase::Waiting => {
                let rms = compute_rms(samples);
                let threshold = self.threshold();
                if rms >= threshold {
                    self.signal_detected = true;
                    info!(rms, threshold, "signal_detected");
                    self.transition(Phase::Recording, now);
                    self.events.emit(SessionEvent::RecordingStarted { rms, threshold });
                    return true;
                }
                self.check_wait_timeout(now);
                false
            }
            Phase::Recording => true,
        }
    }

    /// Apply time-based transitions when no audio arrives.
    pub fn tick(&mut self, now: Instant) {
        match self.phase {
            Phase::Warmup => self.advance_warmup(now),
            Phase::Waiting => self.check_wait_timeout(now),
            _ => {}
        }
    }

    fn advance_warmup(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.phase_started);
        if elapsed >= self.config.adaptive_learning_period && self.adaptive_threshold.is_none() {
            self.finalize_threshold();
        }
        if elapsed >= self.config.warmup_duration {
            if self.adaptive_threshold.is_none() {
                self.finalize_threshold();
            }
            self.transition(Phase::Waiting, now);
        }
    }

    fn check_wait_timeout(&mut self, now: Instant) {
        let waited = now.saturating_duration_since(self.phase_started);
        if waited >= self.config.max_wait_time {
            warn!(waited_ms = waited.as_millis() as u64, "no signal within max wait, returning to idle");
            self.transition(Phase::Idle, now);
            self.events.emit(SessionEvent::SignalTimeout {
                waited_ms: waited.as_millis() as u64,
            });
        }
    }

    /// `max(multiplier × median(learned RMS), floor)`.
    fn finalize_threshold(&mut self) {
        let floor = self.config.signal_floor;
        let threshold = match stats::median(&self.learned_rms) {
            Some(m) => ((m as f32) * self.config.adaptive_multiplier).max(floor),
            None => floor,
        };
        debug!(
            samples = self.learned_rms.len(),
            threshold,
            floor,
            "adaptive_threshold_learned"
        );
        self.adaptive_threshold = Some(threshold);
    }

    fn threshold(&self) -> f32 {
        self.adaptive_threshold.unwrap_or(self.config.signal_floor)
    }

    fn transition(&mut self, next: Phase, now: Instant) {
        let current = self.phase;
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "invalid phase transition");
            return;
        }
        self.phase = next;
        self.phase_started = now;
        self.phase_tx.send_replace(next);
        self.events.emit(SessionEvent::PhaseChanged { from: current, to: next });
        info!(from = %current, to = %next, "phase_transition");
    }
}
