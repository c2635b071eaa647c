//! Live session pipeline.
//! Capture side pushes sample blocks into a ring buffer through an `AudioSink`.
//! A dedicated analysis thread drains fixed-size frames, runs Smart Start,
//! extracts features, scores them, and publishes `SessionEvent`s.

pub mod level;
pub mod ring_buffer;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel as cb;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cancellation::{SessionControl, SessionGuard};
use crate::config::AppConfig;
use crate::diagnosis::{DiagnosisEngine, SessionScorer};
use crate::error::{CoreError, Result};
use crate::events::{EventSender, SessionEvent};
use crate::features::FeatureExtractor;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::model::{DiagnosisResult, GmiaModel};
use crate::smart_start::{Phase, SmartStart};
use ring_buffer::RingBuffer;

/// What a session monitors and how.
pub struct SessionParams {
    pub machine_id: String,
    /// One model selects single-reference scoring; several select multiclass.
    pub models: Arc<Vec<GmiaModel>>,
    pub config: AppConfig,
    /// Bypass warm-up and waiting; score from the first frame.
    pub skip_warmup: bool,
}

struct SharedAudioState {
    ring_buffer: Mutex<RingBuffer>,
}

/// Producer handle. Cheap to clone; never waits on analysis.
#[derive(Clone)]
pub struct AudioSink {
    shared: Arc<SharedAudioState>,
}

impl AudioSink {
    /// Append a block of normalized mono samples.
    #[inline]
    pub fn push(&self, block: &[f32]) {
        self.shared.ring_buffer.lock().write(block);
    }
}

enum Control {
    SkipToRecording,
    Restart,
}

pub struct SessionHandle {
    guard: SessionGuard,
    sink: AudioSink,
    control_tx: cb::Sender<Control>,
    phase_rx: watch::Receiver<Phase>,
    worker: Option<JoinHandle<Option<DiagnosisResult>>>,
}

impl SessionHandle {
    pub fn sink(&self) -> AudioSink {
        self.sink.clone()
    }

    pub fn phase(&self) -> Phase {
        *self.phase_rx.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase_rx.clone()
    }

    pub fn skip_to_recording(&self) {
        let _ = self.control_tx.send(Control::SkipToRecording);
    }

    /// Start a fresh warm-up and discard scores collected so far.
    pub fn restart(&self) {
        let _ = self.control_tx.send(Control::Restart);
    }

    pub fn generation(&self) -> u64 {
        self.guard.generation()
    }

    /// Stop analysis and return the session's final diagnosis, if any frame
    /// was scored and no newer session superseded this one.
    pub fn stop(mut self) -> Option<DiagnosisResult> {
        self.guard.cancel();
        let worker = self.worker.take()?;
        match worker.join() {
            Ok(result) => result,
            Err(_) => {
                error!("analysis thread panicked");
                None
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.guard.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Validate inputs and spawn the analysis thread.
pub fn start_session(
    control: &SessionControl,
    params: SessionParams,
    events: EventSender,
    metrics: Arc<MetricsRegistry>,
) -> Result<SessionHandle> {
    let SessionParams {
        machine_id,
        models,
        config,
        skip_warmup,
    } = params;
    config.validate()?;
    check_models(&models, &config)?;

    let extractor = FeatureExtractor::new(config.dsp.clone())?;
    let scorer = SessionScorer::new(
        DiagnosisEngine::new(config.scoring.clone()),
        Arc::clone(&models),
        config.dsp.sample_rate,
    )?;
    let mut smart_start = SmartStart::new(config.smart_start.clone(), events.clone());
    let phase_rx = smart_start.subscribe();
    if skip_warmup {
        smart_start.skip_to_recording();
    } else {
        smart_start.start();
    }

    let shared = Arc::new(SharedAudioState {
        ring_buffer: Mutex::new(RingBuffer::new(config.pipeline.ring_buffer_capacity)),
    });
    let (control_tx, control_rx) = cb::unbounded();
    let guard = control.begin();

    let worker = {
        let shared = Arc::clone(&shared);
        let guard = guard.clone();
        let ctx = LoopContext {
            machine_id,
            config,
            shared,
            guard,
            control_rx,
            events,
            metrics,
        };
        std::thread::Builder::new()
            .name("sonohealth-analysis".into())
            .spawn(move || run_analysis_loop(ctx, smart_start, extractor, scorer))?
    };

    info!(generation = guard.generation(), models = models.len(), "session started");
    Ok(SessionHandle {
        guard,
        sink: AudioSink { shared },
        control_tx,
        phase_rx,
        worker: Some(worker),
    })
}

fn check_models(models: &[GmiaModel], config: &AppConfig) -> Result<()> {
    if models.is_empty() {
        return Err(CoreError::NoModels);
    }
    for model in models {
        if model.sample_rate != config.dsp.sample_rate {
            return Err(CoreError::SampleRateMismatch {
                model: model.sample_rate,
                test: config.dsp.sample_rate,
            });
        }
        if model.feature_dimension != config.dsp.frequency_bins {
            return Err(CoreError::DimensionMismatch {
                expected: model.feature_dimension,
                actual: config.dsp.frequency_bins,
            });
        }
    }
    Ok(())
}

struct LoopContext {
    machine_id: String,
    config: AppConfig,
    shared: Arc<SharedAudioState>,
    guard: SessionGuard,
    control_rx: cb::Receiver<Control>,
    events: EventSender,
    metrics: Arc<MetricsRegistry>,
}

fn run_analysis_loop(
    ctx: LoopContext,
    mut smart_start: SmartStart,
    mut extractor: FeatureExtractor,
    mut scorer: SessionScorer,
) -> Option<DiagnosisResult> {
    let frame_size = ctx.config.pipeline.frame_size;
    let poll = ctx.config.pipeline.poll_interval;
    let mut frame = vec![0.0f32; frame_size];

    debug!(frame_size, "analysis loop started");

    loop {
        if !ctx.guard.should_continue() {
            break;
        }

        for cmd in ctx.control_rx.try_iter() {
            match cmd {
                Control::SkipToRecording => smart_start.skip_to_recording(),
                Control::Restart => {
                    scorer.clear();
                    smart_start.start();
                }
            }
        }

        let now = Instant::now();
        smart_start.tick(now);

        let (read, dropped) = {
            let mut rb = ctx.shared.ring_buffer.lock();
            let dropped = rb.take_dropped();
            let read = if rb.available() >= frame_size {
                rb.read(&mut frame)
            } else {
                0
            };
            (read, dropped)
        };

        if dropped > 0 {
            warn!(dropped, "analysis fell behind, samples overwritten");
            ctx.events.emit(SessionEvent::Overrun {
                dropped_samples: dropped,
            });
        }

        if read < frame_size {
            std::thread::sleep(poll);
            continue;
        }

        if !smart_start.process_audio_at(&frame, now) {
            continue;
        }

        let cycle = ctx.metrics.span(metric_names::FRAME_CYCLE);
        let extract = ctx.metrics.span(metric_names::FEATURE_EXTRACTION);
        let features = extractor.extract_chunk(&frame);
        extract.finish();

        let infer = ctx.metrics.span(metric_names::INFERENCE);
        let scored = scorer.score(&features);
        infer.finish();

        match scored {
            Ok(update) => {
                // A stale or stopped session must not publish.
                if !ctx.guard.should_continue() {
                    break;
                }
                debug!(
                    raw = update.raw_score,
                    filtered = update.filtered_score,
                    status = %update.status,
                    "frame_scored"
                );
                ctx.events.emit(SessionEvent::Score(update));
            }
            Err(e) => warn!(error = %e, "frame scoring failed"),
        }
        cycle.finish();
    }

    if !ctx.guard.is_current() {
        info!("session superseded, discarding result");
        return None;
    }
    let result = scorer.finish(&ctx.machine_id);
    info!(
        frames = scorer.frames_scored(),
        score = result.as_ref().map(|r| r.health_score),
        "session stopped"
    );
    result
}
