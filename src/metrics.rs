//! Latency histograms for the analysis path.
//! Each named metric keeps its most recent samples and reports p50/p95/p99.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::smoothing::RingWindow;

const SAMPLES_PER_METRIC: usize = 1024;

/// Measures elapsed time from creation until `finish`.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// Record the elapsed duration in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

#[derive(Default)]
pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, RingWindow<f64>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &'static str, value_us: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| RingWindow::new(SAMPLES_PER_METRIC))
            .push(value_us);
        tracing::trace!(metric = name, value_us, "metric_recorded");
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    /// Percentile `p` in 0..=100, in microseconds. 0 for unknown metrics.
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.histograms
            .lock()
            .get(name)
            .map_or(0.0, |ring| percentile(ring, p))
    }

    pub fn count(&self, name: &str) -> usize {
        self.histograms.lock().get(name).map_or(0, RingWindow::len)
    }

    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        hists
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_us: percentile(ring, 50.0),
                        p95_us: percentile(ring, 95.0),
                        p99_us: percentile(ring, 99.0),
                        count: ring.len(),
                    },
                )
            })
            .collect()
    }
}

fn percentile(ring: &RingWindow<f64>, p: f64) -> f64 {
    if ring.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = ring.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

pub mod metric_names {
    pub const FEATURE_EXTRACTION: &str = "t_feature_extraction";
    pub const INFERENCE: &str = "t_inference";
    pub const FRAME_CYCLE: &str = "t_frame_cycle";
    pub const TRAINING: &str = "t_training";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let reg = MetricsRegistry::new();
        for v in 1..=100 {
            reg.record(metric_names::INFERENCE, v as f64);
        }
        assert_eq!(reg.percentile(metric_names::INFERENCE, 0.0), 1.0);
        assert_eq!(reg.percentile(metric_names::INFERENCE, 100.0), 100.0);
        let p50 = reg.percentile(metric_names::INFERENCE, 50.0);
        assert!((50.0..=51.0).contains(&p50));
        assert_eq!(reg.percentile("missing", 50.0), 0.0);
    }

    #[test]
    fn span_records_once() {
        let reg = Arc::new(MetricsRegistry::new());
        reg.span(metric_names::FRAME_CYCLE).finish();
        assert_eq!(reg.count(metric_names::FRAME_CYCLE), 1);
        let summary = reg.summary();
        assert_eq!(summary[metric_names::FRAME_CYCLE].count, 1);
    }
}
