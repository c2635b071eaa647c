//! Configuration: DSP acquisition, Smart Start timing, pipeline sizing, scoring thresholds.
//!
//! Loading order:
//! 1. `SONOHEALTH_CONFIG` environment variable (path to a TOML file)
//! 2. `sonohealth.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Every section is `#[serde(default)]`, so a partial file only overrides what it names.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};

pub const CONFIG_ENV_VAR: &str = "SONOHEALTH_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "sonohealth.toml";

/// Acquisition and spectral-analysis parameters shared by training and inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DspConfig {
    /// Analysis window length in seconds.
    pub window_size_s: f64,
    /// Step between consecutive analysis windows in seconds.
    pub hop_size_s: f64,
    pub sample_rate: u32,
    pub fft_size: usize,
    /// Number of output feature bins.
    pub frequency_bins: usize,
    /// Analysed band `(low_hz, high_hz)`.
    pub frequency_range: (f64, f64),
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            window_size_s: 0.330,
            hop_size_s: 0.066,
            sample_rate: 44_100,
            fft_size: 2048,
            frequency_bins: 512,
            frequency_range: (20.0, 20_000.0),
        }
    }
}

impl DspConfig {
    /// Analysis window length in samples (at least one FFT).
    pub fn window_samples(&self) -> usize {
        ((self.window_size_s * self.sample_rate as f64).round() as usize).max(self.fft_size)
    }

    /// Hop length in samples (at least one sample).
    pub fn hop_samples(&self) -> usize {
        ((self.hop_size_s * self.sample_rate as f64).round() as usize).max(1)
    }

    pub fn nyquist(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }

    pub fn validate(&self) -> Result<()> {
        let (low, high) = self.frequency_range;
        if self.sample_rate == 0 {
            return Err(CoreError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if self.fft_size < 16 {
            return Err(CoreError::InvalidConfig(format!(
                "fft_size must be >= 16, got {}",
                self.fft_size
            )));
        }
        if self.frequency_bins == 0 {
            return Err(CoreError::InvalidConfig("frequency_bins must be > 0".into()));
        }
        if !(low.is_finite() && high.is_finite()) || low < 0.0 || low >= high {
            return Err(CoreError::InvalidConfig(format!(
                "frequency_range must satisfy 0 <= low < high, got [{low}, {high}]"
            )));
        }
        if high > self.nyquist() {
            return Err(CoreError::InvalidConfig(format!(
                "frequency_range high {high} Hz exceeds Nyquist {} Hz",
                self.nyquist()
            )));
        }
        if !(self.window_size_s > 0.0) || !(self.hop_size_s > 0.0) {
            return Err(CoreError::InvalidConfig(
                "window_size_s and hop_size_s must be > 0".into(),
            ));
        }
        if self.hop_size_s > self.window_size_s {
            return Err(CoreError::InvalidConfig(format!(
                "hop_size_s ({}) must not exceed window_size_s ({})",
                self.hop_size_s, self.window_size_s
            )));
        }
        Ok(())
    }
}

/// Smart Start timing. Durations are wall-clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartStartConfig {
    /// Settling time for upstream hardware audio filters. Long on purpose.
    #[serde(with = "duration_ms")]
    pub warmup_duration: Duration,
    /// Leading part of the warm-up during which frame RMS is collected.
    #[serde(with = "duration_ms")]
    pub adaptive_learning_period: Duration,
    #[serde(with = "duration_ms")]
    pub max_wait_time: Duration,
    /// Trigger threshold never drops below this RMS.
    pub signal_floor: f32,
    /// Adaptive threshold = multiplier x median learned RMS.
    pub adaptive_multiplier: f32,
}

impl Default for SmartStartConfig {
    fn default() -> Self {
        Self {
            warmup_duration: Duration::from_millis(5000),
            adaptive_learning_period: Duration::from_millis(2000),
            max_wait_time: Duration::from_millis(30_000),
            signal_floor: 0.02,
            adaptive_multiplier: 3.0,
        }
    }
}

impl SmartStartConfig {
    pub fn validate(&self) -> Result<()> {
        if self.adaptive_learning_period > self.warmup_duration {
            return Err(CoreError::InvalidConfig(format!(
                "adaptive_learning_period ({:?}) must not exceed warmup_duration ({:?})",
                self.adaptive_learning_period, self.warmup_duration
            )));
        }
        if self.max_wait_time.is_zero() {
            return Err(CoreError::InvalidConfig("max_wait_time must be > 0".into()));
        }
        if !(self.signal_floor >= 0.0) || !(self.adaptive_multiplier > 0.0) {
            return Err(CoreError::InvalidConfig(
                "signal_floor must be >= 0 and adaptive_multiplier > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Producer/consumer sizing for a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ring buffer capacity in samples. Must be a power of two.
    pub ring_buffer_capacity: usize,
    /// Samples per consumer frame (one feature vector each).
    pub frame_size: usize,
    /// Consumer sleep when no full frame is available.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_capacity: 1 << 18, // ~6 s at 44.1 kHz
            frame_size: 8192,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.ring_buffer_capacity.is_power_of_two() {
            return Err(CoreError::InvalidConfig(format!(
                "ring_buffer_capacity must be a power of two, got {}",
                self.ring_buffer_capacity
            )));
        }
        if self.frame_size == 0 || self.frame_size > self.ring_buffer_capacity {
            return Err(CoreError::InvalidConfig(format!(
                "frame_size must be in 1..={}, got {}",
                self.ring_buffer_capacity, self.frame_size
            )));
        }
        Ok(())
    }
}

/// Score thresholds (percent) and the training target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub healthy_threshold: f64,
    pub uncertain_threshold: f64,
    /// Best multiclass score below this yields `UNKNOWN`.
    pub multiclass_uncertainty_threshold: f64,
    /// Fraction of 100 that the training set's own mean similarity maps to.
    pub target_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            healthy_threshold: 75.0,
            uncertain_threshold: 50.0,
            multiclass_uncertainty_threshold: 70.0,
            target_score: 0.9,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        let ordered = 0.0 <= self.uncertain_threshold
            && self.uncertain_threshold <= self.healthy_threshold
            && self.healthy_threshold <= 100.0;
        if !ordered {
            return Err(CoreError::InvalidConfig(format!(
                "thresholds must satisfy 0 <= uncertain ({}) <= healthy ({}) <= 100",
                self.uncertain_threshold, self.healthy_threshold
            )));
        }
        if !(0.0..=100.0).contains(&self.multiclass_uncertainty_threshold) {
            return Err(CoreError::InvalidConfig(
                "multiclass_uncertainty_threshold must be within [0, 100]".into(),
            ));
        }
        if !(self.target_score > 0.0 && self.target_score < 1.0) {
            return Err(CoreError::InvalidConfig(format!(
                "target_score must be in (0, 1), got {}",
                self.target_score
            )));
        }
        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dsp: DspConfig,
    pub smart_start: SmartStartConfig,
    pub pipeline: PipelineConfig,
    pub scoring: ScoringConfig,
}

impl AppConfig {
    /// Resolve and load the configuration, falling back to defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            match Self::load_from_file(Path::new(&path)) {
                Ok(cfg) => return cfg,
                Err(e) => warn!(path = %path, error = %e, "config load failed, using defaults"),
            }
            return Self::default();
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(local) {
                Ok(cfg) => return cfg,
                Err(e) => warn!(error = %e, "local config load failed, using defaults"),
            }
        }
        Self::default()
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg = Self::from_toml_str(&text)?;
        info!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: AppConfig =
            toml::from_str(text).map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.dsp.validate()?;
        self.smart_start.validate()?;
        self.pipeline.validate()?;
        self.scoring.validate()
    }
}

/// Durations are written as integer milliseconds in config files.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
