//! Spectral feature extraction.
//! Hann-windowed FFT segments are averaged per analysis window (Welch), then
//! folded into `frequency_bins` linear bands across the configured range.
//! Magnitudes are amplitude-calibrated so feature norm follows signal energy.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::config::DspConfig;
use crate::error::Result;
use crate::model::FeatureVector;

pub struct FeatureExtractor {
    config: DspConfig,
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    window_gain: f64,
    /// For each output band, the FFT bin range `[start, end)` it averages.
    band_bins: Vec<(usize, usize)>,
    scratch: Vec<Complex<f64>>,
}

impl FeatureExtractor {
    pub fn new(config: DspConfig) -> Result<Self> {
        config.validate()?;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.fft_size);
        let window = hann(config.fft_size);
        let window_gain = window.iter().sum::<f64>().max(f64::EPSILON);
        let band_bins = band_layout(&config);
        let scratch = vec![Complex::new(0.0, 0.0); config.fft_size];
        Ok(Self {
            config,
            fft,
            window,
            window_gain,
            band_bins,
            scratch,
        })
    }

    pub fn config(&self) -> &DspConfig {
        &self.config
    }

    /// Whole-buffer extraction: one vector per analysis window, stepping by hop.
    /// A buffer shorter than one window yields a single vector; an empty buffer none.
    pub fn extract_buffer(&mut self, samples: &[f32]) -> Vec<FeatureVector> {
        if samples.is_empty() {
            return Vec::new();
        }
        let window_len = self.config.window_samples();
        let hop = self.config.hop_samples();
        if samples.len() <= window_len {
            return vec![self.extract_chunk(samples)];
        }
        let mut out = Vec::with_capacity((samples.len() - window_len) / hop + 1);
        let mut start = 0;
        while start + window_len <= samples.len() {
            out.push(self.extract_chunk(&samples[start..start + window_len]));
            start += hop;
        }
        out
    }

    /// Single-chunk extraction: exactly one vector for the whole chunk.
    pub fn extract_chunk(&mut self, samples: &[f32]) -> FeatureVector {
        let n = self.config.fft_size;
        let spectrum_len = n / 2 + 1;
        let mut averaged = vec![0.0f64; spectrum_len];
        let mut segments = 0usize;

        // Segments overlap by half; the tail shorter than one FFT is zero-padded.
        let step = (n / 2).max(1);
        let mut start = 0;
        loop {
            let end = (start + n).min(samples.len());
            self.segment_magnitudes(&samples[start..end], &mut averaged);
            segments += 1;
            if end >= samples.len() {
                break;
            }
            start += step;
        }

        let scale = 1.0 / segments as f64;
        for m in averaged.iter_mut() {
            *m *= scale;
        }

        let values = self
            .band_bins
            .iter()
            .map(|&(lo, hi)| {
                let slice = &averaged[lo..hi];
                slice.iter().sum::<f64>() / slice.len() as f64
            })
            .collect();
        FeatureVector::new(values, self.config.frequency_range)
    }

    /// Accumulate the calibrated magnitude spectrum of one segment into `acc`.
    fn segment_magnitudes(&mut self, segment: &[f32], acc: &mut [f64]) {
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let s = segment.get(i).copied().unwrap_or(0.0);
            let s = if s.is_finite() { s as f64 } else { 0.0 };
            *slot = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);
        let gain = 2.0 / self.window_gain;
        for (a, c) in acc.iter_mut().zip(self.scratch.iter()) {
            *a += c.norm() * gain;
        }
    }
}

fn hann(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Map each output band to a non-empty range of FFT bins. Bands narrower than
/// the FFT resolution reuse the nearest bin.
fn band_layout(config: &DspConfig) -> Vec<(usize, usize)> {
    let (low, high) = config.frequency_range;
    let bin_hz = config.sample_rate as f64 / config.fft_size as f64;
    let max_bin = config.fft_size / 2;
    let band_hz = (high - low) / config.frequency_bins as f64;

    (0..config.frequency_bins)
        .map(|b| {
            let f_lo = low + b as f64 * band_hz;
            let f_hi = f_lo + band_hz;
            let lo = ((f_lo / bin_hz).ceil() as usize).min(max_bin);
            let hi = ((f_hi / bin_hz).ceil() as usize).min(max_bin + 1);
            if hi > lo {
                (lo, hi)
            } else {
                let center = (((f_lo + f_hi) / 2.0) / bin_hz).round() as usize;
                let center = center.min(max_bin);
                (center, center + 1)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> DspConfig {
        DspConfig {
            window_size_s: 0.1,
            hop_size_s: 0.05,
            sample_rate: 8000,
            fft_size: 256,
            frequency_bins: 32,
            frequency_range: (0.0, 4000.0),
        }
    }

    fn sine(freq: f64, amp: f32, sr: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * std::f64::consts::PI * freq * i as f64 / sr as f64).sin() as f32)
            .collect()
    }

    #[test]
    fn silence_maps_to_zero_not_nan() {
        let mut fx = FeatureExtractor::new(small_config()).unwrap();
        let f = fx.extract_chunk(&vec![0.0; 800]);
        assert_eq!(f.bins(), 32);
        assert!(f.values().iter().all(|v| v.is_finite() && v.abs() < 1e-12));
    }

    #[test]
    fn extraction_is_deterministic() {
        let mut fx = FeatureExtractor::new(small_config()).unwrap();
        let s = sine(440.0, 0.5, 8000, 800);
        assert_eq!(fx.extract_chunk(&s), fx.extract_chunk(&s));
    }

    #[test]
    fn sine_energy_lands_in_its_band() {
        let mut fx = FeatureExtractor::new(small_config()).unwrap();
        let f = fx.extract_chunk(&sine(1000.0, 0.5, 8000, 800));
        // 4000 Hz / 32 bands = 125 Hz per band → 1000 Hz is band 8
        let peak = f
            .values()
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 8);
    }

    #[test]
    fn louder_signal_has_proportionally_larger_norm() {
        let mut fx = FeatureExtractor::new(small_config()).unwrap();
        let quiet = fx.extract_chunk(&sine(500.0, 0.05, 8000, 800));
        let loud = fx.extract_chunk(&sine(500.0, 0.5, 8000, 800));
        let ratio = loud.norm() / quiet.norm();
        assert!((ratio - 10.0).abs() < 1e-3, "ratio {ratio}");
    }

    #[test]
    fn buffer_extraction_steps_by_hop() {
        let cfg = small_config();
        let mut fx = FeatureExtractor::new(cfg.clone()).unwrap();
        // window 800 samples, hop 400 → (4000 - 800) / 400 + 1 = 9 vectors
        let vectors = fx.extract_buffer(&sine(300.0, 0.3, 8000, 4000));
        assert_eq!(vectors.len(), 9);
        assert!(vectors.iter().all(|v| v.bins() == cfg.frequency_bins));
    }

    #[test]
    fn short_and_empty_buffers() {
        let mut fx = FeatureExtractor::new(small_config()).unwrap();
        assert!(fx.extract_buffer(&[]).is_empty());
        assert_eq!(fx.extract_buffer(&[0.1; 100]).len(), 1);
    }

    #[test]
    fn non_finite_samples_are_neutralised() {
        let mut fx = FeatureExtractor::new(small_config()).unwrap();
        let mut s = sine(700.0, 0.2, 8000, 800);
        s[10] = f32::NAN;
        s[20] = f32::INFINITY;
        let f = fx.extract_chunk(&s);
        assert!(f.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn narrow_bands_reuse_nearest_bin() {
        let cfg = DspConfig {
            frequency_bins: 512,
            ..small_config()
        };
        let layout = band_layout(&cfg);
        assert_eq!(layout.len(), 512);
        assert!(layout.iter().all(|&(lo, hi)| hi > lo && hi <= cfg.fft_size / 2 + 1));
    }
}
