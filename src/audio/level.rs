//! Signal level of a block of normalized f32 samples.

/// RMS over a frame. Non-finite samples count as silence.
#[inline]
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let f = if s.is_finite() { s as f64 } else { 0.0 };
            f * f
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_and_empty() {
        assert_eq!(compute_rms(&[]), 0.0);
        assert!((compute_rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert!((compute_rms(&[-0.5, 0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn non_finite_samples_are_silent() {
        let rms = compute_rms(&[f32::NAN, 1.0, f32::INFINITY, 1.0]);
        assert!((rms - (0.5f32).sqrt()).abs() < 1e-6);
    }
}
