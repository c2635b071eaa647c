use crate::error::{CoreError, Result};
use crate::model::{l2_norm, FeatureVector, GmiaModel};

/// Cosine similarity clamped to [-1, 1]. Zero-norm inputs give 0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(CoreError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let denom = l2_norm(a) * l2_norm(b);
    if !(denom > 0.0) || !denom.is_finite() {
        return Ok(0.0);
    }
    let cos = dot / denom;
    if !cos.is_finite() {
        return Ok(0.0);
    }
    Ok(cos.clamp(-1.0, 1.0))
}

/// `min(1, ‖test‖ / ‖weight‖)`. Penalizes underpowered signals, never amplifies.
pub fn magnitude_factor(test: &[f64], weight: &[f64]) -> f64 {
    let w = l2_norm(weight);
    if !(w > 0.0) || !w.is_finite() {
        return 1.0;
    }
    let ratio = l2_norm(test) / w;
    if ratio.is_finite() {
        ratio.clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Breakdown of one test vector against one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inference {
    pub raw_cosine: f64,
    pub magnitude_factor: f64,
    pub adjusted_cosine: f64,
}

/// Magnitude-adjusted cosine of `features` against `weight`.
pub fn adjusted_similarity(features: &[f64], weight: &[f64]) -> Result<Inference> {
    let raw_cosine = cosine_similarity(weight, features)?;
    let factor = magnitude_factor(features, weight);
    Ok(Inference {
        raw_cosine,
        magnitude_factor: factor,
        adjusted_cosine: (raw_cosine * factor).clamp(-1.0, 1.0),
    })
}

/// Full inference for one vector, with sample-rate and dimension checks.
pub fn infer(model: &GmiaModel, features: &FeatureVector, test_sample_rate: u32) -> Result<Inference> {
    if model.sample_rate != test_sample_rate {
        return Err(CoreError::SampleRateMismatch {
            model: model.sample_rate,
            test: test_sample_rate,
        });
    }
    if features.bins() != model.feature_dimension {
        return Err(CoreError::DimensionMismatch {
            expected: model.feature_dimension,
            actual: features.bins(),
        });
    }
    adjusted_similarity(features.values(), &model.weight_vector)
}

/// One adjusted similarity per test vector.
pub fn score_frame(
    model: &GmiaModel,
    features: &[FeatureVector],
    test_sample_rate: u32,
) -> Result<Vec<f64>> {
    features
        .iter()
        .map(|f| infer(model, f, test_sample_rate).map(|i| i.adjusted_cosine))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelType, REGULARIZATION};

    fn model(weight: Vec<f64>, sample_rate: u32) -> GmiaModel {
        GmiaModel {
            feature_dimension: weight.len(),
            weight_vector: weight,
            regularization: REGULARIZATION,
            scaling_constant: 2.0,
            sample_rate,
            training_date: 0,
            training_duration: 1.0,
            label: "Idle".into(),
            model_type: ModelType::Healthy,
            metadata: None,
        }
    }

    #[test]
    fn self_similarity_is_one() {
        let v = [0.3, 1.2, 4.0, 0.01];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn orthogonal_similarity_is_zero() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 2.0, 0.0];
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-5);
    }

    #[test]
    fn cosine_is_scale_invariant() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 1.0, 0.5];
        let scaled: Vec<f64> = b.iter().map(|x| x * 37.5).collect();
        let base = cosine_similarity(&a, &b).unwrap();
        assert!((base - cosine_similarity(&a, &scaled).unwrap()).abs() < 1e-9);
        let scaled_a: Vec<f64> = a.iter().map(|x| x * 0.001).collect();
        assert!((base - cosine_similarity(&scaled_a, &b).unwrap()).abs() < 1e-9);
    }

    #[test]
    fn cosine_rejects_length_mismatch() {
        assert!(matches!(
            cosine_similarity(&[1.0, 2.0], &[1.0]),
            Err(CoreError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn zero_vector_similarity_is_zero_not_nan() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).unwrap(), 0.0);
    }

    #[test]
    fn tenth_magnitude_is_penalized_tenfold() {
        let weight = vec![3.0, 4.0, 0.0];
        let test: Vec<f64> = weight.iter().map(|x| x / 10.0).collect();
        let inf = adjusted_similarity(&test, &weight).unwrap();
        assert!(inf.adjusted_cosine <= inf.raw_cosine / 10.0 + 1e-12);
        assert!((inf.magnitude_factor - 0.1).abs() < 1e-12);
    }

    #[test]
    fn louder_signal_is_not_amplified() {
        let weight = vec![1.0, 1.0];
        let test = vec![50.0, 50.0];
        let inf = adjusted_similarity(&test, &weight).unwrap();
        assert_eq!(inf.magnitude_factor, 1.0);
        assert!((inf.adjusted_cosine - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sample_rate_mismatch_is_a_hard_error() {
        let m = model(vec![1.0, 0.0], 44_100);
        let f = FeatureVector::new(vec![1.0, 0.0], (0.0, 1.0));
        assert!(matches!(
            score_frame(&m, &[f], 48_000),
            Err(CoreError::SampleRateMismatch { model: 44_100, test: 48_000 })
        ));
    }

    #[test]
    fn score_frame_returns_one_similarity_per_vector() {
        let m = model(vec![1.0, 0.0], 44_100);
        let vectors = vec![
            FeatureVector::new(vec![1.0, 0.0], (0.0, 1.0)),
            FeatureVector::new(vec![0.0, 1.0], (0.0, 1.0)),
            FeatureVector::new(vec![-1.0, 0.0], (0.0, 1.0)),
        ];
        let sims = score_frame(&m, &vectors, 44_100).unwrap();
        assert_eq!(sims.len(), 3);
        assert!((sims[0] - 1.0).abs() < 1e-9);
        assert!(sims[1].abs() < 1e-9);
        assert!((sims[2] + 1.0).abs() < 1e-9);
        assert!(sims.iter().all(|s| (-1.0..=1.0).contains(s)));
    }
}
