//! Similarity → health score mapping, status classification, and confidence.

use crate::config::ScoringConfig;
use crate::gmia::Inference;
use crate::model::HealthStatus;
use crate::stats;

/// Lower bound used when solving for the scaling constant.
const MIN_MEAN_COSINE: f64 = 1e-3;
const MAX_SCALING_CONSTANT: f64 = 1e4;
const MIN_SCALING_CONSTANT: f64 = 1e-6;

/// Model-age decay reaches its floor after this many days.
const AGE_HORIZON_DAYS: f64 = 365.0;
const AGE_FACTOR_FLOOR: f64 = 0.7;

/// `100 · tanh(C · max(0, cos))²`, clamped to [0, 100]. Non-finite input scores 0.
pub fn calculate_health_score(cosine: f64, scaling_constant: f64) -> f64 {
    let x = scaling_constant * cosine.clamp(-1.0, 1.0).max(0.0);
    let score = 100.0 * x.tanh().powi(2);
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Solve `100 · tanh(C · mean_cos)² = 100 · target` for `C`, kept positive and finite.
pub fn scaling_constant_for(mean_cos: f64, target_score: f64) -> f64 {
    let target = target_score.clamp(1e-6, 1.0 - 1e-9);
    let mean_cos = if mean_cos.is_finite() {
        mean_cos.max(MIN_MEAN_COSINE)
    } else {
        MIN_MEAN_COSINE
    };
    let c = target.sqrt().atanh() / mean_cos;
    if c.is_finite() {
        c.clamp(MIN_SCALING_CONSTANT, MAX_SCALING_CONSTANT)
    } else {
        MAX_SCALING_CONSTANT
    }
}

pub fn classify_status(score: f64, config: &ScoringConfig) -> HealthStatus {
    if score >= config.healthy_threshold {
        HealthStatus::Healthy
    } else if score >= config.uncertain_threshold {
        HealthStatus::Uncertain
    } else {
        HealthStatus::Faulty
    }
}

/// `max(0.7, 1 − 0.3 · age / 365 days)`.
pub fn age_factor(age_days: f64) -> f64 {
    let age = if age_days.is_finite() { age_days.max(0.0) } else { AGE_HORIZON_DAYS };
    (1.0 - (1.0 - AGE_FACTOR_FLOOR) * age / AGE_HORIZON_DAYS).max(AGE_FACTOR_FLOOR)
}

/// Confidence in percent from mean similarity, consistency across the
/// similarities, and model age.
pub fn calculate_confidence(similarities: &[f64], model_age_days: f64) -> f64 {
    if similarities.is_empty() {
        return 0.0;
    }
    let mean = stats::mean(similarities);
    let var = stats::variance(similarities, mean);
    let consistency = 1.0 / (1.0 + 10.0 * var.sqrt());
    let confidence = 100.0 * mean.clamp(0.0, 1.0) * consistency * age_factor(model_age_days);
    if confidence.is_finite() {
        confidence.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Short operator-facing explanation of a result.
pub fn analysis_hint(status: HealthStatus, detected_state: Option<&str>, inference: Option<&Inference>) -> String {
    if let Some(inf) = inference {
        if inf.magnitude_factor < 0.5 {
            return format!(
                "Signal is much quieter than the reference ({:.0}% of reference energy); check microphone placement",
                inf.magnitude_factor * 100.0
            );
        }
    }
    match (status, detected_state) {
        (HealthStatus::Healthy, Some(label)) => format!("Sound matches the trained state \"{label}\""),
        (HealthStatus::Healthy, None) => "Sound matches the healthy reference".to_string(),
        (HealthStatus::Uncertain, Some(label)) if label != crate::model::UNKNOWN_LABEL => {
            format!("Partial match to \"{label}\"; repeat the measurement")
        }
        (HealthStatus::Uncertain, _) => {
            "No trained state matches well; the sound may be a new condition".to_string()
        }
        (HealthStatus::Faulty, Some(label)) => format!("Sound matches the fault state \"{label}\""),
        (HealthStatus::Faulty, None) => "Sound deviates strongly from the healthy reference".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_stays_in_range_for_all_inputs() {
        for c in [1e-6, 0.1, 1.0, 1.818, 10.0, 1e4] {
            let mut cos = -1.0;
            while cos <= 1.0 {
                let s = calculate_health_score(cos, c);
                assert!((0.0..=100.0).contains(&s), "cos {cos} c {c} → {s}");
                cos += 0.01;
            }
        }
        assert_eq!(calculate_health_score(f64::NAN, 2.0), 0.0);
    }

    #[test]
    fn negative_cosine_scores_zero() {
        assert_eq!(calculate_health_score(-0.8, 3.0), 0.0);
    }

    #[test]
    fn scaling_constant_hits_target() {
        for mean in [0.3, 0.75, 0.95, 1.0] {
            let c = scaling_constant_for(mean, 0.9);
            assert!((calculate_health_score(mean, c) - 90.0).abs() < 1e-9);
        }
    }

    #[test]
    fn scaling_constant_is_finite_for_degenerate_means() {
        for mean in [0.0, -0.5, f64::NAN, 1e-12] {
            let c = scaling_constant_for(mean, 0.9);
            assert!(c > 0.0 && c.is_finite());
        }
    }

    #[test]
    fn status_boundaries() {
        let cfg = ScoringConfig::default();
        assert_eq!(classify_status(75.0, &cfg), HealthStatus::Healthy);
        assert_eq!(classify_status(74.99, &cfg), HealthStatus::Uncertain);
        assert_eq!(classify_status(50.0, &cfg), HealthStatus::Uncertain);
        assert_eq!(classify_status(49.99, &cfg), HealthStatus::Faulty);
    }

    #[test]
    fn age_factor_decays_to_floor() {
        assert_eq!(age_factor(0.0), 1.0);
        assert!((age_factor(182.5) - 0.85).abs() < 1e-9);
        assert_eq!(age_factor(365.0), 0.7);
        assert_eq!(age_factor(2000.0), 0.7);
    }

    #[test]
    fn consistent_similarities_are_more_confident() {
        let steady = calculate_confidence(&[0.9, 0.9, 0.9, 0.9], 0.0);
        let jumpy = calculate_confidence(&[0.5, 1.0, 0.8, 1.0], 0.0);
        assert!((steady - 90.0).abs() < 1e-9);
        assert!(jumpy < steady);
        assert_eq!(calculate_confidence(&[], 0.0), 0.0);
    }

    #[test]
    fn quiet_signal_hint_takes_precedence() {
        let inf = Inference {
            raw_cosine: 0.99,
            magnitude_factor: 0.1,
            adjusted_cosine: 0.099,
        };
        assert!(analysis_hint(HealthStatus::Faulty, None, Some(&inf)).contains("quieter"));
    }
}
