use tracing::{debug, info};

use super::inference::adjusted_similarity;
use crate::error::Result;
use crate::model::{
    l2_norm, now_unix_ms, GmiaModel, ModelMetadata, ModelType, TrainingData, REGULARIZATION,
};
use crate::scoring::scaling_constant_for;
use crate::stats::{mean, variance};

/// The reference's own mean similarity maps to this fraction of 100.
pub const DEFAULT_TARGET_SCORE: f64 = 0.9;

/// Train a model for one labeled operating state.
pub fn train_model(data: &TrainingData, label: &str, model_type: ModelType) -> Result<GmiaModel> {
    train_model_with_target(data, label, model_type, DEFAULT_TARGET_SCORE)
}

pub fn train_model_with_target(
    data: &TrainingData,
    label: &str,
    model_type: ModelType,
    target_score: f64,
) -> Result<GmiaModel> {
    let dim = data.feature_dimension()?;
    let rows: Vec<&[f64]> = data.features.iter().map(|f| f.values()).collect();

    let solution = ridge_direction(&rows, dim, REGULARIZATION);
    let weight_vector = normalize_to_reference(solution, &rows, dim);

    let similarities = rows
        .iter()
        .map(|r| adjusted_similarity(r, &weight_vector).map(|i| i.adjusted_cosine))
        .collect::<Result<Vec<f64>>>()?;
    let mean_cos = mean(&similarities);
    let std_cos = variance(&similarities, mean_cos).sqrt();
    let scaling_constant = scaling_constant_for(mean_cos, target_score);

    info!(
        machine_id = %data.machine_id,
        label,
        vectors = rows.len(),
        dim,
        mean_cos,
        scaling_constant,
        "model_trained"
    );

    Ok(GmiaModel {
        weight_vector,
        regularization: REGULARIZATION,
        scaling_constant,
        feature_dimension: dim,
        sample_rate: data.config.sample_rate,
        training_date: now_unix_ms(),
        training_duration: data.duration_s(),
        label: label.to_string(),
        model_type,
        metadata: Some(ModelMetadata {
            mean_cosine_similarity: mean_cos,
            std_cosine_similarity: std_cos,
            target_score,
        }),
    })
}

/// Ridge solution for `Xw ≈ 1`. Uses whichever of the dual (N×N) or primal
/// (D×D) systems is smaller; both give the same `w`.
fn ridge_direction(rows: &[&[f64]], dim: usize, lambda: f64) -> Vec<f64> {
    let n = rows.len();
    if n <= dim {
        // (X Xᵀ + λI) α = 1, w = Xᵀ α
        let mut gram = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..=i {
                let d = dot(rows[i], rows[j]);
                gram[i * n + j] = d;
                gram[j * n + i] = d;
            }
            gram[i * n + i] += lambda;
        }
        let alpha = solve_spd(gram, vec![1.0; n], n);
        let mut w = vec![0.0; dim];
        for (a, row) in alpha.iter().zip(rows) {
            for (wk, xk) in w.iter_mut().zip(row.iter()) {
                *wk += a * xk;
            }
        }
        w
    } else {
        // (Xᵀ X + λI) w = Xᵀ 1
        let mut cov = vec![0.0; dim * dim];
        let mut rhs = vec![0.0; dim];
        for row in rows {
            for a in 0..dim {
                rhs[a] += row[a];
                for b in 0..=a {
                    cov[a * dim + b] += row[a] * row[b];
                }
            }
        }
        for a in 0..dim {
            for b in 0..a {
                cov[b * dim + a] = cov[a * dim + b];
            }
            cov[a * dim + a] += lambda;
        }
        solve_spd(cov, rhs, dim)
    }
}

/// Unit direction of `w`, rescaled to the mean norm of the training vectors so
/// the magnitude factor compares test energy with reference energy.
/// Falls back to the mean vector, then to a uniform direction, when degenerate.
fn normalize_to_reference(w: Vec<f64>, rows: &[&[f64]], dim: usize) -> Vec<f64> {
    let mean_norm = rows.iter().map(|r| l2_norm(r)).sum::<f64>() / rows.len() as f64;
    let reference = if mean_norm > 0.0 && mean_norm.is_finite() {
        mean_norm
    } else {
        1.0
    };

    let direction = unit(w).or_else(|| {
        debug!("ridge solution degenerate, falling back to mean vector");
        let mut m = vec![0.0; dim];
        for row in rows {
            for (mk, xk) in m.iter_mut().zip(row.iter()) {
                *mk += xk;
            }
        }
        unit(m)
    });
    let direction = direction.unwrap_or_else(|| vec![1.0 / (dim as f64).sqrt(); dim]);
    direction.into_iter().map(|x| x * reference).collect()
}

fn unit(v: Vec<f64>) -> Option<Vec<f64>> {
    let n = l2_norm(&v);
    if !(n > 1e-300) || !n.is_finite() {
        return None;
    }
    Some(v.into_iter().map(|x| x / n).collect())
}

/// Cholesky solve of a symmetric positive-definite system (row-major `a`).
/// The λ = 1e9 diagonal keeps every pivot positive.
fn solve_spd(mut a: Vec<f64>, mut b: Vec<f64>, n: usize) -> Vec<f64> {
    for j in 0..n {
        let mut d = a[j * n + j];
        for k in 0..j {
            d -= a[j * n + k] * a[j * n + k];
        }
        let d = d.max(f64::MIN_POSITIVE).sqrt();
        a[j * n + j] = d;
        for i in (j + 1)..n {
            let mut s = a[i * n + j];
            for k in 0..j {
                s -= a[i * n + k] * a[j * n + k];
            }
            a[i * n + j] = s / d;
        }
    }
    // L y = b
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= a[i * n + k] * b[k];
        }
        b[i] = s / a[i * n + i];
    }
    // Lᵀ x = y
    for i in (0..n).rev() {
        let mut s = b[i];
        for k in (i + 1)..n {
            s -= a[k * n + i] * b[k];
        }
        b[i] = s / a[i * n + i];
    }
    b
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DspConfig;
    use crate::error::CoreError;
    use crate::gmia::cosine_similarity;
    use crate::model::FeatureVector;
    use crate::scoring::calculate_health_score;

    fn data(rows: Vec<Vec<f64>>) -> TrainingData {
        TrainingData::new(
            "m1",
            DspConfig::default(),
            rows.into_iter()
                .map(|r| FeatureVector::new(r, (20.0, 20_000.0)))
                .collect(),
        )
    }

    fn noisy_rows(n: usize, dim: usize) -> Vec<Vec<f64>> {
        let mut seed = 12345u64;
        (0..n)
            .map(|_| {
                (0..dim)
                    .map(|k| {
                        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                        let jitter = (seed >> 33) as f64 / (1u64 << 31) as f64;
                        1.0 / (1.0 + k as f64) + 0.05 * jitter
                    })
                    .collect()
            })
            .collect()
    }

    fn assert_well_formed(m: &GmiaModel, dim: usize) {
        assert_eq!(m.weight_vector.len(), dim);
        assert_eq!(m.feature_dimension, dim);
        assert!(m.scaling_constant > 0.0 && m.scaling_constant.is_finite());
        assert!(m.weight_vector.iter().all(|w| w.is_finite()));
    }

    #[test]
    fn empty_training_set_fails() {
        let err = train_model(&data(Vec::new()), "Idle", ModelType::Healthy).unwrap_err();
        assert!(matches!(err, CoreError::EmptyFeatureSet));
        assert_eq!(err.to_string(), "empty feature set");
    }

    #[test]
    fn identical_vectors_train_stably() {
        let m = train_model(&data(vec![vec![0.5; 64]; 20]), "Idle", ModelType::Healthy).unwrap();
        assert_well_formed(&m, 64);
    }

    #[test]
    fn near_zero_vectors_train_stably() {
        let m = train_model(&data(vec![vec![1e-12; 32]; 5]), "Idle", ModelType::Healthy).unwrap();
        assert_well_formed(&m, 32);
    }

    #[test]
    fn all_zero_vectors_train_stably() {
        let m = train_model(&data(vec![vec![0.0; 16]; 3]), "Idle", ModelType::Healthy).unwrap();
        assert_well_formed(&m, 16);
    }

    #[test]
    fn single_vector_is_enough() {
        let m = train_model(&data(vec![vec![1.0, 2.0, 3.0]]), "Idle", ModelType::Healthy).unwrap();
        assert_well_formed(&m, 3);
        assert!((m.metadata.unwrap().mean_cosine_similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dual_and_primal_paths_agree_in_direction() {
        let rows = noisy_rows(12, 8);
        let refs: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();
        let primal = ridge_direction(&refs, 8, REGULARIZATION);
        let dual = ridge_direction(&refs[..8], 8, REGULARIZATION);
        // Both are dominated by the row sum; directions stay close.
        assert!(cosine_similarity(&primal, &dual).unwrap() > 0.999);
    }

    #[test]
    fn reference_scores_itself_at_target() {
        let d = data(noisy_rows(40, 24));
        let m = train_model(&d, "Idle", ModelType::Healthy).unwrap();
        let meta = m.metadata.clone().unwrap();
        let score = calculate_health_score(meta.mean_cosine_similarity, m.scaling_constant);
        assert!((score - 90.0).abs() < 1e-6, "score {score}");
        assert!(meta.is_consistent());
    }

    #[test]
    fn weight_norm_tracks_training_energy() {
        let rows: Vec<Vec<f64>> = noisy_rows(10, 16)
            .into_iter()
            .map(|r| r.into_iter().map(|x| x * 4.0).collect())
            .collect();
        let mean_norm = rows.iter().map(|r| l2_norm(r)).sum::<f64>() / rows.len() as f64;
        let m = train_model(&data(rows), "Idle", ModelType::Healthy).unwrap();
        assert!((l2_norm(&m.weight_vector) - mean_norm).abs() < 1e-9);
    }

    #[test]
    fn cholesky_solves_small_system() {
        // [[4, 2], [2, 3]] x = [2, 1] → x = [0.5, 0]
        let x = solve_spd(vec![4.0, 2.0, 2.0, 3.0], vec![2.0, 1.0], 2);
        assert!((x[0] - 0.5).abs() < 1e-12);
        assert!(x[1].abs() < 1e-12);
    }
}
