//! Single-model and multiclass diagnosis, plus the per-session scorer that
//! turns a stream of feature vectors into smoothed updates and one final result.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ScoringConfig;
use crate::error::{CoreError, Result};
use crate::events::ScoreUpdate;
use crate::gmia::{infer, Inference};
use crate::model::{
    now_unix_ms, DiagnosisMetadata, DiagnosisResult, FeatureVector, GmiaModel, HealthStatus,
    ModelType, UNKNOWN_LABEL,
};
use crate::scoring::{analysis_hint, calculate_confidence, calculate_health_score, classify_status};
use crate::smoothing::{LabelHistory, ScoreHistory};
use crate::stats;

/// Outcome of evaluating one vector against several trained states.
#[derive(Debug, Clone, PartialEq)]
pub struct MulticlassMatch {
    /// Winning model's index in the input, if any model was usable and
    /// the best score cleared the uncertainty threshold.
    pub matched: Option<usize>,
    pub label: String,
    pub status: HealthStatus,
    pub score: f64,
    pub inference: Option<Inference>,
    pub models_evaluated: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosisEngine {
    config: ScoringConfig,
}

impl DiagnosisEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one vector against every model and pick the best state.
    /// A sample-rate or dimension mismatch against any model is an error.
    /// If no model yields a finite score, or the best score is below the
    /// uncertainty threshold, the result is `UNKNOWN`.
    pub fn evaluate_multiclass(
        &self,
        models: &[GmiaModel],
        features: &FeatureVector,
        test_sample_rate: u32,
    ) -> Result<MulticlassMatch> {
        if models.is_empty() {
            return Err(CoreError::NoModels);
        }

        let mut best: Option<(usize, f64, Inference)> = None;
        let mut evaluated = 0usize;
        for (idx, model) in models.iter().enumerate() {
            let inference = infer(model, features, test_sample_rate)?;
            evaluated += 1;
            let score = calculate_health_score(inference.adjusted_cosine, model.scaling_constant);
            if !score.is_finite() {
                warn!(label = %model.label, "non-finite multiclass score ignored");
                continue;
            }
            debug!(label = %model.label, score, "multiclass_candidate");
            // Strict comparison keeps the first model on ties.
            if best.map_or(true, |(_, s, _)| score > s) {
                best = Some((idx, score, inference));
            }
        }

        let Some((idx, score, inference)) = best else {
            return Ok(MulticlassMatch {
                matched: None,
                label: UNKNOWN_LABEL.to_string(),
                status: HealthStatus::Uncertain,
                score: 0.0,
                inference: None,
                models_evaluated: evaluated,
            });
        };

        if score < self.config.multiclass_uncertainty_threshold {
            return Ok(MulticlassMatch {
                matched: None,
                label: UNKNOWN_LABEL.to_string(),
                status: HealthStatus::Uncertain,
                score,
                inference: Some(inference),
                models_evaluated: evaluated,
            });
        }

        let winner = &models[idx];
        Ok(MulticlassMatch {
            matched: Some(idx),
            label: winner.label.clone(),
            status: status_for_type(winner.model_type),
            score,
            inference: Some(inference),
            models_evaluated: evaluated,
        })
    }

    pub fn diagnose_multiclass(
        &self,
        machine_id: &str,
        models: &[GmiaModel],
        features: &FeatureVector,
        test_sample_rate: u32,
    ) -> Result<DiagnosisResult> {
        let m = self.evaluate_multiclass(models, features, test_sample_rate)?;
        let now = now_unix_ms();
        let (confidence, raw_cos) = match (&m.inference, m.matched) {
            (Some(inf), Some(idx)) => (
                calculate_confidence(&[inf.adjusted_cosine], models[idx].age_days(now)),
                inf.raw_cosine,
            ),
            (Some(inf), None) => (0.0, inf.raw_cosine),
            _ => (0.0, 0.0),
        };
        Ok(build_result(
            machine_id,
            m.score,
            m.status,
            confidence,
            raw_cos,
            Some(m.label.as_str()),
            m.models_evaluated,
            m.inference.as_ref(),
        ))
    }

    /// Diagnose against a single reference using every vector of a recording.
    pub fn diagnose(
        &self,
        machine_id: &str,
        model: &GmiaModel,
        features: &[FeatureVector],
        test_sample_rate: u32,
    ) -> Result<DiagnosisResult> {
        if features.is_empty() {
            return Err(CoreError::EmptyFeatureSet);
        }
        let inferences = features
            .iter()
            .map(|f| infer(model, f, test_sample_rate))
            .collect::<Result<Vec<_>>>()?;
        let summary = summarize(&inferences);
        let score = calculate_health_score(summary.adjusted_cosine, model.scaling_constant);
        let status = classify_status(score, &self.config);
        let adjusted: Vec<f64> = inferences.iter().map(|i| i.adjusted_cosine).collect();
        let confidence = calculate_confidence(&adjusted, model.age_days(now_unix_ms()));
        Ok(build_result(
            machine_id,
            score,
            status,
            confidence,
            summary.raw_cosine,
            None,
            1,
            Some(&summary),
        ))
    }
}

fn status_for_type(t: ModelType) -> HealthStatus {
    match t {
        ModelType::Healthy => HealthStatus::Healthy,
        ModelType::Faulty => HealthStatus::Faulty,
    }
}

/// Component-wise mean of several inferences.
fn summarize(inferences: &[Inference]) -> Inference {
    let pick = |f: fn(&Inference) -> f64| -> f64 {
        stats::mean(&inferences.iter().map(f).collect::<Vec<_>>())
    };
    Inference {
        raw_cosine: pick(|i| i.raw_cosine).clamp(-1.0, 1.0),
        magnitude_factor: pick(|i| i.magnitude_factor),
        adjusted_cosine: pick(|i| i.adjusted_cosine).clamp(-1.0, 1.0),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_result(
    machine_id: &str,
    score: f64,
    status: HealthStatus,
    confidence: f64,
    raw_cosine: f64,
    detected_state: Option<&str>,
    models_evaluated: usize,
    inference: Option<&Inference>,
) -> DiagnosisResult {
    DiagnosisResult {
        id: uuid::Uuid::new_v4().to_string(),
        machine_id: machine_id.to_string(),
        timestamp: now_unix_ms(),
        health_score: score.clamp(0.0, 100.0),
        status,
        confidence: confidence.clamp(0.0, 100.0),
        raw_cosine_similarity: raw_cosine.clamp(-1.0, 1.0),
        metadata: Some(DiagnosisMetadata {
            detected_state: detected_state.map(str::to_string),
            models_evaluated,
        }),
        analysis_hint: analysis_hint(status, detected_state, inference),
    }
}

/// Live scoring state for one session. Owned by the consumer.
pub struct SessionScorer {
    engine: DiagnosisEngine,
    models: Arc<Vec<GmiaModel>>,
    sample_rate: u32,
    scores: ScoreHistory,
    labels: LabelHistory,
    inferences: Vec<Inference>,
}

impl SessionScorer {
    pub fn new(engine: DiagnosisEngine, models: Arc<Vec<GmiaModel>>, sample_rate: u32) -> Result<Self> {
        if models.is_empty() {
            return Err(CoreError::NoModels);
        }
        Ok(Self {
            engine,
            models,
            sample_rate,
            scores: ScoreHistory::new(),
            labels: LabelHistory::new(),
            inferences: Vec::new(),
        })
    }

    pub fn is_multiclass(&self) -> bool {
        self.models.len() > 1
    }

    pub fn frames_scored(&self) -> usize {
        self.inferences.len()
    }

    pub fn clear(&mut self) {
        self.scores.clear();
        self.labels.clear();
        self.inferences.clear();
    }

    /// Score one frame and return the smoothed update.
    pub fn score(&mut self, features: &FeatureVector) -> Result<ScoreUpdate> {
        if self.is_multiclass() {
            let m = self
                .engine
                .evaluate_multiclass(&self.models, features, self.sample_rate)?;
            if let Some(inf) = m.inference {
                self.inferences.push(inf);
            }
            self.scores.push(m.score);
            self.labels.push(m.label.clone());
            let label = self.labels.majority();
            let filtered = self.scores.filtered().unwrap_or(0.0);
            Ok(ScoreUpdate {
                raw_score: m.score,
                filtered_score: filtered,
                status: self.multiclass_status(&label, filtered),
                raw_cosine: m.inference.map_or(0.0, |i| i.raw_cosine),
                label: Some(label),
            })
        } else {
            let model = &self.models[0];
            let inf = infer(model, features, self.sample_rate)?;
            let raw = calculate_health_score(inf.adjusted_cosine, model.scaling_constant);
            self.inferences.push(inf);
            self.scores.push(raw);
            let filtered = self.scores.filtered().unwrap_or(raw);
            Ok(ScoreUpdate {
                raw_score: raw,
                filtered_score: filtered,
                status: classify_status(filtered, self.engine.config()),
                raw_cosine: inf.raw_cosine,
                label: None,
            })
        }
    }

    fn multiclass_status(&self, label: &str, filtered: f64) -> HealthStatus {
        if label == UNKNOWN_LABEL || filtered < self.engine.config().multiclass_uncertainty_threshold {
            return HealthStatus::Uncertain;
        }
        self.models
            .iter()
            .find(|m| m.label == label)
            .map_or(HealthStatus::Uncertain, |m| status_for_type(m.model_type))
    }

    /// Final result for the session, or `None` if nothing was scored.
    pub fn finish(&self, machine_id: &str) -> Option<DiagnosisResult> {
        if self.scores.is_empty() {
            return None;
        }
        let filtered = self.scores.filtered().unwrap_or(0.0);
        let now = now_unix_ms();
        let adjusted: Vec<f64> = self.inferences.iter().map(|i| i.adjusted_cosine).collect();
        let summary = if self.inferences.is_empty() {
            None
        } else {
            Some(summarize(&self.inferences))
        };
        let raw_cos = summary.map_or(0.0, |s| s.raw_cosine);

        if self.is_multiclass() {
            let label = self.labels.majority();
            let status = self.multiclass_status(&label, filtered);
            let age = self
                .models
                .iter()
                .find(|m| m.label == label)
                .map_or(0.0, |m| m.age_days(now));
            let confidence = if status == HealthStatus::Uncertain {
                0.0
            } else {
                calculate_confidence(&adjusted, age)
            };
            Some(build_result(
                machine_id,
                filtered,
                status,
                confidence,
                raw_cos,
                Some(label.as_str()),
                self.models.len(),
                summary.as_ref(),
            ))
        } else {
            let model = &self.models[0];
            let status = classify_status(filtered, self.engine.config());
            Some(build_result(
                machine_id,
                filtered,
                status,
                calculate_confidence(&adjusted, model.age_days(now)),
                raw_cos,
                None,
                1,
                summary.as_ref(),
            ))
        }
    }
}
