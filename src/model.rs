//! Core data types: feature vectors, training data, trained models, diagnosis results.

use serde::{Deserialize, Serialize};

use crate::config::DspConfig;
use crate::error::{CoreError, Result};

/// Label reported when no trained state matches.
pub const UNKNOWN_LABEL: &str = "UNKNOWN";

/// Ridge regularization strength used for every trained model.
pub const REGULARIZATION: f64 = 1e9;

/// One spectral feature vector. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f64>,
    low_hz: f64,
    high_hz: f64,
}

impl FeatureVector {
    /// Build a vector; non-finite entries are replaced with 0.
    pub fn new(mut values: Vec<f64>, frequency_range: (f64, f64)) -> Self {
        for v in values.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        Self {
            values,
            low_hz: frequency_range.0,
            high_hz: frequency_range.1,
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn bins(&self) -> usize {
        self.values.len()
    }

    pub fn frequency_range(&self) -> (f64, f64) {
        (self.low_hz, self.high_hz)
    }

    pub fn norm(&self) -> f64 {
        l2_norm(&self.values)
    }
}

/// Feature vectors captured from one reference recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingData {
    pub machine_id: String,
    pub config: DspConfig,
    pub features: Vec<FeatureVector>,
}

impl TrainingData {
    pub fn new(machine_id: impl Into<String>, config: DspConfig, features: Vec<FeatureVector>) -> Self {
        Self {
            machine_id: machine_id.into(),
            config,
            features,
        }
    }

    /// Common dimension of all vectors. Fails on an empty set or ragged vectors.
    pub fn feature_dimension(&self) -> Result<usize> {
        let first = self.features.first().ok_or(CoreError::EmptyFeatureSet)?;
        let dim = first.bins();
        if let Some(bad) = self.features.iter().find(|f| f.bins() != dim) {
            return Err(CoreError::DimensionMismatch {
                expected: dim,
                actual: bad.bins(),
            });
        }
        Ok(dim)
    }

    /// Recording length implied by the vector count and hop size, in seconds.
    pub fn duration_s(&self) -> f64 {
        if self.features.is_empty() {
            return 0.0;
        }
        self.config.window_size_s + (self.features.len() - 1) as f64 * self.config.hop_size_s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Healthy,
    Faulty,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::Healthy => write!(f, "healthy"),
            ModelType::Faulty => write!(f, "faulty"),
        }
    }
}

/// Training-set statistics kept alongside the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub mean_cosine_similarity: f64,
    pub std_cosine_similarity: f64,
    pub target_score: f64,
}

impl ModelMetadata {
    /// Whether the reference recording was stable enough to trust.
    pub fn is_consistent(&self) -> bool {
        self.mean_cosine_similarity >= 0.8 && self.std_cosine_similarity <= 0.1
    }
}

/// A trained model for exactly one labeled operating state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmiaModel {
    pub weight_vector: Vec<f64>,
    pub regularization: f64,
    pub scaling_constant: f64,
    pub feature_dimension: usize,
    pub sample_rate: u32,
    /// Unix milliseconds.
    pub training_date: i64,
    /// Seconds of reference audio.
    pub training_duration: f64,
    pub label: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    pub metadata: Option<ModelMetadata>,
}

impl GmiaModel {
    /// Age of the model in days at `now_ms`. Never negative.
    pub fn age_days(&self, now_ms: i64) -> f64 {
        (now_ms.saturating_sub(self.training_date) as f64 / 86_400_000.0).max(0.0)
    }
}

/// Model record as persisted. Older records carry only the weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "format_version")]
pub enum StoredModel {
    #[serde(rename = "1")]
    V1 {
        weight_vector: Vec<f64>,
        scaling_constant: f64,
        sample_rate: u32,
        training_date: i64,
    },
    #[serde(rename = "2")]
    V2(GmiaModel),
}

impl StoredModel {
    /// Decode into the current model shape. Legacy records become a healthy
    /// baseline labelled "Baseline".
    pub fn into_current(self) -> GmiaModel {
        match self {
            StoredModel::V1 {
                weight_vector,
                scaling_constant,
                sample_rate,
                training_date,
            } => GmiaModel {
                feature_dimension: weight_vector.len(),
                weight_vector,
                regularization: REGULARIZATION,
                scaling_constant,
                sample_rate,
                training_date,
                training_duration: 0.0,
                label: "Baseline".to_string(),
                model_type: ModelType::Healthy,
                metadata: None,
            },
            StoredModel::V2(model) => model,
        }
    }
}

impl From<GmiaModel> for StoredModel {
    fn from(model: GmiaModel) -> Self {
        StoredModel::V2(model)
    }
}

/// A machine and the models trained for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub name: Option<String>,
    pub models: Vec<StoredModel>,
}

impl Machine {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            models: Vec::new(),
        }
    }

    pub fn current_models(&self) -> Vec<GmiaModel> {
        self.models.iter().cloned().map(StoredModel::into_current).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Uncertain,
    Faulty,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Uncertain => write!(f, "uncertain"),
            HealthStatus::Faulty => write!(f, "faulty"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisMetadata {
    pub detected_state: Option<String>,
    pub models_evaluated: usize,
}

/// One completed diagnosis. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub id: String,
    pub machine_id: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub health_score: f64,
    pub status: HealthStatus,
    pub confidence: f64,
    pub raw_cosine_similarity: f64,
    pub metadata: Option<DiagnosisMetadata>,
    pub analysis_hint: String,
}

pub(crate) fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Current time as Unix milliseconds.
pub(crate) fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_feature_values_are_zeroed() {
        let f = FeatureVector::new(vec![1.0, f64::NAN, f64::INFINITY], (20.0, 200.0));
        assert_eq!(f.values(), &[1.0, 0.0, 0.0]);
        assert_eq!(f.bins(), 3);
    }

    #[test]
    fn empty_training_data_has_no_dimension() {
        let data = TrainingData::new("m1", DspConfig::default(), Vec::new());
        assert!(matches!(data.feature_dimension(), Err(CoreError::EmptyFeatureSet)));
    }

    #[test]
    fn ragged_training_data_rejected() {
        let data = TrainingData::new(
            "m1",
            DspConfig::default(),
            vec![
                FeatureVector::new(vec![1.0; 4], (0.0, 1.0)),
                FeatureVector::new(vec![1.0; 5], (0.0, 1.0)),
            ],
        );
        assert!(matches!(
            data.feature_dimension(),
            Err(CoreError::DimensionMismatch { expected: 4, actual: 5 })
        ));
    }

    #[test]
    fn legacy_record_decodes_to_healthy_baseline() {
        let json = r#"{"format_version":"1","weight_vector":[0.6,0.8],"scaling_constant":2.0,"sample_rate":44100,"training_date":0}"#;
        let stored: StoredModel = serde_json::from_str(json).unwrap();
        let model = stored.into_current();
        assert_eq!(model.feature_dimension, 2);
        assert_eq!(model.model_type, ModelType::Healthy);
        assert_eq!(model.label, "Baseline");
        assert_eq!(model.regularization, REGULARIZATION);
    }

    #[test]
    fn current_record_round_trips_through_tag() {
        let model = GmiaModel {
            weight_vector: vec![1.0, 0.0],
            regularization: REGULARIZATION,
            scaling_constant: 1.5,
            feature_dimension: 2,
            sample_rate: 48_000,
            training_date: 10,
            training_duration: 3.0,
            label: "Overload".into(),
            model_type: ModelType::Faulty,
            metadata: None,
        };
        let json = serde_json::to_string(&StoredModel::from(model.clone())).unwrap();
        assert!(json.contains("\"format_version\":\"2\""));
        let back: StoredModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_current(), model);
    }

    #[test]
    fn age_days_survives_extreme_training_dates() {
        let mut model = GmiaModel {
            weight_vector: vec![1.0],
            regularization: REGULARIZATION,
            scaling_constant: 1.0,
            feature_dimension: 1,
            sample_rate: 44_100,
            training_date: i64::MIN,
            training_duration: 1.0,
            label: "Baseline".into(),
            model_type: ModelType::Healthy,
            metadata: None,
        };
        let far_past = model.age_days(1_700_000_000_000);
        assert!(far_past.is_finite() && far_past > 0.0);

        model.training_date = i64::MAX;
        assert_eq!(model.age_days(i64::MIN), 0.0);

        model.training_date = 1_700_000_000_000;
        assert_eq!(model.age_days(1_700_000_000_000 + 2 * 86_400_000), 2.0);
    }
}
