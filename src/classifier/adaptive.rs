//! Online per-label classifier trained from user feedback.

use super::features::{ContentMetadata, FeatureExtractor, DEFAULT_FEATURE_DIM};
use super::model::LabelModel;
use crate::signal::FeedbackSignal;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_LEARNING_RATE: f64 = 0.01;
pub const DEFAULT_INIT_SCALE: f64 = 0.01;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Corrupt classifier state: {0}")]
    CorruptState(String),

    #[error("Failed to serialize classifier state: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Dimension of newly created label models.
    pub feature_dim: usize,
    /// Fixed SGD step size.
    pub learning_rate: f64,
    /// Width of the uniform range new weights are drawn from.
    pub init_scale: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            feature_dim: DEFAULT_FEATURE_DIM,
            learning_rate: DEFAULT_LEARNING_RATE,
            init_scale: DEFAULT_INIT_SCALE,
        }
    }
}

/// Persisted parameters of one label model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelModelState {
    pub label: String,
    pub weights: Vec<f64>,
    pub bias: f64,
}

fn default_init_scale() -> f64 {
    DEFAULT_INIT_SCALE
}

/// Full parameter state, as exported and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierState {
    pub per_label_models: Vec<LabelModelState>,
    pub feature_dim: usize,
    pub learning_rate: f64,
    #[serde(default = "default_init_scale")]
    pub init_scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelPrediction {
    pub label: String,
    pub confidence: f64,
}

/// One stored feedback action, ready to be replayed.
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub metadata: ContentMetadata,
    pub label: String,
    pub signal: FeedbackSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierStats {
    pub trained_labels: usize,
    pub feature_dim: usize,
    pub learning_rate: f64,
    pub labels: Vec<String>,
}

pub struct AdaptiveClassifier {
    config: ClassifierConfig,
    models: HashMap<String, LabelModel>,
    rng: StdRng,
}

impl AdaptiveClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            models: HashMap::new(),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Same as [`AdaptiveClassifier::new`] with a reproducible weight initialization.
    pub fn with_seed(config: ClassifierConfig, seed: u64) -> Self {
        Self {
            config,
            models: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn has_model(&self, label: &str) -> bool {
        self.models.contains_key(label)
    }

    /// One gradient step for `label` towards the target implied by `signal`.
    ///
    /// Steps that would leave a model with non-finite parameters are skipped
    /// and return `false`, so a stored model always serializes.
    pub fn train(&mut self, features: &[f64], label: &str, signal: FeedbackSignal) -> bool {
        if features.iter().any(|x| !x.is_finite()) {
            debug!("Ignoring feedback for {:?}: non-finite features", label);
            return false;
        }
        let mut model = match self.models.get(label) {
            Some(model) => model.clone(),
            None => {
                debug!("Creating model for label {:?}", label);
                let config = &self.config;
                LabelModel::new_random(config.feature_dim, config.init_scale, &mut self.rng)
            }
        };
        let before = model.sgd_step(features, signal.target(), self.config.learning_rate);
        if !model.is_finite() {
            debug!("Ignoring feedback for {:?}: update diverged", label);
            return false;
        }
        debug!(
            label = label,
            signal = signal.as_str(),
            prediction_before = before,
            "Trained label model"
        );
        self.models.insert(label.to_string(), model);
        true
    }

    /// Like [`AdaptiveClassifier::train`] with an unparsed signal.
    ///
    /// Unknown signals leave the classifier untouched and return `false`.
    pub fn train_raw(&mut self, features: &[f64], label: &str, signal: &str) -> bool {
        match signal.parse::<FeedbackSignal>() {
            Ok(signal) => self.train(features, label, signal),
            Err(err) => {
                debug!("Ignoring feedback for {:?}: {}", label, err);
                false
            }
        }
    }

    /// `None` when the label was never trained or the features give no usable
    /// confidence; callers should defer to the oracle.
    pub fn predict(&self, features: &[f64], label: &str) -> Option<f64> {
        self.models
            .get(label)
            .map(|model| model.predict(features))
            .filter(|confidence| confidence.is_finite())
            .map(|confidence| confidence.clamp(0.0, 1.0))
    }

    /// Predictions for every candidate that has a model, highest confidence first.
    ///
    /// Ties keep the candidates' order; repeated candidates are reported once.
    pub fn predict_all<I, S>(&self, features: &[f64], candidates: I) -> Vec<LabelPrediction>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut predictions: Vec<LabelPrediction> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let label = candidate.as_ref();
                if !seen.insert(label.to_string()) {
                    return None;
                }
                self.predict(features, label).map(|confidence| LabelPrediction {
                    label: label.to_string(),
                    confidence,
                })
            })
            .collect();
        predictions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        predictions
    }

    /// Replays stored feedback through [`AdaptiveClassifier::train`].
    ///
    /// SGD accumulates, so replaying the same batch twice moves the models twice.
    /// Returns the number of training steps taken.
    pub fn retrain_on_batch(
        &mut self,
        extractor: &dyn FeatureExtractor,
        examples: &[TrainingExample],
    ) -> usize {
        let mut cache: HashMap<(u64, u32, u16), Vec<f64>> = HashMap::new();
        for example in examples {
            let metadata = &example.metadata;
            let key = (
                metadata.duration_secs.to_bits(),
                metadata.sample_rate,
                metadata.channels,
            );
            let features = cache
                .entry(key)
                .or_insert_with(|| extractor.extract(metadata));
            self.train(features, &example.label, example.signal);
        }
        info!(
            "Replayed {} feedback events over {} distinct clips",
            examples.len(),
            cache.len()
        );
        examples.len()
    }

    pub fn reset(&mut self) {
        self.models.clear();
    }

    pub fn stats(&self) -> ClassifierStats {
        let mut labels: Vec<String> = self.models.keys().cloned().collect();
        labels.sort();
        ClassifierStats {
            trained_labels: labels.len(),
            feature_dim: self.config.feature_dim,
            learning_rate: self.config.learning_rate,
            labels,
        }
    }

    /// Snapshot of every label model, ordered by label.
    pub fn state(&self) -> ClassifierState {
        let mut per_label_models: Vec<LabelModelState> = self
            .models
            .iter()
            .map(|(label, model)| LabelModelState {
                label: label.clone(),
                weights: model.weights.clone(),
                bias: model.bias,
            })
            .collect();
        per_label_models.sort_by(|a, b| a.label.cmp(&b.label));
        ClassifierState {
            per_label_models,
            feature_dim: self.config.feature_dim,
            learning_rate: self.config.learning_rate,
            init_scale: self.config.init_scale,
        }
    }

    pub fn from_state(state: ClassifierState) -> Result<Self, ClassifierError> {
        if state.feature_dim == 0 {
            return Err(ClassifierError::CorruptState(
                "feature dimension is zero".to_string(),
            ));
        }
        if !state.learning_rate.is_finite() || state.learning_rate <= 0.0 {
            return Err(ClassifierError::CorruptState(format!(
                "invalid learning rate {}",
                state.learning_rate
            )));
        }
        if !state.init_scale.is_finite() || state.init_scale < 0.0 {
            return Err(ClassifierError::CorruptState(format!(
                "invalid init scale {}",
                state.init_scale
            )));
        }

        let mut models = HashMap::with_capacity(state.per_label_models.len());
        for entry in state.per_label_models {
            if entry.weights.len() != state.feature_dim {
                return Err(ClassifierError::CorruptState(format!(
                    "label {:?} has {} weights, expected {}",
                    entry.label,
                    entry.weights.len(),
                    state.feature_dim
                )));
            }
            if !entry.bias.is_finite() || entry.weights.iter().any(|w| !w.is_finite()) {
                return Err(ClassifierError::CorruptState(format!(
                    "label {:?} has non-finite parameters",
                    entry.label
                )));
            }
            let model = LabelModel {
                weights: entry.weights,
                bias: entry.bias,
            };
            if models.insert(entry.label.clone(), model).is_some() {
                return Err(ClassifierError::CorruptState(format!(
                    "label {:?} appears more than once",
                    entry.label
                )));
            }
        }

        Ok(Self {
            config: ClassifierConfig {
                feature_dim: state.feature_dim,
                learning_rate: state.learning_rate,
                init_scale: state.init_scale,
            },
            models,
            rng: StdRng::from_os_rng(),
        })
    }

    pub fn serialize(&self) -> Result<String, ClassifierError> {
        Ok(serde_json::to_string(&self.state())?)
    }

    pub fn deserialize(blob: &str) -> Result<Self, ClassifierError> {
        let state: ClassifierState = serde_json::from_str(blob)
            .map_err(|e| ClassifierError::CorruptState(e.to_string()))?;
        Self::from_state(state)
    }
}
