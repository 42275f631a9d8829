//! Merges oracle scores with learned predictions into the final tag list.

use crate::classifier::LabelPrediction;
use crate::oracle::LabelScore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_ADMISSION_THRESHOLD: f64 = 0.6;
pub const DEFAULT_MAX_RESULTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagSource {
    Oracle,
    Learned,
    Blended,
    /// Added by the user, not predicted.
    Custom,
}

impl TagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagSource::Oracle => "oracle",
            TagSource::Learned => "learned",
            TagSource::Blended => "blended",
            TagSource::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagCandidate {
    pub label: String,
    pub confidence: f64,
    pub source: TagSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlendConfig {
    /// A learned-only label must score strictly above this to be shown.
    pub admission_threshold: f64,
    pub max_results: usize,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            admission_threshold: DEFAULT_ADMISSION_THRESHOLD,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// Oracle results seed the list. A learned prediction for a label the oracle
/// already returned replaces its confidence with the mean of both; any other
/// learned prediction is admitted only above the threshold. The result is
/// sorted by confidence (stable) and truncated to `max_results`. Non-finite
/// scores from either side are ignored.
pub fn blend(
    oracle: &[LabelScore],
    learned: &[LabelPrediction],
    config: &BlendConfig,
) -> Vec<TagCandidate> {
    let mut candidates: Vec<TagCandidate> = Vec::with_capacity(oracle.len() + learned.len());
    let mut index_by_label: HashMap<&str, usize> = HashMap::new();

    for result in oracle {
        if !result.score.is_finite() || index_by_label.contains_key(result.label.as_str()) {
            continue;
        }
        index_by_label.insert(&result.label, candidates.len());
        candidates.push(TagCandidate {
            label: result.label.clone(),
            confidence: result.score.clamp(0.0, 1.0),
            source: TagSource::Oracle,
        });
    }

    let mut merged: HashSet<&str> = HashSet::new();
    for prediction in learned {
        if !prediction.confidence.is_finite() || !merged.insert(&prediction.label) {
            continue;
        }
        let confidence = prediction.confidence.clamp(0.0, 1.0);
        match index_by_label.get(prediction.label.as_str()) {
            Some(&index) => {
                let candidate = &mut candidates[index];
                candidate.confidence = ((candidate.confidence + confidence) / 2.0).clamp(0.0, 1.0);
                candidate.source = TagSource::Blended;
            }
            None if confidence > config.admission_threshold => {
                candidates.push(TagCandidate {
                    label: prediction.label.clone(),
                    confidence,
                    source: TagSource::Learned,
                });
            }
            None => {}
        }
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates.truncate(config.max_results);
    candidates
}
