//! Boundary to the zero-shot audio classifier.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_ORACLE_TOP_K: usize = 5;

/// Candidate vocabulary offered to the oracle when the user has no custom labels.
pub const DEFAULT_LABELS: &[&str] = &[
    "speech",
    "music",
    "singing",
    "guitar",
    "piano",
    "drums",
    "violin",
    "trumpet",
    "saxophone",
    "flute",
    "classical music",
    "rock music",
    "pop music",
    "jazz",
    "electronic music",
    "ambient",
    "nature sounds",
    "rain",
    "wind",
    "ocean waves",
    "birds chirping",
    "dog barking",
    "cat meowing",
    "car engine",
    "traffic",
    "footsteps",
    "door closing",
    "applause",
    "laughter",
    "crying",
    "coughing",
    "sneezing",
    "telephone ringing",
    "alarm clock",
    "typing",
    "water running",
    "fire crackling",
    "thunder",
    "helicopter",
    "airplane",
    "train",
    "motorcycle",
    "bell ringing",
    "whistle",
    "horn",
    "siren",
    "explosion",
    "gunshot",
    "silence",
    "noise",
    "distortion",
];

/// Returned in place of an empty oracle answer so the user always has something to correct.
const FALLBACK_TAGS: &[(&str, f64)] = &[("audio", 0.9), ("sound", 0.8), ("recording", 0.7)];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle is not ready: {0}")]
    NotReady(String),

    #[error("Classification failed: {0}")]
    Classification(String),
}

/// Zero-shot scorer for raw mono samples against a label set.
#[async_trait]
pub trait AudioOracle: Send + Sync {
    /// Scores in `[0, 1]` for (a subset of) `candidate_labels`, in any order.
    async fn classify(
        &self,
        samples: &[f32],
        sample_rate: u32,
        candidate_labels: &[String],
    ) -> Result<Vec<LabelScore>, OracleError>;
}

/// Sorts descending, keeps the best `top_k` and clamps scores to `[0, 1]`.
///
/// Non-finite scores are dropped. An empty answer becomes the fallback tags.
pub fn normalize_oracle_results(mut results: Vec<LabelScore>, top_k: usize) -> Vec<LabelScore> {
    results.retain(|r| r.score.is_finite());
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(top_k);
    for result in results.iter_mut() {
        result.score = result.score.clamp(0.0, 1.0);
    }

    if results.is_empty() {
        return FALLBACK_TAGS
            .iter()
            .map(|(label, score)| LabelScore::new(*label, *score))
            .collect();
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sorts_truncates_and_clamps() {
        let raw = vec![
            LabelScore::new("rain", 0.3),
            LabelScore::new("wind", 1.2),
            LabelScore::new("thunder", 0.8),
            LabelScore::new("birds", -0.1),
            LabelScore::new("noise", f64::NAN),
        ];
        let normalized = normalize_oracle_results(raw, 3);
        assert_eq!(
            normalized,
            vec![
                LabelScore::new("wind", 1.0),
                LabelScore::new("thunder", 0.8),
                LabelScore::new("rain", 0.3),
            ]
        );
    }

    #[test]
    fn test_empty_answer_uses_fallback_tags() {
        let normalized = normalize_oracle_results(vec![], DEFAULT_ORACLE_TOP_K);
        let labels: Vec<&str> = normalized.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["audio", "sound", "recording"]);
    }

    #[test]
    fn test_default_vocabulary_has_no_duplicates() {
        let mut labels = DEFAULT_LABELS.to_vec();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), DEFAULT_LABELS.len());
    }
}
