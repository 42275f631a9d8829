//! Data models for the feedback database.

use crate::classifier::ContentMetadata;
use crate::signal::FeedbackSignal;
use serde::{Deserialize, Serialize};

/// One user action on one tag of one clip. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    pub id: i64,
    pub label: String,
    pub signal: FeedbackSignal,
    pub content_fingerprint: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

/// How often the user reached for a label of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelUsage {
    pub label: String,
    pub count: i64,
    /// Unix epoch milliseconds.
    pub last_seen_at: i64,
}

/// Metadata remembered per fingerprint so stored events can be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub fingerprint: String,
    #[serde(flatten)]
    pub metadata: ContentMetadata,
    pub recorded_at: i64,
}

/// The tags shown for one tagging of a clip and what feedback made of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipFeedback {
    pub id: i64,
    pub content_fingerprint: String,
    pub original_tags: Vec<String>,
    /// Starts as `original_tags`; affirmed and introduced labels are added,
    /// rejected ones removed.
    pub corrected_tags: Vec<String>,
    /// Unix epoch milliseconds of the tagging.
    pub timestamp: i64,
}

impl ClipFeedback {
    pub fn apply(&mut self, label: &str, signal: FeedbackSignal) {
        match signal {
            FeedbackSignal::Affirm | FeedbackSignal::Introduce => {
                if !self.corrected_tags.iter().any(|tag| tag == label) {
                    self.corrected_tags.push(label.to_string());
                }
            }
            FeedbackSignal::Reject => self.corrected_tags.retain(|tag| tag != label),
        }
    }
}

/// Everything a single piece of feedback changes, written in one transaction.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackCommit<'a> {
    pub content_fingerprint: &'a str,
    pub metadata: &'a ContentMetadata,
    pub label: &'a str,
    pub signal: FeedbackSignal,
    /// Serialized classifier after training on this feedback.
    pub classifier_state: &'a str,
}

/// Full contents of the store, for export and import.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSnapshot {
    pub events: Vec<FeedbackEvent>,
    pub usage_counters: Vec<LabelUsage>,
    #[serde(default)]
    pub content: Vec<ContentRecord>,
    #[serde(default)]
    pub clip_feedback: Vec<ClipFeedback>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackStoreStats {
    pub events: usize,
    pub labels: usize,
    pub content_records: usize,
    pub tagged_clips: usize,
    pub has_classifier_state: bool,
}
