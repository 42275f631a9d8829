//! FeedbackStore trait definition.

use super::models::{
    ClipFeedback, FeedbackCommit, FeedbackEvent, FeedbackSnapshot, FeedbackStoreStats,
    LabelUsage,
};
use crate::classifier::ContentMetadata;
use crate::signal::FeedbackSignal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedbackStoreError {
    /// The backing storage failed; callers may keep going without persistence.
    #[error("Feedback storage unavailable: {0:#}")]
    StorageUnavailable(anyhow::Error),

    /// Stored or imported data could not be understood.
    #[error("Corrupt feedback data: {0}")]
    CorruptState(String),
}

impl From<rusqlite::Error> for FeedbackStoreError {
    fn from(err: rusqlite::Error) -> Self {
        FeedbackStoreError::StorageUnavailable(err.into())
    }
}

impl From<anyhow::Error> for FeedbackStoreError {
    fn from(err: anyhow::Error) -> Self {
        FeedbackStoreError::StorageUnavailable(err)
    }
}

pub type StoreResult<T> = Result<T, FeedbackStoreError>;

/// Trait for feedback storage backends.
///
/// Every write is atomic: readers observe all of it or none of it.
pub trait FeedbackStore: Send + Sync {
    // =========================================================================
    // Feedback events
    // =========================================================================

    /// Append a feedback event. Returns its id.
    fn record_signal(
        &self,
        label: &str,
        signal: FeedbackSignal,
        content_fingerprint: &str,
    ) -> StoreResult<i64>;

    /// Events for one label, or all events when `label` is `None`, oldest first.
    fn events_for_label(&self, label: Option<&str>) -> StoreResult<Vec<FeedbackEvent>>;

    /// Most recent events first.
    fn recent_events(&self, limit: usize) -> StoreResult<Vec<FeedbackEvent>>;

    /// Write the event, content metadata, clip correction and classifier state
    /// of one piece of feedback together. An `introduce` also bumps the usage
    /// counter. Returns the event id.
    fn commit_feedback(&self, feedback: &FeedbackCommit<'_>) -> StoreResult<i64>;

    // =========================================================================
    // Label usage
    // =========================================================================

    /// Increment the usage counter of `label`, creating it with count 1.
    fn record_label_introduced(&self, label: &str) -> StoreResult<()>;

    /// Append an `introduce` event and bump the usage counter in one transaction.
    fn record_introduction(&self, label: &str, content_fingerprint: &str) -> StoreResult<i64>;

    /// Labels by usage count, most used first; ties go to the most recently seen.
    fn top_labels(&self, limit: usize) -> StoreResult<Vec<LabelUsage>>;

    // =========================================================================
    // Content metadata
    // =========================================================================

    /// Insert or replace the metadata remembered for a fingerprint.
    fn record_content_metadata(
        &self,
        fingerprint: &str,
        metadata: &ContentMetadata,
    ) -> StoreResult<()>;

    fn content_metadata(&self, fingerprint: &str) -> StoreResult<Option<ContentMetadata>>;

    // =========================================================================
    // Clip feedback
    // =========================================================================

    /// Remember the metadata of a tagged clip and the tags shown for it.
    /// Returns the id of the new clip feedback record.
    fn record_clip_tags(
        &self,
        fingerprint: &str,
        metadata: &ContentMetadata,
        tags: &[String],
    ) -> StoreResult<i64>;

    /// Most recently tagged first.
    fn recent_clip_feedback(&self, limit: usize) -> StoreResult<Vec<ClipFeedback>>;

    // =========================================================================
    // Classifier state
    // =========================================================================

    fn save_classifier_state(&self, blob: &str) -> StoreResult<()>;

    fn load_classifier_state(&self) -> StoreResult<Option<String>>;

    // =========================================================================
    // Whole-store operations
    // =========================================================================

    /// Remove events, counters, content metadata, clip feedback and classifier
    /// state at once.
    fn clear_all(&self) -> StoreResult<()>;

    fn export_snapshot(&self) -> StoreResult<FeedbackSnapshot>;

    /// Replace events, counters, content metadata and clip feedback with the
    /// snapshot's.
    /// The classifier state is left alone.
    fn import_snapshot(&self, snapshot: &FeedbackSnapshot) -> StoreResult<()>;

    fn stats(&self) -> StoreResult<FeedbackStoreStats>;
}
