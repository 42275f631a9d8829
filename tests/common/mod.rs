//! Shared fixtures for session tests.

#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use clip_tagger::classifier::ContentMetadata;
use clip_tagger::feedback_store::{
    ClipFeedback, FeedbackCommit, FeedbackEvent, FeedbackSnapshot, FeedbackStore,
    FeedbackStoreError, FeedbackStoreStats, LabelUsage, SqliteFeedbackStore, StoreResult,
};
use clip_tagger::oracle::{AudioOracle, LabelScore, OracleError};
use clip_tagger::session::AudioClip;
use clip_tagger::signal::FeedbackSignal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const CLIP_BYTES: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt rain on a tin roof";
pub const CLIP_SAMPLES: &[f32] = &[0.0, 0.25, -0.25, 0.5];

pub fn clip_metadata() -> ContentMetadata {
    ContentMetadata {
        duration_secs: 30.0,
        sample_rate: 44_100,
        channels: 2,
    }
}

pub fn clip() -> AudioClip<'static> {
    AudioClip {
        bytes: CLIP_BYTES,
        samples: CLIP_SAMPLES,
        metadata: clip_metadata(),
    }
}

/// Answers with a fixed score list and remembers what it was asked.
pub struct FakeOracle {
    scores: Vec<LabelScore>,
    pub seen_candidates: Mutex<Vec<String>>,
}

impl FakeOracle {
    pub fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores
                .iter()
                .map(|(label, score)| LabelScore::new(*label, *score))
                .collect(),
            seen_candidates: Mutex::new(Vec::new()),
        }
    }

    pub fn was_offered(&self, label: &str) -> bool {
        self.seen_candidates
            .lock()
            .unwrap()
            .iter()
            .any(|candidate| candidate == label)
    }
}

#[async_trait]
impl AudioOracle for FakeOracle {
    async fn classify(
        &self,
        _samples: &[f32],
        _sample_rate: u32,
        candidate_labels: &[String],
    ) -> Result<Vec<LabelScore>, OracleError> {
        *self.seen_candidates.lock().unwrap() = candidate_labels.to_vec();
        Ok(self.scores.clone())
    }
}

pub struct BrokenOracle;

#[async_trait]
impl AudioOracle for BrokenOracle {
    async fn classify(
        &self,
        _samples: &[f32],
        _sample_rate: u32,
        _candidate_labels: &[String],
    ) -> Result<Vec<LabelScore>, OracleError> {
        Err(OracleError::NotReady("model still downloading".to_string()))
    }
}

/// An in-memory SQLite store whose every call fails once `fail()` is called.
pub struct FlakyStore {
    inner: SqliteFeedbackStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteFeedbackStore::open_in_memory().unwrap(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeedbackStoreError::StorageUnavailable(anyhow!(
                "disk I/O error"
            )));
        }
        Ok(())
    }
}

impl FeedbackStore for FlakyStore {
    fn record_signal(
        &self,
        label: &str,
        signal: FeedbackSignal,
        content_fingerprint: &str,
    ) -> StoreResult<i64> {
        self.check()?;
        self.inner.record_signal(label, signal, content_fingerprint)
    }

    fn events_for_label(&self, label: Option<&str>) -> StoreResult<Vec<FeedbackEvent>> {
        self.check()?;
        self.inner.events_for_label(label)
    }

    fn recent_events(&self, limit: usize) -> StoreResult<Vec<FeedbackEvent>> {
        self.check()?;
        self.inner.recent_events(limit)
    }

    fn commit_feedback(&self, feedback: &FeedbackCommit<'_>) -> StoreResult<i64> {
        self.check()?;
        self.inner.commit_feedback(feedback)
    }

    fn record_label_introduced(&self, label: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.record_label_introduced(label)
    }

    fn record_introduction(&self, label: &str, content_fingerprint: &str) -> StoreResult<i64> {
        self.check()?;
        self.inner.record_introduction(label, content_fingerprint)
    }

    fn top_labels(&self, limit: usize) -> StoreResult<Vec<LabelUsage>> {
        self.check()?;
        self.inner.top_labels(limit)
    }

    fn record_content_metadata(
        &self,
        fingerprint: &str,
        metadata: &ContentMetadata,
    ) -> StoreResult<()> {
        self.check()?;
        self.inner.record_content_metadata(fingerprint, metadata)
    }

    fn content_metadata(&self, fingerprint: &str) -> StoreResult<Option<ContentMetadata>> {
        self.check()?;
        self.inner.content_metadata(fingerprint)
    }

    fn record_clip_tags(
        &self,
        fingerprint: &str,
        metadata: &ContentMetadata,
        tags: &[String],
    ) -> StoreResult<i64> {
        self.check()?;
        self.inner.record_clip_tags(fingerprint, metadata, tags)
    }

    fn recent_clip_feedback(&self, limit: usize) -> StoreResult<Vec<ClipFeedback>> {
        self.check()?;
        self.inner.recent_clip_feedback(limit)
    }

    fn save_classifier_state(&self, blob: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.save_classifier_state(blob)
    }

    fn load_classifier_state(&self) -> StoreResult<Option<String>> {
        self.check()?;
        self.inner.load_classifier_state()
    }

    fn clear_all(&self) -> StoreResult<()> {
        self.check()?;
        self.inner.clear_all()
    }

    fn export_snapshot(&self) -> StoreResult<FeedbackSnapshot> {
        self.check()?;
        self.inner.export_snapshot()
    }

    fn import_snapshot(&self, snapshot: &FeedbackSnapshot) -> StoreResult<()> {
        self.check()?;
        self.inner.import_snapshot(snapshot)
    }

    fn stats(&self) -> StoreResult<FeedbackStoreStats> {
        self.check()?;
        self.inner.stats()
    }
}
