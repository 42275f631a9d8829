//! One user's tagging session: classifier, feedback store and blending wired together.
//!
//! Storage is optional at runtime. The first storage failure on a write is
//! returned to the caller (the in-memory classifier is already updated by then)
//! and the session continues without persistence from that point on.

use crate::blend::{blend, TagCandidate, TagSource};
use crate::classifier::{
    AdaptiveClassifier, ClassifierError, ClassifierState, ClassifierStats, ContentMetadata,
    FeatureExtractor, MetadataFeatureExtractor, TrainingExample,
};
use crate::config::AppConfig;
use crate::feedback_store::{
    ClipFeedback, FeedbackCommit, FeedbackEvent, FeedbackSnapshot, FeedbackStore,
    FeedbackStoreError, FeedbackStoreStats, LabelUsage, SqliteFeedbackStore, StoreResult,
};
use crate::fingerprint::fingerprint;
use crate::oracle::{normalize_oracle_results, AudioOracle, OracleError, DEFAULT_LABELS};
use crate::signal::FeedbackSignal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const EXPORT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] FeedbackStoreError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("Label must not be empty")]
    EmptyLabel,

    #[error("Unsupported export format version {0}")]
    UnsupportedFormat(u32),
}

/// Decoded audio plus the bytes it came from.
#[derive(Debug, Clone, Copy)]
pub struct AudioClip<'a> {
    /// Original encoded bytes, only used for fingerprinting.
    pub bytes: &'a [u8],
    /// Mono PCM samples handed to the oracle.
    pub samples: &'a [f32],
    pub metadata: ContentMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagReport {
    pub fingerprint: String,
    pub tags: Vec<TagCandidate>,
}

/// Everything needed to restore a session elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub format_version: u32,
    pub exported_at: i64,
    pub classifier: ClassifierState,
    pub store: FeedbackSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub classifier: ClassifierStats,
    /// `None` when running without storage.
    pub store: Option<FeedbackStoreStats>,
}

pub struct TaggingSession {
    settings: AppConfig,
    classifier: AdaptiveClassifier,
    extractor: MetadataFeatureExtractor,
    store: Option<Arc<dyn FeedbackStore>>,
    storage_notice: Option<String>,
    load_notice: Option<String>,
}

impl TaggingSession {
    /// Opens the configured database, or an in-memory one when no path is set.
    ///
    /// Never fails: an unusable database leaves the session without storage and
    /// a corrupt classifier blob leaves it untrained. Both are reported through
    /// [`TaggingSession::storage_notice`] and [`TaggingSession::load_notice`].
    pub fn open(settings: AppConfig) -> Self {
        let opened = match &settings.db_path {
            Some(path) => SqliteFeedbackStore::new(path),
            None => SqliteFeedbackStore::open_in_memory(),
        };
        match opened {
            Ok(store) => Self::with_store(settings, Arc::new(store)),
            Err(err) => {
                warn!("Feedback storage unavailable, running in memory: {:#}", err);
                let mut session = Self::without_store(settings);
                session.storage_notice = Some(format!(
                    "Feedback could not be opened and will not be saved: {:#}",
                    err
                ));
                session
            }
        }
    }

    /// Uses `store` and restores the classifier saved in it, if any.
    pub fn with_store(settings: AppConfig, store: Arc<dyn FeedbackStore>) -> Self {
        let mut session = Self::without_store(settings);
        match store.load_classifier_state() {
            Ok(Some(blob)) => match AdaptiveClassifier::deserialize(&blob) {
                Ok(classifier) => {
                    info!(
                        "Restored classifier with {} trained labels",
                        classifier.len()
                    );
                    session.install_classifier(classifier);
                }
                Err(err) => {
                    warn!("Discarding saved classifier: {}", err);
                    session.load_notice = Some(format!(
                        "Saved classifier could not be loaded, starting fresh: {}",
                        err
                    ));
                }
            },
            Ok(None) => debug!("No saved classifier, starting fresh"),
            Err(err) => {
                warn!("Could not read saved classifier: {}", err);
                session.load_notice = Some(format!(
                    "Saved classifier could not be read, starting fresh: {}",
                    err
                ));
            }
        }
        session.store = Some(store);
        session
    }

    /// A session that keeps everything in memory and persists nothing.
    pub fn without_store(settings: AppConfig) -> Self {
        let classifier = AdaptiveClassifier::new(settings.classifier.clone());
        let extractor = MetadataFeatureExtractor::new(classifier.config().feature_dim);
        Self {
            settings,
            classifier,
            extractor,
            store: None,
            storage_notice: None,
            load_notice: None,
        }
    }

    fn install_classifier(&mut self, classifier: AdaptiveClassifier) {
        self.extractor = MetadataFeatureExtractor::new(classifier.config().feature_dim);
        self.classifier = classifier;
    }

    pub fn settings(&self) -> &AppConfig {
        &self.settings
    }

    pub fn classifier(&self) -> &AdaptiveClassifier {
        &self.classifier
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Set once storage has been given up on.
    pub fn storage_notice(&self) -> Option<&str> {
        self.storage_notice.as_deref()
    }

    /// Set when the saved classifier had to be discarded.
    pub fn load_notice(&self) -> Option<&str> {
        self.load_notice.as_deref()
    }

    /// Runs `op` against the store, switching to memory-only mode when storage fails.
    ///
    /// Returns `Ok(None)` when there is no store.
    fn storage_op<T>(
        &mut self,
        op: impl FnOnce(&dyn FeedbackStore) -> StoreResult<T>,
    ) -> Result<Option<T>, SessionError> {
        let Some(store) = self.store.clone() else {
            debug!("No feedback storage, skipping");
            return Ok(None);
        };
        match op(store.as_ref()) {
            Ok(value) => Ok(Some(value)),
            Err(FeedbackStoreError::StorageUnavailable(err)) => {
                warn!("Feedback storage failed, continuing in memory: {:#}", err);
                self.store = None;
                self.storage_notice = Some(format!(
                    "Feedback storage failed and later feedback will not be saved: {:#}",
                    err
                ));
                Err(FeedbackStoreError::StorageUnavailable(err).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn custom_labels(&mut self) -> Vec<String> {
        let limit = self.settings.custom_label_limit;
        match self.storage_op(|store| store.top_labels(limit)) {
            Ok(usage) => usage
                .unwrap_or_default()
                .into_iter()
                .map(|u| u.label)
                .collect(),
            Err(err) => {
                warn!("Ignoring custom labels: {}", err);
                Vec::new()
            }
        }
    }

    pub fn features(&self, metadata: &ContentMetadata) -> Vec<f64> {
        self.extractor.extract(metadata)
    }

    /// Learned confidence for one label, `None` if it was never trained.
    pub fn predict(&self, metadata: &ContentMetadata, label: &str) -> Option<f64> {
        self.classifier.predict(&self.features(metadata), label)
    }

    /// Asks the oracle about `clip` and blends its answer with the learned models.
    ///
    /// The user's most used custom labels are offered to both. The shown tags
    /// are remembered for the clip so later feedback can be traced against
    /// them. Storage problems here never fail the call; they only show up in
    /// `storage_notice`.
    pub async fn tag(
        &mut self,
        oracle: &dyn AudioOracle,
        clip: &AudioClip<'_>,
    ) -> Result<TagReport, SessionError> {
        let fingerprint = fingerprint(clip.bytes);
        let metadata = clip.metadata;
        let custom = self.custom_labels();
        let mut seen = HashSet::new();
        let candidates: Vec<String> = DEFAULT_LABELS
            .iter()
            .map(|label| label.to_string())
            .chain(custom.iter().cloned())
            .filter(|label| seen.insert(label.clone()))
            .collect();

        let raw = oracle
            .classify(clip.samples, metadata.sample_rate, &candidates)
            .await?;
        let oracle_scores = normalize_oracle_results(raw, self.settings.oracle_top_k);

        let features = self.features(&metadata);
        let learned = self.classifier.predict_all(
            &features,
            oracle_scores
                .iter()
                .map(|score| score.label.as_str())
                .chain(custom.iter().map(String::as_str)),
        );
        let tags = blend(&oracle_scores, &learned, &self.settings.blend);

        let shown: Vec<String> = tags.iter().map(|tag| tag.label.clone()).collect();
        let remembered =
            self.storage_op(|store| store.record_clip_tags(&fingerprint, &metadata, &shown));
        if let Err(err) = remembered {
            warn!("Could not remember clip tags: {}", err);
        }
        debug!(
            fingerprint = fingerprint.as_str(),
            oracle = oracle_scores.len(),
            learned = learned.len(),
            "Tagged clip"
        );

        Ok(TagReport { fingerprint, tags })
    }

    /// Trains on one piece of feedback, then persists the event, the clip
    /// metadata, the clip's corrected tags and the updated classifier in one
    /// transaction.
    ///
    /// Returns the stored event id, or `None` when running without storage.
    pub fn record_feedback(
        &mut self,
        content_fingerprint: &str,
        metadata: &ContentMetadata,
        label: &str,
        signal: FeedbackSignal,
    ) -> Result<Option<i64>, SessionError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(SessionError::EmptyLabel);
        }

        let features = self.features(metadata);
        self.classifier.train(&features, label, signal);
        let blob = self.classifier.serialize()?;

        let feedback = FeedbackCommit {
            content_fingerprint,
            metadata,
            label,
            signal,
            classifier_state: &blob,
        };
        self.storage_op(|store| store.commit_feedback(&feedback))
    }

    /// Adds a label of the user's own to a clip.
    pub fn introduce_label(
        &mut self,
        content_fingerprint: &str,
        metadata: &ContentMetadata,
        label: &str,
    ) -> Result<TagCandidate, SessionError> {
        self.record_feedback(content_fingerprint, metadata, label, FeedbackSignal::Introduce)?;
        Ok(TagCandidate {
            label: label.trim().to_string(),
            confidence: 1.0,
            source: TagSource::Custom,
        })
    }

    /// Replays every stored event whose clip metadata is known.
    ///
    /// Returns the number of training steps taken.
    pub fn retrain_from_store(&mut self) -> Result<usize, SessionError> {
        let examples = self.storage_op(|store| {
            let events = store.events_for_label(None)?;
            let mut known: HashMap<String, Option<ContentMetadata>> = HashMap::new();
            let mut examples = Vec::with_capacity(events.len());
            for event in events {
                if !known.contains_key(&event.content_fingerprint) {
                    let metadata = store.content_metadata(&event.content_fingerprint)?;
                    known.insert(event.content_fingerprint.clone(), metadata);
                }
                if let Some(Some(metadata)) = known.get(&event.content_fingerprint) {
                    examples.push(TrainingExample {
                        metadata: *metadata,
                        label: event.label,
                        signal: event.signal,
                    });
                }
            }
            Ok(examples)
        })?;
        let Some(examples) = examples else {
            return Ok(0);
        };

        let steps = self.classifier.retrain_on_batch(&self.extractor, &examples);
        let blob = self.classifier.serialize()?;
        self.storage_op(|store| store.save_classifier_state(&blob))?;
        Ok(steps)
    }

    /// Forgets all feedback and every learned model.
    pub fn clear_all(&mut self) -> Result<(), SessionError> {
        self.classifier.reset();
        self.storage_op(|store| store.clear_all())?;
        info!("Cleared all feedback and learned models");
        Ok(())
    }

    pub fn top_labels(&mut self, limit: usize) -> Result<Vec<LabelUsage>, SessionError> {
        Ok(self
            .storage_op(|store| store.top_labels(limit))?
            .unwrap_or_default())
    }

    pub fn recent_events(&mut self, limit: usize) -> Result<Vec<FeedbackEvent>, SessionError> {
        Ok(self
            .storage_op(|store| store.recent_events(limit))?
            .unwrap_or_default())
    }

    /// Tags shown for recently tagged clips and what feedback made of them.
    pub fn recent_clip_feedback(
        &mut self,
        limit: usize,
    ) -> Result<Vec<ClipFeedback>, SessionError> {
        Ok(self
            .storage_op(|store| store.recent_clip_feedback(limit))?
            .unwrap_or_default())
    }

    pub fn export_document(&mut self) -> Result<ExportDocument, SessionError> {
        let store = self
            .storage_op(|store| store.export_snapshot())?
            .unwrap_or_default();
        Ok(ExportDocument {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: Utc::now().timestamp_millis(),
            classifier: self.classifier.state(),
            store,
        })
    }

    /// Replaces the classifier and all stored feedback with the document's.
    ///
    /// Nothing changes if the document is invalid.
    pub fn import_document(&mut self, document: ExportDocument) -> Result<(), SessionError> {
        if document.format_version != EXPORT_FORMAT_VERSION {
            return Err(SessionError::UnsupportedFormat(document.format_version));
        }
        let classifier = AdaptiveClassifier::from_state(document.classifier)?;
        let blob = classifier.serialize()?;
        let snapshot = document.store;

        let result = self.storage_op(|store| {
            store.import_snapshot(&snapshot)?;
            store.save_classifier_state(&blob)
        });
        if matches!(
            result,
            Err(SessionError::Storage(FeedbackStoreError::CorruptState(_)))
        ) {
            return result.map(|_| ());
        }

        info!(
            "Imported classifier with {} labels and {} feedback events",
            classifier.len(),
            snapshot.events.len()
        );
        self.install_classifier(classifier);
        result.map(|_| ())
    }

    pub fn stats(&mut self) -> Result<SessionStats, SessionError> {
        let store = self.storage_op(|store| store.stats())?;
        Ok(SessionStats {
            classifier: self.classifier.stats(),
            store,
        })
    }
}
