//! Personalized audio tagging.
//!
//! A zero-shot oracle proposes tags for a clip; per-label logistic models trained
//! from the user's feedback are blended in, so the tags drift towards the user's
//! own vocabulary over time.

pub mod blend;
pub mod classifier;
pub mod config;
pub mod feedback_store;
pub mod fingerprint;
pub mod oracle;
pub mod session;
pub mod signal;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use blend::{blend, BlendConfig, TagCandidate, TagSource};
pub use classifier::{AdaptiveClassifier, ClassifierConfig, ContentMetadata};
pub use feedback_store::{FeedbackStore, FeedbackStoreError, SqliteFeedbackStore};
pub use oracle::{AudioOracle, LabelScore, OracleError};
pub use session::{AudioClip, ExportDocument, SessionError, TagReport, TaggingSession};
pub use signal::FeedbackSignal;
