mod models;
mod schema;
mod store;
mod trait_def;

pub use crate::fingerprint::fingerprint;
pub use models::{
    ClipFeedback, ContentRecord, FeedbackCommit, FeedbackEvent, FeedbackSnapshot,
    FeedbackStoreStats, LabelUsage,
};
pub use store::SqliteFeedbackStore;
pub use trait_def::{FeedbackStore, FeedbackStoreError, StoreResult};
