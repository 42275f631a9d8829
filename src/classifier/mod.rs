mod adaptive;
mod features;
mod model;

pub use adaptive::{
    AdaptiveClassifier, ClassifierConfig, ClassifierError, ClassifierState, ClassifierStats,
    LabelModelState, LabelPrediction, TrainingExample, DEFAULT_INIT_SCALE, DEFAULT_LEARNING_RATE,
};
pub use features::{
    ContentMetadata, FeatureExtractor, MetadataFeatureExtractor, DEFAULT_FEATURE_DIM,
};
pub use model::{sigmoid, LabelModel};
