pub mod classifier;
pub mod fallback;
pub mod preprocess;
pub mod scorer;

pub use classifier::{
    load_models, ClassifierError, EmotionClassifier, EnsembleManifest, ModelDescriptor,
};
pub use fallback::FallbackClassifier;
pub use scorer::{EnsembleScorer, ModelErrorCounts, MODEL_TIMEOUT, SMOOTHING_EPSILON};
