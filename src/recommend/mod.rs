pub mod context;
pub mod engine;
pub mod service;

pub use context::{
    Clarity, CommunicativeContext, Complexity, EmotionalContext, EmotionalPattern, Stability,
    Variability,
};
pub use engine::RecommendationEngine;
pub use service::{
    simulate_recommendations, ContextualRecommender, HttpRecommendationClient,
    RecommendationCache, RecommendationService, ServiceError,
};
