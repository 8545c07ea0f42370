//! emovista: multimodal emotion analysis for recorded child sessions.
//!
//! The pipeline runs six sequential stages over one session — facial
//! emotion analysis, confidence filtering, audio/communication analysis,
//! generic and contextual recommendations, and alert evaluation — and
//! persists a single structured record per session. Frame extraction,
//! face detection backends, speech-to-text and the recommendation
//! service are external capabilities behind traits.

pub mod audio;
pub mod config;
pub mod diagnosis;
pub mod emotion;
pub mod ensemble;
pub mod recommend;
pub mod session;
pub mod vision;

#[cfg(test)]
mod orchestrator_tests;
