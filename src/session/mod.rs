//! Session results, alerts and stage markers.

pub mod alerts;
pub mod archive;
pub mod orchestrator;
pub mod stats;

pub use alerts::{evaluate_alerts, Alert, AlertLevel, AlertType};
pub use orchestrator::{SessionInputs, SessionRunner};
pub use stats::{ConfidenceSummary, EmotionStats};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::AudioAnalysis;
use crate::config::SessionConfig;
use crate::vision::FrameResult;

/// The six pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FacialAnalysis,
    ConfidenceFiltering,
    AudioAnalysis,
    GenericRecommendations,
    ContextualRecommendations,
    ReportAndAlerts,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::FacialAnalysis => "facial_analysis",
            Stage::ConfidenceFiltering => "confidence_filtering",
            Stage::AudioAnalysis => "audio_analysis",
            Stage::GenericRecommendations => "generic_recommendations",
            Stage::ContextualRecommendations => "contextual_recommendations",
            Stage::ReportAndAlerts => "report_and_alerts",
        }
    }
}

/// Derived session priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critico,
    Moderado,
    Normal,
}

/// The complete, persisted-once session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config: SessionConfig,
    /// Raw per-frame results, sorted by frame id.
    pub frames: Vec<FrameResult>,
    /// Frames after confidence filtering; frames with no surviving
    /// detections are excluded.
    pub filtered_frames: Vec<FrameResult>,
    /// Detections dropped by the confidence filter.
    pub dropped_detections: usize,
    pub audio: AudioAnalysis,
    pub stats: EmotionStats,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
    pub completed_stages: Vec<Stage>,
    pub errors: Vec<String>,
    pub priority: Priority,
}

impl SessionResult {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            config,
            frames: Vec::new(),
            filtered_frames: Vec::new(),
            dropped_detections: 0,
            audio: AudioAnalysis::empty(),
            stats: EmotionStats::default(),
            alerts: Vec::new(),
            recommendations: Vec::new(),
            completed_stages: Vec::new(),
            errors: Vec::new(),
            priority: Priority::Normal,
        }
    }

    pub fn mark_completed(&mut self, stage: Stage) {
        if !self.completed_stages.contains(&stage) {
            self.completed_stages.push(stage);
        }
    }

    pub fn record_error(&mut self, stage: Stage, message: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", stage.as_str(), message));
    }

    /// Derive priority from the evaluated alerts and close the record.
    pub fn finalize(&mut self) {
        self.priority = if self.alerts.iter().any(|a| a.level == AlertLevel::Alto) {
            Priority::Critico
        } else if self.alerts.iter().any(|a| a.level == AlertLevel::Medio) {
            Priority::Moderado
        } else {
            Priority::Normal
        };
        self.ended_at = Some(Utc::now());
    }
}
