//! Diagnosis categories and per-diagnosis analysis profiles.
//!
//! Free-text diagnoses ("TEA grado 1", "TDAH combinado") are mapped to a
//! category by scanning an ordered keyword table with case-insensitive
//! substring matching. The first matching category wins, so the table
//! order is part of the contract. Both the orchestrator's configuration
//! resolution and the recommendation engine share this single matcher.

use serde::{Deserialize, Serialize};

use crate::emotion::EmotionLabel;

/// Diagnosis categories the system knows profiles and rules for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisCategory {
    Autism,
    Adhd,
    DownSyndrome,
    CerebralPalsy,
    Default,
}

/// Ordered matcher table: first category whose keyword appears anywhere
/// in the lowercased diagnosis text is selected.
const MATCHER_TABLE: &[(DiagnosisCategory, &[&str])] = &[
    (DiagnosisCategory::Autism, &["autismo", "tea", "asperger", "espectro autista"]),
    (DiagnosisCategory::Adhd, &["tdah", "hiperactividad", "deficit de atencion", "déficit de atención"]),
    (DiagnosisCategory::DownSyndrome, &["down", "trisomia", "trisomía"]),
    (DiagnosisCategory::CerebralPalsy, &["paralisis cerebral", "parálisis cerebral", "pci"]),
];

impl DiagnosisCategory {
    /// Match a free-text diagnosis against the ordered keyword table.
    /// Deterministic: depends only on the text and the table.
    pub fn match_text(diagnosis: &str) -> Self {
        let lowered = diagnosis.to_lowercase();
        for (category, keywords) in MATCHER_TABLE {
            if keywords.iter().any(|kw| lowered.contains(kw)) {
                return *category;
            }
        }
        DiagnosisCategory::Default
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosisCategory::Autism => "autismo",
            DiagnosisCategory::Adhd => "tdah",
            DiagnosisCategory::DownSyndrome => "sindrome_down",
            DiagnosisCategory::CerebralPalsy => "paralisis_cerebral",
            DiagnosisCategory::Default => "default",
        }
    }
}

/// Per-diagnosis analysis profile: sampling cadence, confidence cutoff
/// and the emotion lists that drive prioritization and alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisProfile {
    pub category: DiagnosisCategory,
    /// Frame-sampling interval in milliseconds.
    pub frame_interval_ms: u64,
    /// Minimum confidence for a detection to survive filtering.
    pub confidence_threshold: f32,
    /// Emotions given priority in reporting, most important first.
    pub priority_emotions: Vec<EmotionLabel>,
    /// Emotions that raise a diagnosis-specific alert when their share
    /// exceeds the alert threshold.
    pub alert_emotions: Vec<EmotionLabel>,
}

impl DiagnosisProfile {
    /// The default profile used when no diagnosis matches.
    pub fn default_profile() -> Self {
        Self {
            category: DiagnosisCategory::Default,
            frame_interval_ms: 1000,
            confidence_threshold: 0.6,
            priority_emotions: vec![EmotionLabel::Happy, EmotionLabel::Sad, EmotionLabel::Angry],
            alert_emotions: vec![EmotionLabel::Sad, EmotionLabel::Angry],
        }
    }

    /// Profile for a category. Intervals and thresholds are product-tuned;
    /// shorter intervals where emotional shifts are faster, lower
    /// thresholds where expressions are harder to classify.
    pub fn for_category(category: DiagnosisCategory) -> Self {
        match category {
            DiagnosisCategory::Autism => Self {
                category,
                frame_interval_ms: 500,
                confidence_threshold: 0.5,
                priority_emotions: vec![
                    EmotionLabel::Fear,
                    EmotionLabel::Angry,
                    EmotionLabel::Neutral,
                ],
                alert_emotions: vec![EmotionLabel::Fear, EmotionLabel::Angry],
            },
            DiagnosisCategory::Adhd => Self {
                category,
                frame_interval_ms: 500,
                confidence_threshold: 0.55,
                priority_emotions: vec![
                    EmotionLabel::Angry,
                    EmotionLabel::Surprise,
                    EmotionLabel::Happy,
                ],
                alert_emotions: vec![EmotionLabel::Angry],
            },
            DiagnosisCategory::DownSyndrome => Self {
                category,
                frame_interval_ms: 1000,
                confidence_threshold: 0.5,
                priority_emotions: vec![
                    EmotionLabel::Happy,
                    EmotionLabel::Sad,
                    EmotionLabel::Neutral,
                ],
                alert_emotions: vec![EmotionLabel::Sad],
            },
            DiagnosisCategory::CerebralPalsy => Self {
                category,
                frame_interval_ms: 1500,
                confidence_threshold: 0.45,
                priority_emotions: vec![
                    EmotionLabel::Sad,
                    EmotionLabel::Fear,
                    EmotionLabel::Happy,
                ],
                alert_emotions: vec![EmotionLabel::Sad, EmotionLabel::Fear],
            },
            DiagnosisCategory::Default => Self::default_profile(),
        }
    }

    /// Resolve a profile from optional free-text diagnosis.
    pub fn resolve(diagnosis: Option<&str>) -> Self {
        match diagnosis {
            Some(text) if !text.trim().is_empty() => {
                Self::for_category(DiagnosisCategory::match_text(text))
            }
            _ => Self::default_profile(),
        }
    }
}
