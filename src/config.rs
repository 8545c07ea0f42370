use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::diagnosis::DiagnosisProfile;
use crate::emotion::EmotionLabel;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub schema_version: u32,
    /// Language code passed to the speech-to-text service.
    pub language: String,
    /// Directory holding classifier model artifacts and their manifest.
    pub models_dir: Option<PathBuf>,
    /// Base directory for persisted session records.
    pub results_dir: Option<PathBuf>,
    /// Speech-to-text endpoint; when unset, the audio stage records a
    /// stage error and continues with an empty transcript.
    pub stt_endpoint: Option<String>,
    /// Recommendation service endpoint; when unset, the contextual stage
    /// runs the local simulation instead.
    pub recommendation_endpoint: Option<String>,
    /// Hard cap on sampled frames per session (cancellation point).
    pub max_frames: usize,
    /// Face-size policy applied by the detector, as a fraction of frame area.
    pub min_face_area_ratio: f32,
    pub max_face_area_ratio: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            language: "es-ES".to_string(),
            models_dir: None,
            results_dir: None,
            stt_endpoint: None,
            recommendation_endpoint: None,
            max_frames: 600,
            min_face_area_ratio: 0.005,
            max_face_area_ratio: 0.9,
        }
    }
}

impl Config {
    /// Load config from file, or create default
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Get the default config directory
    pub fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".emovista"))
    }

    /// Get the default models directory
    pub fn default_models_dir() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("models"))
    }

    /// Get the default results directory
    pub fn default_results_dir() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("results"))
    }

    pub fn get_models_dir(&self) -> Result<PathBuf> {
        match &self.models_dir {
            Some(path) => Ok(path.clone()),
            None => Self::default_models_dir(),
        }
    }

    pub fn get_results_dir(&self) -> Result<PathBuf> {
        match &self.results_dir {
            Some(path) => Ok(path.clone()),
            None => Self::default_results_dir(),
        }
    }
}

/// Caller-supplied overrides, applied verbatim on top of the resolved
/// diagnosis profile. Highest precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOverrides {
    pub frame_interval_ms: Option<u64>,
    pub confidence_threshold: Option<f32>,
    pub priority_emotions: Option<Vec<EmotionLabel>>,
    pub alert_emotions: Option<Vec<EmotionLabel>>,
}

impl SessionOverrides {
    pub fn is_empty(&self) -> bool {
        self.frame_interval_ms.is_none()
            && self.confidence_threshold.is_none()
            && self.priority_emotions.is_none()
            && self.alert_emotions.is_none()
    }
}

/// The configuration a session actually runs with: the resolved profile
/// with overrides applied, plus the original diagnosis text for the
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub diagnosis: Option<String>,
    pub profile: DiagnosisProfile,
}

/// Resolve the effective session configuration. Pure function: default
/// profile, then the first matching diagnosis profile, then caller
/// overrides verbatim.
pub fn resolve_session_config(
    diagnosis: Option<&str>,
    overrides: &SessionOverrides,
) -> SessionConfig {
    let mut profile = DiagnosisProfile::resolve(diagnosis);

    if let Some(interval) = overrides.frame_interval_ms {
        profile.frame_interval_ms = interval;
    }
    if let Some(threshold) = overrides.confidence_threshold {
        profile.confidence_threshold = threshold;
    }
    if let Some(ref priority) = overrides.priority_emotions {
        profile.priority_emotions = priority.clone();
    }
    if let Some(ref alerts) = overrides.alert_emotions {
        profile.alert_emotions = alerts.clone();
    }

    SessionConfig {
        diagnosis: diagnosis.map(|d| d.to_string()),
        profile,
    }
}
