//! Alert evaluation over aggregated statistics and the resolved profile.
//!
//! Pure decision table: the thresholds are product-tuned and kept as
//! named constants rather than re-derived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::{AudioAnalysis, CommunicationLevel};
use crate::diagnosis::DiagnosisProfile;

use super::stats::EmotionStats;

/// Negative-emotion share above which an emotional alert is raised.
pub const NEGATIVE_SHARE_ALERT: f32 = 0.6;
/// Per-emotion share above which a profile alert emotion raises an alert.
pub const ALERT_EMOTION_SHARE: f32 = 0.3;
/// Verbal attempt count below which limited communication escalates.
pub const LIMITED_ATTEMPTS_MAX: usize = 2;
/// Stage error count above which a technical alert is raised.
pub const STAGE_ERROR_ALERT_MAX: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Emotional,
    DiagnosisSpecific,
    Communication,
    Technical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Alto,
    Medio,
    Bajo,
}

/// One evaluated alert. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub level: AlertLevel,
    pub message: String,
    pub recommendation: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        level: AlertLevel,
        message: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            level,
            message: message.into(),
            recommendation: recommendation.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Evaluate the alert table. Pure function of the aggregated statistics,
/// the audio analysis, the resolved profile and the stage error count.
pub fn evaluate_alerts(
    stats: &EmotionStats,
    audio: &AudioAnalysis,
    profile: &DiagnosisProfile,
    stage_error_count: usize,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let negative_share = stats.negative_share();
    if negative_share > NEGATIVE_SHARE_ALERT {
        alerts.push(Alert::new(
            AlertType::Emotional,
            AlertLevel::Alto,
            format!(
                "Predominio de emociones negativas: {:.0}% de las detecciones.",
                negative_share * 100.0
            ),
            "Consultar con el especialista estrategias de regulación emocional.",
        ));
    }

    for emotion in &profile.alert_emotions {
        let share = stats.share(*emotion);
        if share > ALERT_EMOTION_SHARE {
            alerts.push(Alert::new(
                AlertType::DiagnosisSpecific,
                AlertLevel::Medio,
                format!(
                    "Emoción '{}' presente en el {:.0}% de las detecciones, por encima del umbral del perfil.",
                    emotion, share * 100.0
                ),
                "Revisar los desencadenantes asociados a esta emoción en la sesión.",
            ));
        }
    }

    match audio.level {
        CommunicationLevel::NoVerbal => {
            alerts.push(Alert::new(
                AlertType::Communication,
                AlertLevel::Alto,
                "No se detectó comunicación verbal en la sesión.",
                "Valorar sistemas aumentativos y alternativos de comunicación.",
            ));
        }
        CommunicationLevel::PreVerbal if audio.attempt_count < LIMITED_ATTEMPTS_MAX => {
            alerts.push(Alert::new(
                AlertType::Communication,
                AlertLevel::Medio,
                format!(
                    "Comunicación verbal muy limitada: {} intento(s) detectado(s).",
                    audio.attempt_count
                ),
                "Estimular intentos verbales con actividades motivadoras.",
            ));
        }
        _ => {}
    }

    if stage_error_count > STAGE_ERROR_ALERT_MAX {
        alerts.push(Alert::new(
            AlertType::Technical,
            AlertLevel::Medio,
            format!(
                "Errores técnicos durante el análisis: {} etapa(s) degradada(s).",
                stage_error_count
            ),
            "Revisar la calidad del vídeo y la configuración antes de la próxima sesión.",
        ));
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::{EmotionDistribution, EmotionLabel};
    use crate::vision::{BoundingBox, FaceDetection, FrameResult};

    fn stats_with(counts: &[(EmotionLabel, usize)]) -> EmotionStats {
        let mut detections = Vec::new();
        for (label, count) in counts {
            for _ in 0..*count {
                detections.push(FaceDetection::new(
                    0,
                    BoundingBox { x: 0, y: 0, width: 10, height: 10 },
                    EmotionDistribution::peaked(*label, 0.8),
                    0.5,
                ));
            }
        }
        EmotionStats::from_frames(&[FrameResult {
            frame_id: 0,
            timestamp_ms: 0,
            detections,
        }])
    }

    fn verbal_audio() -> AudioAnalysis {
        AudioAnalysis::from_transcript(
            "quiero jugar con la pelota ahora mismo por favor mamá dame agua",
            0,
            5000,
        )
    }

    #[test]
    fn test_negative_share_boundary_is_strict() {
        // Exactly 60%: 6 of 10 negative, no alert.
        let stats = stats_with(&[(EmotionLabel::Sad, 6), (EmotionLabel::Happy, 4)]);
        let alerts = evaluate_alerts(&stats, &verbal_audio(), &DiagnosisProfile::default_profile(), 0);
        assert!(!alerts.iter().any(|a| a.alert_type == AlertType::Emotional));

        // Just above 60%: 6001 of 10000.
        let stats = stats_with(&[(EmotionLabel::Sad, 6001), (EmotionLabel::Happy, 3999)]);
        let alerts = evaluate_alerts(&stats, &verbal_audio(), &DiagnosisProfile::default_profile(), 0);
        let emotional: Vec<_> = alerts
            .iter()
            .filter(|a| a.alert_type == AlertType::Emotional)
            .collect();
        assert_eq!(emotional.len(), 1);
        assert_eq!(emotional[0].level, AlertLevel::Alto);
    }

    #[test]
    fn test_negative_share_counts_whole_set() {
        // 4 distinct negatives at 17% each cross the bar together.
        let stats = stats_with(&[
            (EmotionLabel::Sad, 17),
            (EmotionLabel::Angry, 17),
            (EmotionLabel::Fear, 17),
            (EmotionLabel::Disgust, 17),
            (EmotionLabel::Happy, 32),
        ]);
        let alerts = evaluate_alerts(&stats, &verbal_audio(), &DiagnosisProfile::default_profile(), 0);
        assert!(alerts.iter().any(|a| a.alert_type == AlertType::Emotional));
    }

    #[test]
    fn test_profile_alert_emotion_share() {
        // Default profile alerts on Sad and Angry; Sad at 40% fires, and
        // the negative total (50%) stays under the emotional bar.
        let stats = stats_with(&[
            (EmotionLabel::Sad, 4),
            (EmotionLabel::Angry, 1),
            (EmotionLabel::Happy, 5),
        ]);
        let alerts = evaluate_alerts(&stats, &verbal_audio(), &DiagnosisProfile::default_profile(), 0);
        let diag: Vec<_> = alerts
            .iter()
            .filter(|a| a.alert_type == AlertType::DiagnosisSpecific)
            .collect();
        assert_eq!(diag.len(), 1);
        assert_eq!(diag[0].level, AlertLevel::Medio);
        assert!(diag[0].message.contains("Sad"));
    }

    #[test]
    fn test_no_verbal_is_alto() {
        let stats = stats_with(&[(EmotionLabel::Neutral, 5)]);
        let alerts = evaluate_alerts(
            &stats,
            &AudioAnalysis::empty(),
            &DiagnosisProfile::default_profile(),
            0,
        );
        let comm: Vec<_> = alerts
            .iter()
            .filter(|a| a.alert_type == AlertType::Communication)
            .collect();
        assert_eq!(comm.len(), 1);
        assert_eq!(comm[0].level, AlertLevel::Alto);
    }

    #[test]
    fn test_limited_communication_is_medio() {
        let stats = stats_with(&[(EmotionLabel::Neutral, 5)]);
        // One attempt: pre_verbal with attempts < 2.
        let audio = AudioAnalysis::from_transcript("agua", 0, 1000);
        let alerts =
            evaluate_alerts(&stats, &audio, &DiagnosisProfile::default_profile(), 0);
        let comm: Vec<_> = alerts
            .iter()
            .filter(|a| a.alert_type == AlertType::Communication)
            .collect();
        assert_eq!(comm.len(), 1);
        assert_eq!(comm[0].level, AlertLevel::Medio);

        // Two attempts: still pre_verbal but above the escalation cutoff.
        let audio = AudioAnalysis::from_transcript("agua pan", 0, 1000);
        let alerts =
            evaluate_alerts(&stats, &audio, &DiagnosisProfile::default_profile(), 0);
        assert!(!alerts.iter().any(|a| a.alert_type == AlertType::Communication));
    }

    #[test]
    fn test_technical_alert_needs_more_than_two_errors() {
        let stats = stats_with(&[(EmotionLabel::Happy, 5)]);
        let alerts =
            evaluate_alerts(&stats, &verbal_audio(), &DiagnosisProfile::default_profile(), 2);
        assert!(!alerts.iter().any(|a| a.alert_type == AlertType::Technical));

        let alerts =
            evaluate_alerts(&stats, &verbal_audio(), &DiagnosisProfile::default_profile(), 3);
        let technical: Vec<_> = alerts
            .iter()
            .filter(|a| a.alert_type == AlertType::Technical)
            .collect();
        assert_eq!(technical.len(), 1);
        assert_eq!(technical[0].level, AlertLevel::Medio);
    }

    #[test]
    fn test_quiet_session_raises_nothing() {
        let stats = stats_with(&[(EmotionLabel::Happy, 6), (EmotionLabel::Neutral, 4)]);
        let alerts =
            evaluate_alerts(&stats, &verbal_audio(), &DiagnosisProfile::default_profile(), 0);
        assert!(alerts.is_empty());
    }
}
