//! Aggregated emotion statistics over a session's filtered detections.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::emotion::EmotionLabel;
use crate::vision::FrameResult;

/// Per-emotion confidence summary over all detections with that label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceSummary {
    pub count: usize,
    pub mean: f32,
    pub median: f32,
    pub std_dev: f32,
    pub min: f32,
    pub max: f32,
}

impl ConfidenceSummary {
    fn from_values(values: &mut Vec<f32>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = values.len();
        let mean = values.iter().sum::<f32>() / count as f32;
        let median = if count % 2 == 1 {
            values[count / 2]
        } else {
            (values[count / 2 - 1] + values[count / 2]) / 2.0
        };
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / count as f32;
        Self {
            count,
            mean,
            median,
            std_dev: variance.sqrt(),
            min: values[0],
            max: values[count - 1],
        }
    }
}

/// Emotion statistics computed once, after confidence filtering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmotionStats {
    pub total_detections: usize,
    pub counts: HashMap<EmotionLabel, usize>,
    /// Emotion with the highest detection count, if any detections exist.
    pub predominant: Option<EmotionLabel>,
    /// count(predominant) / total, in [0, 1].
    pub predominant_share: f32,
    pub confidence: HashMap<EmotionLabel, ConfidenceSummary>,
}

impl EmotionStats {
    pub fn from_frames(frames: &[FrameResult]) -> Self {
        let mut counts: HashMap<EmotionLabel, usize> = HashMap::new();
        let mut confidences: HashMap<EmotionLabel, Vec<f32>> = HashMap::new();
        let mut total = 0usize;

        for frame in frames {
            for detection in &frame.detections {
                *counts.entry(detection.emotion).or_insert(0) += 1;
                confidences
                    .entry(detection.emotion)
                    .or_default()
                    .push(detection.confidence);
                total += 1;
            }
        }

        // Ties break toward the earlier label in classifier order, so the
        // result does not depend on hash iteration order.
        let predominant = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.index().cmp(&a.0.index())))
            .map(|(label, _)| *label);
        let predominant_share = predominant
            .and_then(|l| counts.get(&l))
            .map(|c| *c as f32 / total.max(1) as f32)
            .unwrap_or(0.0);

        let confidence = confidences
            .into_iter()
            .map(|(label, mut values)| (label, ConfidenceSummary::from_values(&mut values)))
            .collect();

        Self {
            total_detections: total,
            counts,
            predominant,
            predominant_share,
            confidence,
        }
    }

    /// Share of one emotion among all detections, in [0, 1].
    pub fn share(&self, label: EmotionLabel) -> f32 {
        if self.total_detections == 0 {
            return 0.0;
        }
        self.counts.get(&label).copied().unwrap_or(0) as f32 / self.total_detections as f32
    }

    /// Combined share of the negative emotion set.
    pub fn negative_share(&self) -> f32 {
        EmotionLabel::NEGATIVE.iter().map(|l| self.share(*l)).sum()
    }
}
