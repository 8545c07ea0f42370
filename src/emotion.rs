//! Emotion label set and probability distributions.
//!
//! The seven labels and their index order are fixed by the trained
//! classifiers; every model in the ensemble emits probabilities in this
//! order, so the order is load-bearing and must never change.

use serde::{Deserialize, Serialize};

/// Tolerance when checking that a distribution sums to one.
pub const SUM_TOLERANCE: f32 = 1e-6;

/// The fixed emotion label set, in classifier output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl EmotionLabel {
    pub const COUNT: usize = 7;

    /// All labels in classifier output order.
    pub const ALL: [EmotionLabel; Self::COUNT] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
    ];

    /// Labels counted as negative for alert evaluation.
    pub const NEGATIVE: [EmotionLabel; 4] = [
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Fear,
        EmotionLabel::Disgust,
    ];

    /// Labels counted as positive for context classification.
    pub const POSITIVE: [EmotionLabel; 2] = [EmotionLabel::Happy, EmotionLabel::Surprise];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Angry => "Angry",
            EmotionLabel::Disgust => "Disgust",
            EmotionLabel::Fear => "Fear",
            EmotionLabel::Happy => "Happy",
            EmotionLabel::Sad => "Sad",
            EmotionLabel::Surprise => "Surprise",
            EmotionLabel::Neutral => "Neutral",
        }
    }

    pub fn is_negative(&self) -> bool {
        Self::NEGATIVE.contains(self)
    }

    pub fn is_positive(&self) -> bool {
        Self::POSITIVE.contains(self)
    }
}

impl std::fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmotionLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown emotion label: {}", s))
    }
}

/// A probability distribution over the seven emotion labels.
///
/// Invariant: all values non-negative and summing to 1 (within
/// [`SUM_TOLERANCE`]). Construction renormalizes, so the invariant holds
/// for any non-degenerate input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionDistribution([f32; EmotionLabel::COUNT]);

impl EmotionDistribution {
    /// Build from raw (non-negative) scores, renormalizing to sum to 1.
    /// Returns `None` for malformed input: wrong length handled by the
    /// array type, but NaN, negative values, or an all-zero vector are
    /// rejected here.
    pub fn from_scores(scores: &[f32]) -> Option<Self> {
        if scores.len() != EmotionLabel::COUNT {
            return None;
        }
        if scores.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return None;
        }
        let sum: f32 = scores.iter().sum();
        if sum <= 0.0 {
            return None;
        }
        let mut values = [0.0f32; EmotionLabel::COUNT];
        for (out, v) in values.iter_mut().zip(scores) {
            *out = v / sum;
        }
        Some(Self(values))
    }

    /// The uniform distribution.
    pub fn uniform() -> Self {
        Self([1.0 / EmotionLabel::COUNT as f32; EmotionLabel::COUNT])
    }

    /// A distribution that puts `confidence` on `label` and spreads the
    /// remaining mass uniformly over the other labels.
    pub fn peaked(label: EmotionLabel, confidence: f32) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        let rest = (1.0 - confidence) / (EmotionLabel::COUNT - 1) as f32;
        let mut values = [rest; EmotionLabel::COUNT];
        values[label.index()] = confidence;
        Self(values)
    }

    pub fn probability(&self, label: EmotionLabel) -> f32 {
        self.0[label.index()]
    }

    pub fn values(&self) -> &[f32; EmotionLabel::COUNT] {
        &self.0
    }

    /// The most probable label and its probability.
    pub fn top(&self) -> (EmotionLabel, f32) {
        let mut best = 0;
        for i in 1..EmotionLabel::COUNT {
            if self.0[i] > self.0[best] {
                best = i;
            }
        }
        (EmotionLabel::ALL[best], self.0[best])
    }

    /// Blend toward uniform: `(1 - epsilon) * self + epsilon * uniform`,
    /// then renormalize. Keeps a single model spike from dominating.
    pub fn smoothed(&self, epsilon: f32) -> Self {
        let uniform = 1.0 / EmotionLabel::COUNT as f32;
        let mut values = [0.0f32; EmotionLabel::COUNT];
        for (out, v) in values.iter_mut().zip(&self.0) {
            *out = (1.0 - epsilon) * v + epsilon * uniform;
        }
        let sum: f32 = values.iter().sum();
        for v in values.iter_mut() {
            *v /= sum;
        }
        Self(values)
    }

    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }
}
