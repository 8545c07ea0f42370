//! Classified emotional and communicative context.
//!
//! The rule engine never looks at raw detections; it fires against these
//! classified summaries. Tier thresholds are product-tuned constants.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::audio::{AudioAnalysis, CommunicationLevel};
use crate::emotion::EmotionLabel;

/// One side must exceed the other by this factor to count as dominance.
pub const DOMINANCE_RATIO: f32 = 1.5;
/// Predominant-emotion share above which the pattern counts as stable.
pub const STABILITY_ALTA_SHARE: f32 = 0.6;
pub const STABILITY_MEDIA_SHARE: f32 = 0.4;
/// Distinct-emotion counts bounding variability tiers.
pub const VARIABILITY_BAJA_MAX: usize = 2;
pub const VARIABILITY_MEDIA_MAX: usize = 4;
/// Transcript character lengths bounding clarity tiers.
pub const CLARITY_MUY_LIMITADA_MAX: usize = 10;
pub const CLARITY_LIMITADA_MAX: usize = 50;
/// Word counts bounding complexity tiers.
pub const COMPLEXITY_SIMPLES_MAX: usize = 5;
pub const COMPLEXITY_BASICAS_MAX: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalPattern {
    PredominioNegativo,
    PredominioPositivo,
    PredominioNeutral,
    Equilibrado,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Alta,
    Media,
    Baja,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variability {
    Baja,
    Media,
    Alta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionalContext {
    pub pattern: EmotionalPattern,
    pub stability: Stability,
    pub variability: Variability,
    pub predominant: Option<EmotionLabel>,
    /// Share of the predominant emotion among all detections, in [0, 1].
    pub predominant_share: f32,
    pub positive_count: usize,
    pub negative_count: usize,
    pub neutral_count: usize,
}

impl EmotionalContext {
    /// Classify from per-emotion detection counts.
    pub fn classify(counts: &HashMap<EmotionLabel, usize>) -> Self {
        let positive: usize = counts
            .iter()
            .filter(|(l, _)| l.is_positive())
            .map(|(_, c)| c)
            .sum();
        let negative: usize = counts
            .iter()
            .filter(|(l, _)| l.is_negative())
            .map(|(_, c)| c)
            .sum();
        let neutral: usize = counts.get(&EmotionLabel::Neutral).copied().unwrap_or(0);
        let total: usize = counts.values().sum();

        let pattern = if negative as f32 > positive as f32 * DOMINANCE_RATIO && negative > 0 {
            EmotionalPattern::PredominioNegativo
        } else if positive as f32 > negative as f32 * DOMINANCE_RATIO && positive > 0 {
            EmotionalPattern::PredominioPositivo
        } else if neutral > positive + negative {
            EmotionalPattern::PredominioNeutral
        } else {
            EmotionalPattern::Equilibrado
        };

        let (predominant, predominant_share) = counts
            .iter()
            .filter(|(_, c)| **c > 0)
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.index().cmp(&a.0.index())))
            .map(|(l, c)| (Some(*l), *c as f32 / total.max(1) as f32))
            .unwrap_or((None, 0.0));

        let stability = if predominant_share > STABILITY_ALTA_SHARE {
            Stability::Alta
        } else if predominant_share > STABILITY_MEDIA_SHARE {
            Stability::Media
        } else {
            Stability::Baja
        };

        let distinct = counts.iter().filter(|(_, c)| **c > 0).count();
        let variability = if distinct <= VARIABILITY_BAJA_MAX {
            Variability::Baja
        } else if distinct <= VARIABILITY_MEDIA_MAX {
            Variability::Media
        } else {
            Variability::Alta
        };

        Self {
            pattern,
            stability,
            variability,
            predominant,
            predominant_share,
            positive_count: positive,
            negative_count: negative,
            neutral_count: neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clarity {
    Inaudible,
    MuyLimitada,
    Limitada,
    Clara,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    SinLenguaje,
    PalabrasSimples,
    FrasesBasicas,
    LenguajeElaborado,
}

/// Small lexicon of early-acquisition Spanish words used for the
/// vocabulary-appropriateness ratio.
const AGE_APPROPRIATE_WORDS: &[&str] = &[
    "mamá", "mama", "papá", "papa", "agua", "pan", "más", "mas", "no", "sí", "si", "quiero",
    "dame", "toma", "hola", "adiós", "adios", "casa", "perro", "gato", "pelota", "jugar",
    "comer", "dormir", "leche", "galleta", "mío", "mio", "aquí", "aqui", "ven", "mira",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicativeContext {
    pub level: CommunicationLevel,
    pub clarity: Clarity,
    pub complexity: Complexity,
    /// age-appropriate words / max(total words, 1)
    pub vocabulary_ratio: f32,
    pub attempt_count: usize,
    pub word_count: usize,
}

impl CommunicativeContext {
    pub fn classify(audio: &AudioAnalysis) -> Self {
        let transcript = audio.transcript.trim();
        let clarity = if transcript.is_empty() {
            Clarity::Inaudible
        } else if transcript.chars().count() < CLARITY_MUY_LIMITADA_MAX {
            Clarity::MuyLimitada
        } else if transcript.chars().count() < CLARITY_LIMITADA_MAX {
            Clarity::Limitada
        } else {
            Clarity::Clara
        };

        let complexity = if audio.word_count == 0 {
            Complexity::SinLenguaje
        } else if audio.word_count < COMPLEXITY_SIMPLES_MAX {
            Complexity::PalabrasSimples
        } else if audio.word_count < COMPLEXITY_BASICAS_MAX {
            Complexity::FrasesBasicas
        } else {
            Complexity::LenguajeElaborado
        };

        let appropriate = audio
            .words
            .iter()
            .filter(|w| AGE_APPROPRIATE_WORDS.contains(&w.to_lowercase().as_str()))
            .count();
        let vocabulary_ratio = appropriate as f32 / audio.word_count.max(1) as f32;

        Self {
            level: audio.level,
            clarity,
            complexity,
            vocabulary_ratio,
            attempt_count: audio.attempt_count,
            word_count: audio.word_count,
        }
    }
}
