//! Rule-based recommendation engine.
//!
//! Four independent rule sets fire against the classified context:
//! diagnosis-specific, emotional, communicative, and cross-context
//! integrated rules. Their outputs are concatenated in that fixed order,
//! deduplicated by exact string preserving first-seen order, and replaced
//! by a default list when nothing fired.

use std::collections::HashMap;
use tracing::debug;

use crate::audio::CommunicationLevel;
use crate::diagnosis::DiagnosisCategory;
use crate::emotion::EmotionLabel;

use super::context::{
    Clarity, CommunicativeContext, EmotionalContext, EmotionalPattern, Stability, Variability,
};

/// Default recommendations when no rule fires. Diagnosis-agnostic.
const DEFAULT_RECOMMENDATIONS: &[&str] = &[
    "Mantener rutinas de interacción y observación regulares.",
    "Registrar nuevas sesiones para ampliar la base de observación.",
];

pub struct RecommendationEngine;

impl RecommendationEngine {
    /// Evaluate all rule sets and return the deduplicated, never-empty
    /// recommendation list.
    pub fn generate(
        diagnosis: Option<&str>,
        emotional: &EmotionalContext,
        communicative: &CommunicativeContext,
    ) -> Vec<String> {
        let category = diagnosis
            .map(DiagnosisCategory::match_text)
            .unwrap_or(DiagnosisCategory::Default);

        let mut out: Vec<String> = Vec::new();
        out.extend(diagnosis_rules(category).iter().map(|s| s.to_string()));
        out.extend(emotional_rules(emotional).iter().map(|s| s.to_string()));
        out.extend(communicative_rules(communicative).iter().map(|s| s.to_string()));
        out.extend(
            integrated_rules(emotional, communicative)
                .iter()
                .map(|s| s.to_string()),
        );

        let deduped = dedup_preserving_order(out);
        if deduped.is_empty() {
            debug!("No recommendation rules fired, using defaults");
            return DEFAULT_RECOMMENDATIONS.iter().map(|s| s.to_string()).collect();
        }
        deduped
    }
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, ()> = HashMap::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(item.clone(), ()).is_none() {
            out.push(item);
        }
    }
    out
}

/// Diagnosis-specific guidance, keyed by the shared category matcher.
fn diagnosis_rules(category: DiagnosisCategory) -> &'static [&'static str] {
    match category {
        DiagnosisCategory::Autism => &[
            "Usar apoyos visuales y anticipación de cambios en la rutina.",
            "Reducir estímulos sensoriales intensos durante las actividades.",
        ],
        DiagnosisCategory::Adhd => &[
            "Dividir las actividades en pasos cortos con pausas frecuentes.",
            "Reforzar positivamente los momentos de atención sostenida.",
        ],
        DiagnosisCategory::DownSyndrome => &[
            "Acompañar las consignas verbales con gestos y modelado.",
            "Dar tiempo adicional de respuesta antes de repetir la consigna.",
        ],
        DiagnosisCategory::CerebralPalsy => &[
            "Adaptar materiales y posiciones para facilitar la participación motora.",
        ],
        DiagnosisCategory::Default => &[],
    }
}

fn emotional_rules(ctx: &EmotionalContext) -> Vec<&'static str> {
    let mut out = Vec::new();

    match ctx.pattern {
        EmotionalPattern::PredominioNegativo => {
            out.push("Se observa un patrón emocional negativo; se recomienda acompañamiento emocional cercano.");
        }
        EmotionalPattern::PredominioPositivo => {
            out.push("Patrón emocional positivo; mantener las actividades que lo favorecen.");
        }
        EmotionalPattern::PredominioNeutral => {
            out.push("Expresividad emocional reducida; introducir actividades de mayor interés para el niño.");
        }
        EmotionalPattern::Equilibrado => {}
    }

    match ctx.predominant {
        Some(EmotionLabel::Sad) => {
            out.push("Se detectó tristeza frecuente; se recomienda acompañamiento emocional cercano.");
        }
        Some(EmotionLabel::Angry) => {
            out.push("Episodios de enfado frecuentes; anticipar transiciones y ofrecer alternativas de regulación.");
        }
        Some(EmotionLabel::Fear) => {
            out.push("Señales de miedo o ansiedad; revisar posibles desencadenantes del entorno.");
        }
        _ => {}
    }

    if ctx.stability == Stability::Baja && ctx.variability == Variability::Alta {
        out.push("Alta variabilidad emocional; estructurar la sesión con rutinas predecibles.");
    }

    out
}

fn communicative_rules(ctx: &CommunicativeContext) -> Vec<&'static str> {
    let mut out = Vec::new();

    match ctx.level {
        CommunicationLevel::NoVerbal => {
            out.push("Ausencia de comunicación verbal; valorar sistemas aumentativos y alternativos de comunicación (SAAC).");
        }
        CommunicationLevel::PreVerbal => {
            out.push("Baja frecuencia de intentos verbales, se sugiere estimular comunicación verbal.");
        }
        CommunicationLevel::VerbalEmergente => {
            out.push("Lenguaje emergente; modelar frases cortas ampliando las emisiones del niño.");
        }
        CommunicationLevel::VerbalFuncional => {}
    }

    if ctx.clarity == Clarity::MuyLimitada || ctx.clarity == Clarity::Limitada {
        out.push("Claridad del habla limitada; considerar apoyo de logopedia.");
    }

    if ctx.vocabulary_ratio < 0.3 && ctx.word_count > 0 {
        out.push("Vocabulario poco ajustado a la edad; reforzar vocabulario funcional cotidiano.");
    }

    out
}

/// Cross-context rules: combinations that mean something neither side
/// means alone.
fn integrated_rules(
    emotional: &EmotionalContext,
    communicative: &CommunicativeContext,
) -> Vec<&'static str> {
    let mut out = Vec::new();

    if emotional.pattern == EmotionalPattern::PredominioNegativo
        && communicative.level == CommunicationLevel::NoVerbal
    {
        out.push("Posible frustración por dificultades de comunicación; priorizar un canal de comunicación alternativo antes de exigir verbalización.");
    }

    if emotional.pattern == EmotionalPattern::PredominioPositivo
        && communicative.level >= CommunicationLevel::VerbalEmergente
    {
        out.push("Buen momento comunicativo y emocional; aprovechar para introducir vocabulario nuevo.");
    }

    if emotional.stability == Stability::Baja
        && communicative.clarity == Clarity::Inaudible
    {
        out.push("Inestabilidad emocional sin canal verbal; observar señales corporales de malestar.");
    }

    out
}
