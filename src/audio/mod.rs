//! Audio stage: extracted-audio loading and verbal-communication
//! aggregation.
//!
//! Audio extraction from the source video is an external step; this
//! module consumes the extracted WAV, sends it to the speech-to-text
//! capability and derives communication metrics from the transcript.

pub mod stt;

pub use stt::{HttpSttClient, SpeechToText, SttError};

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to read audio file: {0}")]
    ReadError(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

/// Verbal-communication level, ordered from least to most verbal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationLevel {
    NoVerbal,
    PreVerbal,
    VerbalEmergente,
    VerbalFuncional,
}

impl CommunicationLevel {
    /// Classify from verbal attempt count and detected word count.
    /// `no_verbal` requires both to be zero; attempt tiers follow.
    pub fn classify(attempts: usize, words: usize) -> Self {
        if attempts == 0 && words == 0 {
            CommunicationLevel::NoVerbal
        } else if attempts < 3 {
            CommunicationLevel::PreVerbal
        } else if attempts < 8 {
            CommunicationLevel::VerbalEmergente
        } else {
            CommunicationLevel::VerbalFuncional
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommunicationLevel::NoVerbal => "no_verbal",
            CommunicationLevel::PreVerbal => "pre_verbal",
            CommunicationLevel::VerbalEmergente => "verbal_emergente",
            CommunicationLevel::VerbalFuncional => "verbal_funcional",
        }
    }
}

/// One transcribed span of the session audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSegmentResult {
    pub start_ms: u64,
    pub end_ms: u64,
    pub transcript: String,
    pub word_count: usize,
    pub quality: CommunicationLevel,
}

/// Aggregated audio analysis for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioAnalysis {
    /// Full transcript, empty when transcription failed or audio absent.
    pub transcript: String,
    pub words: Vec<String>,
    /// Words longer than one character count as verbal attempts.
    pub attempt_count: usize,
    pub word_count: usize,
    pub level: CommunicationLevel,
    pub segments: Vec<AudioSegmentResult>,
}

impl AudioAnalysis {
    /// The empty result used when the audio stage fails: zero attempts,
    /// zero words, no_verbal.
    pub fn empty() -> Self {
        Self {
            transcript: String::new(),
            words: Vec::new(),
            attempt_count: 0,
            word_count: 0,
            level: CommunicationLevel::NoVerbal,
            segments: Vec::new(),
        }
    }

    /// Build from a transcript spanning the given range.
    pub fn from_transcript(transcript: &str, start_ms: u64, end_ms: u64) -> Self {
        let words: Vec<String> = transcript
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation()).to_string())
            .filter(|w| !w.is_empty())
            .collect();
        let attempt_count = words.iter().filter(|w| w.chars().count() > 1).count();
        let word_count = words.len();
        let level = CommunicationLevel::classify(attempt_count, word_count);

        let segments = if transcript.trim().is_empty() {
            Vec::new()
        } else {
            vec![AudioSegmentResult {
                start_ms,
                end_ms,
                transcript: transcript.to_string(),
                word_count,
                quality: level,
            }]
        };

        Self {
            transcript: transcript.to_string(),
            words,
            attempt_count,
            word_count,
            level,
            segments,
        }
    }
}

/// Load an extracted WAV file as 16-bit-equivalent f32 samples, mixed
/// down to mono. Returns (samples, sample_rate).
pub fn load_wav(path: &Path) -> Result<(Vec<f32>, u32), AudioError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| AudioError::ReadError(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(AudioError::UnsupportedFormat("zero channels".to_string()));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| AudioError::ReadError(e.to_string()))?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::ReadError(e.to_string()))?
        }
    };

    let samples: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok((samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_no_verbal_requires_both_zero() {
        assert_eq!(CommunicationLevel::classify(0, 0), CommunicationLevel::NoVerbal);
        // A single-letter word is a word but not an attempt.
        assert_eq!(CommunicationLevel::classify(0, 1), CommunicationLevel::PreVerbal);
    }

    #[test]
    fn test_level_tiers() {
        assert_eq!(CommunicationLevel::classify(2, 3), CommunicationLevel::PreVerbal);
        assert_eq!(CommunicationLevel::classify(3, 3), CommunicationLevel::VerbalEmergente);
        assert_eq!(CommunicationLevel::classify(7, 9), CommunicationLevel::VerbalEmergente);
        assert_eq!(CommunicationLevel::classify(8, 10), CommunicationLevel::VerbalFuncional);
    }

    #[test]
    fn test_analysis_counts_attempts() {
        let analysis = AudioAnalysis::from_transcript("mamá quiero agua y pan", 0, 4000);
        assert_eq!(analysis.word_count, 5);
        // "y" is a single char, not an attempt.
        assert_eq!(analysis.attempt_count, 4);
        assert_eq!(analysis.level, CommunicationLevel::VerbalEmergente);
        assert_eq!(analysis.segments.len(), 1);
    }

    #[test]
    fn test_analysis_empty_transcript() {
        let analysis = AudioAnalysis::from_transcript("", 0, 1000);
        assert_eq!(analysis.level, CommunicationLevel::NoVerbal);
        assert!(analysis.segments.is_empty());
        assert_eq!(analysis.attempt_count, 0);
    }

    #[test]
    fn test_analysis_strips_punctuation() {
        let analysis = AudioAnalysis::from_transcript("¡hola! ¿agua?", 0, 1000);
        assert_eq!(analysis.word_count, 2);
        assert_eq!(analysis.attempt_count, 2);
    }

    #[test]
    fn test_load_wav_mono_int16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..160 {
            writer.write_sample((i * 100) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, rate) = load_wav(&path).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(samples.len(), 160);
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_load_wav_stereo_mixdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(1000i16).unwrap();
            writer.write_sample(-1000i16).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, _) = load_wav(&path).unwrap();
        assert_eq!(samples.len(), 100);
        // Opposite channels cancel in the mixdown.
        assert!(samples.iter().all(|s| s.abs() < 1e-4));
    }
}
