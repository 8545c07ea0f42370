//! End-to-end session tests with mock capabilities.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use image::GrayImage;
use ndarray::ArrayD;

use crate::audio::{SpeechToText, SttError};
use crate::config::{Config, SessionOverrides};
use crate::emotion::{EmotionLabel, SUM_TOLERANCE};
use crate::ensemble::{ClassifierError, EmotionClassifier, EnsembleScorer, ModelDescriptor};
use crate::recommend::{ContextualRecommender, RecommendationCache};
use crate::session::{
    orchestrator::filter_by_confidence, AlertLevel, AlertType, Priority, SessionInputs,
    SessionRunner, Stage,
};
use crate::vision::{
    BoundingBox, FaceDetection, FaceDetector, FrameResult, FrameSource, SampledFrame,
    VisionError,
};

struct FixedClassifier(Vec<f32>);

impl EmotionClassifier for FixedClassifier {
    fn infer(&mut self, _input: &ArrayD<f32>) -> Result<Vec<f32>, ClassifierError> {
        Ok(self.0.clone())
    }
}

struct VecFrameSource {
    frames: VecDeque<SampledFrame>,
}

impl VecFrameSource {
    fn new(count: usize) -> Self {
        let frames = (0..count as u64)
            .map(|frame_id| SampledFrame {
                frame_id,
                timestamp_ms: frame_id * 1000,
                image: textured_frame(32, 32),
            })
            .collect();
        Self { frames }
    }
}

impl FrameSource for VecFrameSource {
    fn next_frame(&mut self) -> Result<Option<SampledFrame>, VisionError> {
        Ok(self.frames.pop_front())
    }
}

/// Detector that reports one fixed face per frame.
struct OneFaceDetector;

impl FaceDetector for OneFaceDetector {
    fn detect(&self, _frame: &GrayImage) -> Result<Vec<BoundingBox>, VisionError> {
        Ok(vec![BoundingBox { x: 2, y: 2, width: 28, height: 28 }])
    }
}

struct BrokenDetector;

impl FaceDetector for BrokenDetector {
    fn detect(&self, _frame: &GrayImage) -> Result<Vec<BoundingBox>, VisionError> {
        Err(VisionError::DetectionError("camera fault".to_string()))
    }
}

struct FixedStt(String);

impl SpeechToText for FixedStt {
    fn transcribe(&self, _: &[f32], _: u32, _: &str) -> Result<String, SttError> {
        Ok(self.0.clone())
    }
}

fn textured_frame(w: u32, h: u32) -> GrayImage {
    GrayImage::from_fn(w, h, |x, y| image::Luma([((x * 7 + y * 13) % 256) as u8]))
}

fn descriptor(name: &str, weight: f32) -> ModelDescriptor {
    ModelDescriptor {
        name: name.to_string(),
        file: format!("{}.onnx", name),
        weight,
        input_height: 48,
        input_width: 48,
        tensor_rank: 4,
    }
}

fn sad_scorer() -> EnsembleScorer {
    EnsembleScorer::from_classifiers(vec![(
        descriptor("sad", 1.0),
        Box::new(FixedClassifier(vec![0.02, 0.02, 0.02, 0.02, 0.88, 0.02, 0.02])),
    )])
}

fn runner(
    scorer: EnsembleScorer,
    detector: Box<dyn FaceDetector>,
    stt: Option<Box<dyn SpeechToText>>,
) -> SessionRunner {
    let cache = Arc::new(RecommendationCache::new(Duration::from_secs(60)));
    SessionRunner::new(
        Config::default(),
        scorer,
        detector,
        stt,
        ContextualRecommender::new(None, cache),
    )
}

fn inputs(diagnosis: Option<&str>, overrides: SessionOverrides) -> SessionInputs {
    SessionInputs {
        frames_dir: PathBuf::from("unused"),
        audio_path: None,
        diagnosis: diagnosis.map(|d| d.to_string()),
        user_context: "sesión de juego".to_string(),
        overrides,
    }
}

fn wav_file(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("audio.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..16000 {
        writer.write_sample(((i % 100) * 50) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

// Ten frames, one Sad face each at high confidence, threshold 0.5:
// predominant Sad at 100%, one emotional/alto alert, a sadness-related
// recommendation.
#[test]
fn test_sad_session_end_to_end() {
    let runner = runner(sad_scorer(), Box::new(OneFaceDetector), None);
    let overrides = SessionOverrides {
        confidence_threshold: Some(0.5),
        ..Default::default()
    };
    let result = runner.run_with_source(
        Box::new(VecFrameSource::new(10)),
        &inputs(None, overrides),
    );

    assert_eq!(result.frames.len(), 10);
    assert_eq!(result.filtered_frames.len(), 10);
    assert_eq!(result.stats.predominant, Some(EmotionLabel::Sad));
    assert!((result.stats.predominant_share - 1.0).abs() < SUM_TOLERANCE);

    let emotional: Vec<_> = result
        .alerts
        .iter()
        .filter(|a| a.alert_type == AlertType::Emotional)
        .collect();
    assert_eq!(emotional.len(), 1);
    assert_eq!(emotional[0].level, AlertLevel::Alto);
    assert_eq!(result.priority, Priority::Critico);

    assert!(result.recommendations.iter().any(|r| r.contains("tristeza")));
}

// Zero configured models: every prediction goes through the fallback.
#[test]
fn test_empty_ensemble_uses_fallback_everywhere() {
    let runner = runner(
        EnsembleScorer::from_classifiers(Vec::new()),
        Box::new(OneFaceDetector),
        None,
    );
    let result = runner.run_with_source(
        Box::new(VecFrameSource::new(5)),
        &inputs(None, SessionOverrides::default()),
    );

    assert_eq!(result.frames.len(), 5);
    for frame in &result.frames {
        for detection in &frame.detections {
            assert!(detection.confidence <= 0.4 + SUM_TOLERANCE);
            assert!([
                EmotionLabel::Sad,
                EmotionLabel::Neutral,
                EmotionLabel::Happy,
                EmotionLabel::Surprise
            ]
            .contains(&detection.emotion));
        }
    }
    // Nothing clears the default 0.6 threshold.
    assert!(result.filtered_frames.is_empty());
    assert_eq!(result.stats.total_detections, 0);
}

// Empty transcript: no_verbal level, communication/alto alert, and an
// augmentative-communication suggestion.
#[test]
fn test_silent_audio_raises_communication_alert() {
    let dir = tempfile::tempdir().unwrap();
    let audio_path = wav_file(dir.path());

    let runner = runner(
        sad_scorer(),
        Box::new(OneFaceDetector),
        Some(Box::new(FixedStt(String::new()))),
    );
    let mut session_inputs = inputs(None, SessionOverrides::default());
    session_inputs.audio_path = Some(audio_path);

    let result =
        runner.run_with_source(Box::new(VecFrameSource::new(3)), &session_inputs);

    assert!(result.completed_stages.contains(&Stage::AudioAnalysis));
    assert_eq!(result.audio.attempt_count, 0);
    assert_eq!(result.audio.word_count, 0);
    let comm: Vec<_> = result
        .alerts
        .iter()
        .filter(|a| a.alert_type == AlertType::Communication)
        .collect();
    assert_eq!(comm.len(), 1);
    assert_eq!(comm[0].level, AlertLevel::Alto);
    assert!(result.recommendations.iter().any(|r| r.contains("aumentativos")));
}

#[test]
fn test_transcribed_audio_flows_into_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let audio_path = wav_file(dir.path());

    let runner = runner(
        sad_scorer(),
        Box::new(OneFaceDetector),
        Some(Box::new(FixedStt(
            "quiero jugar con la pelota y despues comer pan con leche en casa".to_string(),
        ))),
    );
    let mut session_inputs = inputs(None, SessionOverrides::default());
    session_inputs.audio_path = Some(audio_path);

    let result =
        runner.run_with_source(Box::new(VecFrameSource::new(3)), &session_inputs);

    assert!(result.audio.attempt_count >= 8);
    assert!(!result
        .alerts
        .iter()
        .any(|a| a.alert_type == AlertType::Communication));
    assert!(result.errors.is_empty());
}

// A broken detector degrades stage 1 but later stages still run, and
// enough errors surface as a technical alert.
#[test]
fn test_stage_isolation_and_technical_alert() {
    let runner = runner(sad_scorer(), Box::new(BrokenDetector), None);
    let result = runner.run_with_source(
        Box::new(VecFrameSource::new(3)),
        &inputs(None, SessionOverrides::default()),
    );

    // Three per-frame detection errors plus the missing-audio error.
    assert!(result.errors.len() > 2);
    assert!(!result.completed_stages.contains(&Stage::FacialAnalysis));
    assert!(result.completed_stages.contains(&Stage::ConfidenceFiltering));
    assert!(result.completed_stages.contains(&Stage::GenericRecommendations));
    assert!(result.completed_stages.contains(&Stage::ReportAndAlerts));
    assert!(result
        .alerts
        .iter()
        .any(|a| a.alert_type == AlertType::Technical && a.level == AlertLevel::Medio));
    // Even a fully degraded session yields guidance.
    assert!(!result.recommendations.is_empty());
}

#[test]
fn test_cancellation_retains_partial_frames() {
    let runner = runner(sad_scorer(), Box::new(OneFaceDetector), None);
    runner.stop_handle().store(true, Ordering::SeqCst);
    let result = runner.run_with_source(
        Box::new(VecFrameSource::new(10)),
        &inputs(None, SessionOverrides::default()),
    );

    // Stopped before any frame; the session still completes and finalizes.
    assert!(result.frames.is_empty());
    assert!(result.completed_stages.contains(&Stage::ReportAndAlerts));
    assert!(result.ended_at.is_some());
}

#[test]
fn test_frame_cap_retains_partial_frames() {
    let cache = Arc::new(RecommendationCache::new(Duration::from_secs(60)));
    let config = Config {
        max_frames: 4,
        ..Config::default()
    };
    let runner = SessionRunner::new(
        config,
        sad_scorer(),
        Box::new(OneFaceDetector),
        None,
        ContextualRecommender::new(None, cache),
    );
    let result = runner.run_with_source(
        Box::new(VecFrameSource::new(10)),
        &inputs(None, SessionOverrides::default()),
    );
    assert_eq!(result.frames.len(), 4);
}

#[test]
fn test_diagnosis_profile_flows_into_session() {
    let runner = runner(sad_scorer(), Box::new(OneFaceDetector), None);
    let result = runner.run_with_source(
        Box::new(VecFrameSource::new(2)),
        &inputs(Some("TEA grado 1"), SessionOverrides::default()),
    );
    assert_eq!(
        result.config.profile.category,
        crate::diagnosis::DiagnosisCategory::Autism
    );
    // Autism profile rules fire ahead of generic ones.
    assert!(result.recommendations.iter().any(|r| r.contains("apoyos visuales")));
}

#[test]
fn test_run_validates_and_persists() {
    let frames_dir = tempfile::tempdir().unwrap();
    for i in 0..3 {
        textured_frame(32, 32)
            .save(frames_dir.path().join(format!("frame_{:06}.png", i)))
            .unwrap();
    }
    let results_dir = tempfile::tempdir().unwrap();

    let cache = Arc::new(RecommendationCache::new(Duration::from_secs(60)));
    let config = Config {
        results_dir: Some(results_dir.path().to_path_buf()),
        ..Config::default()
    };
    let runner = SessionRunner::new(
        config,
        sad_scorer(),
        Box::new(OneFaceDetector),
        None,
        ContextualRecommender::new(None, cache),
    );

    let mut session_inputs = inputs(None, SessionOverrides::default());
    session_inputs.frames_dir = frames_dir.path().to_path_buf();
    let result = runner.run(&session_inputs).unwrap();

    let record = glob_session_record(results_dir.path());
    assert!(record.ends_with("session.json"));
    assert!(record.to_string_lossy().contains(&result.session_id.to_string()));
}

#[test]
fn test_run_rejects_missing_frames_dir() {
    let runner = runner(sad_scorer(), Box::new(OneFaceDetector), None);
    let mut session_inputs = inputs(None, SessionOverrides::default());
    session_inputs.frames_dir = PathBuf::from("/nonexistent/frames");
    assert!(runner.run(&session_inputs).is_err());
}

fn glob_session_record(base: &std::path::Path) -> PathBuf {
    let mut stack = vec![base.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().and_then(|n| n.to_str()) == Some("session.json") {
                return path;
            }
        }
    }
    panic!("no session record found under {:?}", base);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_weights_sum_to_one(weights in proptest::collection::vec(0.01f32..1.0, 1..5)) {
            let models: Vec<(ModelDescriptor, Box<dyn EmotionClassifier>)> = weights
                .iter()
                .enumerate()
                .map(|(i, w)| {
                    let boxed: Box<dyn EmotionClassifier> = Box::new(FixedClassifier(vec![
                        0.02, 0.02, 0.02, 0.88, 0.02, 0.02, 0.02,
                    ]));
                    (descriptor(&format!("m{}", i), *w), boxed)
                })
                .collect();
            let scorer = EnsembleScorer::from_classifiers(models);
            let sum: f32 = scorer.weights().iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-5);
        }

        #[test]
        fn prop_filtering_is_idempotent(
            confidences in proptest::collection::vec(
                proptest::collection::vec(0.0f32..1.0, 0..4),
                0..8,
            ),
            threshold in 0.0f32..1.0,
        ) {
            let frames: Vec<FrameResult> = confidences
                .iter()
                .enumerate()
                .map(|(i, frame_confs)| FrameResult {
                    frame_id: i as u64,
                    timestamp_ms: i as u64 * 1000,
                    detections: frame_confs
                        .iter()
                        .map(|c| {
                            FaceDetection::new(
                                i as u64,
                                BoundingBox { x: 0, y: 0, width: 10, height: 10 },
                                crate::emotion::EmotionDistribution::peaked(
                                    EmotionLabel::Happy,
                                    *c,
                                ),
                                0.5,
                            )
                        })
                        .collect(),
                })
                .collect();

            let (once, _) = filter_by_confidence(&frames, threshold);
            let (twice, dropped_twice) = filter_by_confidence(&once, threshold);
            prop_assert_eq!(dropped_twice, 0);
            prop_assert_eq!(once.len(), twice.len());
        }
    }
}
