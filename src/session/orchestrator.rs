//! Stage orchestrator: runs the six analysis stages over one session.
//!
//! Stages are strictly sequential and isolated: a failing stage records
//! an error entry and yields its default output, and later stages still
//! run. Only pre-stage validation (unusable frame source) and failure to
//! persist the final record are terminal.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::{load_wav, AudioAnalysis, SpeechToText};
use crate::config::{resolve_session_config, Config, SessionOverrides};
use crate::ensemble::EnsembleScorer;
use crate::recommend::{
    CommunicativeContext, ContextualRecommender, EmotionalContext, RecommendationEngine,
};
use crate::vision::{
    crop_face, FaceDetection, FaceDetector, FaceSizePolicy, FrameDirSource, FrameResult,
    FrameSource,
};

use super::archive::SessionArchive;
use super::stats::EmotionStats;
use super::{evaluate_alerts, SessionResult, Stage};

/// Inputs for one session run. Frame extraction and audio extraction
/// happen upstream; the orchestrator consumes their outputs.
#[derive(Debug, Clone)]
pub struct SessionInputs {
    /// Directory of pre-extracted frame images.
    pub frames_dir: PathBuf,
    /// Extracted session audio (WAV); absent when the video had no audio
    /// track or extraction failed upstream.
    pub audio_path: Option<PathBuf>,
    /// Free-text diagnosis used for profile resolution and rules.
    pub diagnosis: Option<String>,
    /// Free-text context passed through to the recommendation service.
    pub user_context: String,
    pub overrides: SessionOverrides,
}

pub struct SessionRunner {
    config: Config,
    scorer: EnsembleScorer,
    detector: Box<dyn FaceDetector>,
    stt: Option<Box<dyn SpeechToText>>,
    recommender: ContextualRecommender,
    policy: FaceSizePolicy,
    stop_flag: Arc<AtomicBool>,
}

impl SessionRunner {
    pub fn new(
        config: Config,
        scorer: EnsembleScorer,
        detector: Box<dyn FaceDetector>,
        stt: Option<Box<dyn SpeechToText>>,
        recommender: ContextualRecommender,
    ) -> Self {
        let policy = FaceSizePolicy {
            min_area_ratio: config.min_face_area_ratio,
            max_area_ratio: config.max_face_area_ratio,
        };
        Self {
            config,
            scorer,
            detector,
            stt,
            recommender,
            policy,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag for aborting a running session mid-stage-1. Frames already
    /// scored are retained and later stages run over the partial set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    /// Run one full session and persist its record. Validation failures
    /// abort before any stage runs and nothing is persisted; a record
    /// that cannot be written is an environment error and also terminal.
    pub fn run(&self, inputs: &SessionInputs) -> Result<SessionResult> {
        let session_config =
            resolve_session_config(inputs.diagnosis.as_deref(), &inputs.overrides);
        let source = FrameDirSource::open(
            &inputs.frames_dir,
            session_config.profile.frame_interval_ms,
        )
        .context("Session validation failed")?;

        let result = self.run_with_source(Box::new(source), inputs);

        let results_dir = self.config.get_results_dir()?;
        let archive = SessionArchive::new(results_dir);
        archive
            .persist(&result)
            .context("Failed to persist session record")?;
        Ok(result)
    }

    /// Run the six stages over an already-validated frame source. Never
    /// fails: stage errors are collected in the returned record.
    pub fn run_with_source(
        &self,
        mut source: Box<dyn FrameSource>,
        inputs: &SessionInputs,
    ) -> SessionResult {
        let session_config =
            resolve_session_config(inputs.diagnosis.as_deref(), &inputs.overrides);
        let threshold = session_config.profile.confidence_threshold;
        let mut result = SessionResult::new(session_config);
        info!(
            "Session {} started (profile {:?}, {} model(s))",
            result.session_id,
            result.config.profile.category,
            self.scorer.model_count()
        );

        // Stage 1: facial analysis.
        let errors_before = result.errors.len();
        loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                info!(
                    "Session cancelled, retaining {} scored frame(s)",
                    result.frames.len()
                );
                break;
            }
            if result.frames.len() >= self.config.max_frames {
                info!(
                    "Frame cap of {} reached, retaining scored frames",
                    self.config.max_frames
                );
                break;
            }
            match source.next_frame() {
                Ok(Some(frame)) => match self.detector.detect(&frame.image) {
                    Ok(boxes) => {
                        let (w, h) = frame.image.dimensions();
                        let detections: Vec<FaceDetection> = boxes
                            .into_iter()
                            .filter_map(|bbox| {
                                let face = crop_face(&frame.image, &bbox)?;
                                let distribution = self.scorer.distribution(&face);
                                let quality = self.policy.quality(&bbox, w, h);
                                Some(FaceDetection::new(
                                    frame.frame_id,
                                    bbox,
                                    distribution,
                                    quality,
                                ))
                            })
                            .collect();
                        result.frames.push(FrameResult {
                            frame_id: frame.frame_id,
                            timestamp_ms: frame.timestamp_ms,
                            detections,
                        });
                    }
                    Err(e) => {
                        warn!("Face detection failed on frame {}: {}", frame.frame_id, e);
                        result.record_error(Stage::FacialAnalysis, e);
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Frame source failed: {}", e);
                    result.record_error(Stage::FacialAnalysis, e);
                    break;
                }
            }
        }
        // Frame order is an observable invariant for timeline consumers,
        // independent of how scoring was scheduled.
        result.frames.sort_by_key(|f| f.frame_id);
        if result.errors.len() == errors_before {
            result.mark_completed(Stage::FacialAnalysis);
        }
        debug!("Stage 1 done: {} frame(s)", result.frames.len());

        // Stage 2: confidence filtering.
        let (filtered, dropped) = filter_by_confidence(&result.frames, threshold);
        result.filtered_frames = filtered;
        result.dropped_detections = dropped;
        result.mark_completed(Stage::ConfidenceFiltering);
        debug!(
            "Stage 2 done: {} frame(s) kept, {} detection(s) dropped",
            result.filtered_frames.len(),
            dropped
        );

        result.stats = EmotionStats::from_frames(&result.filtered_frames);

        // Stage 3: audio analysis.
        match self.analyze_audio(inputs) {
            Ok(audio) => {
                result.audio = audio;
                result.mark_completed(Stage::AudioAnalysis);
            }
            Err(e) => {
                warn!("Audio stage failed: {}", e);
                result.record_error(Stage::AudioAnalysis, e);
            }
        }

        let emotional = EmotionalContext::classify(&result.stats.counts);
        let communicative = CommunicativeContext::classify(&result.audio);

        // Stage 4: generic rule-based recommendations.
        let generic = RecommendationEngine::generate(
            inputs.diagnosis.as_deref(),
            &emotional,
            &communicative,
        );
        merge_recommendations(&mut result.recommendations, generic);
        result.mark_completed(Stage::GenericRecommendations);

        // Stage 5: contextual diagnosis-aware recommendations.
        match self.recommender.fetch(
            inputs.diagnosis.as_deref().unwrap_or_default(),
            &inputs.user_context,
            &emotional,
            &communicative,
        ) {
            Ok(contextual) => {
                merge_recommendations(&mut result.recommendations, contextual);
                result.mark_completed(Stage::ContextualRecommendations);
            }
            Err(e) => {
                warn!("Contextual recommendation stage failed: {}", e);
                result.record_error(Stage::ContextualRecommendations, e);
            }
        }

        // Stage 6: alert evaluation; the record write happens in `run`.
        result.alerts = evaluate_alerts(
            &result.stats,
            &result.audio,
            &result.config.profile,
            result.errors.len(),
        );
        result.mark_completed(Stage::ReportAndAlerts);
        result.finalize();
        info!(
            "Session {} finished: priority {:?}, {} alert(s), {} error(s)",
            result.session_id,
            result.priority,
            result.alerts.len(),
            result.errors.len()
        );
        result
    }

    fn analyze_audio(&self, inputs: &SessionInputs) -> Result<AudioAnalysis> {
        let path = inputs
            .audio_path
            .as_ref()
            .context("No extracted audio available for this session")?;
        let (samples, sample_rate) = load_wav(path)?;
        let stt = self
            .stt
            .as_ref()
            .context("No speech-to-text endpoint configured")?;
        let transcript = stt.transcribe(&samples, sample_rate, &self.config.language)?;
        let duration_ms = samples.len() as u64 * 1000 / sample_rate.max(1) as u64;
        Ok(AudioAnalysis::from_transcript(&transcript, 0, duration_ms))
    }
}

/// Drop detections below the threshold; frames left with no detections
/// are excluded from the filtered sequence. Returns the filtered frames
/// and the dropped-detection count. Idempotent for a fixed threshold.
pub fn filter_by_confidence(
    frames: &[FrameResult],
    threshold: f32,
) -> (Vec<FrameResult>, usize) {
    let mut dropped = 0usize;
    let filtered = frames
        .iter()
        .filter_map(|frame| {
            let detections: Vec<FaceDetection> = frame
                .detections
                .iter()
                .filter(|d| d.confidence >= threshold)
                .cloned()
                .collect();
            dropped += frame.detections.len() - detections.len();
            if detections.is_empty() {
                None
            } else {
                Some(FrameResult {
                    frame_id: frame.frame_id,
                    timestamp_ms: frame.timestamp_ms,
                    detections,
                })
            }
        })
        .collect();
    (filtered, dropped)
}

/// Append new recommendations, skipping exact strings already present.
fn merge_recommendations(existing: &mut Vec<String>, incoming: Vec<String>) {
    for item in incoming {
        if !existing.contains(&item) {
            existing.push(item);
        }
    }
}
