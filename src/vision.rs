//! Frame sources, face detection seams and per-frame results.
//!
//! Video decoding and the actual face detector are external capabilities;
//! this module defines the traits the orchestrator consumes plus a
//! directory-backed frame source for pre-extracted frames.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::emotion::{EmotionDistribution, EmotionLabel};

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Frame source not found: {0}")]
    SourceNotFound(String),

    #[error("Frame source is empty: {0}")]
    SourceEmpty(String),

    #[error("Failed to read frame: {0}")]
    FrameReadError(String),

    #[error("Face detection failed: {0}")]
    DetectionError(String),
}

/// Axis-aligned face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Clamp the box to the frame bounds; returns None if nothing remains.
    pub fn clamped(&self, frame_width: u32, frame_height: u32) -> Option<Self> {
        if self.x >= frame_width || self.y >= frame_height {
            return None;
        }
        let width = self.width.min(frame_width - self.x);
        let height = self.height.min(frame_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            x: self.x,
            y: self.y,
            width,
            height,
        })
    }
}

/// One scored face in one sampled frame. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub frame_id: u64,
    pub bbox: BoundingBox,
    pub distribution: EmotionDistribution,
    pub emotion: EmotionLabel,
    /// Probability of the top label.
    pub confidence: f32,
    /// Detection quality in [0, 1], derived from the face size relative
    /// to the configured maximum.
    pub quality: f32,
}

impl FaceDetection {
    pub fn new(
        frame_id: u64,
        bbox: BoundingBox,
        distribution: EmotionDistribution,
        quality: f32,
    ) -> Self {
        let (emotion, confidence) = distribution.top();
        Self {
            frame_id,
            bbox,
            distribution,
            emotion,
            confidence,
            quality: quality.clamp(0.0, 1.0),
        }
    }
}

/// All detections for one sampled frame, in detection order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_id: u64,
    /// Video-relative timestamp in milliseconds.
    pub timestamp_ms: u64,
    pub detections: Vec<FaceDetection>,
}

/// Size policy enforced by detectors: faces outside these area bounds
/// (as a fraction of frame area) are discarded at the source.
#[derive(Debug, Clone, Copy)]
pub struct FaceSizePolicy {
    pub min_area_ratio: f32,
    pub max_area_ratio: f32,
}

impl Default for FaceSizePolicy {
    fn default() -> Self {
        Self {
            min_area_ratio: 0.005,
            max_area_ratio: 0.9,
        }
    }
}

impl FaceSizePolicy {
    pub fn allows(&self, bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> bool {
        let frame_area = frame_width as f32 * frame_height as f32;
        if frame_area <= 0.0 {
            return false;
        }
        let ratio = bbox.area() as f32 / frame_area;
        ratio >= self.min_area_ratio && ratio <= self.max_area_ratio
    }

    /// Quality score for a detection: face area relative to the allowed
    /// maximum, clamped to [0, 1].
    pub fn quality(&self, bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> f32 {
        let max_area = frame_width as f32 * frame_height as f32 * self.max_area_ratio;
        if max_area <= 0.0 {
            return 0.0;
        }
        (bbox.area() as f32 / max_area).clamp(0.0, 1.0)
    }
}

/// External face-detection capability. Implementations apply the size
/// policy themselves so callers only ever see usable boxes.
pub trait FaceDetector: Send {
    fn detect(&self, frame: &GrayImage) -> Result<Vec<BoundingBox>, VisionError>;
}

/// Source of sampled frames. `next_frame` yields frames already spaced at
/// the session's resolved interval; ids must be strictly increasing.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<SampledFrame>, VisionError>;
}

/// One sampled frame handed to the facial stage.
pub struct SampledFrame {
    pub frame_id: u64,
    pub timestamp_ms: u64,
    pub image: GrayImage,
}

/// Frame source reading pre-extracted frame images from a directory,
/// sorted by filename. The extractor names files by frame number
/// (`frame_000123.png`), so lexicographic order is frame order.
pub struct FrameDirSource {
    frames: Vec<PathBuf>,
    cursor: usize,
    interval_ms: u64,
}

impl FrameDirSource {
    pub fn open(dir: &Path, interval_ms: u64) -> Result<Self, VisionError> {
        if !dir.is_dir() {
            return Err(VisionError::SourceNotFound(dir.display().to_string()));
        }
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| VisionError::FrameReadError(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("png") | Some("jpg") | Some("jpeg")
                )
            })
            .collect();
        frames.sort();
        if frames.is_empty() {
            return Err(VisionError::SourceEmpty(dir.display().to_string()));
        }
        debug!("Frame source opened: {} frames in {:?}", frames.len(), dir);
        Ok(Self {
            frames,
            cursor: 0,
            interval_ms,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for FrameDirSource {
    fn next_frame(&mut self) -> Result<Option<SampledFrame>, VisionError> {
        let Some(path) = self.frames.get(self.cursor) else {
            return Ok(None);
        };
        let image = image::open(path)
            .map_err(|e| VisionError::FrameReadError(format!("{}: {}", path.display(), e)))?
            .to_luma8();
        let frame_id = self.cursor as u64;
        self.cursor += 1;
        Ok(Some(SampledFrame {
            frame_id,
            timestamp_ms: frame_id * self.interval_ms,
            image,
        }))
    }
}

/// Deterministic detector for offline runs without an external detector:
/// treats the central region of the frame as a single candidate face when
/// its luminance variance suggests actual content. Good enough for
/// pre-cropped session footage where the child fills the frame.
pub struct CenterRegionDetector {
    policy: FaceSizePolicy,
    /// Minimum luminance variance for the region to count as a face.
    min_variance: f32,
}

impl CenterRegionDetector {
    pub fn new(policy: FaceSizePolicy) -> Self {
        Self {
            policy,
            min_variance: 50.0,
        }
    }
}

impl FaceDetector for CenterRegionDetector {
    fn detect(&self, frame: &GrayImage) -> Result<Vec<BoundingBox>, VisionError> {
        let (w, h) = frame.dimensions();
        if w < 8 || h < 8 {
            return Ok(Vec::new());
        }
        // Central 60% of the frame.
        let bbox = BoundingBox {
            x: w / 5,
            y: h / 5,
            width: w * 3 / 5,
            height: h * 3 / 5,
        };

        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut count = 0u64;
        for y in bbox.y..bbox.y + bbox.height {
            for x in bbox.x..bbox.x + bbox.width {
                let v = frame.get_pixel(x, y).0[0] as f64;
                sum += v;
                sum_sq += v * v;
                count += 1;
            }
        }
        let mean = sum / count as f64;
        let variance = (sum_sq / count as f64 - mean * mean).max(0.0) as f32;

        if variance < self.min_variance || !self.policy.allows(&bbox, w, h) {
            return Ok(Vec::new());
        }
        Ok(vec![bbox])
    }
}

/// Crop a face region out of a frame.
pub fn crop_face(frame: &GrayImage, bbox: &BoundingBox) -> Option<GrayImage> {
    let (w, h) = frame.dimensions();
    let bbox = bbox.clamped(w, h)?;
    Some(
        image::imageops::crop_imm(frame, bbox.x, bbox.y, bbox.width, bbox.height).to_image(),
    )
}
