//! Emotion classifier capability and ONNX-backed implementation.
//!
//! Classifiers are plug-ins behind the [`EmotionClassifier`] trait,
//! enumerated by a manifest in the models directory rather than baked in.
//! Missing artifacts are skipped with a warning; a manifest that declares
//! the same model name twice with conflicting shapes is a load error.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::emotion::EmotionLabel;

#[cfg(feature = "onnx-models")]
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};

/// Errors that can occur loading or running classifiers
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Failed to load model: {0}")]
    ModelLoadError(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Failed to read manifest: {0}")]
    ManifestError(String),

    #[error("Model '{0}' declared twice with conflicting shapes")]
    ConflictingShape(String),

    #[error("Feature not enabled")]
    FeatureNotEnabled,
}

/// Declared properties of one ensemble member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Identifying name, unique within the ensemble.
    pub name: String,
    /// Artifact filename relative to the models directory.
    pub file: String,
    /// Base weight in (0, 1]; renormalized across loaded models.
    pub weight: f32,
    /// Expected input height and width.
    pub input_height: u32,
    pub input_width: u32,
    /// Expected tensor rank: 2 = [h,w], 3 = [1,h,w], 4 = [1,h,w,1].
    pub tensor_rank: u8,
}

impl ModelDescriptor {
    fn same_shape(&self, other: &ModelDescriptor) -> bool {
        self.input_height == other.input_height
            && self.input_width == other.input_width
            && self.tensor_rank == other.tensor_rank
    }
}

/// Manifest file (`models.json`) listing the ensemble members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleManifest {
    pub models: Vec<ModelDescriptor>,
}

impl EnsembleManifest {
    pub fn load(models_dir: &Path) -> Result<Self, ClassifierError> {
        let path = models_dir.join("models.json");
        if !path.exists() {
            // No manifest means no models: the scorer runs fallback-only.
            return Ok(Self { models: Vec::new() });
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ClassifierError::ManifestError(e.to_string()))?;
        let manifest: EnsembleManifest = serde_json::from_str(&content)
            .map_err(|e| ClassifierError::ManifestError(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reject duplicate model names with conflicting shapes. A repeated
    /// name with an identical shape is tolerated (deduplicated upstream).
    pub fn validate(&self) -> Result<(), ClassifierError> {
        for (i, a) in self.models.iter().enumerate() {
            for b in &self.models[i + 1..] {
                if a.name == b.name && !a.same_shape(b) {
                    return Err(ClassifierError::ConflictingShape(a.name.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Opaque emotion classifier: probability scores over the fixed label
/// set from a preprocessed face tensor.
pub trait EmotionClassifier: Send {
    fn infer(&mut self, input: &ArrayD<f32>) -> Result<Vec<f32>, ClassifierError>;
}

/// ONNX-backed classifier
#[cfg(feature = "onnx-models")]
pub struct OnnxClassifier {
    session: Session,
}

#[cfg(feature = "onnx-models")]
impl OnnxClassifier {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        if !path.exists() {
            return Err(ClassifierError::ModelLoadError(format!(
                "Model not found at {:?}",
                path
            )));
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| ClassifierError::ModelLoadError(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| ClassifierError::ModelLoadError(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e: ort::Error| ClassifierError::ModelLoadError(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e: ort::Error| ClassifierError::ModelLoadError(e.to_string()))?;

        Ok(Self { session })
    }
}

#[cfg(feature = "onnx-models")]
impl EmotionClassifier for OnnxClassifier {
    fn infer(&mut self, input: &ArrayD<f32>) -> Result<Vec<f32>, ClassifierError> {
        let shape: Vec<usize> = input.shape().to_vec();
        let data: Vec<f32> = input.iter().copied().collect();

        let input_tensor = Value::from_array((shape, data))
            .map_err(|e: ort::Error| ClassifierError::InferenceError(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e: ort::Error| ClassifierError::InferenceError(e.to_string()))?;

        let output = outputs.iter().next().ok_or_else(|| {
            ClassifierError::InferenceError("No output from model".to_string())
        })?;

        let output_tensor = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e: ort::Error| ClassifierError::InferenceError(e.to_string()))?;

        let values: Vec<f32> = output_tensor.1.iter().copied().collect();
        if values.len() != EmotionLabel::COUNT {
            return Err(ClassifierError::MalformedOutput(format!(
                "expected {} scores, got {}",
                EmotionLabel::COUNT,
                values.len()
            )));
        }
        Ok(values)
    }
}

// Stub implementation when the feature is not enabled; the scorer then
// always runs the fallback heuristic.
#[cfg(not(feature = "onnx-models"))]
pub struct OnnxClassifier;

#[cfg(not(feature = "onnx-models"))]
impl OnnxClassifier {
    pub fn load(_path: &Path) -> Result<Self, ClassifierError> {
        Err(ClassifierError::FeatureNotEnabled)
    }
}

#[cfg(not(feature = "onnx-models"))]
impl EmotionClassifier for OnnxClassifier {
    fn infer(&mut self, _input: &ArrayD<f32>) -> Result<Vec<f32>, ClassifierError> {
        Err(ClassifierError::FeatureNotEnabled)
    }
}

/// Load the manifest's models from a directory. Artifacts that are
/// missing or fail to load are skipped, not fatal; the caller
/// renormalizes the surviving weights.
pub fn load_models(
    models_dir: &Path,
) -> Result<Vec<(ModelDescriptor, Box<dyn EmotionClassifier>)>, ClassifierError> {
    let manifest = EnsembleManifest::load(models_dir)?;
    let mut loaded: Vec<(ModelDescriptor, Box<dyn EmotionClassifier>)> = Vec::new();

    for descriptor in manifest.models {
        if loaded.iter().any(|(d, _)| d.name == descriptor.name) {
            continue;
        }
        let path = models_dir.join(&descriptor.file);
        match OnnxClassifier::load(&path) {
            Ok(classifier) => {
                info!(
                    "Loaded emotion model '{}' (weight {:.2}, input {}x{})",
                    descriptor.name, descriptor.weight, descriptor.input_width, descriptor.input_height
                );
                loaded.push((descriptor, Box::new(classifier)));
            }
            Err(e) => {
                warn!("Skipping model '{}': {}", descriptor.name, e);
            }
        }
    }

    Ok(loaded)
}
