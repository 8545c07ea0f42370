//! Ensemble scorer: fuses per-model emotion distributions into one
//! calibrated prediction.
//!
//! Each loaded model runs on its own worker thread fed over a channel;
//! the scorer dispatches one preprocessed tensor per model, then collects
//! replies with a bounded per-model timeout. A model that errors, times
//! out, or returns malformed output is excluded from that prediction only
//! and the remaining weights are renormalized. When nothing succeeds the
//! heuristic fallback engages.

use image::GrayImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::emotion::{EmotionDistribution, EmotionLabel};

use super::classifier::{load_models, ClassifierError, EmotionClassifier, ModelDescriptor};
use super::fallback::FallbackClassifier;
use super::preprocess::preprocess_face;

/// Laplace smoothing factor: the fused distribution is blended toward
/// uniform by this amount before the argmax, so a single overconfident
/// model cannot pin the confidence at 1.0.
pub const SMOOTHING_EPSILON: f32 = 0.05;

/// Bound on how long aggregation waits for any single model.
pub const MODEL_TIMEOUT: Duration = Duration::from_secs(2);

struct InferenceJob {
    tensor: ndarray::ArrayD<f32>,
    reply: Sender<Result<Vec<f32>, ClassifierError>>,
}

/// One ensemble member: descriptor, normalized weight, worker channel.
struct ModelWorker {
    descriptor: ModelDescriptor,
    /// Weight after init-time renormalization across loaded models.
    weight: f32,
    job_tx: Option<Sender<InferenceJob>>,
    thread: Option<thread::JoinHandle<()>>,
    failures: Arc<AtomicU64>,
}

impl ModelWorker {
    fn spawn(descriptor: ModelDescriptor, weight: f32, mut classifier: Box<dyn EmotionClassifier>) -> Self {
        let (job_tx, job_rx): (Sender<InferenceJob>, Receiver<InferenceJob>) = mpsc::channel();
        let name = descriptor.name.clone();
        let thread = thread::spawn(move || {
            while let Ok(job) = job_rx.recv() {
                let result = classifier.infer(&job.tensor);
                // Receiver may have timed out and moved on; that's fine.
                let _ = job.reply.send(result);
            }
            debug!("Model worker '{}' shutting down", name);
        });
        Self {
            descriptor,
            weight,
            job_tx: Some(job_tx),
            thread: Some(thread),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Per-model failure counters, for diagnostics and the session record.
#[derive(Debug, Clone)]
pub struct ModelErrorCounts {
    pub name: String,
    pub failures: u64,
}

pub struct EnsembleScorer {
    workers: Vec<ModelWorker>,
    timeout: Duration,
}

impl EnsembleScorer {
    /// Load the ensemble from a models directory. A missing or empty
    /// manifest yields a fallback-only scorer; a malformed manifest
    /// (duplicate model with conflicting shape) is an error.
    pub fn load(models_dir: &std::path::Path) -> Result<Self, ClassifierError> {
        let models = load_models(models_dir)?;
        Ok(Self::from_classifiers(models))
    }

    /// Build from already-constructed classifiers. Weights of members
    /// that failed to load have already been discarded by the caller;
    /// the survivors are renormalized to sum to 1 here. Members with a
    /// non-positive weight are dropped.
    pub fn from_classifiers(
        models: Vec<(ModelDescriptor, Box<dyn EmotionClassifier>)>,
    ) -> Self {
        let models: Vec<_> = models
            .into_iter()
            .filter(|(d, _)| {
                if d.weight <= 0.0 {
                    warn!("Dropping model '{}' with non-positive weight", d.name);
                    false
                } else {
                    true
                }
            })
            .collect();

        let weight_sum: f32 = models.iter().map(|(d, _)| d.weight).sum();
        let workers: Vec<ModelWorker> = models
            .into_iter()
            .map(|(descriptor, classifier)| {
                let weight = descriptor.weight / weight_sum;
                ModelWorker::spawn(descriptor, weight, classifier)
            })
            .collect();

        if workers.is_empty() {
            info!("No emotion models loaded; fallback heuristic will be used");
        } else {
            info!("Ensemble scorer ready with {} model(s)", workers.len());
        }

        Self {
            workers,
            timeout: MODEL_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_count(&self) -> usize {
        self.workers.len()
    }

    /// Init-normalized weights, in worker order. Sums to 1 whenever the
    /// ensemble is non-empty.
    pub fn weights(&self) -> Vec<f32> {
        self.workers.iter().map(|w| w.weight).collect()
    }

    pub fn error_counts(&self) -> Vec<ModelErrorCounts> {
        self.workers
            .iter()
            .map(|w| ModelErrorCounts {
                name: w.descriptor.name.clone(),
                failures: w.failures.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Fused distribution for one face image.
    pub fn distribution(&self, face: &GrayImage) -> EmotionDistribution {
        if self.workers.is_empty() {
            return FallbackClassifier::distribution(face);
        }

        // Dispatch one job per model; inference runs concurrently.
        let mut pending: Vec<(usize, Receiver<Result<Vec<f32>, ClassifierError>>)> = Vec::new();
        for (idx, worker) in self.workers.iter().enumerate() {
            let tensor = preprocess_face(face, &worker.descriptor);
            let (reply_tx, reply_rx) = mpsc::channel();
            let job = InferenceJob {
                tensor,
                reply: reply_tx,
            };
            match worker.job_tx.as_ref() {
                Some(tx) if tx.send(job).is_ok() => pending.push((idx, reply_rx)),
                _ => {
                    worker.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Model '{}' worker unavailable", worker.descriptor.name);
                }
            }
        }

        // Collect with a bounded per-model wait; exclude failures from
        // this prediction only.
        let mut successes: Vec<(f32, EmotionDistribution)> = Vec::new();
        for (idx, reply_rx) in pending {
            let worker = &self.workers[idx];
            match reply_rx.recv_timeout(self.timeout) {
                Ok(Ok(scores)) => match EmotionDistribution::from_scores(&scores) {
                    Some(dist) => successes.push((worker.weight, dist)),
                    None => {
                        worker.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Model '{}' returned malformed output, excluded",
                            worker.descriptor.name
                        );
                    }
                },
                Ok(Err(e)) => {
                    worker.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Model '{}' inference failed: {}", worker.descriptor.name, e);
                }
                Err(_) => {
                    worker.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Model '{}' timed out after {:?}",
                        worker.descriptor.name, self.timeout
                    );
                }
            }
        }

        if successes.is_empty() {
            debug!("All models failed for this image, using fallback");
            return FallbackClassifier::distribution(face);
        }

        fuse(&successes).smoothed(SMOOTHING_EPSILON)
    }

    /// Predicted label and its calibrated confidence.
    pub fn predict(&self, face: &GrayImage) -> (EmotionLabel, f32) {
        self.distribution(face).top()
    }
}

impl Drop for EnsembleScorer {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            // Closing the channel ends the worker loop.
            worker.job_tx.take();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.thread.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Weighted elementwise average of per-model distributions, with weights
/// renormalized over the models that actually responded.
fn fuse(results: &[(f32, EmotionDistribution)]) -> EmotionDistribution {
    let weight_sum: f32 = results.iter().map(|(w, _)| w).sum();
    let mut avg = [0.0f32; EmotionLabel::COUNT];
    for (weight, dist) in results {
        let w = weight / weight_sum;
        for (out, v) in avg.iter_mut().zip(dist.values()) {
            *out += w * v;
        }
    }
    EmotionDistribution::from_scores(&avg).unwrap_or_else(EmotionDistribution::uniform)
}
