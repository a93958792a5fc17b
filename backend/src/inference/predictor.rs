use shared::{Label, ModelName};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::model::{ModelError, positive_probability};
use super::preprocess::ImageTensor;
use super::registry::ModelRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelPrediction {
    pub model: ModelName,
    pub label: Label,
    /// Positive-class probability as produced by the network. Stored as is,
    /// also when `label` is `NonCancer`.
    pub confidence: f32,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    #[error("Model load error for {model}: {reason}")]
    ModelLoadError { model: ModelName, reason: String },
    #[error("Inference error for {model}: {reason}")]
    InferenceError { model: ModelName, reason: String },
    #[error("{model} inference timed out after {timeout:?}")]
    Timeout { model: ModelName, timeout: Duration },
}

impl From<ModelError> for PredictorError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Load { model, reason } => PredictorError::ModelLoadError { model, reason },
            ModelError::Inference { model, reason } => {
                PredictorError::InferenceError { model, reason }
            }
        }
    }
}

pub type ModelOutcome = (ModelName, Result<ModelPrediction, PredictorError>);

pub struct DualModelPredictor {
    registry: Arc<ModelRegistry>,
    timeout: Duration,
}

impl DualModelPredictor {
    pub fn new(registry: Arc<ModelRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Runs every model in `ModelName::ALL` order. A failure in one model does
    /// not stop the next one from being attempted.
    pub async fn predict_all(&self, tensor: Arc<ImageTensor>) -> Vec<ModelOutcome> {
        let mut outcomes = Vec::with_capacity(ModelName::ALL.len());
        for model in ModelName::ALL {
            let result = self.predict_one(model, tensor.clone()).await;
            match &result {
                Ok(prediction) => log::info!(
                    "{} predicted {} (p={:.4}) in {:.3}s",
                    model,
                    prediction.label,
                    prediction.confidence,
                    prediction.elapsed.as_secs_f64()
                ),
                Err(e) => log::error!("{} prediction failed: {}", model, e),
            }
            outcomes.push((model, result));
        }
        outcomes
    }

    pub async fn predict_one(
        &self,
        model: ModelName,
        tensor: Arc<ImageTensor>,
    ) -> Result<ModelPrediction, PredictorError> {
        let registry = self.registry.clone();
        let classifier = tokio::task::spawn_blocking(move || registry.get(model))
            .await
            .map_err(|e| PredictorError::ModelLoadError {
                model,
                reason: format!("loader task failed: {}", e),
            })??;

        let forward = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let output = classifier.forward(&tensor)?;
            Ok::<_, ModelError>((output, started.elapsed()))
        });

        let (output, elapsed) = tokio::time::timeout(self.timeout, forward)
            .await
            .map_err(|_| PredictorError::Timeout {
                model,
                timeout: self.timeout,
            })?
            .map_err(|e| PredictorError::InferenceError {
                model,
                reason: format!("inference task failed: {}", e),
            })??;

        let probability = positive_probability(model, &output)?;
        Ok(ModelPrediction {
            model,
            label: Label::from_probability(probability),
            confidence: probability,
            elapsed,
        })
    }
}
