use shared::ModelName;
use std::sync::Arc;

use super::preprocess::ImageTensor;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Failed to load {model} weights: {reason}")]
    Load { model: ModelName, reason: String },
    #[error("{model} inference failed: {reason}")]
    Inference { model: ModelName, reason: String },
}

/// A loaded network. Implementations must be deterministic in inference mode.
pub trait Classifier: Send + Sync {
    /// Raw network output, flattened.
    fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError>;
}

pub trait ModelLoader: Send + Sync {
    fn load(&self, model: ModelName) -> Result<Arc<dyn Classifier>, ModelError>;

    fn device(&self) -> String {
        "cpu".to_string()
    }
}

/// Loader used when the binary is built without an inference backend.
pub struct DisabledModelLoader;

impl ModelLoader for DisabledModelLoader {
    fn load(&self, model: ModelName) -> Result<Arc<dyn Classifier>, ModelError> {
        Err(ModelError::Load {
            model,
            reason: "inference backend not compiled in (build with --features torch)".to_string(),
        })
    }

    fn device(&self) -> String {
        "none".to_string()
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Positive-class probability from a network output.
///
/// One value is taken as the probability itself (or a logit if it falls
/// outside [0, 1]); two values are class logits where index 1 is "Cancer".
pub fn positive_probability(model: ModelName, output: &[f32]) -> Result<f32, ModelError> {
    if output.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::Inference {
            model,
            reason: format!("non-finite output {:?}", output),
        });
    }
    let probability = match output {
        [p] if (0.0..=1.0).contains(p) => *p,
        [logit] => sigmoid(*logit),
        [negative, positive] => {
            let max = negative.max(*positive);
            let e_neg = (negative - max).exp();
            let e_pos = (positive - max).exp();
            e_pos / (e_neg + e_pos)
        }
        other => {
            return Err(ModelError::Inference {
                model,
                reason: format!("expected 1 or 2 output values, got {}", other.len()),
            });
        }
    };
    Ok(probability.clamp(0.0, 1.0))
}
