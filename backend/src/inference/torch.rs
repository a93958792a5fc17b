use shared::ModelName;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tch::{CModule, Device, Kind, Tensor};

use super::config::{ModelConfig, NormalizationConfig};
use super::model::{Classifier, ModelError, ModelLoader};
use super::preprocess::ImageTensor;

/// Loads TorchScript exports of the trained networks.
pub struct TorchModelLoader {
    config: ModelConfig,
    device: Device,
}

impl TorchModelLoader {
    pub fn new(config: ModelConfig) -> Self {
        let device = match config.device.to_lowercase().as_str() {
            "cpu" => Device::Cpu,
            "cuda" | "gpu" => Device::Cuda(0),
            _ => Device::cuda_if_available(),
        };
        Self { config, device }
    }
}

impl ModelLoader for TorchModelLoader {
    fn load(&self, model: ModelName) -> Result<Arc<dyn Classifier>, ModelError> {
        let spec = self.config.spec(model).ok_or_else(|| ModelError::Load {
            model,
            reason: "no weight file configured".to_string(),
        })?;
        if !spec.path.is_file() {
            return Err(ModelError::Load {
                model,
                reason: format!("weight file {} not found", spec.path.display()),
            });
        }

        let started = Instant::now();
        let module = CModule::load_on_device(&spec.path, self.device).map_err(|e| {
            ModelError::Load {
                model,
                reason: e.to_string(),
            }
        })?;
        log::info!(
            "{} loaded from {} on {:?} in {:.2}s",
            model,
            spec.path.display(),
            self.device,
            started.elapsed().as_secs_f64()
        );

        Ok(Arc::new(TorchClassifier {
            model,
            module: Mutex::new(module),
            device: self.device,
            normalization: self.config.image.normalization.clone(),
        }))
    }

    fn device(&self) -> String {
        format!("{:?}", self.device)
    }
}

pub struct TorchClassifier {
    model: ModelName,
    module: Mutex<CModule>,
    device: Device,
    normalization: NormalizationConfig,
}

impl TorchClassifier {
    fn to_input(&self, input: &ImageTensor) -> Tensor {
        let shape: Vec<i64> = input.shape().iter().map(|d| *d as i64).collect();
        let values: Vec<f32> = input.iter().copied().collect();
        let mean = Tensor::from_slice(&self.normalization.mean).view([1, 3, 1, 1]);
        let std = Tensor::from_slice(&self.normalization.std).view([1, 3, 1, 1]);

        // NHWC in [0, 1] -> normalized NCHW
        let nchw = Tensor::from_slice(&values)
            .reshape(shape)
            .permute([0, 3, 1, 2])
            .contiguous();
        ((nchw - mean) / std).to_device(self.device)
    }
}

impl Classifier for TorchClassifier {
    fn forward(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError> {
        let tensor = self.to_input(input);
        let module = self.module.lock().map_err(|_| ModelError::Inference {
            model: self.model,
            reason: "model mutex poisoned".to_string(),
        })?;

        let output = tch::no_grad(|| module.forward_ts(&[tensor])).map_err(|e| {
            ModelError::Inference {
                model: self.model,
                reason: e.to_string(),
            }
        })?;

        let output_flat = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(output_vec)
    }
}
