use serde::{Deserialize, Serialize};
use shared::{ModelInfo, ModelName};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub version: f32,
    pub device: String,
    pub inference_timeout_secs: u64,
    pub image: ImageConfig,
    pub models: HashMap<ModelName, ModelSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub size: Vec<u32>,
    pub channels: u32,
    pub normalization: NormalizationConfig,
}

/// Per-channel statistics the networks were trained with. Applied by the
/// TorchScript adapter on top of the [0, 1] tensor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizationConfig {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub path: PathBuf,
    pub version: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let spec = |file: &str| ModelSpec {
            path: PathBuf::from("ml_models").join(file),
            version: Some("v1.0".to_string()),
        };
        Self {
            version: 1.0,
            device: "auto".to_string(),
            inference_timeout_secs: 120,
            image: ImageConfig {
                size: vec![224, 224],
                channels: 3,
                normalization: NormalizationConfig {
                    mean: [0.485, 0.456, 0.406],
                    std: [0.229, 0.224, 0.225],
                },
            },
            models: HashMap::from([
                (ModelName::RegNetY320, spec("regnet_y320_best.pt")),
                (ModelName::Vgg16, spec("vgg16_best.pt")),
            ]),
        }
    }
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&config_str)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ModelConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.image.size.as_slice() {
            [w, h] if w == h && *w > 0 => {}
            other => {
                return Err(ConfigError::Invalid {
                    key: "image.size",
                    reason: format!("expected a square [n, n], got {:?}", other),
                });
            }
        }
        if self.image.channels != 3 {
            return Err(ConfigError::Invalid {
                key: "image.channels",
                reason: format!("only 3-channel input is supported, got {}", self.image.channels),
            });
        }
        if self.image.normalization.std.iter().any(|s| *s <= 0.0) {
            return Err(ConfigError::Invalid {
                key: "image.normalization.std",
                reason: "standard deviations must be positive".to_string(),
            });
        }
        for model in ModelName::ALL {
            if !self.models.contains_key(&model) {
                return Err(ConfigError::Invalid {
                    key: "models",
                    reason: format!("no weight file configured for {}", model),
                });
            }
        }
        Ok(())
    }

    pub fn target_size(&self) -> u32 {
        self.image.size.first().copied().unwrap_or(224)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn spec(&self, model: ModelName) -> Option<&ModelSpec> {
        self.models.get(&model)
    }

    pub fn model_info(&self) -> Vec<ModelInfo> {
        ModelName::ALL
            .iter()
            .filter_map(|model| {
                let spec = self.spec(*model)?;
                let metadata = std::fs::metadata(&spec.path).ok();
                Some(ModelInfo {
                    model_name: *model,
                    path: spec.path.display().to_string(),
                    exists: metadata.is_some(),
                    size_mb: metadata
                        .map(|m| m.len() as f64 / (1024.0 * 1024.0))
                        .unwrap_or(0.0),
                    version: spec.version.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIPPED: &str = include_str!("../../../config/models.yaml");

    #[test]
    fn shipped_config_parses() {
        let config = ModelConfig::from_yaml_str(SHIPPED).unwrap();
        assert_eq!(config.target_size(), 224);
        assert_eq!(config.inference_timeout(), Duration::from_secs(120));
        assert_eq!(
            config.spec(ModelName::Vgg16).unwrap().path,
            PathBuf::from("ml_models/vgg16_best.pt")
        );
        assert_eq!(
            config.image.normalization,
            ModelConfig::default().image.normalization
        );
    }

    #[test]
    fn rejects_non_square_input() {
        let raw = SHIPPED.replace("size: [224, 224]", "size: [224, 200]");
        assert!(matches!(
            ModelConfig::from_yaml_str(&raw),
            Err(ConfigError::Invalid { key: "image.size", .. })
        ));
    }

    #[test]
    fn rejects_missing_model() {
        let mut config = ModelConfig::default();
        config.models.remove(&ModelName::RegNetY320);
        let raw = serde_yaml::to_string(&config).unwrap();
        assert!(matches!(
            ModelConfig::from_yaml_str(&raw),
            Err(ConfigError::Invalid { key: "models", .. })
        ));
    }

    #[test]
    fn model_info_reports_missing_weights() {
        let mut config = ModelConfig::default();
        for spec in config.models.values_mut() {
            spec.path = PathBuf::from("/nonexistent/weights.pt");
        }
        let info = config.model_info();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].model_name, ModelName::RegNetY320);
        assert!(info.iter().all(|m| !m.exists && m.size_mb == 0.0));
    }
}
