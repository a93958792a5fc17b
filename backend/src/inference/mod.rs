pub mod config;
pub mod model;
pub mod predictor;
pub mod preprocess;
pub mod registry;
#[cfg(feature = "torch")]
pub mod torch;

use std::sync::Arc;

use config::ModelConfig;
use model::ModelLoader;

/// Loader for the backend this binary was built with.
pub fn default_loader(config: &ModelConfig) -> Arc<dyn ModelLoader> {
    #[cfg(feature = "torch")]
    {
        Arc::new(torch::TorchModelLoader::new(config.clone()))
    }
    #[cfg(not(feature = "torch"))]
    {
        log::warn!(
            "Built without the `torch` feature; {} model(s) configured but inference is disabled",
            config.models.len()
        );
        Arc::new(model::DisabledModelLoader)
    }
}
