use shared::ModelName;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::model::{Classifier, ModelError, ModelLoader};

type Slot = Mutex<Option<Arc<dyn Classifier>>>;

/// Process-wide cache of loaded networks, built once at startup and handed to
/// the predictor. Each model is loaded at most once. Every model has its own
/// slot lock, held across that model's load, so concurrent first requests for
/// one model wait for it while the other model stays available.
pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    slots: HashMap<ModelName, Slot>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slots: ModelName::ALL
                .iter()
                .map(|model| (*model, Mutex::new(None)))
                .collect(),
        }
    }

    pub fn device(&self) -> String {
        self.loader.device()
    }

    pub fn get(&self, model: ModelName) -> Result<Arc<dyn Classifier>, ModelError> {
        let slot = self.slots.get(&model).ok_or_else(|| ModelError::Load {
            model,
            reason: "model is not registered".to_string(),
        })?;
        let mut slot = slot.lock().map_err(|_| ModelError::Load {
            model,
            reason: "model slot mutex poisoned".to_string(),
        })?;

        if let Some(classifier) = slot.as_ref() {
            return Ok(classifier.clone());
        }

        log::info!("Loading {} on first use", model);
        let classifier = self.loader.load(model)?;
        *slot = Some(classifier.clone());
        Ok(classifier)
    }

    /// A model still loading reports false without waiting for it.
    pub fn is_loaded(&self, model: ModelName) -> bool {
        self.slots
            .get(&model)
            .and_then(|slot| slot.try_lock().ok().map(|slot| slot.is_some()))
            .unwrap_or(false)
    }

    /// Loads every known model up front.
    pub fn preload(&self) -> Result<(), ModelError> {
        for model in ModelName::ALL {
            self.get(model)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::inference::preprocess::ImageTensor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns a fixed output per model; can be told to fail loading or inference.
    pub(crate) struct FixedClassifier {
        pub output: Vec<f32>,
        pub fail: bool,
        pub delay: Duration,
    }

    impl Classifier for FixedClassifier {
        fn forward(&self, _input: &ImageTensor) -> Result<Vec<f32>, ModelError> {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if self.fail {
                return Err(ModelError::Inference {
                    model: ModelName::Vgg16,
                    reason: "forward raised".to_string(),
                });
            }
            Ok(self.output.clone())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeLoader {
        pub outputs: HashMap<ModelName, Vec<f32>>,
        pub missing: Vec<ModelName>,
        pub failing: Vec<ModelName>,
        pub delay: Duration,
        pub load_delays: HashMap<ModelName, Duration>,
        pub loads: AtomicUsize,
    }

    impl FakeLoader {
        pub fn with_outputs(regnet: f32, vgg: f32) -> Self {
            Self {
                outputs: HashMap::from([
                    (ModelName::RegNetY320, vec![regnet]),
                    (ModelName::Vgg16, vec![vgg]),
                ]),
                ..Default::default()
            }
        }
    }

    impl ModelLoader for FakeLoader {
        fn load(&self, model: ModelName) -> Result<Arc<dyn Classifier>, ModelError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            // Widen the race window for the concurrent-load test.
            std::thread::sleep(
                self.load_delays
                    .get(&model)
                    .copied()
                    .unwrap_or(Duration::from_millis(20)),
            );
            if self.missing.contains(&model) {
                return Err(ModelError::Load {
                    model,
                    reason: "weight file not found".to_string(),
                });
            }
            Ok(Arc::new(FixedClassifier {
                output: self.outputs.get(&model).cloned().unwrap_or_else(|| vec![0.0]),
                fail: self.failing.contains(&model),
                delay: self.delay,
            }))
        }
    }

    #[test]
    fn loads_each_model_once() {
        let loader = Arc::new(FakeLoader::with_outputs(0.9, 0.1));
        let registry = ModelRegistry::new(loader.clone());

        assert!(!registry.is_loaded(ModelName::Vgg16));
        registry.get(ModelName::Vgg16).unwrap();
        registry.get(ModelName::Vgg16).unwrap();
        assert!(registry.is_loaded(ModelName::Vgg16));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        registry.preload().unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_first_use_loads_once() {
        let loader = Arc::new(FakeLoader::with_outputs(0.9, 0.1));
        let registry = Arc::new(ModelRegistry::new(loader.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get(ModelName::RegNetY320).is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slow_load_of_one_model_does_not_block_the_other() {
        let mut loader = FakeLoader::with_outputs(0.9, 0.1);
        loader
            .load_delays
            .insert(ModelName::RegNetY320, Duration::from_millis(800));
        let registry = Arc::new(ModelRegistry::new(Arc::new(loader)));
        registry.get(ModelName::Vgg16).unwrap();

        let slow = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.get(ModelName::RegNetY320).is_ok())
        };
        std::thread::sleep(Duration::from_millis(50));

        let started = std::time::Instant::now();
        registry.get(ModelName::Vgg16).unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(!registry.is_loaded(ModelName::RegNetY320));

        assert!(slow.join().unwrap());
        assert!(registry.is_loaded(ModelName::RegNetY320));
    }

    #[test]
    fn failed_load_is_not_cached() {
        let loader = Arc::new(FakeLoader {
            missing: vec![ModelName::Vgg16],
            ..Default::default()
        });
        let registry = ModelRegistry::new(loader.clone());

        assert!(matches!(
            registry.get(ModelName::Vgg16),
            Err(ModelError::Load { .. })
        ));
        assert!(registry.get(ModelName::Vgg16).is_err());
        assert!(!registry.is_loaded(ModelName::Vgg16));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }
}
