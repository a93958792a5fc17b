use sha2::{Digest, Sha256};
use shared::{ImageStatus, ModelName};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::db::models::{EntityError, PredictionRecord, UploadedImage};
use crate::db::{Repository, RepositoryError};
use crate::inference::config::ModelConfig;
use crate::inference::predictor::{DualModelPredictor, PredictorError};
use crate::inference::preprocess::{self, PreprocessError};
use crate::storage::StorageError;
use crate::storage::adapter::StorageAdapter;

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error(transparent)]
    Decode(#[from] PreprocessError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Prediction(#[from] PredictorError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Entity(#[from] EntityError),
    #[error("Image {0} not found")]
    NotFound(Uuid),
    #[error("Image {0} has already been processed")]
    AlreadyProcessed(Uuid),
    #[error("Image {0} is already being processed")]
    AlreadyProcessing(Uuid),
    #[error("Preprocessing task failed: {0}")]
    Task(String),
}

/// Removes the image id from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.id);
    }
}

/// Drives one image from upload through preprocessing and both models to
/// persisted predictions, keeping the image status in step.
pub struct DetectionOrchestrator {
    repo: Arc<dyn Repository>,
    storage: Arc<StorageAdapter>,
    predictor: Arc<DualModelPredictor>,
    target_size: u32,
    model_versions: HashMap<ModelName, String>,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl DetectionOrchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        storage: Arc<StorageAdapter>,
        predictor: Arc<DualModelPredictor>,
        config: &ModelConfig,
    ) -> Self {
        let model_versions = config
            .models
            .iter()
            .filter_map(|(name, spec)| Some((*name, spec.version.clone()?)))
            .collect();
        Self {
            repo,
            storage,
            predictor,
            target_size: config.target_size(),
            model_versions,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn predictor(&self) -> &DualModelPredictor {
        &self.predictor
    }

    /// Stores the bytes and creates a `pending` image row. Size and content
    /// type are checked by the caller before this point.
    pub async fn ingest(
        &self,
        owner_id: Uuid,
        original_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<UploadedImage, DetectionError> {
        let stored = self
            .storage
            .upload(data, owner_id, original_name, content_type)
            .await?;
        let local_only = stored.is_local_only();

        let mut image = UploadedImage::new(
            owner_id,
            original_name.to_string(),
            stored.path,
            stored.url,
            data.len() as i64,
            content_type.to_string(),
            hex::encode(Sha256::digest(data)),
        );

        // A bad header is not fatal here; detection reports it as a decode error.
        match preprocess::read_metadata(data) {
            Ok(meta) => {
                image.width = Some(meta.width);
                image.height = Some(meta.height);
                image.format = Some(meta.format);
            }
            Err(e) => log::warn!("Could not read metadata for upload {}: {}", image.id, e),
        }

        self.repo.create_image(&image).await?;
        log::info!(
            "Registered image {} for user {} ({} bytes, local only: {})",
            image.id,
            owner_id,
            image.file_size,
            local_only
        );
        Ok(image)
    }

    fn claim(&self, id: Uuid) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(id) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            id,
        })
    }

    /// Runs detection for `image_id` on behalf of `requester`. Returns the new
    /// prediction pair in fixed model order.
    pub async fn process(
        &self,
        image_id: Uuid,
        requester: Uuid,
    ) -> Result<Vec<PredictionRecord>, DetectionError> {
        let _guard = self
            .claim(image_id)
            .ok_or(DetectionError::AlreadyProcessing(image_id))?;

        let mut image = self
            .repo
            .get_image(image_id)
            .await?
            .ok_or(DetectionError::NotFound(image_id))?;

        // Predictions commit before the final status write; if that write was
        // lost the stored pair is the result and inference must not run again.
        if matches!(image.status, ImageStatus::Processing | ImageStatus::Failed) {
            let committed = self.repo.list_predictions_for_image(image_id).await?;
            if !committed.is_empty() {
                return self.finish_committed(image, committed).await;
            }
        }

        match image.status {
            ImageStatus::Processed => return Err(DetectionError::AlreadyProcessed(image_id)),
            ImageStatus::Processing => return Err(DetectionError::AlreadyProcessing(image_id)),
            ImageStatus::Pending | ImageStatus::Failed => {}
        }

        image.transition(ImageStatus::Processing)?;
        self.repo.update_image(&image).await?;
        log::info!("Detection started for image {}", image_id);

        match self.run_pipeline(&image, requester).await {
            Ok(records) => {
                let mut done = image.clone();
                done.transition(ImageStatus::Processed)?;
                if let Err(e) = self.repo.update_image(&done).await {
                    log::error!(
                        "Predictions for image {} are stored but it could not be marked processed: {}",
                        image_id,
                        e
                    );
                    self.mark_failed(&mut image).await?;
                    return Err(e.into());
                }
                log::info!(
                    "Detection finished for image {}: {} prediction(s) stored",
                    image_id,
                    records.len()
                );
                Ok(records)
            }
            Err(e) => {
                log::error!("Detection failed for image {}: {}", image_id, e);
                self.mark_failed(&mut image).await?;
                Err(e)
            }
        }
    }

    /// Best effort; a lost write leaves the row `processing` until the next run.
    async fn mark_failed(&self, image: &mut UploadedImage) -> Result<(), DetectionError> {
        image.transition(ImageStatus::Failed)?;
        if let Err(e) = self.repo.update_image(image).await {
            log::error!("Could not mark image {} as failed: {}", image.id, e);
        }
        Ok(())
    }

    async fn finish_committed(
        &self,
        mut image: UploadedImage,
        mut records: Vec<PredictionRecord>,
    ) -> Result<Vec<PredictionRecord>, DetectionError> {
        if image.status == ImageStatus::Failed {
            image.transition(ImageStatus::Processing)?;
        }
        image.transition(ImageStatus::Processed)?;
        self.repo.update_image(&image).await?;
        log::warn!(
            "Image {} already had {} stored prediction(s); marked processed without rerunning models",
            image.id,
            records.len()
        );
        records.sort_by_key(|r| ModelName::ALL.iter().position(|m| *m == r.model_name));
        Ok(records)
    }

    async fn run_pipeline(
        &self,
        image: &UploadedImage,
        requester: Uuid,
    ) -> Result<Vec<PredictionRecord>, DetectionError> {
        let raw = self.storage.download(&image.storage_path).await?;
        log::debug!("Fetched {} bytes for image {}", raw.len(), image.id);

        let target_size = self.target_size;
        let tensor = tokio::task::spawn_blocking(move || preprocess::preprocess(&raw, target_size))
            .await
            .map_err(|e| DetectionError::Task(e.to_string()))??;

        let outcomes = self.predictor.predict_all(Arc::new(tensor)).await;

        // Both models must succeed before anything is written.
        let mut records = Vec::with_capacity(outcomes.len());
        for (model, outcome) in outcomes {
            let prediction = outcome?;
            records.push(PredictionRecord::from_prediction(
                image.id,
                requester,
                &prediction,
                self.model_versions.get(&model).cloned(),
            )?);
        }

        self.repo.create_predictions(&records).await?;
        Ok(records)
    }
}
