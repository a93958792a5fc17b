use async_trait::async_trait;
use uuid::Uuid;

use super::models::{PredictionRecord, ReportDocument, UploadedImage, User, UserActivity};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Item not found")]
    NotFound,
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

/// Persistence for the five entities. Implementations enforce the cascade
/// rules: users own images and reports, images own predictions, and a report's
/// prediction reference is cleared rather than cascaded.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn upsert_user(&self, user: &User) -> Result<(), RepositoryError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    /// Deletes all of the user's images, predictions, reports and activity,
    /// then keeps the user row deactivated so an outstanding token cannot
    /// bring the account back. Returns false if no such user exists.
    async fn delete_user(&self, id: Uuid) -> Result<bool, RepositoryError>;

    async fn create_image(&self, image: &UploadedImage) -> Result<(), RepositoryError>;

    async fn get_image(&self, id: Uuid) -> Result<Option<UploadedImage>, RepositoryError>;

    /// Newest first.
    async fn list_images(&self, user_id: Uuid) -> Result<Vec<UploadedImage>, RepositoryError>;

    async fn update_image(&self, image: &UploadedImage) -> Result<(), RepositoryError>;

    async fn delete_image(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// All records are written or none are.
    async fn create_predictions(&self, records: &[PredictionRecord]) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn list_predictions_for_image(
        &self,
        image_id: Uuid,
    ) -> Result<Vec<PredictionRecord>, RepositoryError>;

    async fn list_predictions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PredictionRecord>, RepositoryError>;

    async fn create_report(&self, report: &ReportDocument) -> Result<(), RepositoryError>;

    async fn get_report(&self, id: Uuid) -> Result<Option<ReportDocument>, RepositoryError>;

    /// Newest first.
    async fn list_reports(&self, user_id: Uuid) -> Result<Vec<ReportDocument>, RepositoryError>;

    /// Overwrites an existing report; `NotFound` if it was never created.
    async fn update_report(&self, report: &ReportDocument) -> Result<(), RepositoryError>;

    async fn record_activity(&self, activity: &UserActivity) -> Result<(), RepositoryError>;

    /// Newest first, at most `limit` entries.
    async fn list_activities(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<UserActivity>, RepositoryError>;
}
