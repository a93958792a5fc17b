use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{PredictionRecord, ReportDocument, UploadedImage, User, UserActivity};
use super::repository::{Repository, RepositoryError};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    images: HashMap<Uuid, UploadedImage>,
    predictions: HashMap<Uuid, PredictionRecord>,
    reports: HashMap<Uuid, ReportDocument>,
    activities: HashMap<Uuid, UserActivity>,
}

impl Tables {
    fn remove_image_cascade(&mut self, image_id: Uuid) -> bool {
        if self.images.remove(&image_id).is_none() {
            return false;
        }
        self.remove_predictions(|p| p.image_id == image_id);
        true
    }

    /// Drops matching predictions and clears report references to them.
    fn remove_predictions<F>(&mut self, matches: F)
    where
        F: Fn(&PredictionRecord) -> bool,
    {
        let removed: Vec<Uuid> = self
            .predictions
            .values()
            .filter(|p| matches(p))
            .map(|p| p.id)
            .collect();
        for id in &removed {
            self.predictions.remove(id);
        }
        for report in self.reports.values_mut() {
            if report
                .detection_result
                .is_some_and(|id| removed.contains(&id))
            {
                report.detection_result = None;
            }
        }
    }
}

/// Process-local store, used by default and in tests.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> chrono::DateTime<chrono::Utc>,
{
    items.sort_by(|a, b| key(b).cmp(&key(a)));
    items
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn upsert_user(&self, user: &User) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.is_active = false;
                user.updated_at = chrono::Utc::now();
            }
            None => return Ok(false),
        }
        let image_ids: Vec<Uuid> = tables
            .images
            .values()
            .filter(|i| i.user_id == id)
            .map(|i| i.id)
            .collect();
        for image_id in image_ids {
            tables.remove_image_cascade(image_id);
        }
        // Predictions the user requested on someone else's image go too.
        tables.remove_predictions(|p| p.user_id == id);
        tables.reports.retain(|_, r| r.user_id != id);
        tables.activities.retain(|_, a| a.user_id != id);
        Ok(true)
    }

    async fn create_image(&self, image: &UploadedImage) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&image.user_id) {
            return Err(RepositoryError::InvalidData(format!(
                "image owner {} does not exist",
                image.user_id
            )));
        }
        tables.images.insert(image.id, image.clone());
        Ok(())
    }

    async fn get_image(&self, id: Uuid) -> Result<Option<UploadedImage>, RepositoryError> {
        Ok(self.tables.read().await.images.get(&id).cloned())
    }

    async fn list_images(&self, user_id: Uuid) -> Result<Vec<UploadedImage>, RepositoryError> {
        let tables = self.tables.read().await;
        let images = tables
            .images
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(images, |i| i.upload_date))
    }

    async fn update_image(&self, image: &UploadedImage) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.images.get_mut(&image.id) {
            Some(existing) => {
                *existing = image.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn delete_image(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(self.tables.write().await.remove_image_cascade(id))
    }

    async fn create_predictions(&self, records: &[PredictionRecord]) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        for record in records {
            if !tables.images.contains_key(&record.image_id) {
                return Err(RepositoryError::InvalidData(format!(
                    "prediction references missing image {}",
                    record.image_id
                )));
            }
        }
        for record in records {
            tables.predictions.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn list_predictions_for_image(
        &self,
        image_id: Uuid,
    ) -> Result<Vec<PredictionRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        let records = tables
            .predictions
            .values()
            .filter(|p| p.image_id == image_id)
            .cloned()
            .collect();
        Ok(newest_first(records, |p| p.created_at))
    }

    async fn list_predictions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PredictionRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        let records = tables
            .predictions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(records, |p| p.created_at))
    }

    async fn create_report(&self, report: &ReportDocument) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if let Some(prediction_id) = report.detection_result {
            if !tables.predictions.contains_key(&prediction_id) {
                return Err(RepositoryError::InvalidData(format!(
                    "report references missing prediction {}",
                    prediction_id
                )));
            }
        }
        tables.reports.insert(report.id, report.clone());
        Ok(())
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<ReportDocument>, RepositoryError> {
        Ok(self.tables.read().await.reports.get(&id).cloned())
    }

    async fn list_reports(&self, user_id: Uuid) -> Result<Vec<ReportDocument>, RepositoryError> {
        let tables = self.tables.read().await;
        let reports = tables
            .reports
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(reports, |r| r.generated_at))
    }

    async fn update_report(&self, report: &ReportDocument) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        match tables.reports.get_mut(&report.id) {
            Some(existing) => {
                *existing = report.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn record_activity(&self, activity: &UserActivity) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&activity.user_id) {
            return Err(RepositoryError::InvalidData(format!(
                "activity owner {} does not exist",
                activity.user_id
            )));
        }
        tables.activities.insert(activity.id, activity.clone());
        Ok(())
    }

    async fn list_activities(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<UserActivity>, RepositoryError> {
        let tables = self.tables.read().await;
        let activities = tables
            .activities
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        let mut activities = newest_first(activities, |a| a.timestamp);
        activities.truncate(limit);
        Ok(activities)
    }
}
